//! Payment-to-entitlement reconciler.
//!
//! Turns paid invoices into ledger mutations. The grant and the invoice's
//! `completed` status are written together, so a paid invoice is either
//! still open and retried by the next check or fully applied exactly once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reelgen_models::{
    quote_amount, InvoiceIntent, InvoiceStatus, ProviderInvoiceStatus, PurchaseKind, UserId,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::ledger::EntitlementLedger;
use crate::metrics::{record_invoice_settled, record_sweep_duration};
use crate::payment::PaymentGateway;
use crate::retry::FailureTracker;
use crate::session::{OutgoingMessage, Transport};
use crate::store::Store;

/// Result of checking one invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// This call applied the purchase.
    Completed(PurchaseKind),
    AlreadyCompleted,
    /// Not paid yet, or the provider could not be reached.
    Pending,
    Expired,
}

impl ReconcileOutcome {
    pub fn user_message(&self) -> &'static str {
        match self {
            ReconcileOutcome::Completed(_) => "Payment received. Your purchase is active.",
            ReconcileOutcome::AlreadyCompleted => "This payment has already been applied.",
            ReconcileOutcome::Pending => {
                "Payment not received yet. Pay using the link, then check again."
            }
            ReconcileOutcome::Expired => "This invoice has expired. Start a new purchase with /buy.",
        }
    }
}

/// Totals from one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    ledger: Arc<EntitlementLedger>,
    gateway: Arc<dyn PaymentGateway>,
    transport: Arc<dyn Transport>,
    /// Open invoices older than this are skipped by the sweep.
    max_age: Duration,
    shutdown: watch::Sender<bool>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<EntitlementLedger>,
        gateway: Arc<dyn PaymentGateway>,
        transport: Arc<dyn Transport>,
        max_age: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            ledger,
            gateway,
            transport,
            max_age,
            shutdown,
        }
    }

    /// Quote, issue and persist an invoice for `kind`.
    pub async fn start_purchase(&self, user_id: UserId, kind: PurchaseKind) -> WorkerResult<InvoiceIntent> {
        let price = kind
            .price()
            .ok_or_else(|| WorkerError::invalid_input("This item is no longer available."))?;
        let title = kind.title().unwrap_or("ReelGen purchase");

        let rate = self
            .gateway
            .get_rate()
            .await
            .ok_or_else(|| WorkerError::PaymentUnavailable("exchange rate unavailable".into()))?;
        let amount = quote_amount(price, rate)
            .ok_or_else(|| WorkerError::PaymentUnavailable(format!("invalid rate {}", rate)))?;
        let invoice = self
            .gateway
            .create_invoice(amount, user_id, title)
            .await
            .ok_or_else(|| WorkerError::PaymentUnavailable("invoice creation failed".into()))?;

        let intent = InvoiceIntent::new(invoice.invoice_id, user_id, kind, amount, self.gateway.asset())
            .with_pay_url(invoice.pay_url);
        self.store.save_invoice(&intent).await?;
        info!(
            user_id = %user_id,
            invoice_id = %intent.id,
            kind = intent.kind.kind_str(),
            item = intent.kind.item_id(),
            amount,
            "Created invoice"
        );
        Ok(intent)
    }

    /// Pull check of one invoice.
    pub async fn check(&self, invoice_id: &str) -> WorkerResult<ReconcileOutcome> {
        let intent = self
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| WorkerError::IntentNotFound(invoice_id.to_string()))?;
        self.reconcile(&intent).await
    }

    /// Pull check on behalf of a user. Other users' invoices read as missing.
    pub async fn check_for_user(&self, user_id: UserId, invoice_id: &str) -> WorkerResult<ReconcileOutcome> {
        let intent = self
            .store
            .get_invoice(invoice_id)
            .await?
            .filter(|intent| intent.user_id == user_id)
            .ok_or_else(|| WorkerError::IntentNotFound(invoice_id.to_string()))?;
        self.reconcile(&intent).await
    }

    async fn reconcile(&self, intent: &InvoiceIntent) -> WorkerResult<ReconcileOutcome> {
        if intent.status == InvoiceStatus::Completed {
            return Ok(ReconcileOutcome::AlreadyCompleted);
        }

        match self.gateway.check_invoice(&intent.id).await {
            Some(ProviderInvoiceStatus::Paid) => self.settle(intent).await,
            Some(ProviderInvoiceStatus::Expired) => {
                debug!(invoice_id = %intent.id, "Invoice expired");
                Ok(ReconcileOutcome::Expired)
            }
            Some(ProviderInvoiceStatus::Active) | None => Ok(ReconcileOutcome::Pending),
        }
    }

    async fn settle(&self, intent: &InvoiceIntent) -> WorkerResult<ReconcileOutcome> {
        let entitlement = intent.kind.entitlement().ok_or_else(|| {
            WorkerError::invalid_input(format!("unknown catalog item {}", intent.kind.item_id()))
        })?;

        self.store.mark_invoice_paid(&intent.id).await?;
        let settled = match self.ledger.settle_invoice(&intent.id, entitlement).await {
            Ok(settled) => settled,
            Err(e) => {
                error!(invoice_id = %intent.id, error = %e, "Settlement failed, invoice stays open");
                return Err(e);
            }
        };
        if settled.is_none() {
            debug!(invoice_id = %intent.id, "Invoice settled by another caller");
            return Ok(ReconcileOutcome::AlreadyCompleted);
        }

        record_invoice_settled(intent.kind.kind_str());
        info!(
            user_id = %intent.user_id,
            invoice_id = %intent.id,
            item = intent.kind.item_id(),
            "Invoice settled"
        );

        let text = format!("Payment received. {}", entitlement.describe());
        if let Err(e) = self
            .transport
            .send(intent.user_id, OutgoingMessage::text(text))
            .await
        {
            warn!(user_id = %intent.user_id, error = %e, "Failed to notify user about payment");
        }

        Ok(ReconcileOutcome::Completed(intent.kind.clone()))
    }

    /// Check every open invoice. Unpaid ones older than the maximum age are
    /// skipped; paid ones are retried until they settle.
    pub async fn sweep(&self, tracker: &mut FailureTracker) -> WorkerResult<SweepReport> {
        let started = Instant::now();
        let open = self.store.list_open_invoices().await?;
        let max_age = chrono::Duration::from_std(self.max_age).unwrap_or_else(|_| chrono::Duration::days(3650));
        let cutoff = Utc::now() - max_age;

        let mut report = SweepReport::default();
        let due = open
            .iter()
            .filter(|i| i.status != InvoiceStatus::Created || i.created_at >= cutoff);
        for intent in due {
            report.checked += 1;
            match self.reconcile(intent).await {
                Ok(outcome) => {
                    if matches!(outcome, ReconcileOutcome::Completed(_)) {
                        report.completed += 1;
                    }
                    tracker.record_success();
                }
                Err(e) => {
                    report.failed += 1;
                    if tracker.record_failure() {
                        warn!(invoice_id = %intent.id, error = %e, "Failed to reconcile invoice");
                    }
                }
            }
        }

        record_sweep_duration(started.elapsed().as_secs_f64());
        if report.checked > 0 {
            info!(
                checked = report.checked,
                completed = report.completed,
                failed = report.failed,
                "Payment sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep every `interval` until [`Reconciler::shutdown`] is called.
    pub async fn run(&self, interval: Duration) {
        info!(interval_secs = interval.as_secs(), "Starting payment sweep");
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(interval);
        let mut tracker = FailureTracker::new(5);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping payment sweep");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(&mut tracker).await {
                        if tracker.record_failure() {
                            error!("Payment sweep failed: {}", e);
                        }
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::{MockPaymentGateway, ProviderInvoice};
    use crate::session::MockTransport;
    use crate::store::testing::InterceptStore;
    use crate::store::MemoryStore;
    use reelgen_models::{LimitTable, PlanTier};

    struct Fixture<S = MemoryStore> {
        store: Arc<S>,
        reconciler: Reconciler,
    }

    fn fixture(gateway: MockPaymentGateway, transport: MockTransport) -> Fixture {
        fixture_with(MemoryStore::new(), gateway, transport)
    }

    fn fixture_with<S: Store + 'static>(
        store: S,
        gateway: MockPaymentGateway,
        transport: MockTransport,
    ) -> Fixture<S> {
        let store = Arc::new(store);
        let ledger = Arc::new(EntitlementLedger::new(store.clone(), LimitTable::default()));
        let reconciler = Reconciler::new(
            store.clone(),
            ledger,
            Arc::new(gateway),
            Arc::new(transport),
            Duration::from_secs(48 * 3600),
        );
        Fixture { store, reconciler }
    }

    fn quiet_transport() -> MockTransport {
        let mut transport = MockTransport::new();
        transport.expect_send().returning(|_, _| Ok(()));
        transport
    }

    async fn open_intent(store: &dyn Store, id: &str, kind: PurchaseKind) {
        let intent = InvoiceIntent::new(id, UserId(5), kind, 4.86, "USDT");
        store.save_invoice(&intent).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_purchase_persists_intent() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_get_rate().returning(|| Some(92.5));
        gateway
            .expect_create_invoice()
            .withf(|amount, user, description| {
                *amount == 4.86 && *user == UserId(5) && description.to_string() == "5 videos"
            })
            .returning(|_, _, _| {
                Some(ProviderInvoice {
                    invoice_id: "inv-9".into(),
                    status: ProviderInvoiceStatus::Active,
                    pay_url: "https://pay.example/inv-9".into(),
                })
            });
        gateway.expect_asset().return_const("USDT".to_string());

        let f = fixture(gateway, MockTransport::new());
        let intent = f
            .reconciler
            .start_purchase(UserId(5), PurchaseKind::pack("pack5"))
            .await
            .unwrap();

        assert_eq!(intent.status, InvoiceStatus::Created);
        assert_eq!(intent.pay_url.as_deref(), Some("https://pay.example/inv-9"));
        let stored = f.store.get_invoice("inv-9").await.unwrap().unwrap();
        assert_eq!(stored.amount, 4.86);
        assert_eq!(stored.asset, "USDT");
    }

    #[tokio::test]
    async fn test_start_purchase_without_rate() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_get_rate().returning(|| None);
        gateway.expect_create_invoice().never();

        let f = fixture(gateway, MockTransport::new());
        let err = f
            .reconciler
            .start_purchase(UserId(5), PurchaseKind::subscription("lite_30"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::PaymentUnavailable(_)));
        assert!(f.store.list_open_invoices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_paid_pack_granted_once() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_check_invoice()
            .returning(|_| Some(ProviderInvoiceStatus::Paid));
        let mut transport = MockTransport::new();
        transport.expect_send().times(1).returning(|_, _| Ok(()));

        let f = fixture(gateway, transport);
        open_intent(f.store.as_ref(), "inv-1", PurchaseKind::pack("pack5")).await;

        let first = f.reconciler.check("inv-1").await.unwrap();
        assert_eq!(first, ReconcileOutcome::Completed(PurchaseKind::pack("pack5")));
        let second = f.reconciler.check("inv-1").await.unwrap();
        assert_eq!(second, ReconcileOutcome::AlreadyCompleted);

        let account = f.store.get_account(UserId(5)).await.unwrap().unwrap();
        assert_eq!(account.credits, 5);
        let intent = f.store.get_invoice("inv-1").await.unwrap().unwrap();
        assert_eq!(intent.status, InvoiceStatus::Completed);
    }

    #[tokio::test]
    async fn test_concurrent_checks_grant_once() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_check_invoice()
            .returning(|_| Some(ProviderInvoiceStatus::Paid));

        let f = fixture(gateway, quiet_transport());
        open_intent(f.store.as_ref(), "inv-2", PurchaseKind::pack("pack10")).await;

        let (a, b) = tokio::join!(f.reconciler.check("inv-2"), f.reconciler.check("inv-2"));
        let completed = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|o| matches!(o, ReconcileOutcome::Completed(_)))
            .count();
        assert_eq!(completed, 1);
        let account = f.store.get_account(UserId(5)).await.unwrap().unwrap();
        assert_eq!(account.credits, 10);
    }

    #[tokio::test]
    async fn test_subscription_applied() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_check_invoice()
            .returning(|_| Some(ProviderInvoiceStatus::Paid));

        let f = fixture(gateway, quiet_transport());
        open_intent(f.store.as_ref(), "inv-3", PurchaseKind::subscription("premium_90")).await;

        f.reconciler.check("inv-3").await.unwrap();
        let account = f.store.get_account(UserId(5)).await.unwrap().unwrap();
        assert_eq!(account.tier, PlanTier::Premium);
        assert_eq!(account.days_left(Utc::now()), 89);
    }

    #[tokio::test]
    async fn test_pending_and_expired_leave_intent_open() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_check_invoice()
            .withf(|id| id.to_string() == "active")
            .returning(|_| Some(ProviderInvoiceStatus::Active));
        gateway
            .expect_check_invoice()
            .withf(|id| id.to_string() == "gone")
            .returning(|_| Some(ProviderInvoiceStatus::Expired));

        let f = fixture(gateway, MockTransport::new());
        open_intent(f.store.as_ref(), "active", PurchaseKind::pack("single")).await;
        open_intent(f.store.as_ref(), "gone", PurchaseKind::pack("single")).await;

        assert_eq!(f.reconciler.check("active").await.unwrap(), ReconcileOutcome::Pending);
        assert_eq!(f.reconciler.check("gone").await.unwrap(), ReconcileOutcome::Expired);
        assert!(f.store.get_account(UserId(5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_intent() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_check_invoice().never();

        let f = fixture(gateway, MockTransport::new());
        let err = f.reconciler.check("nope").await.unwrap_err();
        assert!(matches!(err, WorkerError::IntentNotFound(_)));
    }

    #[tokio::test]
    async fn test_other_users_invoice_is_hidden() {
        let f = fixture(MockPaymentGateway::new(), MockTransport::new());
        open_intent(f.store.as_ref(), "inv-4", PurchaseKind::pack("single")).await;

        let err = f
            .reconciler
            .check_for_user(UserId(6), "inv-4")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::IntentNotFound(_)));
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_undo_grant() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_check_invoice()
            .returning(|_| Some(ProviderInvoiceStatus::Paid));
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .returning(|_, _| Err(WorkerError::DeliveryFailed("blocked".into())));

        let f = fixture(gateway, transport);
        open_intent(f.store.as_ref(), "inv-5", PurchaseKind::pack("single")).await;

        let outcome = f.reconciler.check("inv-5").await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Completed(_)));
        let account = f.store.get_account(UserId(5)).await.unwrap().unwrap();
        assert_eq!(account.credits, 1);
    }

    #[tokio::test]
    async fn test_sweep_skips_stale_invoices() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_check_invoice()
            .withf(|id| id.to_string() == "fresh")
            .times(1)
            .returning(|_| Some(ProviderInvoiceStatus::Paid));

        let f = fixture(gateway, quiet_transport());
        open_intent(f.store.as_ref(), "fresh", PurchaseKind::pack("pack20")).await;
        let mut stale = InvoiceIntent::new("stale", UserId(5), PurchaseKind::pack("single"), 1.0, "USDT");
        stale.created_at = Utc::now() - chrono::Duration::days(5);
        f.store.save_invoice(&stale).await.unwrap();

        let mut tracker = FailureTracker::new(5);
        let report = f.reconciler.sweep(&mut tracker).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                checked: 1,
                completed: 1,
                failed: 0
            }
        );
        let account = f.store.get_account(UserId(5)).await.unwrap().unwrap();
        assert_eq!(account.credits, 20);
    }

    #[tokio::test]
    async fn test_failed_settlement_is_retried_by_next_check() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_check_invoice()
            .returning(|_| Some(ProviderInvoiceStatus::Paid));
        let mut transport = MockTransport::new();
        transport.expect_send().times(1).returning(|_, _| Ok(()));

        let f = fixture_with(InterceptStore::new().fail_settlements(1), gateway, transport);
        open_intent(f.store.as_ref(), "inv-6", PurchaseKind::pack("pack5")).await;

        let err = f.reconciler.check("inv-6").await.unwrap_err();
        assert!(matches!(err, WorkerError::Store(_)));
        let intent = f.store.get_invoice("inv-6").await.unwrap().unwrap();
        assert_eq!(intent.status, InvoiceStatus::Paid);
        assert!(f.store.get_account(UserId(5)).await.unwrap().is_none());

        let outcome = f.reconciler.check("inv-6").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Completed(PurchaseKind::pack("pack5")));
        let account = f.store.get_account(UserId(5)).await.unwrap().unwrap();
        assert_eq!(account.credits, 5);
    }

    #[tokio::test]
    async fn test_sweep_retries_old_paid_invoices() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_check_invoice()
            .withf(|id| id.to_string() == "old-paid")
            .times(1)
            .returning(|_| Some(ProviderInvoiceStatus::Paid));

        let f = fixture(gateway, quiet_transport());
        let mut old = InvoiceIntent::new("old-paid", UserId(5), PurchaseKind::pack("pack10"), 8.5, "USDT");
        old.created_at = Utc::now() - chrono::Duration::days(5);
        old.status = InvoiceStatus::Paid;
        f.store.save_invoice(&old).await.unwrap();

        let mut tracker = FailureTracker::new(5);
        let report = f.reconciler.sweep(&mut tracker).await.unwrap();
        assert_eq!(report.completed, 1);
        let account = f.store.get_account(UserId(5)).await.unwrap().unwrap();
        assert_eq!(account.credits, 10);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(MockPaymentGateway::new(), MockTransport::new());
        let reconciler = Arc::new(f.reconciler);
        let runner = reconciler.clone();
        let handle = tokio::spawn(async move { runner.run(Duration::from_secs(3600)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        reconciler.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
