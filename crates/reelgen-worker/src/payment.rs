//! Payment provider gateway.
//!
//! Crypto Pay style HTTP API: `getExchangeRates`, `createInvoice` and
//! `getInvoices`, authenticated by the `Crypto-Pay-API-Token` header. Every
//! call degrades to `None` after its retries run out.

use std::time::Duration;

use async_trait::async_trait;
use reelgen_models::{ProviderInvoiceStatus, UserId};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PaymentConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::http::{build_client, check_status, map_send_error};
use crate::metrics::record_provider_call;
use crate::retry::{retry_async, RetryPolicy};

const AUTH_HEADER: &str = "Crypto-Pay-API-Token";

/// An invoice as issued by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderInvoice {
    pub invoice_id: String,
    pub status: ProviderInvoiceStatus,
    pub pay_url: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Asset units per fiat unit conversion rate.
    async fn get_rate(&self) -> Option<f64>;

    async fn create_invoice(
        &self,
        amount: f64,
        user_id: UserId,
        description: &str,
    ) -> Option<ProviderInvoice>;

    async fn check_invoice(&self, invoice_id: &str) -> Option<ProviderInvoiceStatus>;

    /// Asset invoices are issued in.
    fn asset(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    #[serde(default = "Option::default")]
    result: Option<T>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ExchangeRate {
    source: String,
    target: String,
    rate: String,
    #[serde(default = "default_true")]
    is_valid: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct InvoiceBody {
    invoice_id: serde_json::Value,
    status: String,
    #[serde(default, alias = "bot_invoice_url")]
    pay_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceList {
    #[serde(default)]
    items: Vec<InvoiceBody>,
}

#[derive(Debug, Serialize)]
struct CreateInvoiceRequest<'a> {
    asset: &'a str,
    amount: String,
    description: &'a str,
    payload: String,
    allow_comments: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    paid_btn_name: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    paid_btn_url: Option<&'a str>,
}

fn invoice_id_string(raw: &serde_json::Value) -> Option<String> {
    match raw {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Client statuses that will not change on another attempt.
fn is_worth_retrying(err: &WorkerError) -> bool {
    !matches!(
        err,
        WorkerError::Rejected {
            status: 400 | 401 | 403 | 404,
            ..
        }
    )
}

pub struct CryptoPayClient {
    client: Client,
    config: PaymentConfig,
    policy: RetryPolicy,
}

impl CryptoPayClient {
    pub fn new(config: PaymentConfig, timeout: Duration) -> WorkerResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            config,
            policy: RetryPolicy::linear("crypto_pay", 3, Duration::from_secs(2)),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn call_once<T, Q, B>(
        &self,
        endpoint: &str,
        query: Option<&Q>,
        body: Option<&B>,
    ) -> WorkerResult<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized + Sync,
        B: Serialize + ?Sized + Sync,
    {
        let url = format!("{}/{}", self.config.base_url, endpoint);
        let mut request = match body {
            Some(body) => self.client.post(&url).json(body),
            None => self.client.get(&url),
        };
        if let Some(query) = query {
            request = request.query(query);
        }

        let response = request
            .header(AUTH_HEADER, &self.config.token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| map_send_error(endpoint, e))?;
        let response = check_status(endpoint, response).await?;
        let envelope: Envelope<T> = response.json().await?;

        match envelope {
            Envelope {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            Envelope { error, .. } => Err(WorkerError::provider(format!(
                "{} returned an error: {}",
                endpoint,
                error.map(|e| e.to_string()).unwrap_or_else(|| "no result".into())
            ))),
        }
    }

    async fn call<T, Q, B>(&self, endpoint: &'static str, query: Option<&Q>, body: Option<&B>) -> Option<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized + Sync,
        B: Serialize + ?Sized + Sync,
    {
        let result = retry_async(&self.policy, is_worth_retrying, || {
            self.call_once::<T, Q, B>(endpoint, query, body)
        })
        .await;
        record_provider_call("crypto_pay", result.is_ok());
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(endpoint, error = %e, "Payment provider call failed");
                None
            }
        }
    }
}

#[async_trait]
impl PaymentGateway for CryptoPayClient {
    async fn get_rate(&self) -> Option<f64> {
        let rates: Vec<ExchangeRate> = self
            .call::<_, (), ()>("getExchangeRates", None, None)
            .await?;
        let rate = rates
            .iter()
            .filter(|r| r.is_valid)
            .find(|r| r.source == self.config.asset && r.target == self.config.fiat)
            .and_then(|r| r.rate.parse::<f64>().ok())
            .filter(|r| r.is_finite() && *r > 0.0);
        debug!(asset = %self.config.asset, fiat = %self.config.fiat, ?rate, "Fetched exchange rate");
        rate
    }

    async fn create_invoice(
        &self,
        amount: f64,
        user_id: UserId,
        description: &str,
    ) -> Option<ProviderInvoice> {
        let request = CreateInvoiceRequest {
            asset: &self.config.asset,
            amount: format!("{:.2}", amount),
            description,
            payload: user_id.to_string(),
            allow_comments: false,
            paid_btn_name: self.config.return_url.as_ref().map(|_| "callback"),
            paid_btn_url: self.config.return_url.as_deref(),
        };
        let body: InvoiceBody = self
            .call::<_, (), _>("createInvoice", None, Some(&request))
            .await?;

        let invoice_id = invoice_id_string(&body.invoice_id)?;
        let status = ProviderInvoiceStatus::from_str(&body.status)?;
        let pay_url = body.pay_url?;
        Some(ProviderInvoice {
            invoice_id,
            status,
            pay_url,
        })
    }

    async fn check_invoice(&self, invoice_id: &str) -> Option<ProviderInvoiceStatus> {
        let query = [("invoice_ids", invoice_id)];
        let list: InvoiceList = self
            .call::<_, _, ()>("getInvoices", Some(&query[..]), None)
            .await?;
        let item = list.items.into_iter().next()?;
        ProviderInvoiceStatus::from_str(&item.status)
    }

    fn asset(&self) -> &str {
        &self.config.asset
    }
}
