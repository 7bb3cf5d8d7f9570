//! Wiring of the worker's components from configuration.

use std::sync::Arc;

use reelgen_media::{BackgroundLibrary, CompositionConfig, CompositionEngine, EncoderPool};
use tracing::{info, warn};

use crate::config::{StoreBackend, WorkerConfig};
use crate::error::WorkerResult;
use crate::ledger::EntitlementLedger;
use crate::payment::CryptoPayClient;
use crate::reconciler::Reconciler;
use crate::script::OpenAiScriptWriter;
use crate::session::{SessionDeps, SessionEngine, SessionSettings, Transport};
use crate::speech::SpeechSynthesizer;
use crate::store::{FirestoreStore, MemoryStore, Store};

/// Long-lived components shared by transports and background tasks.
pub struct Services {
    pub store: Arc<dyn Store>,
    pub ledger: Arc<EntitlementLedger>,
    pub reconciler: Arc<Reconciler>,
    pub engine: Arc<SessionEngine>,
}

impl Services {
    /// Connect the configured store and build everything on top of it.
    pub async fn build(config: &WorkerConfig, transport: Arc<dyn Transport>) -> WorkerResult<Self> {
        let store: Arc<dyn Store> = match config.store_backend {
            StoreBackend::Firestore => Arc::new(FirestoreStore::from_env().await?),
            StoreBackend::Memory => {
                warn!("Using the in-memory store, state is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        tokio::fs::create_dir_all(&config.work_dir).await?;
        tokio::fs::create_dir_all(&config.output_dir).await?;

        Self::with_store(config, store, transport)
    }

    pub fn with_store(
        config: &WorkerConfig,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
    ) -> WorkerResult<Self> {
        let ledger = Arc::new(EntitlementLedger::new(store.clone(), config.limits.clone()));

        let writer = Arc::new(OpenAiScriptWriter::new(
            config.script.clone(),
            config.request_timeout,
        )?);
        let narrator = Arc::new(SpeechSynthesizer::from_config(
            &config.speech,
            config.request_timeout,
        )?);
        let composer = Arc::new(CompositionEngine::new(
            BackgroundLibrary::new(config.asset_dir.clone()),
            EncoderPool::new(config.encoder_pool_size),
            CompositionConfig::new(config.work_dir.clone()).with_timeout(config.encode_timeout),
        ));
        let gateway = Arc::new(CryptoPayClient::new(
            config.payment.clone(),
            config.request_timeout,
        )?);

        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            ledger.clone(),
            gateway,
            transport.clone(),
            config.invoice_max_age,
        ));

        let engine = Arc::new(SessionEngine::new(
            SessionDeps {
                store: store.clone(),
                ledger: ledger.clone(),
                writer,
                narrator,
                composer,
                reconciler: reconciler.clone(),
                transport,
            },
            SessionSettings {
                work_dir: config.work_dir.clone(),
                output_dir: config.output_dir.clone(),
                admin_ids: config.admin_ids.clone(),
                price_currency: config.payment.fiat.clone(),
            },
        ));

        info!(
            assets = %config.asset_dir.display(),
            encoders = config.encoder_pool_size,
            admins = config.admin_ids.len(),
            "Services ready"
        );

        Ok(Self {
            store,
            ledger,
            reconciler,
            engine,
        })
    }
}
