//! # Engine Wiring
//!
//! Builds the registry, the in-memory ports, the job runner and every
//! service on top of them, and hands back one [`Engine`] the HTTP surface
//! and the binary share.

use crate::config::EngineConfig;
use crate::jobs::{JobRunner, JobScheduler, Queue};
use crate::manager::PaymentManager;
use crate::memory::{
    BroadcastEventBus, InMemoryCache, InMemoryCatalogStore, InMemoryDedupStore, InMemoryOrderLookup,
    InMemoryTransactionStore, TracingNotifier,
};
use crate::ops::Ops;
use crate::retry::RetryOrchestrator;
use crate::sessions::CallbackRegistry;
use crate::sync::{CatalogSync, CatalogSyncJob, SyncOptions};
use crate::webhook::{WebhookJob, WebhookPipeline};
use pay_core::{PaymentResult, ProviderKey, ProviderRegistry};
use std::sync::Arc;
use tracing::info;

/// Event bus buffer; slow subscribers past this lag and skip events
const EVENT_BUFFER: usize = 1024;

/// Every long-lived service of a running engine
pub struct Engine {
    pub config: EngineConfig,
    pub manager: Arc<PaymentManager>,
    pub pipeline: Arc<WebhookPipeline>,
    pub retry: Arc<RetryOrchestrator>,
    pub sync: Arc<CatalogSync>,
    pub ops: Ops,
    pub runner: Arc<JobRunner>,
    pub events: Arc<BroadcastEventBus>,
    pub orders: Arc<InMemoryOrderLookup>,
}

impl Engine {
    /// Build from environment: provider credentials, engine settings and routing.
    ///
    /// Providers whose credentials are missing are left out of the registry.
    /// Must be called inside a Tokio runtime.
    pub fn from_env() -> PaymentResult<Self> {
        let config = EngineConfig::from_env()?;
        let routing = config.load_routing()?;
        let registry = ProviderRegistry::build(pay_providers::default_factories()).with_routing(routing);
        Ok(Self::with_registry(registry, config, CallbackRegistry::new()))
    }

    /// Build around an existing registry
    pub fn with_registry(registry: ProviderRegistry, config: EngineConfig, callbacks: CallbackRegistry) -> Self {
        let registry = Arc::new(registry);
        let cache = Arc::new(InMemoryCache::new());
        let events = Arc::new(BroadcastEventBus::new(EVENT_BUFFER));
        let notifier = Arc::new(TracingNotifier);
        let orders = Arc::new(InMemoryOrderLookup::new());

        let runner = Arc::new(JobRunner::start(&[
            (Queue::PaymentWebhooks, config.webhook_workers),
            (Queue::PaymentRetries, config.retry_workers),
            (Queue::CatalogSync, config.sync_workers),
        ]));

        let manager = Arc::new(
            PaymentManager::new(registry.clone(), Arc::new(InMemoryTransactionStore::new()), cache.clone())
                .with_callbacks(callbacks)
                .with_config(config.clone()),
        );
        let pipeline = Arc::new(WebhookPipeline::new(
            manager.clone(),
            Arc::new(InMemoryDedupStore::new()),
            events.clone(),
            notifier.clone(),
        ));
        let scheduler: Arc<dyn JobScheduler> = runner.clone();
        let retry = Arc::new(RetryOrchestrator::new(
            manager.clone(),
            orders.clone(),
            events.clone(),
            scheduler,
        ));
        let sync = Arc::new(CatalogSync::new(
            registry.clone(),
            Arc::new(InMemoryCatalogStore::new()),
            cache,
            events.clone(),
            notifier,
        ));
        let ops = Ops::new(manager.clone(), sync.clone());

        info!(
            providers = registry.keys().len(),
            unavailable = registry.unavailable().len(),
            "Engine ready"
        );

        Self {
            config,
            manager,
            pipeline,
            retry,
            sync,
            ops,
            runner,
            events,
            orders,
        }
    }

    /// Queue a raw webhook delivery on `payment-webhooks`
    pub fn enqueue_webhook(&self, provider: ProviderKey, payload: Vec<u8>, signature: Option<String>) -> PaymentResult<()> {
        let job = WebhookJob::new(self.pipeline.clone(), provider, payload, signature);
        self.runner.dispatch(Arc::new(job))
    }

    /// Queue a catalog sync on `catalog-sync`
    pub fn enqueue_catalog_sync(&self, provider: ProviderKey, options: SyncOptions) -> PaymentResult<()> {
        let job = CatalogSyncJob::new(self.sync.clone(), provider, options);
        self.runner.dispatch(Arc::new(job))
    }

    /// Drain the queues and stop the workers
    pub async fn shutdown(&self) {
        info!("Engine shutting down");
        self.runner.shutdown().await;
    }
}
