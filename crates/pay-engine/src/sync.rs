//! # Catalog Sync
//!
//! Mirrors each provider's sellable catalog into the [`CatalogStore`].
//!
//! At most one sync runs per provider, guarded by a [`CacheLock`] under
//! `catalog_sync_{provider}`. A second sync that finds the lock held returns
//! [`PaymentError::LockContention`] at once.

use crate::jobs::{Job, JobPolicy, Queue};
use crate::lock::CacheLock;
use async_trait::async_trait;
use pay_core::{
    Alert, BoxedProvider, Cache, CatalogStore, CatalogWriteSummary, EventBus, Notifier,
    PaymentError, PaymentEvent, PaymentResult, ProviderKey, ProviderRegistry, ProviderSyncStatus,
    Severity, SyncState,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

pub const SYNC_LOCK_TTL: Duration = Duration::from_secs(3600);
pub const SYNC_RESULT_TTL: Duration = Duration::from_secs(24 * 3600);

/// Options for one sync run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Fetch at most this many items
    pub limit: Option<usize>,
    /// Fetch and count without writing anything
    pub dry_run: bool,
}

/// Result of a sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub provider: ProviderKey,
    pub dry_run: bool,
    pub items_fetched: usize,
    pub summary: CatalogWriteSummary,
    pub duration_ms: u64,
}

pub struct CatalogSync {
    registry: Arc<ProviderRegistry>,
    catalog: Arc<dyn CatalogStore>,
    cache: Arc<dyn Cache>,
    events: Arc<dyn EventBus>,
    notifier: Arc<dyn Notifier>,
}

impl CatalogSync {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        catalog: Arc<dyn CatalogStore>,
        cache: Arc<dyn Cache>,
        events: Arc<dyn EventBus>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registry,
            catalog,
            cache,
            events,
            notifier,
        }
    }

    pub fn lock_key(provider: ProviderKey) -> String {
        format!("catalog_sync_{}", provider)
    }

    pub fn result_key(provider: ProviderKey) -> String {
        format!("catalog_sync_result_{}", provider)
    }

    /// Active providers that publish a catalog
    pub fn syncable_providers(&self) -> Vec<ProviderKey> {
        self.registry
            .iter()
            .filter(|p| p.supports_catalog())
            .map(|p| p.key())
            .collect()
    }

    /// Sync one provider under its exclusive lock
    #[instrument(skip(self), fields(provider = %provider))]
    pub async fn sync_provider(&self, provider: ProviderKey, options: SyncOptions) -> PaymentResult<SyncReport> {
        let adapter = self.registry.get(provider).ok_or_else(|| PaymentError::ProviderNotFound {
            provider: provider.to_string(),
        })?;
        if !adapter.supports_catalog() {
            return Err(PaymentError::Unsupported {
                provider: provider.to_string(),
                operation: "fetch_catalog".to_string(),
            });
        }

        let key = Self::lock_key(provider);
        let Some(lock) = CacheLock::acquire(self.cache.clone(), key.as_str(), SYNC_LOCK_TTL).await? else {
            warn!(%key, "Catalog sync already running, skipping");
            return Err(PaymentError::LockContention { key });
        };

        let result = self.run(adapter, options).await;
        if let Err(e) = &result {
            if !options.dry_run {
                self.record_failure(provider, e).await;
            }
        }

        match lock.release().await {
            Ok(true) => {}
            Ok(false) => warn!(%key, "Sync lock expired before release"),
            Err(e) => error!(%key, error = %e, "Could not release sync lock"),
        }
        result
    }

    async fn run(&self, adapter: &BoxedProvider, options: SyncOptions) -> PaymentResult<SyncReport> {
        let provider = adapter.key();
        let started = Instant::now();

        if !options.dry_run {
            let mut running = self.catalog.sync_status(provider).await?;
            running.state = SyncState::Running;
            running.error = None;
            self.catalog.record_sync(running).await?;
        }

        let items = adapter
            .fetch_catalog(options.limit)
            .await
            .map_err(|e| e.with_provider(provider.as_str(), "fetch_catalog"))?;
        let items_fetched = items.len();

        let summary = if options.dry_run {
            CatalogWriteSummary::default()
        } else {
            self.catalog.upsert_items(provider, items).await?
        };

        let report = SyncReport {
            provider,
            dry_run: options.dry_run,
            items_fetched,
            summary,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        if options.dry_run {
            info!(items_fetched, "Catalog dry run finished");
            return Ok(report);
        }

        let status = ProviderSyncStatus::completed(provider, report.duration_ms, items_fetched, summary);
        self.catalog.record_sync(status.clone()).await?;

        match serde_json::to_value(&report) {
            Ok(value) => {
                if let Err(e) = self.cache.put(&Self::result_key(provider), value, SYNC_RESULT_TTL).await {
                    warn!(error = %e, "Could not cache sync result");
                }
            }
            Err(e) => warn!(error = %e, "Could not serialize sync result"),
        }
        if let Err(e) = self.events.publish(PaymentEvent::CatalogSynced { status }).await {
            warn!(error = %e, "Could not publish sync event");
        }

        info!(
            items_fetched,
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            duration_ms = report.duration_ms,
            "Catalog sync completed"
        );
        Ok(report)
    }

    /// Cached detail of the last completed sync
    pub async fn last_result(&self, provider: ProviderKey) -> PaymentResult<Option<SyncReport>> {
        match self.cache.get(&Self::result_key(provider)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Record a final failure and tell operators
    pub async fn mark_failed(&self, provider: ProviderKey, error: &PaymentError) {
        self.record_failure(provider, error).await;
        self.notify_failure(provider, error).await;
    }

    /// Move the provider's sync status to `failed`, keeping the last good sync time
    pub async fn record_failure(&self, provider: ProviderKey, error: &PaymentError) {
        let mut status = ProviderSyncStatus::failed(provider, error.to_string());
        if let Ok(previous) = self.catalog.sync_status(provider).await {
            status.last_synced_at = previous.last_synced_at;
        }
        if let Err(e) = self.catalog.record_sync(status).await {
            error!(%provider, error = %e, "Could not record sync failure");
        }
    }

    pub async fn notify_failure(&self, provider: ProviderKey, error: &PaymentError) {
        let alert = Alert::new(
            Severity::Error,
            format!("Catalog sync failed for {}", provider),
            error.to_string(),
            json!({
                "provider": provider,
                "error": error.to_string(),
                "lock_key": Self::lock_key(provider),
            }),
        );
        if let Err(e) = self.notifier.notify(alert).await {
            error!(%provider, error = %e, "Operator alert could not be sent");
        }
    }
}

/// A sync run queued on `catalog-sync`
pub struct CatalogSyncJob {
    sync: Arc<CatalogSync>,
    provider: ProviderKey,
    options: SyncOptions,
}

impl CatalogSyncJob {
    pub fn new(sync: Arc<CatalogSync>, provider: ProviderKey, options: SyncOptions) -> Self {
        Self {
            sync,
            provider,
            options,
        }
    }
}

#[async_trait]
impl Job for CatalogSyncJob {
    fn name(&self) -> String {
        format!("catalog-sync:{}", self.provider)
    }

    fn queue(&self) -> Queue {
        Queue::CatalogSync
    }

    fn policy(&self) -> JobPolicy {
        JobPolicy {
            max_attempts: 2,
            timeout: Duration::from_secs(1800),
            backoff: vec![Duration::from_secs(60), Duration::from_secs(300)],
            retry_window: Some(Duration::from_secs(2 * 3600)),
        }
    }

    async fn run(&self, _attempt: u32) -> PaymentResult<()> {
        self.sync.sync_provider(self.provider, self.options).await.map(|_| ())
    }

    async fn failed(&self, error: &PaymentError) {
        self.sync.mark_failed(self.provider, error).await;
    }
}
