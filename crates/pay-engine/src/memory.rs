//! # In-Memory Ports
//!
//! Reference implementations of every port in [`pay_core::ports`], used by
//! the default engine wiring and by tests. Each is a cheap `Clone` handle
//! over `Arc`-shared state so the same store can be handed to the manager,
//! the pipeline and a test assertion.
//!
//! The cache uses `tokio::time::Instant`, so TTLs follow a paused test clock.

use async_trait::async_trait;
use chrono::Utc;
use pay_core::{
    Alert, Cache, CatalogItem, CatalogStore, CatalogWriteSummary, DedupClaim, DedupKey,
    DedupStatus, EntityRef, EventBus, MergeOutcome, Notifier, OrderLookup, PaymentError, PaymentEvent,
    PaymentResult, ProviderKey, ProviderSyncStatus, TransactionData, TransactionQuery,
    TransactionStore, UpsertOutcome, WebhookDedupRecord, WebhookDedupStore,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Transactions keyed by (provider, transaction_id)
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    transactions: Arc<RwLock<HashMap<(ProviderKey, String), TransactionData>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.transactions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.transactions.read().await.is_empty()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn upsert(&self, tx: TransactionData) -> PaymentResult<UpsertOutcome> {
        let mut transactions = self.transactions.write().await;
        let key = (tx.provider, tx.transaction_id.clone());

        match transactions.get_mut(&key) {
            Some(stored) => {
                let outcome = stored.merge(tx);
                if let MergeOutcome::Rejected { current, incoming } = outcome {
                    warn!(
                        provider = %key.0,
                        transaction_id = %key.1,
                        %current,
                        %incoming,
                        "Ignoring status regression"
                    );
                }
                Ok(UpsertOutcome::Merged(outcome))
            }
            None => {
                transactions.insert(key, tx);
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn get(&self, provider: ProviderKey, transaction_id: &str) -> PaymentResult<Option<TransactionData>> {
        let transactions = self.transactions.read().await;
        Ok(transactions.get(&(provider, transaction_id.to_string())).cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> PaymentResult<Option<TransactionData>> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .find(|tx| tx.reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn list(&self, query: &TransactionQuery) -> PaymentResult<Vec<TransactionData>> {
        let transactions = self.transactions.read().await;
        let mut matching: Vec<_> = transactions.values().filter(|tx| query.matches(tx)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }
}

/// Webhook dedup records, unique under [`WebhookDedupRecord::key`]
#[derive(Default, Clone)]
pub struct InMemoryDedupStore {
    records: Arc<Mutex<HashMap<DedupKey, WebhookDedupRecord>>>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl WebhookDedupStore for InMemoryDedupStore {
    async fn claim(&self, record: WebhookDedupRecord) -> PaymentResult<DedupClaim> {
        let key = record
            .key()
            .ok_or_else(|| PaymentError::Internal("webhook has no idempotency key".into()))?;
        let mut records = self.records.lock().await;

        match records.get_mut(&key) {
            Some(existing) if existing.status == DedupStatus::Completed => Ok(DedupClaim::AlreadyCompleted),
            Some(existing) => {
                existing.attempts += 1;
                existing.status = DedupStatus::Processing;
                existing.error = None;
                Ok(DedupClaim::Resume {
                    attempts: existing.attempts,
                })
            }
            None => {
                records.insert(key, record);
                Ok(DedupClaim::New)
            }
        }
    }

    async fn complete(&self, key: &DedupKey, transaction_id: Option<&str>) -> PaymentResult<bool> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(key) else {
            return Ok(false);
        };
        if record.status == DedupStatus::Completed {
            return Ok(false);
        }
        record.status = DedupStatus::Completed;
        record.completed_at = Some(Utc::now());
        record.transaction_id = transaction_id.map(String::from);
        Ok(true)
    }

    async fn fail(&self, key: &DedupKey, error: &str) -> PaymentResult<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(key) {
            if record.status != DedupStatus::Completed {
                record.status = DedupStatus::Failed;
                record.error = Some(error.to_string());
            }
        }
        Ok(())
    }

    async fn find(&self, key: &DedupKey) -> PaymentResult<Option<WebhookDedupRecord>> {
        Ok(self.records.lock().await.get(key).cloned())
    }
}

/// TTL cache with atomic add and compare-and-delete
#[derive(Default, Clone)]
pub struct InMemoryCache {
    entries: Arc<Mutex<HashMap<String, (serde_json::Value, Instant)>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> PaymentResult<Option<serde_json::Value>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, expires)) if *expires <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: serde_json::Value, ttl: Duration) -> PaymentResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn add(&self, key: &str, value: serde_json::Value, ttl: Duration) -> PaymentResult<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|(_, expires)| *expires > now) {
            return Ok(false);
        }
        entries.insert(key.to_string(), (value, now + ttl));
        Ok(true)
    }

    async fn forget(&self, key: &str) -> PaymentResult<bool> {
        Ok(self.entries.lock().await.remove(key).is_some())
    }

    async fn forget_if(&self, key: &str, expected: &serde_json::Value) -> PaymentResult<bool> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires)) if value == expected && *expires > Instant::now() => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Fan-out event bus over `tokio::sync::broadcast`
#[derive(Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<PaymentEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PaymentEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, event: PaymentEvent) -> PaymentResult<()> {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => debug!(event = name, receivers, "Event published"),
            Err(_) => debug!(event = name, "Event published with no subscribers"),
        }
        Ok(())
    }
}

/// Keeps every published event; for assertions and the ops surface
#[derive(Default, Clone)]
pub struct RecordingEventBus {
    events: Arc<Mutex<Vec<PaymentEvent>>>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<PaymentEvent> {
        self.events.lock().await.clone()
    }

    /// Number of events with the given [`PaymentEvent::name`]
    pub async fn count(&self, name: &str) -> usize {
        self.events.lock().await.iter().filter(|e| e.name() == name).count()
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, event: PaymentEvent) -> PaymentResult<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

/// Operator channel that writes alerts to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, alert: Alert) -> PaymentResult<()> {
        error!(
            severity = ?alert.severity,
            title = %alert.title,
            context = %alert.context,
            raised_at = %alert.raised_at,
            "OPERATOR ALERT: {}",
            alert.message
        );
        Ok(())
    }
}

/// Keeps every alert
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: Alert) -> PaymentResult<()> {
        self.alerts.lock().await.push(alert);
        Ok(())
    }
}

/// Catalog items per provider keyed by external id, plus sync status
#[derive(Default, Clone)]
pub struct InMemoryCatalogStore {
    items: Arc<RwLock<HashMap<ProviderKey, BTreeMap<String, CatalogItem>>>>,
    statuses: Arc<RwLock<HashMap<ProviderKey, ProviderSyncStatus>>>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn upsert_items(&self, provider: ProviderKey, items: Vec<CatalogItem>) -> PaymentResult<CatalogWriteSummary> {
        let mut all = self.items.write().await;
        let existing = all.entry(provider).or_default();
        let mut summary = CatalogWriteSummary::default();

        for item in items {
            match existing.get(&item.external_id) {
                Some(current) if *current == item => summary.unchanged += 1,
                Some(_) => {
                    summary.updated += 1;
                    existing.insert(item.external_id.clone(), item);
                }
                None => {
                    summary.created += 1;
                    existing.insert(item.external_id.clone(), item);
                }
            }
        }
        Ok(summary)
    }

    async fn items(&self, provider: ProviderKey) -> PaymentResult<Vec<CatalogItem>> {
        let all = self.items.read().await;
        Ok(all
            .get(&provider)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn record_sync(&self, status: ProviderSyncStatus) -> PaymentResult<()> {
        self.statuses.write().await.insert(status.provider, status);
        Ok(())
    }

    async fn sync_status(&self, provider: ProviderKey) -> PaymentResult<ProviderSyncStatus> {
        let statuses = self.statuses.read().await;
        Ok(statuses
            .get(&provider)
            .cloned()
            .unwrap_or_else(|| ProviderSyncStatus::never(provider)))
    }
}

/// Entity statuses set by the host application
#[derive(Default, Clone)]
pub struct InMemoryOrderLookup {
    statuses: Arc<RwLock<HashMap<EntityRef, String>>>,
}

impl InMemoryOrderLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_status(&self, entity: EntityRef, status: impl Into<String>) {
        self.statuses.write().await.insert(entity, status.into());
    }
}

#[async_trait]
impl OrderLookup for InMemoryOrderLookup {
    async fn status(&self, entity: &EntityRef) -> PaymentResult<Option<String>> {
        Ok(self.statuses.read().await.get(entity).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pay_core::{Currency, DedupKeyKind, TransactionStatus};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn tx(status: TransactionStatus) -> TransactionData {
        TransactionData::new("D1", ProviderKey::CardGateway, dec!(150.00), Currency::ILS, status)
    }

    fn record(webhook_id: Option<&str>, external_id: Option<&str>) -> WebhookDedupRecord {
        WebhookDedupRecord {
            provider: ProviderKey::CardGateway,
            webhook_id: webhook_id.map(String::from),
            external_id: external_id.map(String::from),
            payload_hash: Some("h".into()),
            event_type: "deal".into(),
            status: DedupStatus::Processing,
            attempts: 1,
            transaction_id: None,
            error: None,
            payload: json!({}),
            received_at: Utc::now(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_never_regresses() {
        let store = InMemoryTransactionStore::new();
        assert_eq!(store.upsert(tx(TransactionStatus::Success)).await.unwrap(), UpsertOutcome::Inserted);

        let outcome = store.upsert(tx(TransactionStatus::Pending)).await.unwrap();
        assert!(matches!(outcome, UpsertOutcome::Merged(MergeOutcome::Rejected { .. })));
        assert!(!outcome.changed());

        let stored = store.get(ProviderKey::CardGateway, "D1").await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Success);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_list_applies_query() {
        let store = InMemoryTransactionStore::new();
        store.upsert(tx(TransactionStatus::Success)).await.unwrap();
        let mut other = tx(TransactionStatus::Failed);
        other.transaction_id = "D2".into();
        store.upsert(other).await.unwrap();

        let query = TransactionQuery {
            status: Some(TransactionStatus::Failed),
            ..Default::default()
        };
        let found = store.list(&query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].transaction_id, "D2");
    }

    #[tokio::test]
    async fn test_dedup_completes_exactly_once() {
        let store = InMemoryDedupStore::new();
        let key = DedupKey::new(ProviderKey::CardGateway, DedupKeyKind::ExternalId, "D1");

        assert_eq!(store.claim(record(None, Some("D1"))).await.unwrap(), DedupClaim::New);
        assert_eq!(
            store.claim(record(None, Some("D1"))).await.unwrap(),
            DedupClaim::Resume { attempts: 2 }
        );

        assert!(store.complete(&key, Some("D1")).await.unwrap());
        assert!(!store.complete(&key, Some("D1")).await.unwrap());
        assert_eq!(
            store.claim(record(None, Some("D1"))).await.unwrap(),
            DedupClaim::AlreadyCompleted
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_distinct_webhooks_for_one_transaction_are_separate() {
        let store = InMemoryDedupStore::new();
        store.claim(record(Some("w1"), Some("D1"))).await.unwrap();
        let first = DedupKey::new(ProviderKey::CardGateway, DedupKeyKind::WebhookId, "w1");
        store.complete(&first, Some("D1")).await.unwrap();

        // a later event about the same deal is new work, not a redelivery
        assert_eq!(store.claim(record(Some("w2"), Some("D1"))).await.unwrap(), DedupClaim::New);
        assert_eq!(
            store.claim(record(Some("w1"), Some("D1"))).await.unwrap(),
            DedupClaim::AlreadyCompleted
        );
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_failed_record_can_be_resumed() {
        let store = InMemoryDedupStore::new();
        let key = DedupKey::new(ProviderKey::CardGateway, DedupKeyKind::ExternalId, "D9");
        store.claim(record(None, Some("D9"))).await.unwrap();
        store.fail(&key, "store unavailable").await.unwrap();

        let failed = store.find(&key).await.unwrap().unwrap();
        assert_eq!(failed.status, DedupStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("store unavailable"));

        assert!(matches!(
            store.claim(record(None, Some("D9"))).await.unwrap(),
            DedupClaim::Resume { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl_and_atomic_add() {
        let cache = InMemoryCache::new();
        assert!(cache.add("lock", json!("a"), Duration::from_secs(60)).await.unwrap());
        assert!(!cache.add("lock", json!("b"), Duration::from_secs(60)).await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("lock").await.unwrap().is_none());
        assert!(cache.add("lock", json!("b"), Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_forget_if_only_removes_matching_value() {
        let cache = InMemoryCache::new();
        cache.put("k", json!("mine"), Duration::from_secs(60)).await.unwrap();

        assert!(!cache.forget_if("k", &json!("theirs")).await.unwrap());
        assert!(cache.forget_if("k", &json!("mine")).await.unwrap());
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_catalog_upsert_summary() {
        let store = InMemoryCatalogStore::new();
        let item = CatalogItem::new(ProviderKey::MobileReseller, "il-5gb", "Israel 5GB", dec!(15), Currency::USD);

        let first = store.upsert_items(ProviderKey::MobileReseller, vec![item.clone()]).await.unwrap();
        assert_eq!(first.created, 1);

        let mut changed = item.clone();
        changed.price = dec!(12);
        let second = store
            .upsert_items(ProviderKey::MobileReseller, vec![item.clone(), changed])
            .await
            .unwrap();
        assert_eq!((second.created, second.updated, second.unchanged), (0, 1, 1));
    }

    #[tokio::test]
    async fn test_broadcast_bus_delivers_to_subscribers() {
        let bus = BroadcastEventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(PaymentEvent::RetryScheduled {
            original_transaction_id: "D1".into(),
            attempt: 2,
            delay_minutes: 4,
        })
        .await
        .unwrap();

        assert_eq!(rx.recv().await.unwrap().name(), "payment.retry_scheduled");
    }
}
