//! # Ports
//!
//! Traits for the collaborators the engine consumes: the relational store
//! (transactions, webhook dedup records, catalog), a TTL cache with an
//! atomic add primitive, the event bus, the operator notification channel
//! and the order lookup used by retry eligibility.

use crate::catalog::{CatalogItem, CatalogWriteSummary, ProviderSyncStatus};
use crate::error::PaymentResult;
use crate::events::{Alert, PaymentEvent};
use crate::provider::ProviderKey;
use crate::request::EntityRef;
use crate::transaction::{MergeOutcome, TransactionData, TransactionQuery};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transaction persistence; writes are upserts keyed by (provider, transaction_id)
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert or merge a transaction. Status changes follow
    /// [`TransactionData::merge`].
    async fn upsert(&self, tx: TransactionData) -> PaymentResult<UpsertOutcome>;

    async fn get(&self, provider: ProviderKey, transaction_id: &str)
        -> PaymentResult<Option<TransactionData>>;

    async fn find_by_reference(&self, reference: &str) -> PaymentResult<Option<TransactionData>>;

    async fn list(&self, query: &TransactionQuery) -> PaymentResult<Vec<TransactionData>>;
}

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Merged(MergeOutcome),
}

impl UpsertOutcome {
    /// True if a row was created or changed
    pub fn changed(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted | UpsertOutcome::Merged(MergeOutcome::Applied))
    }
}

/// Which provider identifier a dedup key is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupKeyKind {
    WebhookId,
    ExternalId,
    /// SHA-256 of the raw payload when the provider sends neither id
    PayloadHash,
}

/// Idempotency key for a webhook delivery
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DedupKey {
    pub provider: ProviderKey,
    pub kind: DedupKeyKind,
    pub value: String,
}

impl DedupKey {
    pub fn new(provider: ProviderKey, kind: DedupKeyKind, value: impl Into<String>) -> Self {
        Self {
            provider,
            kind,
            value: value.into(),
        }
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            DedupKeyKind::WebhookId => "webhook",
            DedupKeyKind::ExternalId => "external",
            DedupKeyKind::PayloadHash => "sha256",
        };
        write!(f, "{}:{}:{}", self.provider, kind, self.value)
    }
}

/// Processing state of a dedup record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupStatus {
    Processing,
    Completed,
    Failed,
}

/// Durable record of a webhook delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDedupRecord {
    pub provider: ProviderKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_hash: Option<String>,
    pub event_type: String,
    pub status: DedupStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WebhookDedupRecord {
    /// The single idempotency key: webhook id, else external id, else payload hash.
    ///
    /// Distinct events about the same transaction carry distinct webhook ids,
    /// so the external id only identifies a delivery when no webhook id exists.
    pub fn key(&self) -> Option<DedupKey> {
        if let Some(id) = &self.webhook_id {
            return Some(DedupKey::new(self.provider, DedupKeyKind::WebhookId, id.clone()));
        }
        if let Some(id) = &self.external_id {
            return Some(DedupKey::new(self.provider, DedupKeyKind::ExternalId, id.clone()));
        }
        self.payload_hash
            .as_ref()
            .map(|hash| DedupKey::new(self.provider, DedupKeyKind::PayloadHash, hash.clone()))
    }
}

/// Result of claiming a webhook for processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupClaim {
    /// First time seen; a `processing` record now exists
    New,
    /// Seen before but never completed; this delivery may process it
    Resume { attempts: u32 },
    /// Already completed; must not be processed again
    AlreadyCompleted,
}

/// Durable dedup records for webhook deliveries
#[async_trait]
pub trait WebhookDedupStore: Send + Sync {
    /// Create or re-open the record under `record.key()`.
    async fn claim(&self, record: WebhookDedupRecord) -> PaymentResult<DedupClaim>;

    /// Move the record to `completed`. Returns false if another delivery
    /// already completed it; exactly one caller ever sees true.
    async fn complete(&self, key: &DedupKey, transaction_id: Option<&str>) -> PaymentResult<bool>;

    /// Mark the record failed so a later delivery may resume it.
    async fn fail(&self, key: &DedupKey, error: &str) -> PaymentResult<()>;

    async fn find(&self, key: &DedupKey) -> PaymentResult<Option<WebhookDedupRecord>>;
}

/// TTL key-value cache with an atomic add, shared across workers
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> PaymentResult<Option<serde_json::Value>>;

    async fn put(&self, key: &str, value: serde_json::Value, ttl: Duration) -> PaymentResult<()>;

    /// Store only if absent (SET NX EX); true if this call stored it
    async fn add(&self, key: &str, value: serde_json::Value, ttl: Duration) -> PaymentResult<bool>;

    async fn forget(&self, key: &str) -> PaymentResult<bool>;

    /// Delete only if the current value equals `expected` (compare-and-delete)
    async fn forget_if(&self, key: &str, expected: &serde_json::Value) -> PaymentResult<bool>;
}

/// Domain event bus
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: PaymentEvent) -> PaymentResult<()>;
}

/// Channel to human operators
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: Alert) -> PaymentResult<()>;
}

/// Mirrored provider catalogs
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn upsert_items(
        &self,
        provider: ProviderKey,
        items: Vec<CatalogItem>,
    ) -> PaymentResult<CatalogWriteSummary>;

    async fn items(&self, provider: ProviderKey) -> PaymentResult<Vec<CatalogItem>>;

    async fn record_sync(&self, status: ProviderSyncStatus) -> PaymentResult<()>;

    async fn sync_status(&self, provider: ProviderKey) -> PaymentResult<ProviderSyncStatus>;
}

/// Looks up business entities a payment is linked to
#[async_trait]
pub trait OrderLookup: Send + Sync {
    /// Current status of the entity, `None` if it does not exist
    async fn status(&self, entity: &EntityRef) -> PaymentResult<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(webhook_id: Option<&str>, external_id: Option<&str>) -> WebhookDedupRecord {
        WebhookDedupRecord {
            provider: ProviderKey::CardGateway,
            webhook_id: webhook_id.map(String::from),
            external_id: external_id.map(String::from),
            payload_hash: Some("abc".into()),
            event_type: "payment".into(),
            status: DedupStatus::Processing,
            attempts: 1,
            transaction_id: None,
            error: None,
            payload: json!({}),
            received_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn test_webhook_id_takes_precedence() {
        let key = record(Some("w1"), Some("D1")).key().unwrap();
        assert_eq!(key.kind, DedupKeyKind::WebhookId);
        assert_eq!(key.value, "w1");

        let key = record(None, Some("D1")).key().unwrap();
        assert_eq!(key.kind, DedupKeyKind::ExternalId);

        let key = record(None, None).key().unwrap();
        assert_eq!(key.kind, DedupKeyKind::PayloadHash);
        assert_eq!(key.to_string(), "card_gateway:sha256:abc");
    }

    #[test]
    fn test_no_identifier_means_no_key() {
        let mut bare = record(None, None);
        bare.payload_hash = None;
        assert!(bare.key().is_none());
    }
}
