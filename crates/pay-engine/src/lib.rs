//! # pay-engine
//!
//! Orchestration on top of the provider adapters:
//! - `PaymentManager`: provider selection, sessions, verification, refunds, health
//! - `WebhookPipeline`: signature check, idempotent processing, event fan-out
//! - `RetryOrchestrator`: bounded retries of failed payments
//! - `CatalogSync`: locked, per-provider catalog import
//! - `JobRunner`: named worker queues with attempt/backoff policies
//! - `Ops`: sync, healthcheck and test commands
//!
//! ## Queues
//!
//! ```text
//! payment-webhooks  ──▶ WebhookJob        (3 attempts, 30s / 120s backoff)
//! payment-retries   ──▶ RetryPaymentJob   (single attempt, rescheduled)
//! catalog-sync      ──▶ CatalogSyncJob    (2 attempts, 2h window)
//! ```
//!
//! Storage, cache, event and alert ports live in `pay-core`; the in-memory
//! implementations here back the binary and the tests.

pub mod bootstrap;
pub mod config;
pub mod jobs;
pub mod lock;
pub mod manager;
pub mod memory;
pub mod ops;
pub mod retry;
pub mod sessions;
pub mod sync;
pub mod webhook;

#[cfg(test)]
mod testing;

pub use bootstrap::Engine;
pub use config::{default_routing, EngineConfig};
pub use jobs::{execute, BoxedJob, Job, JobOutcome, JobPolicy, JobRunner, JobScheduler, Queue};
pub use lock::CacheLock;
pub use manager::{HealthReport, PaymentManager, ProviderHealth};
pub use memory::{
    BroadcastEventBus, InMemoryCache, InMemoryCatalogStore, InMemoryDedupStore, InMemoryOrderLookup,
    InMemoryTransactionStore, RecordingEventBus, RecordingNotifier, TracingNotifier,
};
pub use ops::{Ops, OpsReport};
pub use retry::{RetryContext, RetryOrchestrator, RetryPaymentJob, RetryResult};
pub use sessions::{CallbackRegistry, SessionCallback, SessionStore};
pub use sync::{CatalogSync, CatalogSyncJob, SyncOptions, SyncReport};
pub use webhook::{WebhookJob, WebhookOutcome, WebhookPipeline};
