//! # pay-core
//!
//! Core types and traits for the lightning-gateway orchestration engine.
//!
//! This crate provides:
//! - `PaymentProvider` trait every provider adapter implements
//! - `ProviderRegistry` with per-country routing
//! - `PaymentSession`, `TransactionData`, `PaymentRequest`, `RefundRequest`
//! - Ports for the store, cache, event bus, notifier and catalog store
//! - `PaymentError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use pay_core::{PaymentRequest, Currency, ProviderRegistry};
//! use rust_decimal_macros::dec;
//!
//! let request = PaymentRequest::builder()
//!     .amount(dec!(150.00))
//!     .currency(Currency::ILS)
//!     .customer_email("dana@example.co.il")
//!     .country("IL")
//!     .build();
//! assert!(request.validate().is_empty());
//!
//! let provider = registry.best_provider_for("IL").unwrap();
//! let checkout = provider.create_session(&params).await?;
//! ```

pub mod catalog;
pub mod error;
pub mod events;
pub mod money;
pub mod ports;
pub mod provider;
pub mod registry;
pub mod request;
pub mod session;
pub mod transaction;

// Re-exports for convenience
pub use catalog::{CatalogItem, CatalogWriteSummary, ProviderSyncStatus, SyncState};
pub use error::{is_non_retryable_code, PaymentError, PaymentResult, NON_RETRYABLE_CODES};
pub use events::{Alert, PaymentEvent, Severity};
pub use money::{parse_amount, Currency};
pub use ports::{
    Cache, CatalogStore, DedupClaim, DedupKey, DedupKeyKind, DedupStatus, EventBus, Notifier,
    OrderLookup, TransactionStore, UpsertOutcome, WebhookDedupRecord, WebhookDedupStore,
};
pub use provider::{
    BoxedProvider, InboundWebhook, PaymentProvider, ProviderInfo, ProviderKey, ProviderKind,
};
pub use registry::{ProviderFactory, ProviderRegistry, RoutingTable};
pub use request::{is_valid_email, EntityRef, PaymentRequest, PaymentRequestBuilder, RefundRequest};
pub use session::{
    CallbackDescriptor, PaymentSession, ProviderCheckout, SessionParams, SessionState,
};
pub use transaction::{
    MergeOutcome, PaymentStats, TransactionData, TransactionQuery, TransactionStatus,
};
