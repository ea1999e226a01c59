//! # Provider Contract
//!
//! Every external provider (card processing, connectivity reselling,
//! domain/hosting reselling) is reached through the same trait, so the
//! manager, the webhook pipeline and the sync job never branch on provider.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  PaymentProvider (trait)                    │
//! │  ├── create_session() / verify() / get_transaction()        │
//! │  ├── refund() / cancel() / list_transactions()              │
//! │  ├── validate_webhook_signature() / parse_webhook()         │
//! │  └── test_connection() / provider_info() / fetch_catalog()  │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!          ┌─────────────────┼─────────────────┐
//!   card_gateway      mobile_reseller    domain_reseller
//! ```

use crate::catalog::CatalogItem;
use crate::error::{PaymentError, PaymentResult};
use crate::money::Currency;
use crate::session::{ProviderCheckout, SessionParams};
use crate::transaction::{TransactionData, TransactionQuery};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Known provider keys. The order here is the stable registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKey {
    CardGateway,
    MobileReseller,
    DomainReseller,
}

impl ProviderKey {
    pub const ALL: [ProviderKey; 3] = [
        ProviderKey::CardGateway,
        ProviderKey::MobileReseller,
        ProviderKey::DomainReseller,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKey::CardGateway => "card_gateway",
            ProviderKey::MobileReseller => "mobile_reseller",
            ProviderKey::DomainReseller => "domain_reseller",
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderKey::CardGateway => ProviderKind::Payment,
            ProviderKey::MobileReseller => ProviderKind::Connectivity,
            ProviderKey::DomainReseller => ProviderKind::Domains,
        }
    }
}

impl std::fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKey {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| PaymentError::ProviderNotFound {
                provider: s.to_string(),
            })
    }
}

/// What a provider sells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Payment,
    Connectivity,
    Domains,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Payment => "payment",
            ProviderKind::Connectivity => "connectivity",
            ProviderKind::Domains => "domains",
        }
    }
}

/// Descriptive information about an adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub key: ProviderKey,
    pub kind: ProviderKind,
    pub display_name: String,
    pub base_url: String,
    pub currencies: Vec<Currency>,
    pub supports_refunds: bool,
    pub supports_catalog: bool,
    pub test_mode: bool,
}

/// A webhook delivery parsed by an adapter
#[derive(Debug, Clone)]
pub struct InboundWebhook {
    pub provider: ProviderKey,
    /// Provider's delivery/event id, when it sends one
    pub webhook_id: Option<String>,
    /// Provider's id for the object the event is about
    pub external_id: Option<String>,
    pub event_type: String,
    /// Normalized transaction, `None` for events that carry no payment state
    pub transaction: Option<TransactionData>,
    pub payload: serde_json::Value,
}

/// Core trait for provider adapters.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Registry key of this adapter
    fn key(&self) -> ProviderKey;

    /// Create a checkout session with the provider.
    async fn create_session(&self, params: &SessionParams) -> PaymentResult<ProviderCheckout>;

    /// Verify a payment by its correlation or provider reference.
    async fn verify(&self, reference: &str) -> PaymentResult<TransactionData>;

    /// Fetch a transaction by provider transaction id.
    async fn get_transaction(&self, transaction_id: &str) -> PaymentResult<TransactionData>;

    /// Refund a transaction; `None` refunds the full amount.
    async fn refund(
        &self,
        transaction_id: &str,
        amount: Option<Decimal>,
    ) -> PaymentResult<TransactionData>;

    /// Cancel/void a transaction.
    async fn cancel(&self, transaction_id: &str) -> PaymentResult<TransactionData>;

    /// List transactions known to the provider.
    async fn list_transactions(&self, query: &TransactionQuery)
        -> PaymentResult<Vec<TransactionData>>;

    /// Check a webhook signature over the raw body.
    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;

    /// Parse a webhook body into identity and normalized transaction.
    fn parse_webhook(&self, payload: &[u8]) -> PaymentResult<InboundWebhook>;

    /// Normalize a webhook body into a transaction, if it carries one.
    fn handle_webhook(&self, payload: &[u8]) -> PaymentResult<Option<TransactionData>> {
        Ok(self.parse_webhook(payload)?.transaction)
    }

    /// Probe the provider API.
    async fn test_connection(&self) -> PaymentResult<bool>;

    fn provider_info(&self) -> ProviderInfo;

    /// Configuration fields this adapter needs, name -> description.
    fn required_config_fields(&self) -> BTreeMap<&'static str, &'static str>;

    fn supported_currencies(&self) -> Vec<Currency>;

    /// Pull the provider's sellable catalog.
    async fn fetch_catalog(&self, limit: Option<usize>) -> PaymentResult<Vec<CatalogItem>> {
        let _ = limit;
        Err(PaymentError::Unsupported {
            provider: self.key().to_string(),
            operation: "fetch_catalog".to_string(),
        })
    }

    fn supports_catalog(&self) -> bool {
        false
    }

    /// Get the webhook endpoint path for this provider.
    fn webhook_path(&self) -> String {
        format!("/webhook/{}", self.key())
    }
}

/// Type alias for a shared provider adapter (dynamic dispatch)
pub type BoxedProvider = Arc<dyn PaymentProvider>;
