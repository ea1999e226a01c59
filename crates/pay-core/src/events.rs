//! # Domain Events and Operator Alerts

use crate::catalog::ProviderSyncStatus;
use crate::provider::ProviderKey;
use crate::transaction::TransactionData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events published on the domain event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PaymentEvent {
    /// A webhook produced a non-failure transaction
    Processed {
        provider: ProviderKey,
        transaction: TransactionData,
        context: serde_json::Value,
    },
    /// A webhook produced a failed/cancelled/expired transaction
    Failed {
        provider: ProviderKey,
        transaction: TransactionData,
        context: serde_json::Value,
    },
    /// A failed payment was queued for another attempt
    RetryScheduled {
        original_transaction_id: String,
        attempt: u32,
        delay_minutes: u64,
    },
    /// A failed payment will not be attempted again
    RetryExhausted {
        original_transaction_id: String,
        attempt: u32,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },
    /// A catalog sync finished
    CatalogSynced { status: ProviderSyncStatus },
}

impl PaymentEvent {
    /// Short name, used in logs
    pub fn name(&self) -> &'static str {
        match self {
            PaymentEvent::Processed { .. } => "payment.processed",
            PaymentEvent::Failed { .. } => "payment.failed",
            PaymentEvent::RetryScheduled { .. } => "payment.retry_scheduled",
            PaymentEvent::RetryExhausted { .. } => "payment.retry_exhausted",
            PaymentEvent::CatalogSynced { .. } => "catalog.synced",
        }
    }

    /// Build the processed/failed event for a normalized webhook transaction
    pub fn for_transaction(
        provider: ProviderKey,
        transaction: TransactionData,
        context: serde_json::Value,
    ) -> Self {
        if transaction.status.is_failure() {
            PaymentEvent::Failed {
                provider,
                transaction,
                context,
            }
        } else {
            PaymentEvent::Processed {
                provider,
                transaction,
                context,
            }
        }
    }
}

/// Alert severity for operator notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

/// A message for human operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    pub title: String,
    pub message: String,
    /// Everything needed for manual reconciliation
    pub context: serde_json::Value,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
        context: serde_json::Value,
    ) -> Self {
        Self {
            severity,
            title: title.into(),
            message: message.into(),
            context,
            raised_at: Utc::now(),
        }
    }

    pub fn critical(title: impl Into<String>, message: impl Into<String>, context: serde_json::Value) -> Self {
        Self::new(Severity::Critical, title, message, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;
    use crate::transaction::TransactionStatus;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_event_kind_follows_status() {
        let ok = TransactionData::new("D1", ProviderKey::CardGateway, dec!(1), Currency::ILS, TransactionStatus::Success);
        let bad = TransactionData::new("D2", ProviderKey::CardGateway, dec!(1), Currency::ILS, TransactionStatus::Failed);

        assert_eq!(
            PaymentEvent::for_transaction(ProviderKey::CardGateway, ok, json!({})).name(),
            "payment.processed"
        );
        assert_eq!(
            PaymentEvent::for_transaction(ProviderKey::CardGateway, bad, json!({})).name(),
            "payment.failed"
        );
    }
}
