//! # Transaction Types
//!
//! Normalized transaction records shared by every provider adapter.
//!
//! ## Status ordering
//!
//! ```text
//!  pending ──► processing ──► success ──► partially_refunded ──► refunded
//!     │            │             └──────────────────────────────►┘
//!     └────────────┴──► failed | cancelled | expired
//! ```
//!
//! Terminal states are sticky. The only exits from `success` are the
//! refund-class states; a late `failed` after `success` is rejected.

use crate::money::Currency;
use crate::provider::ProviderKey;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalized transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Cancelled,
    Expired,
    Refunded,
    PartiallyRefunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Expired => "expired",
            TransactionStatus::Refunded => "refunded",
            TransactionStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    /// Terminal states accept no further non-refund transition
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Success
                | TransactionStatus::Failed
                | TransactionStatus::Cancelled
                | TransactionStatus::Expired
                | TransactionStatus::Refunded
        )
    }

    /// Failure-class outcome of a payment attempt
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Failed | TransactionStatus::Cancelled | TransactionStatus::Expired
        )
    }

    pub fn is_refund(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Refunded | TransactionStatus::PartiallyRefunded
        )
    }

    /// Whether a record in `self` may move to `next`.
    ///
    /// Same-status writes are not transitions and return false.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match (*self, next) {
            (a, b) if a == b => false,
            (Pending, _) => next != Pending,
            (Processing, Pending) => false,
            (Processing, _) => true,
            (Success, Refunded | PartiallyRefunded) => true,
            (PartiallyRefunded, Refunded) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "processing" => Ok(TransactionStatus::Processing),
            "success" => Ok(TransactionStatus::Success),
            "failed" => Ok(TransactionStatus::Failed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            "expired" => Ok(TransactionStatus::Expired),
            "refunded" => Ok(TransactionStatus::Refunded),
            "partially_refunded" => Ok(TransactionStatus::PartiallyRefunded),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// Result of folding an incoming provider observation into a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Status advanced (or details were filled in)
    Applied,
    /// Same status observed again; nothing changed
    Unchanged,
    /// Incoming status would regress or leave a terminal state
    Rejected {
        current: TransactionStatus,
        incoming: TransactionStatus,
    },
}

/// A transaction as seen by the engine, normalized across providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionData {
    /// Provider-native transaction id
    pub transaction_id: String,

    pub provider: ProviderKey,

    /// Internal correlation reference echoed back by the provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    /// Amount in major units
    pub amount: Decimal,

    pub currency: Currency,

    pub status: TransactionStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,

    /// Raw gateway response, kept for reconciliation
    #[serde(default)]
    pub raw: serde_json::Value,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_code: Option<String>,

    /// Total refunded so far, in major units
    #[serde(default)]
    pub refunded_amount: Decimal,
}

impl TransactionData {
    /// Create a transaction record
    pub fn new(
        transaction_id: impl Into<String>,
        provider: ProviderKey,
        amount: Decimal,
        currency: Currency,
        status: TransactionStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            transaction_id: transaction_id.into(),
            provider,
            reference: None,
            amount,
            currency,
            status,
            customer_email: None,
            customer_name: None,
            metadata: BTreeMap::new(),
            raw: serde_json::Value::Null,
            created_at: now,
            completed_at: status.is_terminal().then_some(now),
            failure_reason: None,
            authorization_code: None,
            refunded_amount: Decimal::ZERO,
        }
    }

    /// Builder: set correlation reference
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Builder: set customer email
    pub fn with_customer_email(mut self, email: impl Into<String>) -> Self {
        self.customer_email = Some(email.into());
        self
    }

    /// Builder: attach the raw gateway response
    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = raw;
        self
    }

    /// Builder: add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Builder: set failure reason
    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    pub fn is_successful(&self) -> bool {
        self.status == TransactionStatus::Success
    }

    /// Amount still available for refunds
    pub fn refundable_amount(&self) -> Decimal {
        (self.amount - self.refunded_amount).max(Decimal::ZERO)
    }

    /// Fold a newer observation of the same transaction into this record.
    ///
    /// Status only moves along the ordering in the module docs. Details
    /// missing on the stored record are filled in from `incoming` even when
    /// its status is rejected.
    pub fn merge(&mut self, incoming: TransactionData) -> MergeOutcome {
        let current = self.status;
        let outcome = if current == incoming.status {
            MergeOutcome::Unchanged
        } else if current.can_transition_to(incoming.status) {
            MergeOutcome::Applied
        } else {
            MergeOutcome::Rejected {
                current,
                incoming: incoming.status,
            }
        };

        let mut filled = false;
        if self.reference.is_none() && incoming.reference.is_some() {
            self.reference = incoming.reference.clone();
            filled = true;
        }
        if self.customer_email.is_none() && incoming.customer_email.is_some() {
            self.customer_email = incoming.customer_email.clone();
            filled = true;
        }
        if self.authorization_code.is_none() && incoming.authorization_code.is_some() {
            self.authorization_code = incoming.authorization_code.clone();
            filled = true;
        }
        // a further partial refund keeps the status but raises the total
        if outcome == MergeOutcome::Unchanged
            && current.is_refund()
            && incoming.refunded_amount > self.refunded_amount
        {
            self.refunded_amount = incoming.refunded_amount;
            filled = true;
        }

        if outcome == MergeOutcome::Applied {
            self.status = incoming.status;
            self.raw = incoming.raw;
            if incoming.status.is_refund() {
                self.refunded_amount = incoming.refunded_amount.max(self.refunded_amount);
            }
            if incoming.status.is_terminal() || incoming.status.is_refund() {
                self.completed_at = incoming.completed_at.or_else(|| Some(Utc::now()));
            }
            if incoming.failure_reason.is_some() {
                self.failure_reason = incoming.failure_reason;
            }
            for (k, v) in incoming.metadata {
                self.metadata.entry(k).or_insert(v);
            }
        }

        match outcome {
            MergeOutcome::Unchanged if filled => MergeOutcome::Applied,
            other => other,
        }
    }
}

/// Query for listing transactions from a provider or the local store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl TransactionQuery {
    pub fn matches(&self, tx: &TransactionData) -> bool {
        self.provider.map_or(true, |p| p == tx.provider)
            && self.status.map_or(true, |s| s == tx.status)
            && self.from.map_or(true, |from| tx.created_at >= from)
            && self.to.map_or(true, |to| tx.created_at <= to)
    }
}

/// Aggregate payment statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentStats {
    pub total: usize,
    pub successful: usize,
    /// Percentage of captured transactions (0-100, two decimals)
    pub success_rate: Decimal,
    /// Captured amounts net of refunds
    pub revenue: Decimal,
    /// Mean net captured amount
    pub avg_transaction: Decimal,
}

impl PaymentStats {
    /// Compute statistics over a set of transactions.
    ///
    /// `success` and `partially_refunded` both count as captured.
    pub fn from_transactions<'a>(txs: impl IntoIterator<Item = &'a TransactionData>) -> Self {
        let mut total = 0usize;
        let mut successful = 0usize;
        let mut revenue = Decimal::ZERO;

        for tx in txs {
            total += 1;
            if matches!(tx.status, TransactionStatus::Success | TransactionStatus::PartiallyRefunded) {
                successful += 1;
                revenue += tx.refundable_amount();
            }
        }

        let success_rate = if total == 0 {
            Decimal::ZERO
        } else {
            (Decimal::from(successful) * Decimal::ONE_HUNDRED / Decimal::from(total)).round_dp(2)
        };
        let avg_transaction = if successful == 0 {
            Decimal::ZERO
        } else {
            (revenue / Decimal::from(successful)).round_dp(2)
        };

        Self {
            total,
            successful,
            success_rate,
            revenue,
            avg_transaction,
        }
    }
}
