//! # Payment Sessions
//!
//! A session correlates an internal payment attempt with the checkout
//! reference a provider issued for it. Sessions are short-lived and live in
//! a TTL cache, not in the transaction store.
//!
//! ```text
//! CREATED ──► VERIFIED_SUCCESS
//!    │    ──► VERIFIED_FAILED
//!    │    ──► REQUIRES_3DS ──► VERIFIED_SUCCESS | VERIFIED_FAILED
//!    └─(read after expires_at)──► EXPIRED
//! ```

use crate::money::Currency;
use crate::provider::ProviderKey;
use crate::transaction::{TransactionData, TransactionStatus};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle state of a payment session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Requires3ds,
    VerifiedSuccess,
    VerifiedFailed,
    Expired,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::VerifiedSuccess | SessionState::VerifiedFailed | SessionState::Expired
        )
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Created
    }
}

/// Names a registered callback handler plus the context it is invoked with.
///
/// Descriptors are plain data; the handler is looked up by id when the
/// session resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackDescriptor {
    pub handler_id: String,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl CallbackDescriptor {
    pub fn new(handler_id: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            handler_id: handler_id.into(),
            context,
        }
    }
}

/// Parameters for creating a provider checkout session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionParams {
    /// Internal correlation reference embedded in the provider request
    pub reference: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub customer_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_url: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub save_token: bool,
    /// How long the session stays valid
    pub ttl_minutes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_success: Option<CallbackDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<CallbackDescriptor>,
}

impl SessionParams {
    pub fn new(
        reference: impl Into<String>,
        amount: Decimal,
        currency: Currency,
        customer_email: impl Into<String>,
    ) -> Self {
        Self {
            reference: reference.into(),
            amount,
            currency,
            customer_email: customer_email.into(),
            customer_name: None,
            description: None,
            return_url: None,
            metadata: BTreeMap::new(),
            save_token: false,
            ttl_minutes: 30,
            on_success: None,
            on_failure: None,
        }
    }

    /// Generate a fresh correlation reference
    pub fn generate_reference() -> String {
        format!("pay_{}", uuid::Uuid::new_v4().simple())
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_return_url(mut self, url: impl Into<String>) -> Self {
        self.return_url = Some(url.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_ttl_minutes(mut self, minutes: i64) -> Self {
        self.ttl_minutes = minutes;
        self
    }

    pub fn on_success(mut self, callback: CallbackDescriptor) -> Self {
        self.on_success = Some(callback);
        self
    }

    pub fn on_failure(mut self, callback: CallbackDescriptor) -> Self {
        self.on_failure = Some(callback);
        self
    }
}

/// Provider-issued checkout details returned by an adapter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCheckout {
    /// Provider's reference for the session (deal id, order id, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// An in-flight payment session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub provider: ProviderKey,

    /// Internal correlation reference
    pub reference: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_reference: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    pub amount: Decimal,
    pub currency: Currency,
    pub customer_email: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,

    #[serde(default)]
    pub state: SessionState,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_success: Option<CallbackDescriptor>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<CallbackDescriptor>,
}

impl PaymentSession {
    /// Assemble a session from the request and the provider's checkout details
    pub fn from_checkout(provider: ProviderKey, params: &SessionParams, checkout: ProviderCheckout) -> Self {
        let now = Utc::now();
        let expires_at = checkout
            .expires_at
            .unwrap_or_else(|| now + Duration::minutes(params.ttl_minutes));
        Self {
            provider,
            reference: params.reference.clone(),
            provider_reference: checkout.provider_reference,
            checkout_url: checkout.checkout_url,
            token: checkout.token,
            amount: params.amount,
            currency: params.currency,
            customer_email: params.customer_email.clone(),
            metadata: params.metadata.clone(),
            state: SessionState::Created,
            created_at: now,
            expires_at,
            on_success: params.on_success.clone(),
            on_failure: params.on_failure.clone(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whole minutes left before expiry, zero once expired
    pub fn remaining_minutes(&self) -> i64 {
        self.remaining_minutes_at(Utc::now())
    }

    pub fn remaining_minutes_at(&self, now: DateTime<Utc>) -> i64 {
        if self.is_expired_at(now) {
            0
        } else {
            (self.expires_at - now).num_minutes()
        }
    }

    /// Still waiting for a resolution and not expired
    pub fn is_active(&self) -> bool {
        !self.state.is_terminal() && !self.is_expired()
    }

    /// Apply lazy expiry: an unresolved session read after its deadline is `Expired`
    pub fn refresh_expiry(&mut self, now: DateTime<Utc>) -> SessionState {
        if !self.state.is_terminal() && self.is_expired_at(now) {
            self.state = SessionState::Expired;
        }
        self.state
    }

    /// Move the session according to a resolved transaction.
    ///
    /// Returns the new state; terminal sessions are left untouched.
    pub fn resolve(&mut self, tx: &TransactionData) -> SessionState {
        if self.state.is_terminal() {
            return self.state;
        }
        self.state = match tx.status {
            TransactionStatus::Success => SessionState::VerifiedSuccess,
            s if s.is_failure() => SessionState::VerifiedFailed,
            TransactionStatus::Pending | TransactionStatus::Processing if requires_3ds(tx) => {
                SessionState::Requires3ds
            }
            _ => self.state,
        };
        self.state
    }

    /// Callback to run for the current state, if any
    pub fn callback_for_state(&self) -> Option<&CallbackDescriptor> {
        match self.state {
            SessionState::VerifiedSuccess => self.on_success.as_ref(),
            SessionState::VerifiedFailed => self.on_failure.as_ref(),
            _ => None,
        }
    }
}

fn requires_3ds(tx: &TransactionData) -> bool {
    tx.metadata
        .get("requires_3ds")
        .is_some_and(|v| v == "true" || v == "1")
}
