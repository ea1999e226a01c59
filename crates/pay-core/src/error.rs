//! # Payment Error Types
//!
//! Typed error handling for the lightning-gateway orchestration engine.
//! All provider, manager and job operations return `Result<T, PaymentError>`.
//!
//! The variants follow the operational taxonomy: configuration problems are
//! fatal to a single provider, validation and security failures are never
//! retried, transient provider failures are retried first at the HTTP layer
//! and then at the job layer, and duplicates or lock contention are not
//! failures at all.

use thiserror::Error;

/// Provider error codes that must never be retried.
pub const NON_RETRYABLE_CODES: &[&str] = &[
    "invalid_card",
    "insufficient_funds",
    "card_declined",
    "invalid_amount",
    "fraud_detected",
];

/// Core error type for all payment operations
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Provider missing credentials or otherwise misconfigured
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Request object failed validation
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Webhook signature mismatch or other authenticity failure
    #[error("Security error: {0}")]
    Security(String),

    /// Timeout, network failure or 5xx from a provider
    #[error("Transient error [{provider}]: {message}")]
    TransientProvider { provider: String, message: String },

    /// Provider refused the operation; terminal when `code` is in [`NON_RETRYABLE_CODES`]
    #[error("Provider declined [{provider}] ({code}): {message}")]
    Declined {
        provider: String,
        code: String,
        message: String,
    },

    /// No active adapter for the requested provider key
    #[error("Provider not found: {provider}")]
    ProviderNotFound { provider: String },

    /// Operation not offered by the provider
    #[error("Operation '{operation}' not supported by {provider}")]
    Unsupported { provider: String, operation: String },

    /// Duplicate webhook delivery
    #[error("Idempotency conflict: {key} already processed")]
    IdempotencyConflict { key: String },

    /// Exclusive job already running
    #[error("Lock contention: {key} is held")]
    LockContention { key: String },

    /// Session expired or not found
    #[error("Session not found or expired: {reference}")]
    SessionNotFound { reference: String },

    /// Transaction not present in the store
    #[error("Transaction not found: {transaction_id}")]
    TransactionNotFound { transaction_id: String },

    /// Operation is not valid for the current state of the entity
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Job attempt exceeded its hard timeout
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backing store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Error raised by an adapter, qualified at the manager boundary
    #[error("{provider} {operation} failed: {source}")]
    Provider {
        provider: String,
        operation: String,
        #[source]
        source: Box<PaymentError>,
    },
}

impl PaymentError {
    /// Innermost error, looking through provider qualification.
    pub fn root(&self) -> &PaymentError {
        match self {
            PaymentError::Provider { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            PaymentError::TransientProvider { .. }
            | PaymentError::Timeout(_)
            | PaymentError::Storage(_) => true,
            PaymentError::Declined { code, .. } => !is_non_retryable_code(code),
            _ => false,
        }
    }

    /// Returns true if a background job must give up immediately on this error.
    ///
    /// Configuration, security and validation problems will not heal on retry.
    pub fn is_fatal_for_job(&self) -> bool {
        matches!(
            self.root(),
            PaymentError::Configuration(_)
                | PaymentError::Validation(_)
                | PaymentError::Security(_)
                | PaymentError::ProviderNotFound { .. }
                | PaymentError::Unsupported { .. }
        ) || self.error_code().is_some_and(is_non_retryable_code)
    }

    /// Provider-assigned error code, if any.
    pub fn error_code(&self) -> Option<&str> {
        match self.root() {
            PaymentError::Declined { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// Qualify an adapter error with the provider and operation it came from.
    ///
    /// Errors that already name their provider are wrapped once; repeated
    /// calls do not nest.
    pub fn with_provider(self, provider: &str, operation: &str) -> Self {
        match self {
            wrapped @ PaymentError::Provider { .. } => wrapped,
            PaymentError::Validation(v) => PaymentError::Validation(v),
            other => PaymentError::Provider {
                provider: provider.to_string(),
                operation: operation.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self.root() {
            PaymentError::Configuration(_) => 500,
            PaymentError::Validation(_) => 422,
            PaymentError::Security(_) => 401,
            PaymentError::TransientProvider { .. } => 503,
            PaymentError::Declined { .. } => 402,
            PaymentError::ProviderNotFound { .. } => 404,
            PaymentError::Unsupported { .. } => 501,
            PaymentError::IdempotencyConflict { .. } => 200,
            PaymentError::LockContention { .. } => 409,
            PaymentError::SessionNotFound { .. } => 404,
            PaymentError::TransactionNotFound { .. } => 404,
            PaymentError::InvalidState(_) => 409,
            PaymentError::Timeout(_) => 504,
            PaymentError::Serialization(_) => 500,
            PaymentError::Storage(_) => 500,
            PaymentError::Internal(_) => 500,
            PaymentError::Provider { .. } => 502,
        }
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        PaymentError::Serialization(err.to_string())
    }
}

/// True if the provider code belongs to the non-retryable set.
pub fn is_non_retryable_code(code: &str) -> bool {
    NON_RETRYABLE_CODES.contains(&code)
}

/// Result type alias for payment operations
pub type PaymentResult<T> = Result<T, PaymentError>;
