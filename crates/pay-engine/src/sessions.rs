//! # Session Store and Callbacks
//!
//! In-flight sessions live in the [`Cache`] under `payment_session_{reference}`
//! until a little after they expire. Expiry is applied lazily on read.
//!
//! Session callbacks are plain descriptors; the handler they name is looked
//! up in a [`CallbackRegistry`] built at startup.

use async_trait::async_trait;
use chrono::Utc;
use pay_core::{
    Cache, CallbackDescriptor, PaymentError, PaymentResult, PaymentSession, TransactionData,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long an expired session stays readable as `Expired`
const EXPIRED_GRACE: Duration = Duration::from_secs(3600);

/// TTL-keyed store of payment sessions
#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<dyn Cache>,
}

impl SessionStore {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    fn key(reference: &str) -> String {
        format!("payment_session_{}", reference)
    }

    /// Store or overwrite a session
    pub async fn put(&self, session: &PaymentSession) -> PaymentResult<()> {
        let remaining = (session.expires_at - Utc::now()).to_std().unwrap_or_default();
        let value = serde_json::to_value(session)?;
        self.cache
            .put(&Self::key(&session.reference), value, remaining + EXPIRED_GRACE)
            .await
    }

    /// Read a session, moving it to `Expired` if its deadline has passed
    pub async fn get(&self, reference: &str) -> PaymentResult<Option<PaymentSession>> {
        let Some(value) = self.cache.get(&Self::key(reference)).await? else {
            return Ok(None);
        };
        let mut session: PaymentSession = serde_json::from_value(value)?;
        let before = session.state;
        if session.refresh_expiry(Utc::now()) != before {
            debug!(reference, "Session expired");
            self.put(&session).await?;
        }
        Ok(Some(session))
    }

    /// Read a session that can still be resolved
    pub async fn active(&self, reference: &str) -> PaymentResult<Option<PaymentSession>> {
        Ok(self.get(reference).await?.filter(|s| !s.state.is_terminal()))
    }

    pub async fn destroy(&self, reference: &str) -> PaymentResult<bool> {
        self.cache.forget(&Self::key(reference)).await
    }
}

/// Handler invoked when a session resolves
#[async_trait]
pub trait SessionCallback: Send + Sync {
    async fn invoke(&self, tx: &TransactionData, context: &serde_json::Value) -> PaymentResult<()>;
}

/// Callback handlers by id
#[derive(Default, Clone)]
pub struct CallbackRegistry {
    handlers: HashMap<String, Arc<dyn SessionCallback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler_id: impl Into<String>, handler: Arc<dyn SessionCallback>) {
        self.handlers.insert(handler_id.into(), handler);
    }

    /// Register with builder pattern
    pub fn with_handler(mut self, handler_id: impl Into<String>, handler: Arc<dyn SessionCallback>) -> Self {
        self.register(handler_id, handler);
        self
    }

    pub fn contains(&self, handler_id: &str) -> bool {
        self.handlers.contains_key(handler_id)
    }

    /// Run the handler a descriptor names
    pub async fn invoke(&self, descriptor: &CallbackDescriptor, tx: &TransactionData) -> PaymentResult<()> {
        let handler = self.handlers.get(&descriptor.handler_id).ok_or_else(|| {
            PaymentError::Configuration(format!("no callback handler '{}'", descriptor.handler_id))
        })?;
        handler.invoke(tx, &descriptor.context).await
    }
}
