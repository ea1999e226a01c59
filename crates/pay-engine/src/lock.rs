//! # Cache Lock
//!
//! An exclusive lock in the shared [`Cache`]: `add` (SET NX EX) of a random
//! token, released with a compare-and-delete on that token so a lock that
//! expired and was re-acquired by another worker is never removed.

use pay_core::{Cache, PaymentResult};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Exclusive lock held in the shared cache.
///
/// Release explicitly with [`CacheLock::release`]; a guard dropped without
/// releasing (panic, cancelled future) releases from a background task.
pub struct CacheLock {
    cache: Arc<dyn Cache>,
    key: String,
    token: serde_json::Value,
    released: bool,
}

impl CacheLock {
    /// Try to take the lock; `None` if someone else holds it
    pub async fn acquire(cache: Arc<dyn Cache>, key: impl Into<String>, ttl: Duration) -> PaymentResult<Option<Self>> {
        let key = key.into();
        let token = json!(uuid::Uuid::new_v4().to_string());
        if !cache.add(&key, token.clone(), ttl).await? {
            return Ok(None);
        }
        Ok(Some(Self {
            cache,
            key,
            token,
            released: false,
        }))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock if this guard still owns it
    pub async fn release(mut self) -> PaymentResult<bool> {
        self.released = true;
        self.cache.forget_if(&self.key, &self.token).await
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let cache = self.cache.clone();
        let key = std::mem::take(&mut self.key);
        let token = self.token.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = cache.forget_if(&key, &token).await {
                        error!(%key, error = %e, "Could not release lock");
                    }
                });
            }
            Err(_) => warn!(%key, "Lock dropped outside a runtime; it will expire on its TTL"),
        }
    }
}
