//! # Payment Manager
//!
//! The single entry point for payment operations. Holds the provider
//! registry and the stores, resolves which adapter serves a call, and
//! qualifies adapter errors with the provider and operation they came from.

use crate::config::EngineConfig;
use crate::lock::CacheLock;
use crate::sessions::{CallbackRegistry, SessionStore};
use pay_core::{
    is_valid_email, BoxedProvider, Cache, PaymentError, PaymentRequest, PaymentResult,
    PaymentSession, PaymentStats, ProviderInfo, ProviderKey, ProviderKind, ProviderRegistry,
    RefundRequest, SessionParams, SessionState, TransactionData, TransactionQuery,
    TransactionStatus, TransactionStore, UpsertOutcome,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Outlives the provider call's timeout and retries
pub const REFUND_LOCK_TTL: Duration = Duration::from_secs(300);

/// Health of one provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider: ProviderKey,
    pub kind: ProviderKind,
    pub healthy: bool,
    /// Served from the health cache rather than a fresh probe
    pub cached: bool,
    pub info: ProviderInfo,
}

/// Health of every configured provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// True when every active provider is healthy and at least one exists
    pub overall: bool,
    pub providers: BTreeMap<ProviderKey, ProviderHealth>,
    /// Providers that failed to initialize, with the reason
    pub unavailable: BTreeMap<ProviderKey, String>,
}

/// Orchestrates payments across provider adapters
#[derive(Clone)]
pub struct PaymentManager {
    registry: Arc<ProviderRegistry>,
    transactions: Arc<dyn TransactionStore>,
    cache: Arc<dyn Cache>,
    sessions: SessionStore,
    callbacks: Arc<CallbackRegistry>,
    config: EngineConfig,
}

impl PaymentManager {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        transactions: Arc<dyn TransactionStore>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self {
            registry,
            transactions,
            sessions: SessionStore::new(cache.clone()),
            cache,
            callbacks: Arc::new(CallbackRegistry::new()),
            config: EngineConfig::default(),
        }
    }

    /// Builder: session callback handlers
    pub fn with_callbacks(mut self, callbacks: CallbackRegistry) -> Self {
        self.callbacks = Arc::new(callbacks);
        self
    }

    /// Builder: engine configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn transactions(&self) -> &Arc<dyn TransactionStore> {
        &self.transactions
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Adapter for `key`, or the default provider when `key` is `None`.
    ///
    /// The default is `DEFAULT_PROVIDER` when it is active, otherwise the
    /// first provider in registration order.
    pub fn provider(&self, key: Option<ProviderKey>) -> PaymentResult<&BoxedProvider> {
        let key = key.or(self.config.default_provider);
        let found = match key {
            Some(k) => self.registry.get(k),
            None => self.registry.default_provider(),
        };
        found.ok_or_else(|| PaymentError::ProviderNotFound {
            provider: key.map_or_else(|| "default".to_string(), |k| k.to_string()),
        })
    }

    /// Provider for a request: explicit override, then the request's own
    /// provider, then country routing, then the default.
    pub fn provider_for_request(
        &self,
        request: &PaymentRequest,
        provider: Option<ProviderKey>,
    ) -> PaymentResult<&BoxedProvider> {
        if let Some(key) = provider.or(request.provider) {
            return self.provider(Some(key));
        }
        if let Some(country) = request.country.as_deref() {
            if let Some(found) = self.registry.best_provider_for(country) {
                return Ok(found);
            }
        }
        self.provider(None)
    }

    /// Open a checkout session with a provider and cache it
    #[instrument(skip(self, params), fields(reference = %params.reference))]
    pub async fn create_payment(
        &self,
        params: SessionParams,
        provider: Option<ProviderKey>,
    ) -> PaymentResult<PaymentSession> {
        let adapter = self.provider(provider)?;
        let key = adapter.key();

        let mut violations = Vec::new();
        if params.reference.trim().is_empty() {
            violations.push("reference is required".to_string());
        }
        if params.amount <= Decimal::ZERO {
            violations.push("amount must be greater than zero".to_string());
        }
        if !is_valid_email(&params.customer_email) {
            violations.push(format!("'{}' is not a valid email address", params.customer_email));
        }
        if !adapter.supported_currencies().contains(&params.currency) {
            violations.push(format!("{} does not accept {}", key, params.currency.as_str()));
        }
        if !violations.is_empty() {
            return Err(PaymentError::Validation(violations));
        }

        let checkout = adapter
            .create_session(&params)
            .await
            .map_err(|e| e.with_provider(key.as_str(), "create_session"))?;

        let session = PaymentSession::from_checkout(key, &params, checkout);
        self.sessions.put(&session).await?;

        info!(
            provider = %key,
            reference = %session.reference,
            expires_at = %session.expires_at,
            "Payment session created"
        );
        Ok(session)
    }

    /// Validate a payment request, pick its provider and open a session
    #[instrument(skip(self, request), fields(amount = %request.amount, currency = %request.currency.as_str()))]
    pub async fn process_payment_request(
        &self,
        request: &PaymentRequest,
        provider: Option<ProviderKey>,
    ) -> PaymentResult<PaymentSession> {
        let violations = request.validate();
        if !violations.is_empty() {
            return Err(PaymentError::Validation(violations));
        }

        let key = self.provider_for_request(request, provider)?.key();

        let mut params = SessionParams::new(
            SessionParams::generate_reference(),
            request.amount,
            request.currency,
            request.customer_email.clone(),
        )
        .with_ttl_minutes(self.config.session_ttl_minutes);
        params.customer_name = request.customer_name.clone();
        params.description = request.description.clone();
        params.metadata = request.metadata.clone();
        params.save_token = request.save_token;
        if let Some(entity) = &request.linked_entity {
            params.metadata.insert("linked_entity_type".into(), entity.kind.clone());
            params.metadata.insert("linked_entity_id".into(), entity.id.clone());
        }

        self.create_payment(params, Some(key)).await
    }

    /// Ask the provider for the outcome of a payment and record it.
    ///
    /// Without an explicit provider, the session for `reference` decides.
    #[instrument(skip(self))]
    pub async fn verify_payment(
        &self,
        reference: &str,
        provider: Option<ProviderKey>,
    ) -> PaymentResult<TransactionData> {
        let provider = match provider {
            Some(p) => Some(p),
            None => self.sessions.get(reference).await?.map(|s| s.provider),
        };
        let adapter = self.provider(provider)?;
        let key = adapter.key();

        let mut tx = adapter
            .verify(reference)
            .await
            .map_err(|e| e.with_provider(key.as_str(), "verify"))?;
        if tx.reference.is_none() {
            tx.reference = Some(reference.to_string());
        }

        self.record_transaction(tx.clone()).await?;
        self.resolve_session(&tx).await;

        Ok(self.transactions.get(key, &tx.transaction_id).await?.unwrap_or(tx))
    }

    pub fn refund_lock_key(provider: ProviderKey, transaction_id: &str) -> String {
        format!("refund_{}_{}", provider, transaction_id)
    }

    /// Refund all or part of a stored successful transaction.
    ///
    /// `None` refunds whatever is still refundable. Refunds of one transaction
    /// are serialized by a [`CacheLock`]; a second refund while one is in
    /// flight fails with [`PaymentError::LockContention`].
    #[instrument(skip(self))]
    pub async fn refund_payment(
        &self,
        transaction_id: &str,
        amount: Option<Decimal>,
        provider: Option<ProviderKey>,
    ) -> PaymentResult<TransactionData> {
        let adapter = self.provider(provider)?;
        let lock_key = Self::refund_lock_key(adapter.key(), transaction_id);
        let Some(lock) = CacheLock::acquire(self.cache.clone(), lock_key.as_str(), REFUND_LOCK_TTL).await? else {
            warn!(%lock_key, "Refund already in progress");
            return Err(PaymentError::LockContention { key: lock_key });
        };

        let result = self.refund_locked(adapter, transaction_id, amount).await;

        match lock.release().await {
            Ok(true) => {}
            Ok(false) => warn!(%lock_key, "Refund lock expired before release"),
            Err(e) => error!(%lock_key, error = %e, "Could not release refund lock"),
        }
        result
    }

    async fn refund_locked(
        &self,
        adapter: &BoxedProvider,
        transaction_id: &str,
        amount: Option<Decimal>,
    ) -> PaymentResult<TransactionData> {
        let key = adapter.key();
        let stored = self
            .transactions
            .get(key, transaction_id)
            .await?
            .ok_or_else(|| PaymentError::TransactionNotFound {
                transaction_id: transaction_id.to_string(),
            })?;

        if !matches!(
            stored.status,
            TransactionStatus::Success | TransactionStatus::PartiallyRefunded
        ) {
            return Err(PaymentError::InvalidState(format!(
                "transaction {} is {} and cannot be refunded",
                transaction_id, stored.status
            )));
        }

        let refundable = stored.refundable_amount();
        let amount = amount.unwrap_or(refundable);
        let request = RefundRequest::new(transaction_id, amount, stored.currency, "merchant request")
            .partial(amount < refundable);

        let mut violations = request.validate();
        if amount > refundable {
            violations.push(format!(
                "refund amount {} exceeds refundable amount {}",
                amount, refundable
            ));
        }
        if !violations.is_empty() {
            return Err(PaymentError::Validation(violations));
        }

        let response = adapter
            .refund(transaction_id, Some(amount))
            .await
            .map_err(|e| e.with_provider(key.as_str(), "refund"))?;

        let mut refunded = stored.clone();
        refunded.refunded_amount = stored.refunded_amount + amount;
        refunded.status = if refunded.refunded_amount >= stored.amount {
            TransactionStatus::Refunded
        } else {
            TransactionStatus::PartiallyRefunded
        };
        refunded.raw = response.raw;
        refunded.completed_at = None;
        refunded
            .metadata
            .insert("last_refund_amount".into(), amount.to_string());
        refunded
            .metadata
            .insert("refund_reason".into(), request.reason.clone());

        self.record_transaction(refunded).await?;

        info!(
            provider = %key,
            transaction_id,
            %amount,
            partial = request.partial,
            "Refund recorded"
        );
        self.transactions
            .get(key, transaction_id)
            .await?
            .ok_or_else(|| PaymentError::Internal(format!("refunded transaction {} vanished", transaction_id)))
    }

    /// Authenticate a webhook body against the provider's shared secret
    pub fn authenticate_webhook(
        &self,
        provider: ProviderKey,
        payload: &[u8],
        signature: Option<&str>,
    ) -> PaymentResult<&BoxedProvider> {
        let adapter = self.provider(Some(provider))?;
        let signature = signature
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| PaymentError::Security(format!("{} webhook carries no signature", provider)))?;
        if !adapter.validate_webhook_signature(payload, signature) {
            return Err(PaymentError::Security(format!("{} webhook signature mismatch", provider)));
        }
        Ok(adapter)
    }

    /// Verify, normalize and record a webhook directly, without dedup.
    ///
    /// Background ingestion goes through [`WebhookPipeline`](crate::webhook::WebhookPipeline).
    #[instrument(skip(self, payload, signature), fields(provider = %provider))]
    pub async fn handle_webhook(
        &self,
        provider: ProviderKey,
        payload: &[u8],
        signature: Option<&str>,
    ) -> PaymentResult<Option<TransactionData>> {
        let adapter = self.authenticate_webhook(provider, payload, signature)?;
        let Some(tx) = adapter
            .handle_webhook(payload)
            .map_err(|e| e.with_provider(provider.as_str(), "handle_webhook"))?
        else {
            return Ok(None);
        };

        self.record_transaction(tx.clone()).await?;
        self.resolve_session(&tx).await;
        Ok(Some(tx))
    }

    /// Upsert a transaction keyed by (provider, transaction id)
    pub async fn record_transaction(&self, tx: TransactionData) -> PaymentResult<UpsertOutcome> {
        let provider = tx.provider;
        let transaction_id = tx.transaction_id.clone();
        let status = tx.status;
        let outcome = self.transactions.upsert(tx).await?;
        if outcome.changed() {
            info!(%provider, %transaction_id, %status, "Transaction recorded");
        }
        Ok(outcome)
    }

    /// Move the session correlated with `tx` and run its callback.
    ///
    /// Never fails: session and callback problems are logged.
    pub async fn resolve_session(&self, tx: &TransactionData) -> Option<SessionState> {
        let reference = tx.reference.as_deref()?;
        let mut session = match self.sessions.active(reference).await {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(e) => {
                warn!(reference, error = %e, "Could not load payment session");
                return None;
            }
        };

        let before = session.state;
        let state = session.resolve(tx);
        if state == before {
            return Some(state);
        }
        if let Err(e) = self.sessions.put(&session).await {
            warn!(reference, error = %e, "Could not store resolved session");
        }
        info!(reference, ?state, "Payment session resolved");

        if let Some(callback) = session.callback_for_state() {
            if let Err(e) = self.callbacks.invoke(callback, tx).await {
                warn!(
                    reference,
                    handler = %callback.handler_id,
                    error = %e,
                    "Session callback failed"
                );
            }
        }
        Some(state)
    }

    fn health_key(provider: ProviderKey) -> String {
        format!("provider_health_{}_{}", provider, provider.kind().as_str())
    }

    /// Health of one provider; probe results are cached.
    ///
    /// Probe errors count as unhealthy and are never returned.
    pub async fn provider_health(&self, key: ProviderKey, use_cache: bool) -> PaymentResult<ProviderHealth> {
        let adapter = self.provider(Some(key))?;
        let cache_key = Self::health_key(key);

        let cached = if use_cache {
            match self.cache.get(&cache_key).await {
                Ok(value) => value.and_then(|v| v.as_bool()),
                Err(e) => {
                    warn!(provider = %key, error = %e, "Health cache unavailable");
                    None
                }
            }
        } else {
            None
        };

        let (healthy, from_cache) = match cached {
            Some(healthy) => (healthy, true),
            None => {
                let healthy = match adapter.test_connection().await {
                    Ok(ok) => ok,
                    Err(e) => {
                        warn!(provider = %key, error = %e, "Provider health probe failed");
                        false
                    }
                };
                if let Err(e) = self
                    .cache
                    .put(&cache_key, serde_json::Value::Bool(healthy), self.config.health_cache_ttl)
                    .await
                {
                    warn!(provider = %key, error = %e, "Could not cache provider health");
                }
                (healthy, false)
            }
        };

        Ok(ProviderHealth {
            provider: key,
            kind: key.kind(),
            healthy,
            cached: from_cache,
            info: adapter.provider_info(),
        })
    }

    /// Health of every active provider
    pub async fn health_check(&self) -> HealthReport {
        let mut providers = BTreeMap::new();
        for key in self.registry.keys() {
            match self.provider_health(key, true).await {
                Ok(health) => {
                    providers.insert(key, health);
                }
                Err(e) => warn!(provider = %key, error = %e, "Health check skipped"),
            }
        }

        HealthReport {
            overall: !providers.is_empty() && providers.values().all(|h| h.healthy),
            providers,
            unavailable: self.registry.unavailable().clone(),
        }
    }

    /// Aggregate statistics over stored transactions
    pub async fn get_payment_stats(&self, query: &TransactionQuery) -> PaymentResult<PaymentStats> {
        let query = TransactionQuery {
            limit: None,
            ..query.clone()
        };
        let transactions = self.transactions.list(&query).await?;
        Ok(PaymentStats::from_transactions(&transactions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryCache, InMemoryTransactionStore};
    use crate::sessions::tests::RecordingCallback;
    use crate::testing::{sign, MockProvider};
    use pay_core::{CallbackDescriptor, Currency, EntityRef, RoutingTable};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        manager: PaymentManager,
        card: Arc<MockProvider>,
        store: InMemoryTransactionStore,
        cache: Arc<InMemoryCache>,
    }

    fn fixture() -> Fixture {
        let card = Arc::new(MockProvider::new(ProviderKey::CardGateway));
        let mobile = Arc::new(MockProvider::new(ProviderKey::MobileReseller));
        let registry = ProviderRegistry::new()
            .with_provider(card.clone())
            .with_provider(mobile)
            .with_routing(RoutingTable::new().with_country("GB", vec![ProviderKey::MobileReseller]));
        let store = InMemoryTransactionStore::new();
        let cache = Arc::new(InMemoryCache::new());
        let manager = PaymentManager::new(Arc::new(registry), Arc::new(store.clone()), cache.clone());
        Fixture {
            manager,
            card,
            store,
            cache,
        }
    }

    fn success(id: &str, reference: &str, amount: Decimal) -> TransactionData {
        TransactionData::new(id, ProviderKey::CardGateway, amount, Currency::ILS, TransactionStatus::Success)
            .with_reference(reference)
    }

    fn request() -> pay_core::PaymentRequestBuilder {
        PaymentRequest::builder()
            .amount(dec!(150.00))
            .currency(Currency::ILS)
            .customer_email("dana@example.co.il")
    }

    #[tokio::test]
    async fn test_unknown_provider_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.manager.provider(Some(ProviderKey::DomainReseller)),
            Err(PaymentError::ProviderNotFound { .. })
        ));
        assert_eq!(f.manager.provider(None).unwrap().key(), ProviderKey::CardGateway);
    }

    #[tokio::test]
    async fn test_configured_default_provider_wins_over_registration_order() {
        let f = fixture();
        let manager = f.manager.with_config(EngineConfig {
            default_provider: Some(ProviderKey::MobileReseller),
            ..Default::default()
        });
        assert_eq!(manager.provider(None).unwrap().key(), ProviderKey::MobileReseller);
    }

    #[tokio::test]
    async fn test_request_routes_by_country() {
        let f = fixture();
        let gb = request().country("GB").build();
        assert_eq!(
            f.manager.provider_for_request(&gb, None).unwrap().key(),
            ProviderKey::MobileReseller
        );

        let explicit = request().country("GB").provider(ProviderKey::CardGateway).build();
        assert_eq!(
            f.manager.provider_for_request(&explicit, None).unwrap().key(),
            ProviderKey::CardGateway
        );

        let unrouted = request().country("JP").build();
        assert_eq!(
            f.manager.provider_for_request(&unrouted, None).unwrap().key(),
            ProviderKey::CardGateway
        );
    }

    #[tokio::test]
    async fn test_process_payment_request_creates_cached_session() {
        let f = fixture();
        let req = request().linked_entity(EntityRef::order("42")).build();

        let session = f.manager.process_payment_request(&req, None).await.unwrap();
        assert_eq!(session.provider, ProviderKey::CardGateway);
        assert!(session.reference.starts_with("pay_"));
        assert_eq!(session.metadata.get("linked_entity_id").map(String::as_str), Some("42"));
        assert_eq!(session.remaining_minutes(), 29);

        let cached = f.manager.sessions().get(&session.reference).await.unwrap().unwrap();
        assert_eq!(cached.provider_reference, session.provider_reference);
        assert_eq!(cached.state, SessionState::Created);
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_before_any_provider_call() {
        let f = fixture();
        let req = request().amount(dec!(0)).customer_email("nope").build();

        let err = f.manager.process_payment_request(&req, None).await.unwrap_err();
        match err {
            PaymentError::Validation(v) => assert_eq!(v.len(), 2),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(f.card.calls("create_session"), 0);
    }

    #[tokio::test]
    async fn test_unsupported_currency_is_validation_error() {
        let f = fixture();
        let params = SessionParams::new("REF1", dec!(10), Currency::JPY, "dana@example.co.il");
        assert!(matches!(
            f.manager.create_payment(params, None).await,
            Err(PaymentError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_adapter_errors_are_provider_qualified() {
        let f = fixture();
        f.card.fail_next(
            "create_session",
            PaymentError::TransientProvider {
                provider: "card_gateway".into(),
                message: "connection reset".into(),
            },
        );

        let params = SessionParams::new("REF1", dec!(10), Currency::ILS, "dana@example.co.il");
        let err = f.manager.create_payment(params, None).await.unwrap_err();
        assert!(matches!(
            &err,
            PaymentError::Provider { provider, operation, .. }
                if provider == "card_gateway" && operation == "create_session"
        ));
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), 503);
    }

    #[tokio::test]
    async fn test_verify_records_and_resolves_session() {
        let f = fixture();
        let handler = Arc::new(RecordingCallback::default());
        let manager = f
            .manager
            .clone()
            .with_callbacks(CallbackRegistry::new().with_handler("fulfil", handler.clone()));

        let params = SessionParams::new("REF1", dec!(150.00), Currency::ILS, "dana@example.co.il")
            .on_success(CallbackDescriptor::new("fulfil", json!({"order_id": 1})));
        manager.create_payment(params, None).await.unwrap();
        f.card.insert(success("D1", "REF1", dec!(150.00)));

        let tx = manager.verify_payment("REF1", None).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(f.store.len().await, 1);

        let session = manager.sessions().get("REF1").await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::VerifiedSuccess);
        assert_eq!(handler.calls.lock().await.len(), 1);

        // a resolved session does not fire its callback twice
        manager.verify_payment("REF1", None).await.unwrap();
        assert_eq!(handler.calls.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_callback_does_not_fail_verification() {
        let f = fixture();
        let manager = f
            .manager
            .clone()
            .with_callbacks(CallbackRegistry::new().with_handler("boom", Arc::new(RecordingCallback::failing())));
        let params = SessionParams::new("REF2", dec!(10), Currency::ILS, "dana@example.co.il")
            .on_success(CallbackDescriptor::new("boom", json!({})));
        manager.create_payment(params, None).await.unwrap();
        f.card.insert(success("D2", "REF2", dec!(10)));

        assert!(manager.verify_payment("REF2", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_partial_then_full_refund() {
        let f = fixture();
        f.card.insert(success("D1", "REF1", dec!(150.00)));
        f.manager.record_transaction(success("D1", "REF1", dec!(150.00))).await.unwrap();

        let partial = f.manager.refund_payment("D1", Some(dec!(50)), None).await.unwrap();
        assert_eq!(partial.status, TransactionStatus::PartiallyRefunded);
        assert_eq!(partial.refundable_amount(), dec!(100.00));

        let too_much = f.manager.refund_payment("D1", Some(dec!(101)), None).await;
        assert!(matches!(too_much, Err(PaymentError::Validation(_))));

        let rest = f.manager.refund_payment("D1", None, None).await.unwrap();
        assert_eq!(rest.status, TransactionStatus::Refunded);
        assert_eq!(rest.refunded_amount, dec!(150.00));

        let again = f.manager.refund_payment("D1", None, None).await;
        assert!(matches!(again, Err(PaymentError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_refund_in_flight_blocks_a_second_refund() {
        let f = fixture();
        f.card.insert(success("D1", "REF1", dec!(150.00)));
        f.manager.record_transaction(success("D1", "REF1", dec!(150.00))).await.unwrap();

        let held = CacheLock::acquire(
            f.cache.clone(),
            PaymentManager::refund_lock_key(ProviderKey::CardGateway, "D1"),
            REFUND_LOCK_TTL,
        )
        .await
        .unwrap()
        .unwrap();
        assert!(matches!(
            f.manager.refund_payment("D1", Some(dec!(50)), None).await,
            Err(PaymentError::LockContention { .. })
        ));
        assert_eq!(f.card.calls("refund"), 0);
        held.release().await.unwrap();

        // each refund sees the total left by the previous one
        f.manager.refund_payment("D1", Some(dec!(50)), None).await.unwrap();
        let second = f.manager.refund_payment("D1", Some(dec!(50)), None).await.unwrap();
        assert_eq!(second.refunded_amount, dec!(100.00));
        assert!(matches!(
            f.manager.refund_payment("D1", Some(dec!(60)), None).await,
            Err(PaymentError::Validation(_))
        ));
        assert!(f
            .cache
            .get(&PaymentManager::refund_lock_key(ProviderKey::CardGateway, "D1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_refund_requires_stored_success() {
        let f = fixture();
        assert!(matches!(
            f.manager.refund_payment("missing", None, None).await,
            Err(PaymentError::TransactionNotFound { .. })
        ));

        let pending = TransactionData::new("P1", ProviderKey::CardGateway, dec!(5), Currency::ILS, TransactionStatus::Pending);
        f.manager.record_transaction(pending).await.unwrap();
        assert!(matches!(
            f.manager.refund_payment("P1", None, None).await,
            Err(PaymentError::InvalidState(_))
        ));
        assert_eq!(f.card.calls("refund"), 0);
    }

    #[tokio::test]
    async fn test_handle_webhook_checks_signature_first() {
        let f = fixture();
        let body = br#"{"id":"D7","status":"success","amount":"20.00"}"#;

        let missing = f.manager.handle_webhook(ProviderKey::CardGateway, body, None).await;
        assert!(matches!(missing, Err(PaymentError::Security(_))));
        let wrong = f.manager.handle_webhook(ProviderKey::CardGateway, body, Some("deadbeef")).await;
        assert!(matches!(wrong, Err(PaymentError::Security(_))));
        assert!(f.store.is_empty().await);

        let sig = sign(body);
        let tx = f
            .manager
            .handle_webhook(ProviderKey::CardGateway, body, Some(&sig))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.transaction_id, "D7");
        assert_eq!(f.store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_is_cached_and_errors_are_unhealthy() {
        let f = fixture();
        f.card.fail_next(
            "test_connection",
            PaymentError::Timeout("no answer".into()),
        );

        let first = f.manager.provider_health(ProviderKey::CardGateway, true).await.unwrap();
        assert!(!first.healthy);
        assert!(!first.cached);

        let second = f.manager.provider_health(ProviderKey::CardGateway, true).await.unwrap();
        assert!(second.cached);
        assert_eq!(f.card.calls("test_connection"), 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        let third = f.manager.provider_health(ProviderKey::CardGateway, true).await.unwrap();
        assert!(third.healthy);
        assert!(!third.cached);
    }

    #[tokio::test]
    async fn test_health_check_reports_every_provider() {
        let f = fixture();
        f.card.set_healthy(false);

        let report = f.manager.health_check().await;
        assert!(!report.overall);
        assert_eq!(report.providers.len(), 2);
        assert!(report.providers[&ProviderKey::MobileReseller].healthy);
    }

    #[tokio::test]
    async fn test_payment_stats_with_filters() {
        let f = fixture();
        f.manager.record_transaction(success("D1", "R1", dec!(100))).await.unwrap();
        f.manager.record_transaction(success("D2", "R2", dec!(50))).await.unwrap();
        let failed = TransactionData::new("D3", ProviderKey::CardGateway, dec!(70), Currency::ILS, TransactionStatus::Failed);
        f.manager.record_transaction(failed).await.unwrap();

        let stats = f.manager.get_payment_stats(&TransactionQuery::default()).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.revenue, dec!(150));
        assert_eq!(stats.avg_transaction, dec!(75.00));
        assert_eq!(stats.success_rate, dec!(66.67));

        let other = TransactionQuery {
            provider: Some(ProviderKey::MobileReseller),
            ..Default::default()
        };
        assert_eq!(f.manager.get_payment_stats(&other).await.unwrap().total, 0);
    }
}
