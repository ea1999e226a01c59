//! # Provider Registry
//!
//! Holds one adapter per provider key, built once at startup and shared by
//! everything downstream. A provider that fails to construct is logged and
//! left out; the rest of the registry still comes up.

use crate::error::PaymentResult;
use crate::provider::{BoxedProvider, ProviderKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info};

/// Builds one adapter; called once during registry construction
pub type ProviderFactory = Box<dyn FnOnce() -> PaymentResult<BoxedProvider> + Send>;

/// Per-country provider preferences
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingTable {
    /// ISO 3166 alpha-2 country -> providers in order of preference
    #[serde(default)]
    pub countries: BTreeMap<String, Vec<ProviderKey>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set preferences for a country
    pub fn with_country(mut self, country: &str, providers: Vec<ProviderKey>) -> Self {
        self.countries.insert(country.to_ascii_uppercase(), providers);
        self
    }

    /// Load routing table from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let table: RoutingTable = toml::from_str(toml_str)?;
        Ok(Self {
            countries: table
                .countries
                .into_iter()
                .map(|(country, providers)| (country.to_ascii_uppercase(), providers))
                .collect(),
        })
    }

    pub fn preferences(&self, country: &str) -> &[ProviderKey] {
        self.countries
            .get(&country.to_ascii_uppercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Registry of active provider adapters
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    /// Active adapters in registration order
    providers: Vec<(ProviderKey, BoxedProvider)>,
    /// Providers that failed to construct, with the reason
    unavailable: BTreeMap<ProviderKey, String>,
    routing: RoutingTable,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from factories, isolating construction failures.
    pub fn build(factories: impl IntoIterator<Item = (ProviderKey, ProviderFactory)>) -> Self {
        let mut registry = Self::new();
        for (key, factory) in factories {
            match factory() {
                Ok(provider) => {
                    info!(provider = %key, "Provider adapter registered");
                    registry.register(provider);
                }
                Err(e) => {
                    error!(provider = %key, error = %e, "Provider adapter failed to initialize; skipping");
                    registry.unavailable.insert(key, e.to_string());
                }
            }
        }
        registry
    }

    /// Register an adapter, replacing any existing one for the same key in place
    pub fn register(&mut self, provider: BoxedProvider) {
        let key = provider.key();
        self.unavailable.remove(&key);
        match self.providers.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = provider,
            None => self.providers.push((key, provider)),
        }
    }

    /// Register with builder pattern
    pub fn with_provider(mut self, provider: BoxedProvider) -> Self {
        self.register(provider);
        self
    }

    /// Builder: set the routing table
    pub fn with_routing(mut self, routing: RoutingTable) -> Self {
        self.routing = routing;
        self
    }

    /// Get an adapter by key
    pub fn get(&self, key: ProviderKey) -> Option<&BoxedProvider> {
        self.providers.iter().find(|(k, _)| *k == key).map(|(_, p)| p)
    }

    /// First active adapter in registration order
    pub fn default_provider(&self) -> Option<&BoxedProvider> {
        self.providers.first().map(|(_, p)| p)
    }

    /// Get adapter by key or fall back to the default
    pub fn get_or_default(&self, key: Option<ProviderKey>) -> Option<&BoxedProvider> {
        match key {
            Some(k) => self.get(k),
            None => self.default_provider(),
        }
    }

    /// Preferred active provider for a country.
    ///
    /// Walks the country's preference list; falls back to the first active
    /// provider in registration order.
    pub fn best_provider_for(&self, country: &str) -> Option<&BoxedProvider> {
        self.routing
            .preferences(country)
            .iter()
            .find_map(|key| self.get(*key))
            .or_else(|| self.default_provider())
    }

    /// Keys of active adapters, in registration order
    pub fn keys(&self) -> Vec<ProviderKey> {
        self.providers.iter().map(|(k, _)| *k).collect()
    }

    /// Iterate active adapters in registration order
    pub fn iter(&self) -> impl Iterator<Item = &BoxedProvider> {
        self.providers.iter().map(|(_, p)| p)
    }

    /// Providers that failed to construct, with the error
    pub fn unavailable(&self) -> &BTreeMap<ProviderKey, String> {
        &self.unavailable
    }

    pub fn has_provider(&self, key: ProviderKey) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogItem;
    use crate::error::PaymentError;
    use crate::money::Currency;
    use crate::provider::{InboundWebhook, PaymentProvider, ProviderInfo};
    use crate::session::{ProviderCheckout, SessionParams};
    use crate::transaction::{TransactionData, TransactionQuery};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    struct NullProvider(ProviderKey);

    #[async_trait]
    impl PaymentProvider for NullProvider {
        fn key(&self) -> ProviderKey {
            self.0
        }
        async fn create_session(&self, _: &SessionParams) -> PaymentResult<ProviderCheckout> {
            Ok(ProviderCheckout::default())
        }
        async fn verify(&self, r: &str) -> PaymentResult<TransactionData> {
            Err(PaymentError::TransactionNotFound { transaction_id: r.into() })
        }
        async fn get_transaction(&self, id: &str) -> PaymentResult<TransactionData> {
            Err(PaymentError::TransactionNotFound { transaction_id: id.into() })
        }
        async fn refund(&self, id: &str, _: Option<Decimal>) -> PaymentResult<TransactionData> {
            Err(PaymentError::TransactionNotFound { transaction_id: id.into() })
        }
        async fn cancel(&self, id: &str) -> PaymentResult<TransactionData> {
            Err(PaymentError::TransactionNotFound { transaction_id: id.into() })
        }
        async fn list_transactions(&self, _: &TransactionQuery) -> PaymentResult<Vec<TransactionData>> {
            Ok(Vec::new())
        }
        fn validate_webhook_signature(&self, _: &[u8], _: &str) -> bool {
            false
        }
        fn parse_webhook(&self, _: &[u8]) -> PaymentResult<InboundWebhook> {
            Err(PaymentError::Serialization("unused".into()))
        }
        async fn test_connection(&self) -> PaymentResult<bool> {
            Ok(true)
        }
        fn provider_info(&self) -> ProviderInfo {
            ProviderInfo {
                key: self.0,
                kind: self.0.kind(),
                display_name: self.0.to_string(),
                base_url: String::new(),
                currencies: vec![Currency::ILS],
                supports_refunds: false,
                supports_catalog: false,
                test_mode: true,
            }
        }
        fn required_config_fields(&self) -> BTreeMap<&'static str, &'static str> {
            BTreeMap::new()
        }
        fn supported_currencies(&self) -> Vec<Currency> {
            vec![Currency::ILS]
        }
        async fn fetch_catalog(&self, _: Option<usize>) -> PaymentResult<Vec<CatalogItem>> {
            Ok(Vec::new())
        }
    }

    fn factory(key: ProviderKey) -> (ProviderKey, ProviderFactory) {
        (
            key,
            Box::new(move || Ok(Arc::new(NullProvider(key)) as BoxedProvider)) as ProviderFactory,
        )
    }

    #[test]
    fn test_failed_provider_is_isolated() {
        let registry = ProviderRegistry::build(vec![
            factory(ProviderKey::CardGateway),
            (
                ProviderKey::MobileReseller,
                Box::new(|| Err(PaymentError::Configuration("MOBILE_RESELLER_API_KEY not set".into())))
                    as ProviderFactory,
            ),
            factory(ProviderKey::DomainReseller),
        ]);

        assert_eq!(registry.keys(), vec![ProviderKey::CardGateway, ProviderKey::DomainReseller]);
        assert!(!registry.has_provider(ProviderKey::MobileReseller));
        assert!(registry.unavailable()[&ProviderKey::MobileReseller].contains("API_KEY"));
    }

    #[test]
    fn test_best_provider_uses_preferences_then_registration_order() {
        let routing = RoutingTable::new()
            .with_country("il", vec![ProviderKey::CardGateway])
            .with_country("US", vec![ProviderKey::MobileReseller, ProviderKey::DomainReseller]);
        let registry = ProviderRegistry::build(vec![
            factory(ProviderKey::CardGateway),
            factory(ProviderKey::DomainReseller),
        ])
        .with_routing(routing);

        assert_eq!(registry.best_provider_for("IL").unwrap().key(), ProviderKey::CardGateway);
        // preferred mobile reseller is absent; next preference wins
        assert_eq!(registry.best_provider_for("us").unwrap().key(), ProviderKey::DomainReseller);
        // unknown country falls back to the first registered provider
        assert_eq!(registry.best_provider_for("FR").unwrap().key(), ProviderKey::CardGateway);
    }

    #[test]
    fn test_routing_table_from_toml() {
        let table = RoutingTable::from_toml(
            r#"
            [countries]
            il = ["card_gateway"]
            GB = ["mobile_reseller", "card_gateway"]
            "#,
        )
        .unwrap();

        assert_eq!(table.preferences("IL"), &[ProviderKey::CardGateway]);
        assert_eq!(table.preferences("gb").len(), 2);
        assert!(table.preferences("DE").is_empty());
    }

    #[test]
    fn test_register_replaces_in_place() {
        let mut registry = ProviderRegistry::new()
            .with_provider(Arc::new(NullProvider(ProviderKey::CardGateway)))
            .with_provider(Arc::new(NullProvider(ProviderKey::MobileReseller)));
        registry.register(Arc::new(NullProvider(ProviderKey::CardGateway)));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.default_provider().unwrap().key(), ProviderKey::CardGateway);
    }
}
