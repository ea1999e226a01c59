//! # Engine Configuration
//!
//! Loaded from environment variables (with `.env` support) plus an optional
//! TOML routing table.

use pay_core::{PaymentError, PaymentResult, ProviderKey, RoutingTable};
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lifetime of a payment session when the provider sets no expiry
    pub session_ttl_minutes: i64,
    /// How long a provider health probe result is reused
    pub health_cache_ttl: Duration,
    /// Worker count for `payment-webhooks`
    pub webhook_workers: usize,
    /// Worker count for `payment-retries`
    pub retry_workers: usize,
    /// Worker count for `catalog-sync`
    pub sync_workers: usize,
    /// Provider used when a request names none and routing has no match
    pub default_provider: Option<ProviderKey>,
    /// Path to the routing table; searched in `config/` when unset
    pub routing_config: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_ttl_minutes: 30,
            health_cache_ttl: Duration::from_secs(300),
            webhook_workers: 4,
            retry_workers: 2,
            sync_workers: 2,
            default_provider: None,
            routing_config: None,
        }
    }
}

impl EngineConfig {
    /// Load from environment variables
    pub fn from_env() -> PaymentResult<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let default_provider = match std::env::var("DEFAULT_PROVIDER") {
            Ok(v) if !v.trim().is_empty() => Some(v.trim().parse::<ProviderKey>().map_err(|_| {
                PaymentError::Configuration(format!("DEFAULT_PROVIDER '{}' is not a known provider", v))
            })?),
            _ => None,
        };

        Ok(Self {
            session_ttl_minutes: env_parse("SESSION_TTL_MINUTES").unwrap_or(defaults.session_ttl_minutes),
            health_cache_ttl: env_parse("HEALTH_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.health_cache_ttl),
            webhook_workers: env_parse("WEBHOOK_WORKERS").unwrap_or(defaults.webhook_workers),
            retry_workers: env_parse("RETRY_WORKERS").unwrap_or(defaults.retry_workers),
            sync_workers: env_parse("SYNC_WORKERS").unwrap_or(defaults.sync_workers),
            default_provider,
            routing_config: std::env::var("ROUTING_CONFIG").ok().map(PathBuf::from),
        })
    }

    /// Load the country routing table.
    ///
    /// An explicit `routing_config` must exist and parse. Without one the
    /// usual `config/routing.toml` locations are tried, falling back to
    /// [`default_routing`].
    pub fn load_routing(&self) -> PaymentResult<RoutingTable> {
        if let Some(path) = &self.routing_config {
            let content = std::fs::read_to_string(path).map_err(|e| {
                PaymentError::Configuration(format!("cannot read {}: {}", path.display(), e))
            })?;
            return parse_routing(&content, &path.display().to_string());
        }

        let config_paths = [
            "config/routing.toml",
            "../config/routing.toml",
            "../../config/routing.toml",
        ];
        for path in config_paths {
            if let Ok(content) = std::fs::read_to_string(path) {
                let table = parse_routing(&content, path)?;
                tracing::info!("Loaded routing for {} countries from {}", table.countries.len(), path);
                return Ok(table);
            }
        }

        tracing::warn!("No routing table found, using built-in defaults");
        Ok(default_routing())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_routing(content: &str, origin: &str) -> PaymentResult<RoutingTable> {
    RoutingTable::from_toml(content)
        .map_err(|e| PaymentError::Configuration(format!("failed to parse {}: {}", origin, e)))
}

/// Built-in preferences: local card processing for Israel, resellers elsewhere
pub fn default_routing() -> RoutingTable {
    use ProviderKey::*;
    RoutingTable::new()
        .with_country("IL", vec![CardGateway, MobileReseller, DomainReseller])
        .with_country("US", vec![DomainReseller, MobileReseller, CardGateway])
        .with_country("GB", vec![MobileReseller, DomainReseller, CardGateway])
        .with_country("DE", vec![MobileReseller, DomainReseller, CardGateway])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        std::env::remove_var("SESSION_TTL_MINUTES");
        std::env::remove_var("HEALTH_CACHE_TTL_SECS");
        std::env::remove_var("DEFAULT_PROVIDER");

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.session_ttl_minutes, 30);
        assert_eq!(config.health_cache_ttl, Duration::from_secs(300));
        assert!(config.default_provider.is_none());
    }

    #[test]
    fn test_missing_explicit_routing_file_is_configuration_error() {
        let config = EngineConfig {
            routing_config: Some(PathBuf::from("/nonexistent/routing.toml")),
            ..Default::default()
        };
        assert!(matches!(config.load_routing(), Err(PaymentError::Configuration(_))));
    }

    #[test]
    fn test_default_routing_prefers_card_gateway_in_israel() {
        let routing = default_routing();
        assert_eq!(routing.preferences("il")[0], ProviderKey::CardGateway);
        assert!(routing.preferences("FR").is_empty());
    }
}
