//! # Catalog Types
//!
//! External catalogs (connectivity plans, domain and hosting products)
//! mirrored locally by the catalog sync job.

use crate::money::Currency;
use crate::provider::ProviderKey;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A product offered by an external provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Provider that owns this item
    pub provider: ProviderKey,

    /// Provider-native identifier
    pub external_id: String,

    /// Display name
    pub name: String,

    /// Provider category (e.g. "data_plan", "tld", "hosting")
    #[serde(default)]
    pub category: String,

    /// Price in major units
    pub price: Decimal,

    pub currency: Currency,

    /// ISO 3166 country code the item is sold in, if country-bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    /// Whether this item is currently purchasable
    #[serde(default = "default_true")]
    pub active: bool,

    /// Provider-specific attributes (data allowance, validity, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl CatalogItem {
    pub fn new(
        provider: ProviderKey,
        external_id: impl Into<String>,
        name: impl Into<String>,
        price: Decimal,
        currency: Currency,
    ) -> Self {
        Self {
            provider,
            external_id: external_id.into(),
            name: name.into(),
            category: String::new(),
            price,
            currency,
            country: None,
            active: true,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder: set category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Builder: set country
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into().to_ascii_uppercase());
        self
    }

    /// Builder: add attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Counts produced by a catalog upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogWriteSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl CatalogWriteSummary {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

/// Outcome of the most recent sync for a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Never,
    Running,
    Completed,
    Failed,
}

/// Per-provider sync bookkeeping, shown on operator dashboards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSyncStatus {
    pub provider: ProviderKey,
    pub state: SyncState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub items_fetched: usize,
    pub summary: CatalogWriteSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderSyncStatus {
    pub fn never(provider: ProviderKey) -> Self {
        Self {
            provider,
            state: SyncState::Never,
            last_synced_at: None,
            duration_ms: None,
            items_fetched: 0,
            summary: CatalogWriteSummary::default(),
            error: None,
        }
    }

    pub fn completed(
        provider: ProviderKey,
        duration_ms: u64,
        items_fetched: usize,
        summary: CatalogWriteSummary,
    ) -> Self {
        Self {
            provider,
            state: SyncState::Completed,
            last_synced_at: Some(Utc::now()),
            duration_ms: Some(duration_ms),
            items_fetched,
            summary,
            error: None,
        }
    }

    pub fn failed(provider: ProviderKey, error: impl Into<String>) -> Self {
        Self {
            provider,
            state: SyncState::Failed,
            last_synced_at: None,
            duration_ms: None,
            items_fetched: 0,
            summary: CatalogWriteSummary::default(),
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_catalog_item_builder() {
        let item = CatalogItem::new(
            ProviderKey::MobileReseller,
            "plan-il-5gb",
            "Israel 5GB / 30 days",
            dec!(12.50),
            Currency::USD,
        )
        .with_category("data_plan")
        .with_country("il")
        .with_attribute("data_mb", json!(5120));

        assert_eq!(item.country.as_deref(), Some("IL"));
        assert_eq!(item.category, "data_plan");
        assert_eq!(item.attributes.get("data_mb"), Some(&json!(5120)));
        assert!(item.active);
    }

    #[test]
    fn test_write_summary_total() {
        let summary = CatalogWriteSummary {
            created: 2,
            updated: 3,
            unchanged: 5,
        };
        assert_eq!(summary.total(), 10);
    }
}
