//! # pay-providers
//!
//! Provider adapters for lightning-gateway.
//!
//! Every provider is reached through a single [`GatewayAdapter`] configured
//! by a static [`ProviderProfile`]:
//! - `card_gateway`: Israeli card processing, body-field terminal auth
//! - `mobile_reseller`: eSIM and data plans, bearer auth, minor units
//! - `domain_reseller`: domains and hosting, header-pair auth
//!
//! ## Configuration
//!
//! Credentials come from `{PREFIX}_{FIELD}` environment variables:
//! - `CARD_GATEWAY_TERMINAL`, `CARD_GATEWAY_API_KEY`, `CARD_GATEWAY_WEBHOOK_SECRET`
//! - `MOBILE_RESELLER_API_KEY`, `MOBILE_RESELLER_WEBHOOK_SECRET`
//! - `DOMAIN_RESELLER_API_USER`, `DOMAIN_RESELLER_API_KEY`, `DOMAIN_RESELLER_WEBHOOK_SECRET`
//!
//! `{PREFIX}_BASE_URL` overrides the API endpoint.

pub mod adapter;
pub mod config;
pub mod http;
pub mod profile;
pub mod profiles;
pub mod signature;

pub use adapter::GatewayAdapter;
pub use config::ProviderCredentials;
pub use http::ProviderHttp;
pub use profile::ProviderProfile;
pub use profiles::{profile_for, CARD_GATEWAY, DOMAIN_RESELLER, MOBILE_RESELLER};

use pay_core::{BoxedProvider, PaymentResult, ProviderFactory, ProviderKey};
use std::sync::Arc;

/// Build the adapter for `key` from environment credentials
pub fn build_provider(key: ProviderKey) -> PaymentResult<BoxedProvider> {
    let adapter = GatewayAdapter::from_env(profile_for(key))?;
    Ok(Arc::new(adapter))
}

/// One factory per known provider, in registration order.
///
/// Feed to [`ProviderRegistry::build`](pay_core::ProviderRegistry::build) so a
/// misconfigured provider is skipped without affecting the others.
pub fn default_factories() -> Vec<(ProviderKey, ProviderFactory)> {
    ProviderKey::ALL
        .into_iter()
        .map(|key| {
            let factory: ProviderFactory = Box::new(move || build_provider(key));
            (key, factory)
        })
        .collect()
}
