//! Profiles for the providers the engine ships with.

mod card_gateway;
mod domain_reseller;
mod mobile_reseller;

pub use card_gateway::CARD_GATEWAY;
pub use domain_reseller::DOMAIN_RESELLER;
pub use mobile_reseller::MOBILE_RESELLER;

use crate::profile::ProviderProfile;
use pay_core::ProviderKey;

/// Profile registered under `key`
pub fn profile_for(key: ProviderKey) -> &'static ProviderProfile {
    match key {
        ProviderKey::CardGateway => &CARD_GATEWAY,
        ProviderKey::MobileReseller => &MOBILE_RESELLER,
        ProviderKey::DomainReseller => &DOMAIN_RESELLER,
    }
}
