//! # Provider Credentials
//!
//! Credentials are loaded from environment variables named
//! `{PREFIX}_{FIELD}` where the prefix and field list come from the
//! provider profile, e.g. `CARD_GATEWAY_TERMINAL`.

use crate::profile::ProviderProfile;
use pay_core::{PaymentError, ProviderKey};
use std::collections::BTreeMap;
use std::env;

/// Field holding the webhook signing secret in every profile
pub const WEBHOOK_SECRET_FIELD: &str = "webhook_secret";

/// Credentials for one provider
#[derive(Clone)]
pub struct ProviderCredentials {
    pub provider: ProviderKey,
    values: BTreeMap<String, String>,
    /// API base URL override (sandbox, mock server)
    pub base_url: Option<String>,
    pub test_mode: bool,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("provider", &self.provider)
            .field("fields", &self.values.keys().collect::<Vec<_>>())
            .field("base_url", &self.base_url)
            .field("test_mode", &self.test_mode)
            .finish()
    }
}

impl ProviderCredentials {
    /// Load credentials for `profile` from environment variables.
    ///
    /// Every field in `profile.required_fields` must be set and non-empty.
    /// `{PREFIX}_BASE_URL` and `{PREFIX}_TEST_MODE` are optional.
    pub fn from_env(profile: &ProviderProfile) -> Result<Self, PaymentError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let mut values = BTreeMap::new();
        let mut missing = Vec::new();
        for (field, _) in profile.required_fields {
            let var = profile.env_var(field);
            match env::var(&var) {
                Ok(v) if !v.trim().is_empty() => {
                    values.insert(field.to_string(), v);
                }
                _ => missing.push(var),
            }
        }

        if !missing.is_empty() {
            return Err(PaymentError::Configuration(format!(
                "{} not set",
                missing.join(", ")
            )));
        }

        let base_url = env::var(profile.env_var("base_url")).ok().filter(|v| !v.is_empty());
        let test_mode = env::var(profile.env_var("test_mode"))
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            provider: profile.key,
            values,
            base_url,
            test_mode,
        })
    }

    /// Create credentials with explicit values (for testing)
    pub fn new<K, V>(provider: ProviderKey, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            provider,
            values: values.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            base_url: None,
            test_mode: true,
        }
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    /// Fail with a configuration error naming any required field that is absent
    pub fn ensure_complete(&self, profile: &ProviderProfile) -> Result<(), PaymentError> {
        let missing: Vec<String> = profile
            .required_fields
            .iter()
            .filter(|(field, _)| self.get(field).map_or(true, |v| v.trim().is_empty()))
            .map(|(field, _)| profile.env_var(field))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PaymentError::Configuration(format!("{} not set", missing.join(", "))))
        }
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.get(WEBHOOK_SECRET_FIELD)
    }
}
