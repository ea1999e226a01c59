//! # Provider Profiles
//!
//! A profile is the declarative description of one provider's HTTP API:
//! where the endpoints live, how requests are authenticated, which JSON
//! fields carry which transaction attributes and how the provider's status
//! and error codes map onto ours. [`GatewayAdapter`](crate::GatewayAdapter)
//! turns a profile plus credentials into a [`PaymentProvider`](pay_core::PaymentProvider).
//!
//! Field locations are JSON pointers (RFC 6901) relative to the object the
//! profile names as root.

use pay_core::{Currency, ProviderKey, TransactionStatus};
use std::time::Duration;

/// How amounts are written on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountUnit {
    /// Decimal string in major units, e.g. `"150.00"`
    Major,
    /// Integer in the currency's smallest unit, e.g. `15000`
    Minor,
}

/// How a request proves who is calling
#[derive(Debug, Clone, Copy)]
pub enum AuthScheme {
    /// `Authorization: Bearer <credential field>`
    Bearer { field: &'static str },
    /// Fixed headers, (header name, credential field)
    Headers(&'static [(&'static str, &'static str)]),
    /// Credentials merged into every JSON body and query, (wire key, credential field)
    BodyFields(&'static [(&'static str, &'static str)]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        }
    }
}

/// One API endpoint. `{id}` and `{reference}` placeholders are substituted.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    pub method: HttpMethod,
    pub path: &'static str,
}

impl Endpoint {
    pub const fn get(path: &'static str) -> Self {
        Self {
            method: HttpMethod::Get,
            path,
        }
    }

    pub const fn post(path: &'static str) -> Self {
        Self {
            method: HttpMethod::Post,
            path,
        }
    }

    /// Path with placeholders filled in
    pub fn render(&self, id: Option<&str>, reference: Option<&str>) -> String {
        let mut path = self.path.to_string();
        if let Some(id) = id {
            path = path.replace("{id}", id);
        }
        if let Some(reference) = reference {
            path = path.replace("{reference}", reference);
        }
        path
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Endpoints {
    pub create_session: Endpoint,
    pub verify: Endpoint,
    pub transaction: Endpoint,
    pub refund: Endpoint,
    pub cancel: Endpoint,
    pub list: Endpoint,
    pub ping: Endpoint,
    pub catalog: Option<Endpoint>,
}

/// Wire keys used when building a create-session or refund body
#[derive(Debug, Clone, Copy)]
pub struct RequestFields {
    pub amount: &'static str,
    pub currency: &'static str,
    pub reference: &'static str,
    pub email: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub return_url: &'static str,
    pub save_token: Option<&'static str>,
    pub metadata: Option<&'static str>,
    pub refund_amount: &'static str,
}

/// Query parameter names for transaction listing
#[derive(Debug, Clone, Copy)]
pub struct ListParams {
    pub from: &'static str,
    pub to: &'static str,
    pub limit: &'static str,
    /// Pointer to the array of transactions in the list response
    pub root: &'static str,
}

/// Where the create-session response keeps its details
#[derive(Debug, Clone, Copy)]
pub struct SessionFields {
    pub provider_reference: &'static str,
    pub checkout_url: &'static str,
    pub token: Option<&'static str>,
    pub expires_at: Option<&'static str>,
}

/// Where a transaction object keeps its attributes
#[derive(Debug, Clone, Copy)]
pub struct TransactionFields {
    /// Pointer to the transaction object inside the document (`""` = document root)
    pub root: &'static str,
    pub id: &'static str,
    pub reference: &'static str,
    pub amount: &'static str,
    pub currency: Option<&'static str>,
    pub status: &'static str,
    pub email: Option<&'static str>,
    pub name: Option<&'static str>,
    pub authorization_code: Option<&'static str>,
    pub failure_reason: Option<&'static str>,
    pub created_at: Option<&'static str>,
    pub refunded_amount: Option<&'static str>,
    /// Boolean flag set when the issuer demands a 3-D Secure challenge
    pub requires_3ds: Option<&'static str>,
}

/// API-level error reporting
#[derive(Debug, Clone, Copy)]
pub struct ErrorFields {
    pub code: &'static str,
    pub message: &'static str,
    /// Codes that mean "no error". Empty means any code present is an error.
    pub ok_codes: &'static [&'static str],
}

/// Webhook identity and payload layout
#[derive(Debug, Clone, Copy)]
pub struct WebhookFields {
    pub webhook_id: Option<&'static str>,
    pub external_id: Option<&'static str>,
    pub event_type: Option<&'static str>,
    /// Event type reported when the payload carries none
    pub default_event_type: &'static str,
    pub signature_header: &'static str,
    pub transaction: TransactionFields,
}

/// Catalog listing layout
#[derive(Debug, Clone, Copy)]
pub struct CatalogFields {
    pub root: &'static str,
    pub limit_param: &'static str,
    pub id: &'static str,
    pub name: &'static str,
    pub category: Option<&'static str>,
    pub price: &'static str,
    pub currency: Option<&'static str>,
    pub country: Option<&'static str>,
    pub active: Option<&'static str>,
    /// (attribute name, pointer)
    pub attributes: &'static [(&'static str, &'static str)],
}

/// Static description of a provider API
#[derive(Debug)]
pub struct ProviderProfile {
    pub key: ProviderKey,
    pub display_name: &'static str,
    /// Environment variable prefix, e.g. `CARD_GATEWAY`
    pub env_prefix: &'static str,
    pub base_url: &'static str,
    pub timeout: Duration,
    /// Extra attempts on network failures and 5xx responses
    pub http_retries: u32,
    pub currencies: &'static [Currency],
    pub default_currency: Currency,
    pub amount_unit: AmountUnit,
    /// (field, description)
    pub required_fields: &'static [(&'static str, &'static str)],
    pub auth: AuthScheme,
    pub endpoints: Endpoints,
    pub request: RequestFields,
    pub list: ListParams,
    pub session: SessionFields,
    pub transaction: TransactionFields,
    pub errors: ErrorFields,
    pub webhook: WebhookFields,
    /// Provider status code -> normalized status
    pub statuses: &'static [(&'static str, TransactionStatus)],
    /// Status for codes missing from `statuses`
    pub unknown_status: TransactionStatus,
    /// Provider error code -> normalized error code
    pub error_codes: &'static [(&'static str, &'static str)],
    pub catalog: Option<CatalogFields>,
    pub supports_refunds: bool,
}

impl ProviderProfile {
    /// Environment variable for a credential field, `{PREFIX}_{FIELD}`
    pub fn env_var(&self, field: &str) -> String {
        format!("{}_{}", self.env_prefix, field.to_ascii_uppercase())
    }

    /// Normalize a provider status code
    pub fn map_status(&self, code: &str) -> TransactionStatus {
        self.statuses
            .iter()
            .find(|(c, _)| c.eq_ignore_ascii_case(code))
            .map(|(_, s)| *s)
            .unwrap_or(self.unknown_status)
    }

    /// Normalize a provider error code; unknown codes pass through lowercased
    pub fn map_error_code(&self, code: &str) -> String {
        self.error_codes
            .iter()
            .find(|(c, _)| c.eq_ignore_ascii_case(code))
            .map(|(_, normalized)| normalized.to_string())
            .unwrap_or_else(|| code.to_ascii_lowercase())
    }

    pub fn supports_currency(&self, currency: Currency) -> bool {
        self.currencies.contains(&currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::{CARD_GATEWAY, MOBILE_RESELLER};

    #[test]
    fn test_endpoint_render() {
        let ep = Endpoint::get("/deals/{id}/refund");
        assert_eq!(ep.render(Some("D1"), None), "/deals/D1/refund");
        assert_eq!(
            Endpoint::get("/deals/by-ref/{reference}").render(None, Some("REF1")),
            "/deals/by-ref/REF1"
        );
    }

    #[test]
    fn test_env_var_naming() {
        assert_eq!(CARD_GATEWAY.env_var("api_key"), "CARD_GATEWAY_API_KEY");
        assert_eq!(MOBILE_RESELLER.env_var("base_url"), "MOBILE_RESELLER_BASE_URL");
    }

    #[test]
    fn test_status_and_error_mapping() {
        assert_eq!(CARD_GATEWAY.map_status("0"), TransactionStatus::Success);
        assert_eq!(CARD_GATEWAY.map_status("999"), TransactionStatus::Failed);
        assert_eq!(MOBILE_RESELLER.map_status("COMPLETED"), TransactionStatus::Success);
        assert_eq!(MOBILE_RESELLER.map_status("who-knows"), TransactionStatus::Pending);

        assert_eq!(CARD_GATEWAY.map_error_code("51"), "insufficient_funds");
        assert_eq!(MOBILE_RESELLER.map_error_code("RATE_LIMITED"), "rate_limited");
    }
}
