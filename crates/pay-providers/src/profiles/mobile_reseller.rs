//! Connectivity reseller (eSIM and mobile data plans).
//!
//! Bearer auth, amounts in minor units, string statuses, and an event
//! envelope around webhook objects.

use crate::profile::*;
use pay_core::{Currency, ProviderKey, TransactionStatus};
use std::time::Duration;

const ORDER: TransactionFields = TransactionFields {
    root: "/data",
    id: "/id",
    reference: "/client_reference",
    amount: "/amount",
    currency: Some("/currency"),
    status: "/status",
    email: Some("/customer_email"),
    name: Some("/customer_name"),
    authorization_code: None,
    failure_reason: Some("/failure_reason"),
    created_at: Some("/created_at"),
    refunded_amount: Some("/refunded_amount"),
    requires_3ds: None,
};

pub static MOBILE_RESELLER: ProviderProfile = ProviderProfile {
    key: ProviderKey::MobileReseller,
    display_name: "Mobile Reseller",
    env_prefix: "MOBILE_RESELLER",
    base_url: "https://api.connectivity-partner.com/v1",
    timeout: Duration::from_secs(15),
    http_retries: 3,
    currencies: &[Currency::USD, Currency::EUR, Currency::GBP, Currency::ILS],
    default_currency: Currency::USD,
    amount_unit: AmountUnit::Minor,
    required_fields: &[
        ("api_key", "Partner API key"),
        ("webhook_secret", "Shared secret used to sign webhooks"),
    ],
    auth: AuthScheme::Bearer { field: "api_key" },
    endpoints: Endpoints {
        create_session: Endpoint::post("/orders"),
        verify: Endpoint::get("/orders/reference/{reference}"),
        transaction: Endpoint::get("/orders/{id}"),
        refund: Endpoint::post("/orders/{id}/refunds"),
        cancel: Endpoint::post("/orders/{id}/cancel"),
        list: Endpoint::get("/orders"),
        ping: Endpoint::get("/ping"),
        catalog: Some(Endpoint::get("/plans")),
    },
    request: RequestFields {
        amount: "amount",
        currency: "currency",
        reference: "client_reference",
        email: "customer_email",
        name: "customer_name",
        description: "description",
        return_url: "return_url",
        save_token: None,
        metadata: Some("metadata"),
        refund_amount: "amount",
    },
    list: ListParams {
        from: "created_from",
        to: "created_to",
        limit: "per_page",
        root: "/data",
    },
    session: SessionFields {
        provider_reference: "/data/id",
        checkout_url: "/data/checkout_url",
        token: None,
        expires_at: Some("/data/expires_at"),
    },
    transaction: ORDER,
    errors: ErrorFields {
        code: "/error/code",
        message: "/error/message",
        ok_codes: &[],
    },
    webhook: WebhookFields {
        webhook_id: Some("/event_id"),
        external_id: Some("/data/id"),
        event_type: Some("/type"),
        default_event_type: "order.updated",
        signature_header: "x-signature",
        transaction: ORDER,
    },
    statuses: &[
        ("pending", TransactionStatus::Pending),
        ("awaiting_payment", TransactionStatus::Pending),
        ("processing", TransactionStatus::Processing),
        ("provisioning", TransactionStatus::Processing),
        ("completed", TransactionStatus::Success),
        ("active", TransactionStatus::Success),
        ("failed", TransactionStatus::Failed),
        ("cancelled", TransactionStatus::Cancelled),
        ("expired", TransactionStatus::Expired),
        ("refunded", TransactionStatus::Refunded),
        ("partially_refunded", TransactionStatus::PartiallyRefunded),
    ],
    unknown_status: TransactionStatus::Pending,
    error_codes: &[
        ("INSUFFICIENT_BALANCE", "insufficient_funds"),
        ("CARD_DECLINED", "card_declined"),
        ("FRAUD_SUSPECTED", "fraud_detected"),
        ("INVALID_AMOUNT", "invalid_amount"),
        ("INVALID_CARD", "invalid_card"),
    ],
    catalog: Some(CatalogFields {
        root: "/data",
        limit_param: "per_page",
        id: "/id",
        name: "/name",
        category: Some("/type"),
        price: "/price",
        currency: Some("/currency"),
        country: Some("/country"),
        active: Some("/available"),
        attributes: &[("data_mb", "/data_mb"), ("validity_days", "/validity_days")],
    }),
    supports_refunds: true,
};
