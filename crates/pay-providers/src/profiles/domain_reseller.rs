//! Domain and hosting reseller.
//!
//! Header-pair auth, decimal amounts, webhooks wrap a `payment` object.

use crate::profile::*;
use pay_core::{Currency, ProviderKey, TransactionStatus};
use std::time::Duration;

const PAYMENT: TransactionFields = TransactionFields {
    root: "/payment",
    id: "/id",
    reference: "/order_ref",
    amount: "/total",
    currency: Some("/currency"),
    status: "/state",
    email: Some("/email"),
    name: Some("/customer"),
    authorization_code: None,
    failure_reason: Some("/reason"),
    created_at: Some("/created"),
    refunded_amount: Some("/refunded"),
    requires_3ds: None,
};

pub static DOMAIN_RESELLER: ProviderProfile = ProviderProfile {
    key: ProviderKey::DomainReseller,
    display_name: "Domain Reseller",
    env_prefix: "DOMAIN_RESELLER",
    base_url: "https://api.domain-partner.com/v3",
    timeout: Duration::from_secs(45),
    http_retries: 1,
    currencies: &[Currency::USD, Currency::EUR, Currency::ILS],
    default_currency: Currency::USD,
    amount_unit: AmountUnit::Major,
    required_fields: &[
        ("api_user", "Reseller account user"),
        ("api_key", "Reseller API key"),
        ("webhook_secret", "Shared secret used to sign webhooks"),
    ],
    auth: AuthScheme::Headers(&[("X-Api-User", "api_user"), ("X-Api-Key", "api_key")]),
    endpoints: Endpoints {
        create_session: Endpoint::post("/payments"),
        verify: Endpoint::get("/payments/lookup/{reference}"),
        transaction: Endpoint::get("/payments/{id}"),
        refund: Endpoint::post("/payments/{id}/refund"),
        cancel: Endpoint::post("/payments/{id}/void"),
        list: Endpoint::get("/payments"),
        ping: Endpoint::get("/account/balance"),
        catalog: Some(Endpoint::get("/products/pricing")),
    },
    request: RequestFields {
        amount: "total",
        currency: "currency",
        reference: "order_ref",
        email: "email",
        name: "customer",
        description: "memo",
        return_url: "return_url",
        save_token: None,
        metadata: Some("extra"),
        refund_amount: "amount",
    },
    list: ListParams {
        from: "since",
        to: "until",
        limit: "limit",
        root: "/payments",
    },
    session: SessionFields {
        provider_reference: "/payment/id",
        checkout_url: "/payment/pay_url",
        token: Some("/payment/token"),
        expires_at: Some("/payment/expires"),
    },
    transaction: PAYMENT,
    errors: ErrorFields {
        code: "/errors/0/code",
        message: "/errors/0/message",
        ok_codes: &[],
    },
    webhook: WebhookFields {
        webhook_id: Some("/notification_id"),
        external_id: Some("/payment/id"),
        event_type: Some("/event"),
        default_event_type: "payment.updated",
        signature_header: "x-signature",
        transaction: PAYMENT,
    },
    statuses: &[
        ("new", TransactionStatus::Pending),
        ("pending", TransactionStatus::Pending),
        ("in_progress", TransactionStatus::Processing),
        ("paid", TransactionStatus::Success),
        ("declined", TransactionStatus::Failed),
        ("voided", TransactionStatus::Cancelled),
        ("timeout", TransactionStatus::Expired),
        ("refunded", TransactionStatus::Refunded),
        ("partial_refund", TransactionStatus::PartiallyRefunded),
    ],
    unknown_status: TransactionStatus::Pending,
    error_codes: &[
        ("DECLINED", "card_declined"),
        ("FRAUD", "fraud_detected"),
        ("NSF", "insufficient_funds"),
        ("BAD_AMOUNT", "invalid_amount"),
        ("BAD_CARD", "invalid_card"),
    ],
    catalog: Some(CatalogFields {
        root: "/products",
        limit_param: "limit",
        id: "/sku",
        name: "/name",
        category: Some("/category"),
        price: "/register_price",
        currency: Some("/currency"),
        country: None,
        active: None,
        attributes: &[("tld", "/tld"), ("renew_price", "/renew_price")],
    }),
    supports_refunds: true,
};
