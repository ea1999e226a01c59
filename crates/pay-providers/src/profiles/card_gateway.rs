//! Israeli card-processing gateway.
//!
//! Terminal-based auth carried in the request body, amounts as decimal
//! shekel strings, numeric result codes where `"0"` is approval. Webhooks
//! are flat deal objects: `{"code":"0","dealId":"D1","ref":"REF1","amount":"150.00"}`.

use crate::profile::*;
use pay_core::{Currency, ProviderKey, TransactionStatus};
use std::time::Duration;

const DEAL: TransactionFields = TransactionFields {
    root: "",
    id: "/dealId",
    reference: "/ref",
    amount: "/amount",
    currency: Some("/currency"),
    status: "/code",
    email: Some("/email"),
    name: Some("/fullName"),
    authorization_code: Some("/authNumber"),
    failure_reason: Some("/message"),
    created_at: Some("/createdAt"),
    refunded_amount: Some("/refundedAmount"),
    requires_3ds: Some("/threeDsRequired"),
};

pub static CARD_GATEWAY: ProviderProfile = ProviderProfile {
    key: ProviderKey::CardGateway,
    display_name: "Card Gateway",
    env_prefix: "CARD_GATEWAY",
    base_url: "https://secure.cardgateway.co.il/api/v2",
    timeout: Duration::from_secs(30),
    http_retries: 2,
    currencies: &[Currency::ILS, Currency::USD, Currency::EUR],
    default_currency: Currency::ILS,
    amount_unit: AmountUnit::Major,
    required_fields: &[
        ("terminal", "Terminal number issued by the gateway"),
        ("api_key", "API key for the terminal"),
        ("webhook_secret", "Shared secret used to sign webhooks"),
    ],
    auth: AuthScheme::BodyFields(&[("terminal", "terminal"), ("apiKey", "api_key")]),
    endpoints: Endpoints {
        create_session: Endpoint::post("/deals/checkout"),
        verify: Endpoint::get("/deals/by-ref/{reference}"),
        transaction: Endpoint::get("/deals/{id}"),
        refund: Endpoint::post("/deals/{id}/refund"),
        cancel: Endpoint::post("/deals/{id}/cancel"),
        list: Endpoint::get("/deals"),
        ping: Endpoint::get("/terminal/status"),
        catalog: None,
    },
    request: RequestFields {
        amount: "amount",
        currency: "currency",
        reference: "ref",
        email: "email",
        name: "fullName",
        description: "description",
        return_url: "successUrl",
        save_token: Some("createToken"),
        metadata: None,
        refund_amount: "amount",
    },
    list: ListParams {
        from: "fromDate",
        to: "toDate",
        limit: "limit",
        root: "/deals",
    },
    session: SessionFields {
        provider_reference: "/dealId",
        checkout_url: "/url",
        token: Some("/token"),
        expires_at: None,
    },
    transaction: DEAL,
    errors: ErrorFields {
        code: "/code",
        message: "/message",
        ok_codes: &["0"],
    },
    webhook: WebhookFields {
        webhook_id: None,
        external_id: Some("/dealId"),
        event_type: None,
        default_event_type: "deal",
        signature_header: "x-signature",
        transaction: DEAL,
    },
    statuses: &[
        ("0", TransactionStatus::Success),
        ("700", TransactionStatus::Pending),
        ("701", TransactionStatus::Processing),
        ("800", TransactionStatus::Cancelled),
        ("801", TransactionStatus::Expired),
        ("900", TransactionStatus::Refunded),
        ("901", TransactionStatus::PartiallyRefunded),
    ],
    unknown_status: TransactionStatus::Failed,
    error_codes: &[
        ("4", "card_declined"),
        ("6", "invalid_card"),
        ("33", "card_declined"),
        ("36", "invalid_card"),
        ("51", "insufficient_funds"),
        ("57", "card_declined"),
        ("59", "fraud_detected"),
        ("920", "invalid_amount"),
    ],
    catalog: None,
    supports_refunds: true,
};
