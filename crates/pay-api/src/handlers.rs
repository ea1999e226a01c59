//! # Request Handlers
//!
//! Axum request handlers for the payment API. Every failure is answered
//! with an [`ErrorResponse`] whose status comes from the error taxonomy.

use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use pay_core::{
    Currency, EntityRef, PaymentError, PaymentRequest, PaymentSession, PaymentStats, ProviderKey,
    TransactionData, TransactionQuery,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info, instrument, warn};

/// Header carrying the webhook HMAC
pub const SIGNATURE_HEADER: &str = "x-signature";

// =============================================================================
// Request/Response Types
// =============================================================================

/// Create payment request
#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub amount: Decimal,
    pub currency: Currency,
    pub customer_email: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Explicit provider; otherwise routed by country
    #[serde(default)]
    pub provider: Option<ProviderKey>,
    /// ISO 3166 alpha-2 country used for routing
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub save_token: bool,
    /// Domain entity the payment is for (order, subscription)
    #[serde(default)]
    pub linked_entity: Option<EntityRef>,
}

impl CreatePaymentRequest {
    fn into_payment_request(self) -> PaymentRequest {
        let mut builder = PaymentRequest::builder()
            .amount(self.amount)
            .currency(self.currency)
            .customer_email(self.customer_email)
            .save_token(self.save_token);
        if let Some(name) = self.customer_name {
            builder = builder.customer_name(name);
        }
        if let Some(description) = self.description {
            builder = builder.description(description);
        }
        if let Some(provider) = self.provider {
            builder = builder.provider(provider);
        }
        if let Some(country) = self.country {
            builder = builder.country(country);
        }
        if let Some(entity) = self.linked_entity {
            builder = builder.linked_entity(entity);
        }
        for (key, value) in self.metadata {
            builder = builder.metadata(key, value);
        }
        builder.build()
    }
}

/// Optional provider override in the query string
#[derive(Debug, Default, Deserialize)]
pub struct ProviderParam {
    #[serde(default)]
    pub provider: Option<ProviderKey>,
}

/// Refund request; no amount refunds whatever is still refundable
#[derive(Debug, Default, Deserialize)]
pub struct RefundBody {
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub provider: Option<ProviderKey>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
            error_code: None,
            details: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn payment_error_to_response(err: PaymentError) -> ApiError {
    let code = err.status_code();
    let mut response = ErrorResponse::new(err.to_string(), code);
    response.error_code = err.error_code().map(String::from);
    if let PaymentError::Validation(violations) = err.root() {
        response = response.with_details(violations.clone());
    }
    (StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), Json(response))
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.engine.manager.health_check().await;
    Json(serde_json::json!({
        "status": if report.overall { "healthy" } else { "degraded" },
        "service": "lightning-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": report.providers,
        "unavailable": report.unavailable,
    }))
}

/// Accept a provider webhook.
///
/// The signature is checked here so forged deliveries are refused before
/// anything is queued; processing happens on `payment-webhooks`.
#[instrument(skip(state, headers, body), fields(provider = %provider, bytes = body.len()))]
pub async fn provider_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let key: ProviderKey = provider.parse().map_err(payment_error_to_response)?;
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    state
        .engine
        .manager
        .authenticate_webhook(key, &body, signature)
        .map_err(|e| {
            warn!(error = %e, "Webhook rejected");
            payment_error_to_response(e)
        })?;

    state
        .engine
        .enqueue_webhook(key, body.to_vec(), signature.map(String::from))
        .map_err(|e| {
            error!(error = %e, "Failed to enqueue webhook");
            payment_error_to_response(e)
        })?;

    info!("Webhook accepted");
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "status": "accepted" }))))
}

/// Validate a payment request and open a checkout session
#[instrument(skip(state, request), fields(amount = %request.amount, currency = %request.currency.as_str()))]
pub async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentSession>), ApiError> {
    let request = request.into_payment_request();
    let session = state
        .engine
        .manager
        .process_payment_request(&request, None)
        .await
        .map_err(|e| {
            warn!(error = %e, "Payment request refused");
            payment_error_to_response(e)
        })?;

    Ok((StatusCode::CREATED, Json(session)))
}

/// Ask the provider for a payment's outcome
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    Query(params): Query<ProviderParam>,
) -> Result<Json<TransactionData>, ApiError> {
    let tx = state
        .engine
        .manager
        .verify_payment(&reference, params.provider)
        .await
        .map_err(payment_error_to_response)?;
    Ok(Json(tx))
}

/// Refund a stored transaction in full or in part
#[instrument(skip(state, body), fields(transaction_id = %transaction_id))]
pub async fn refund_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
    Json(body): Json<RefundBody>,
) -> Result<Json<TransactionData>, ApiError> {
    let tx = state
        .engine
        .manager
        .refund_payment(&transaction_id, body.amount, body.provider)
        .await
        .map_err(|e| {
            error!(error = %e, "Refund failed");
            payment_error_to_response(e)
        })?;
    Ok(Json(tx))
}

/// Aggregate statistics, filtered by provider, status and date range
pub async fn payment_stats(
    State(state): State<AppState>,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<PaymentStats>, ApiError> {
    let stats = state
        .engine
        .manager
        .get_payment_stats(&query)
        .await
        .map_err(payment_error_to_response)?;
    Ok(Json(stats))
}
