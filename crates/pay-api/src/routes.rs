//! # Routes
//!
//! Axum router configuration for the payment API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - API v1:
///   - POST /api/v1/payments - Validate a request and open a session
///   - POST /api/v1/payments/{reference}/verify - Verify with the provider
///   - POST /api/v1/transactions/{id}/refund - Full or partial refund
///   - GET  /api/v1/stats - Payment statistics
///
/// - Webhooks:
///   - POST /webhook/{provider} - Signed provider callbacks, processed in the background
///
/// - GET /health - Engine and provider health
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/payments", post(handlers::create_payment))
        .route("/payments/{reference}/verify", post(handlers::verify_payment))
        .route("/transactions/{transaction_id}/refund", post(handlers::refund_transaction))
        .route("/stats", get(handlers::payment_stats));

    // Raw body: the signature covers the exact bytes received
    let webhook_routes = Router::new().route("/{provider}", post(handlers::provider_webhook));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/", get(handlers::health))
        .nest("/api/v1", api_routes)
        .nest("/webhook", webhook_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use pay_core::{ProviderKey, ProviderRegistry, TransactionStatus};
    use pay_engine::{CallbackRegistry, Engine, EngineConfig};
    use pay_providers::{signature, GatewayAdapter, ProviderCredentials, CARD_GATEWAY};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SECRET: &str = "whsec_test";

    fn state(base_url: &str) -> AppState {
        let creds = ProviderCredentials::new(
            ProviderKey::CardGateway,
            [("terminal", "0882016"), ("api_key", "k-123"), ("webhook_secret", SECRET)],
        )
        .with_base_url(base_url);
        let adapter = GatewayAdapter::new(&CARD_GATEWAY, creds).unwrap();
        let registry = ProviderRegistry::new().with_provider(Arc::new(adapter));
        let engine = Engine::with_registry(registry, EngineConfig::default(), CallbackRegistry::new());
        AppState::with_engine(
            Arc::new(engine),
            AppConfig {
                host: "127.0.0.1".into(),
                port: 0,
                environment: "test".into(),
            },
        )
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn webhook(provider: &str, body: &'static [u8], signature: Option<&str>) -> Request<Body> {
        let mut builder = Request::post(format!("/webhook/{}", provider));
        if let Some(sig) = signature {
            builder = builder.header("X-Signature", sig);
        }
        builder.body(Body::from(body)).unwrap()
    }

    const DEAL: &[u8] = br#"{"code":"0","dealId":"D1","ref":"REF1","amount":"150.00"}"#;

    #[tokio::test]
    async fn test_health_reports_provider_probe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/terminal/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": "0" })))
            .mount(&server)
            .await;
        let state = state(&server.uri());

        let (status, body) = send(&state, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["providers"]["card_gateway"]["healthy"], true);
    }

    #[tokio::test]
    async fn test_webhook_for_unknown_provider_is_not_found() {
        let state = state("http://localhost");
        let sig = signature::sign(SECRET, DEAL);
        let (status, _) = send(&state, webhook("paypal", DEAL, Some(&sig))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Known key without an active adapter
        let (status, _) = send(&state, webhook("mobile_reseller", DEAL, Some(&sig))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_webhook_with_bad_or_missing_signature_is_unauthorized() {
        let state = state("http://localhost");

        let (status, body) = send(&state, webhook("card_gateway", DEAL, Some("deadbeef"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], 401);

        let (status, _) = send(&state, webhook("card_gateway", DEAL, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_signed_webhook_is_accepted_and_processed() {
        let state = state("http://localhost");
        let sig = signature::sign(SECRET, DEAL);

        let (status, body) = send(&state, webhook("card_gateway", DEAL, Some(&sig))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "accepted");

        state.engine.shutdown().await;
        let tx = state
            .engine
            .manager
            .transactions()
            .get(ProviderKey::CardGateway, "D1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Success);
    }

    #[tokio::test]
    async fn test_invalid_payment_request_returns_violations() {
        let state = state("http://localhost");
        let (status, body) = send(
            &state,
            post_json(
                "/api/v1/payments",
                json!({ "amount": "0", "currency": "ILS", "customer_email": "not-an-email" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["details"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_payment_request_opens_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/deals/checkout"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "0",
                "dealId": "D7",
                "url": "https://secure.cardgateway.test/pay/D7",
            })))
            .expect(1)
            .mount(&server)
            .await;
        let state = state(&server.uri());

        let (status, body) = send(
            &state,
            post_json(
                "/api/v1/payments",
                json!({
                    "amount": "150.00",
                    "currency": "ILS",
                    "customer_email": "dana@example.co.il",
                    "country": "IL",
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["provider"], "card_gateway");
        assert_eq!(body["checkout_url"], "https://secure.cardgateway.test/pay/D7");
        assert!(body["reference"].as_str().unwrap().starts_with("pay_"));
    }

    #[tokio::test]
    async fn test_refund_of_unknown_transaction_is_not_found() {
        let state = state("http://localhost");
        let (status, body) = send(&state, post_json("/api/v1/transactions/D404/refund", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("D404"));
    }

    #[tokio::test]
    async fn test_stats_on_empty_store() {
        let state = state("http://localhost");
        let (status, body) = send(
            &state,
            Request::get("/api/v1/stats?provider=card_gateway").body(Body::empty()).unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 0);
    }
}
