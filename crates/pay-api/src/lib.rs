//! # pay-api
//!
//! HTTP API layer for lightning-gateway-rs.
//!
//! This crate provides:
//! - Axum-based HTTP server over a running [`Engine`](pay_engine::Engine)
//! - REST endpoints for payments, refunds and statistics
//! - Signed webhook ingress feeding the background pipeline
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Engine and provider health |
//! | POST | `/api/v1/payments` | Validate a request and open a session |
//! | POST | `/api/v1/payments/{reference}/verify` | Verify a payment |
//! | POST | `/api/v1/transactions/{id}/refund` | Refund a transaction |
//! | GET | `/api/v1/stats` | Payment statistics |
//! | POST | `/webhook/{provider}` | Provider webhook (`X-Signature`) |

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{AppConfig, AppState};
