//! # Lightning-Gateway RS
//!
//! Payment and value-added-services provider orchestration.
//!
//! ## Usage
//!
//! ```bash
//! # Provider credentials (any subset; missing providers are skipped)
//! export CARD_GATEWAY_TERMINAL=0882016
//! export CARD_GATEWAY_API_KEY=...
//! export CARD_GATEWAY_WEBHOOK_SECRET=...
//! export MOBILE_RESELLER_API_KEY=...
//! export MOBILE_RESELLER_WEBHOOK_SECRET=...
//!
//! # Run the server
//! lightning-gateway
//! ```

use pay_api::{routes, state::AppState};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    print_banner();

    let state = AppState::new()?;
    let engine = state.engine.clone();

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!("Providers: {:?}", engine.manager.registry().keys());
    for (provider, reason) in engine.manager.registry().unavailable() {
        warn!(%provider, %reason, "Provider unavailable");
    }

    let app = routes::create_router(state);

    info!("⚡ Lightning-Gateway starting on http://{}", addr);

    if !is_prod {
        info!("🩺 Health: http://{}/health", addr);
        info!("💳 Payments: POST http://{}/api/v1/payments", addr);
        info!("🔔 Webhooks: POST http://{}/webhook/{{provider}}", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Could not listen for shutdown signal");
            }
        })
        .await?;

    engine.shutdown().await;
    Ok(())
}

fn print_banner() {
    println!(
        r#"
  ⚡ Lightning-Gateway RS ⚡
  ━━━━━━━━━━━━━━━━━━━━━━━━━━
  Payment & VAS provider orchestration
  Version: {}

"#,
        env!("CARGO_PKG_VERSION")
    );
}
