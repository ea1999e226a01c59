//! # Operational Commands
//!
//! `sync`, `healthcheck` and `test`, each answering with a success flag and
//! a JSON summary suitable for a terminal or an admin endpoint.

use crate::manager::PaymentManager;
use crate::sync::{CatalogSync, SyncOptions};
use pay_core::{PaymentError, ProviderKey, SessionParams};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

/// Result of an operational command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpsReport {
    pub success: bool,
    pub summary: Value,
}

impl OpsReport {
    fn failure(error: &PaymentError) -> Self {
        Self {
            success: false,
            summary: json!({ "error": error.to_string() }),
        }
    }
}

pub struct Ops {
    manager: Arc<PaymentManager>,
    sync: Arc<CatalogSync>,
}

impl Ops {
    pub fn new(manager: Arc<PaymentManager>, sync: Arc<CatalogSync>) -> Self {
        Self { manager, sync }
    }

    /// Sync one provider's catalog, or every provider that has one.
    ///
    /// A provider whose sync is already running is reported as skipped; any
    /// other failure is alerted to operators.
    pub async fn sync(&self, provider: Option<ProviderKey>, limit: Option<usize>, dry_run: bool) -> OpsReport {
        let providers = match provider {
            Some(key) => vec![key],
            None => self.sync.syncable_providers(),
        };
        let options = SyncOptions { limit, dry_run };

        let mut success = true;
        let mut results = Map::new();
        for key in providers {
            let entry = match self.sync.sync_provider(key, options).await {
                Ok(report) => json!({ "status": "completed", "report": report }),
                Err(PaymentError::LockContention { .. }) => json!({ "status": "skipped", "reason": "sync already running" }),
                Err(e) => {
                    success = false;
                    if !dry_run {
                        self.sync.notify_failure(key, &e).await;
                    }
                    json!({ "status": "failed", "error": e.to_string() })
                }
            };
            results.insert(key.to_string(), entry);
        }

        info!(success, dry_run, "Ops sync finished");
        OpsReport {
            success,
            summary: json!({ "dry_run": dry_run, "providers": results }),
        }
    }

    /// Provider health; `detailed` forces a fresh probe and adds adapter details
    pub async fn healthcheck(&self, provider: Option<ProviderKey>, detailed: bool) -> OpsReport {
        let keys = match provider {
            Some(key) => vec![key],
            None => self.manager.registry().keys(),
        };

        let mut healthy_all = !keys.is_empty();
        let mut results = Map::new();
        for key in keys {
            let health = match self.manager.provider_health(key, !detailed).await {
                Ok(health) => health,
                Err(e) => return OpsReport::failure(&e),
            };
            healthy_all &= health.healthy;

            let mut entry = json!({
                "healthy": health.healthy,
                "kind": health.kind,
                "cached": health.cached,
            });
            if detailed {
                entry["info"] = json!(health.info);
                if let Ok(adapter) = self.manager.provider(Some(key)) {
                    entry["required_config"] = json!(adapter.required_config_fields());
                }
            }
            results.insert(key.to_string(), entry);
        }

        let mut summary = json!({ "overall": healthy_all, "providers": results });
        if provider.is_none() {
            summary["unavailable"] = json!(self.manager.registry().unavailable());
        }
        OpsReport {
            success: healthy_all,
            summary,
        }
    }

    /// Exercise a provider end to end with a small payment.
    ///
    /// A dry run probes the connection and validates the request without
    /// opening a session.
    pub async fn test(&self, provider: ProviderKey, amount: Decimal, dry_run: bool) -> OpsReport {
        let adapter = match self.manager.provider(Some(provider)) {
            Ok(adapter) => adapter,
            Err(e) => return OpsReport::failure(&e),
        };
        let Some(currency) = adapter.supported_currencies().first().copied() else {
            return OpsReport::failure(&PaymentError::Configuration(format!("{} lists no currencies", provider)));
        };
        let params = SessionParams::new(
            format!("test_{}", uuid::Uuid::new_v4().simple()),
            amount,
            currency,
            "ops-test@example.com",
        )
        .with_description("Connectivity test payment")
        .with_metadata("ops_test", "true");

        if dry_run {
            let connected = adapter.test_connection().await.unwrap_or(false);
            let valid = amount > Decimal::ZERO;
            return OpsReport {
                success: connected && valid,
                summary: json!({
                    "dry_run": true,
                    "provider": provider,
                    "connected": connected,
                    "amount_valid": valid,
                    "currency": currency,
                    "reference": params.reference,
                }),
            };
        }

        match self.manager.create_payment(params, Some(provider)).await {
            Ok(session) => OpsReport {
                success: true,
                summary: json!({
                    "dry_run": false,
                    "provider": provider,
                    "reference": session.reference,
                    "checkout_url": session.checkout_url,
                    "expires_at": session.expires_at,
                    "amount": session.amount,
                    "currency": session.currency,
                }),
            },
            Err(e) => OpsReport::failure(&e),
        }
    }
}
