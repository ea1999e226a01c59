//! # Webhook Pipeline
//!
//! Ingestion of provider callbacks:
//!
//! ```text
//! signature ─► parse ─► claim dedup record ─► upsert transaction
//!     ─► complete dedup record ─► publish event ─► resolve session
//! ```
//!
//! Only the delivery that moves the dedup record to `completed` publishes
//! the event, so duplicates and concurrent redeliveries produce exactly one.

use crate::jobs::{Job, JobPolicy, Queue};
use crate::manager::PaymentManager;
use async_trait::async_trait;
use chrono::Utc;
use pay_core::{
    Alert, DedupClaim, DedupKey, DedupStatus, EventBus, InboundWebhook, Notifier, PaymentError,
    PaymentEvent, PaymentResult, ProviderKey, Severity, TransactionData, WebhookDedupRecord,
    WebhookDedupStore,
};
use pay_providers::signature::payload_fingerprint;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Result of processing one delivery
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// First completed delivery; `transaction` is `None` for events with no payment state
    Processed { transaction: Option<TransactionData> },
    /// Already completed by an earlier or concurrent delivery
    Duplicate,
}

pub struct WebhookPipeline {
    manager: Arc<PaymentManager>,
    dedup: Arc<dyn WebhookDedupStore>,
    events: Arc<dyn EventBus>,
    notifier: Arc<dyn Notifier>,
}

impl WebhookPipeline {
    pub fn new(
        manager: Arc<PaymentManager>,
        dedup: Arc<dyn WebhookDedupStore>,
        events: Arc<dyn EventBus>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            manager,
            dedup,
            events,
            notifier,
        }
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Process one delivery end to end
    #[instrument(skip(self, payload, signature), fields(provider = %provider, bytes = payload.len()))]
    pub async fn process(
        &self,
        provider: ProviderKey,
        payload: &[u8],
        signature: Option<&str>,
    ) -> PaymentResult<WebhookOutcome> {
        let adapter = self.manager.authenticate_webhook(provider, payload, signature)?;
        let inbound = adapter
            .parse_webhook(payload)
            .map_err(|e| e.with_provider(provider.as_str(), "parse_webhook"))?;

        let record = dedup_record(&inbound, payload);
        let key = record
            .key()
            .ok_or_else(|| PaymentError::Internal("webhook has no idempotency key".into()))?;

        match self.dedup.claim(record).await? {
            DedupClaim::AlreadyCompleted => {
                info!(%key, "Duplicate webhook ignored");
                return Ok(WebhookOutcome::Duplicate);
            }
            DedupClaim::Resume { attempts } => {
                warn!(%key, attempts, "Resuming webhook that did not complete");
            }
            DedupClaim::New => {}
        }

        match self.apply(inbound, &key).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Err(mark) = self.dedup.fail(&key, &e.to_string()).await {
                    error!(%key, error = %mark, "Could not mark webhook failed");
                }
                Err(e)
            }
        }
    }

    async fn apply(&self, inbound: InboundWebhook, key: &DedupKey) -> PaymentResult<WebhookOutcome> {
        let provider = inbound.provider;
        let Some(tx) = inbound.transaction else {
            // nothing to record, only remember that we saw it
            self.dedup.complete(key, None).await?;
            info!(%key, event_type = %inbound.event_type, "Webhook carried no transaction");
            return Ok(WebhookOutcome::Processed { transaction: None });
        };

        self.manager.record_transaction(tx.clone()).await?;

        if !self.dedup.complete(key, Some(&tx.transaction_id)).await? {
            info!(%key, "Webhook completed by a concurrent delivery");
            return Ok(WebhookOutcome::Duplicate);
        }

        let context = json!({
            "webhook_id": inbound.webhook_id,
            "external_id": inbound.external_id,
            "event_type": inbound.event_type,
            "received_at": Utc::now(),
        });
        let event = PaymentEvent::for_transaction(provider, tx.clone(), context);
        let event_name = event.name();
        if let Err(e) = self.events.publish(event).await {
            error!(
                %key,
                transaction_id = %tx.transaction_id,
                event = event_name,
                error = %e,
                "Could not publish payment event"
            );
        }

        self.manager.resolve_session(&tx).await;

        info!(
            %key,
            transaction_id = %tx.transaction_id,
            status = %tx.status,
            event = event_name,
            "Webhook processed"
        );
        Ok(WebhookOutcome::Processed { transaction: Some(tx) })
    }
}

fn dedup_record(inbound: &InboundWebhook, payload: &[u8]) -> WebhookDedupRecord {
    WebhookDedupRecord {
        provider: inbound.provider,
        webhook_id: inbound.webhook_id.clone(),
        external_id: inbound.external_id.clone(),
        payload_hash: Some(payload_fingerprint(payload)),
        event_type: inbound.event_type.clone(),
        status: DedupStatus::Processing,
        attempts: 1,
        transaction_id: None,
        error: None,
        payload: inbound.payload.clone(),
        received_at: Utc::now(),
        completed_at: None,
    }
}

/// A webhook delivery queued on `payment-webhooks`
pub struct WebhookJob {
    pipeline: Arc<WebhookPipeline>,
    provider: ProviderKey,
    payload: Vec<u8>,
    signature: Option<String>,
}

impl WebhookJob {
    pub fn new(
        pipeline: Arc<WebhookPipeline>,
        provider: ProviderKey,
        payload: Vec<u8>,
        signature: Option<String>,
    ) -> Self {
        Self {
            pipeline,
            provider,
            payload,
            signature,
        }
    }

    fn payload_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&self.payload).into_owned()))
    }
}

#[async_trait]
impl Job for WebhookJob {
    fn name(&self) -> String {
        format!("webhook:{}", self.provider)
    }

    fn queue(&self) -> Queue {
        Queue::PaymentWebhooks
    }

    fn policy(&self) -> JobPolicy {
        JobPolicy {
            max_attempts: 3,
            timeout: Duration::from_secs(300),
            backoff: vec![Duration::from_secs(30), Duration::from_secs(120)],
            retry_window: None,
        }
    }

    async fn run(&self, _attempt: u32) -> PaymentResult<()> {
        self.pipeline
            .process(self.provider, &self.payload, self.signature.as_deref())
            .await
            .map(|_| ())
    }

    async fn failed(&self, error: &PaymentError) {
        let severity = match error.root() {
            PaymentError::Security(_) => Severity::Warning,
            _ => Severity::Critical,
        };
        let alert = Alert::new(
            severity,
            format!("Webhook from {} could not be processed", self.provider),
            error.to_string(),
            json!({
                "provider": self.provider,
                "error": error.to_string(),
                "error_code": error.error_code(),
                "signature_present": self.signature.is_some(),
                "payload": self.payload_json(),
            }),
        );
        if let Err(e) = self.pipeline.notifier().notify(alert).await {
            error!(provider = %self.provider, error = %e, "Operator alert could not be sent");
        }
    }
}
