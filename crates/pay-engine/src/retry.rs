//! # Failed Payment Retries
//!
//! A failed payment is retried up to three times. Attempt `n` waits
//! `min(60, 2^n)` minutes. Before each attempt the request must still be
//! eligible:
//!
//! - requested less than 24 hours ago
//! - at most 5000, unless this is the first retry
//! - its linked order, if any, is not cancelled
//!
//! Ineligible attempts are dropped with a log entry. Declines with a
//! non-retryable code end the sequence at once.

use crate::jobs::{BoxedJob, Job, JobPolicy, JobScheduler, Queue};
use crate::manager::PaymentManager;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pay_core::{
    is_non_retryable_code, EventBus, OrderLookup, PaymentError, PaymentEvent, PaymentRequest,
    PaymentResult, PaymentSession,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Amount above which only the first retry runs without manual approval
pub const HIGH_VALUE_THRESHOLD: Decimal = Decimal::from_parts(5000, 0, 0, false, 0);

/// How long after the original request retries are still allowed
pub const RETRY_HORIZON_HOURS: i64 = 24;

/// Delay before retry `attempt`: `min(60, 2^attempt)` minutes
pub fn retry_delay(attempt: u32) -> Duration {
    let minutes = 2u64.checked_pow(attempt).unwrap_or(u64::MAX).min(60);
    Duration::from_secs(minutes * 60)
}

/// One retry of a failed payment
#[derive(Debug, Clone, PartialEq)]
pub struct RetryContext {
    pub request: PaymentRequest,
    pub original_transaction_id: String,
    pub reason: String,
    /// 1-based
    pub attempt: u32,
}

impl RetryContext {
    pub fn new(
        request: PaymentRequest,
        original_transaction_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            request,
            original_transaction_id: original_transaction_id.into(),
            reason: reason.into(),
            attempt: 1,
        }
    }

    fn next(&self, reason: String) -> Self {
        Self {
            reason,
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    /// The request as sent on this attempt, tagged for audit
    pub fn audited_request(&self, now: DateTime<Utc>) -> PaymentRequest {
        let mut request = self.request.clone();
        let metadata = &mut request.metadata;
        metadata.insert("is_retry".into(), "true".into());
        metadata.insert("original_transaction_id".into(), self.original_transaction_id.clone());
        metadata.insert("retry_attempt".into(), self.attempt.to_string());
        metadata.insert("retry_reason".into(), self.reason.clone());
        metadata.insert("retry_timestamp".into(), now.to_rfc3339());
        request
    }
}

/// What a retry attempt led to
#[derive(Debug, Clone, PartialEq)]
pub enum RetryResult {
    /// A new payment session was opened
    Submitted(PaymentSession),
    /// No longer eligible; nothing was sent
    Cancelled { reason: String },
    /// Failed again; the next attempt is queued
    Rescheduled { attempt: u32, delay: Duration },
    /// Failed for good
    Exhausted { reason: String, error_code: Option<String> },
}

pub struct RetryOrchestrator {
    manager: Arc<PaymentManager>,
    orders: Arc<dyn OrderLookup>,
    events: Arc<dyn EventBus>,
    scheduler: Arc<dyn JobScheduler>,
}

impl RetryOrchestrator {
    pub fn new(
        manager: Arc<PaymentManager>,
        orders: Arc<dyn OrderLookup>,
        events: Arc<dyn EventBus>,
        scheduler: Arc<dyn JobScheduler>,
    ) -> Self {
        Self {
            manager,
            orders,
            events,
            scheduler,
        }
    }

    /// Reason the attempt may not run, or `None` if it is eligible
    pub async fn ineligibility(&self, ctx: &RetryContext, now: DateTime<Utc>) -> PaymentResult<Option<String>> {
        let age = now - ctx.request.requested_at;
        if age >= chrono::Duration::hours(RETRY_HORIZON_HOURS) {
            return Ok(Some(format!(
                "original request is {} hours old",
                age.num_hours()
            )));
        }

        if ctx.request.amount > HIGH_VALUE_THRESHOLD && ctx.attempt > 1 {
            return Ok(Some(format!(
                "amount {} exceeds {} and needs manual approval after the first retry",
                ctx.request.amount, HIGH_VALUE_THRESHOLD
            )));
        }

        if let Some(entity) = &ctx.request.linked_entity {
            if self.orders.status(entity).await?.as_deref() == Some("cancelled") {
                return Ok(Some(format!("{} {} was cancelled", entity.kind, entity.id)));
            }
        }

        Ok(None)
    }

    /// Queue `ctx` to run after its backoff delay
    pub async fn schedule(self: &Arc<Self>, ctx: RetryContext) -> PaymentResult<Duration> {
        let delay = retry_delay(ctx.attempt);
        let event = PaymentEvent::RetryScheduled {
            original_transaction_id: ctx.original_transaction_id.clone(),
            attempt: ctx.attempt,
            delay_minutes: delay.as_secs() / 60,
        };

        let job: BoxedJob = Arc::new(RetryPaymentJob::new(self.clone(), ctx));
        self.scheduler.schedule(job, delay)?;

        if let Err(e) = self.events.publish(event).await {
            warn!(error = %e, "Could not publish retry event");
        }
        Ok(delay)
    }

    /// Start retrying a failed payment at attempt 1
    pub async fn retry_failed_payment(
        self: &Arc<Self>,
        request: PaymentRequest,
        original_transaction_id: &str,
        reason: &str,
    ) -> PaymentResult<Duration> {
        info!(original_transaction_id, reason, "Scheduling payment retry");
        self.schedule(RetryContext::new(request, original_transaction_id, reason)).await
    }

    /// Run one retry attempt now
    #[instrument(skip(self, ctx), fields(original = %ctx.original_transaction_id, attempt = ctx.attempt))]
    pub async fn attempt(self: &Arc<Self>, ctx: RetryContext) -> PaymentResult<RetryResult> {
        let now = Utc::now();
        if let Some(reason) = self.ineligibility(&ctx, now).await? {
            warn!(%reason, "Retry cancelled");
            return Ok(RetryResult::Cancelled { reason });
        }

        let request = ctx.audited_request(now);
        let err = match self.manager.process_payment_request(&request, None).await {
            Ok(session) => {
                info!(reference = %session.reference, "Retry submitted");
                return Ok(RetryResult::Submitted(session));
            }
            Err(e) => e,
        };

        let error_code = err.error_code().map(String::from);
        let final_reason = if error_code.as_deref().is_some_and(is_non_retryable_code) {
            Some(format!("non-retryable error: {}", err))
        } else if err.is_fatal_for_job() {
            Some(format!("unrecoverable error: {}", err))
        } else if ctx.attempt >= MAX_RETRY_ATTEMPTS {
            Some(format!("gave up after {} attempts: {}", ctx.attempt, err))
        } else {
            None
        };

        match final_reason {
            Some(reason) => {
                self.exhausted(&ctx, &reason, error_code.clone()).await;
                Ok(RetryResult::Exhausted { reason, error_code })
            }
            None => {
                let next = ctx.next(err.to_string());
                let attempt = next.attempt;
                let delay = self.schedule(next).await?;
                warn!(error = %err, next_attempt = attempt, "Retry failed, rescheduled");
                Ok(RetryResult::Rescheduled { attempt, delay })
            }
        }
    }

    async fn exhausted(&self, ctx: &RetryContext, reason: &str, error_code: Option<String>) {
        warn!(
            original = %ctx.original_transaction_id,
            attempt = ctx.attempt,
            reason,
            "retry_exhausted"
        );
        let event = PaymentEvent::RetryExhausted {
            original_transaction_id: ctx.original_transaction_id.clone(),
            attempt: ctx.attempt,
            reason: reason.to_string(),
            error_code,
        };
        if let Err(e) = self.events.publish(event).await {
            warn!(error = %e, "Could not publish retry event");
        }
    }
}

/// A scheduled retry on `payment-retries`
pub struct RetryPaymentJob {
    orchestrator: Arc<RetryOrchestrator>,
    ctx: RetryContext,
}

impl RetryPaymentJob {
    pub fn new(orchestrator: Arc<RetryOrchestrator>, ctx: RetryContext) -> Self {
        Self { orchestrator, ctx }
    }

    pub fn context(&self) -> &RetryContext {
        &self.ctx
    }
}

#[async_trait]
impl Job for RetryPaymentJob {
    fn name(&self) -> String {
        format!("retry:{}#{}", self.ctx.original_transaction_id, self.ctx.attempt)
    }

    fn queue(&self) -> Queue {
        Queue::PaymentRetries
    }

    /// Retries are sequenced by the orchestrator, not the runner
    fn policy(&self) -> JobPolicy {
        JobPolicy::once(Duration::from_secs(120))
    }

    async fn run(&self, _attempt: u32) -> PaymentResult<()> {
        self.orchestrator.attempt(self.ctx.clone()).await.map(|_| ())
    }

    /// The attempt itself errored (lookup, storage); nothing will reschedule it
    async fn failed(&self, error: &PaymentError) {
        let reason = format!("retry attempt could not run: {}", error);
        self.orchestrator
            .exhausted(&self.ctx, &reason, error.error_code().map(String::from))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::tests::RecordingScheduler;
    use crate::jobs::{execute, JobOutcome};
    use crate::memory::{InMemoryCache, InMemoryOrderLookup, InMemoryTransactionStore, RecordingEventBus};
    use crate::testing::MockProvider;
    use pay_core::{Currency, EntityRef, ProviderKey, ProviderRegistry};

    /// Order lookup whose backing store is down
    struct UnreachableOrders;

    #[async_trait]
    impl OrderLookup for UnreachableOrders {
        async fn status(&self, _entity: &EntityRef) -> PaymentResult<Option<String>> {
            Err(PaymentError::Storage("orders database unreachable".into()))
        }
    }
    use rust_decimal_macros::dec;

    struct Fixture {
        orchestrator: Arc<RetryOrchestrator>,
        card: Arc<MockProvider>,
        orders: InMemoryOrderLookup,
        events: RecordingEventBus,
        scheduler: Arc<RecordingScheduler>,
    }

    fn fixture() -> Fixture {
        let card = Arc::new(MockProvider::new(ProviderKey::CardGateway));
        let manager = Arc::new(PaymentManager::new(
            Arc::new(ProviderRegistry::new().with_provider(card.clone())),
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(InMemoryCache::new()),
        ));
        let orders = InMemoryOrderLookup::new();
        let events = RecordingEventBus::new();
        let scheduler = Arc::new(RecordingScheduler::default());
        let orchestrator = Arc::new(RetryOrchestrator::new(
            manager,
            Arc::new(orders.clone()),
            Arc::new(events.clone()),
            scheduler.clone(),
        ));
        Fixture {
            orchestrator,
            card,
            orders,
            events,
            scheduler,
        }
    }

    fn ctx(amount: Decimal, attempt: u32) -> RetryContext {
        let request = PaymentRequest::builder()
            .amount(amount)
            .currency(Currency::ILS)
            .customer_email("dana@example.co.il")
            .build();
        RetryContext {
            attempt,
            ..RetryContext::new(request, "D1", "card_declined_soft")
        }
    }

    fn transient() -> PaymentError {
        PaymentError::TransientProvider {
            provider: "card_gateway".into(),
            message: "gateway timeout".into(),
        }
    }

    #[test]
    fn test_retry_delay_is_capped_exponential() {
        assert_eq!(retry_delay(1), Duration::from_secs(2 * 60));
        assert_eq!(retry_delay(3), Duration::from_secs(8 * 60));
        assert_eq!(retry_delay(6), Duration::from_secs(60 * 60));
        assert_eq!(retry_delay(10), Duration::from_secs(60 * 60));
        assert_eq!(retry_delay(80), Duration::from_secs(60 * 60));
    }

    #[tokio::test]
    async fn test_high_value_only_retried_once() {
        let f = fixture();
        let now = Utc::now();
        assert!(f.orchestrator.ineligibility(&ctx(dec!(6000), 2), now).await.unwrap().is_some());
        assert!(f.orchestrator.ineligibility(&ctx(dec!(6000), 1), now).await.unwrap().is_none());
        assert!(f.orchestrator.ineligibility(&ctx(dec!(5000), 3), now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_request_is_ineligible() {
        let f = fixture();
        let mut c = ctx(dec!(100), 1);
        c.request.requested_at = Utc::now() - chrono::Duration::hours(25);

        let result = f.orchestrator.attempt(c).await.unwrap();
        assert!(matches!(result, RetryResult::Cancelled { .. }));
        assert_eq!(f.card.calls("create_session"), 0);
    }

    #[tokio::test]
    async fn test_cancelled_order_is_ineligible() {
        let f = fixture();
        let mut c = ctx(dec!(100), 1);
        c.request.linked_entity = Some(EntityRef::order("42"));
        f.orders.set_status(EntityRef::order("42"), "cancelled").await;

        assert!(f.orchestrator.ineligibility(&c, Utc::now()).await.unwrap().is_some());

        f.orders.set_status(EntityRef::order("42"), "pending").await;
        assert!(f.orchestrator.ineligibility(&c, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_successful_retry_carries_audit_metadata() {
        let f = fixture();
        let result = f.orchestrator.attempt(ctx(dec!(100), 2)).await.unwrap();

        let RetryResult::Submitted(session) = result else {
            panic!("expected a submitted retry, got {result:?}");
        };
        assert_eq!(session.metadata["is_retry"], "true");
        assert_eq!(session.metadata["original_transaction_id"], "D1");
        assert_eq!(session.metadata["retry_attempt"], "2");
        assert_eq!(session.metadata["retry_reason"], "card_declined_soft");
        assert!(session.metadata.contains_key("retry_timestamp"));
    }

    #[tokio::test]
    async fn test_non_retryable_code_ends_on_first_attempt() {
        let f = fixture();
        f.card.fail_next(
            "create_session",
            PaymentError::Declined {
                provider: "card_gateway".into(),
                code: "fraud_detected".into(),
                message: "blocked".into(),
            },
        );

        let result = f.orchestrator.attempt(ctx(dec!(100), 1)).await.unwrap();
        assert!(matches!(
            &result,
            RetryResult::Exhausted { error_code: Some(code), .. } if code == "fraud_detected"
        ));
        assert!(f.scheduler.scheduled.lock().unwrap().is_empty());
        assert_eq!(f.events.count("payment.retry_exhausted").await, 1);
        assert_eq!(f.events.count("payment.retry_scheduled").await, 0);
    }

    #[tokio::test]
    async fn test_transient_failure_schedules_next_attempt() {
        let f = fixture();
        f.card.fail_next("create_session", transient());

        let result = f.orchestrator.attempt(ctx(dec!(100), 1)).await.unwrap();
        assert_eq!(
            result,
            RetryResult::Rescheduled {
                attempt: 2,
                delay: Duration::from_secs(4 * 60)
            }
        );

        let scheduled = f.scheduler.scheduled.lock().unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].0.name(), "retry:D1#2");
        assert_eq!(scheduled[0].0.queue(), Queue::PaymentRetries);
        assert_eq!(scheduled[0].1, Duration::from_secs(4 * 60));
    }

    #[tokio::test]
    async fn test_third_failure_is_final() {
        let f = fixture();
        f.card.fail_next("create_session", transient());

        let result = f.orchestrator.attempt(ctx(dec!(100), 3)).await.unwrap();
        assert!(matches!(result, RetryResult::Exhausted { error_code: None, .. }));
        assert!(f.scheduler.scheduled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_failed_payment_schedules_first_attempt() {
        let f = fixture();
        let delay = f
            .orchestrator
            .retry_failed_payment(ctx(dec!(100), 1).request, "D9", "insufficient_3ds")
            .await
            .unwrap();

        assert_eq!(delay, Duration::from_secs(120));
        assert_eq!(f.events.count("payment.retry_scheduled").await, 1);
        assert_eq!(f.scheduler.scheduled.lock().unwrap()[0].0.name(), "retry:D9#1");
    }

    #[tokio::test]
    async fn test_job_that_cannot_run_ends_the_chain_visibly() {
        let card = Arc::new(MockProvider::new(ProviderKey::CardGateway));
        let manager = Arc::new(PaymentManager::new(
            Arc::new(ProviderRegistry::new().with_provider(card.clone())),
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(InMemoryCache::new()),
        ));
        let events = RecordingEventBus::new();
        let scheduler = Arc::new(RecordingScheduler::default());
        let orchestrator = Arc::new(RetryOrchestrator::new(
            manager,
            Arc::new(UnreachableOrders),
            Arc::new(events.clone()),
            scheduler.clone(),
        ));

        let mut c = ctx(dec!(100), 2);
        c.request.linked_entity = Some(EntityRef::order("42"));
        let job = RetryPaymentJob::new(orchestrator, c);

        assert!(matches!(execute(&job).await, JobOutcome::Failed { attempts: 1, .. }));
        assert_eq!(events.count("payment.retry_exhausted").await, 1);
        assert!(scheduler.scheduled.lock().unwrap().is_empty());
        assert_eq!(card.calls("create_session"), 0);
    }
}
