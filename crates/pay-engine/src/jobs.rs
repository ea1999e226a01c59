//! # Background Jobs
//!
//! A small job runner with named queues. Each queue has its own pool of
//! workers pulling from a shared channel, so jobs on one queue run roughly
//! FIFO and queues never block each other.
//!
//! Attempts, per-attempt timeout, staged backoff and the retry window come
//! from the job's [`JobPolicy`]. [`execute`] drives one job to completion
//! and is also used directly by the ops surface and tests.

use async_trait::async_trait;
use pay_core::{PaymentError, PaymentResult};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Named job queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    PaymentWebhooks,
    PaymentRetries,
    CatalogSync,
}

impl Queue {
    pub const ALL: [Queue; 3] = [Queue::PaymentWebhooks, Queue::PaymentRetries, Queue::CatalogSync];

    pub fn as_str(&self) -> &'static str {
        match self {
            Queue::PaymentWebhooks => "payment-webhooks",
            Queue::PaymentRetries => "payment-retries",
            Queue::CatalogSync => "catalog-sync",
        }
    }
}

impl std::fmt::Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry policy for a job
#[derive(Debug, Clone, PartialEq)]
pub struct JobPolicy {
    pub max_attempts: u32,
    /// Hard limit for one attempt
    pub timeout: Duration,
    /// Delay before attempt n+1 is `backoff[n-1]`; the last entry repeats
    pub backoff: Vec<Duration>,
    /// No new attempt starts once this much time has passed since the first
    pub retry_window: Option<Duration>,
}

impl JobPolicy {
    /// Single attempt, no retries
    pub fn once(timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            timeout,
            backoff: Vec::new(),
            retry_window: None,
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff
            .get(index)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or_default()
    }
}

/// A unit of background work
#[async_trait]
pub trait Job: Send + Sync {
    /// Identifies the job in logs
    fn name(&self) -> String;

    fn queue(&self) -> Queue;

    fn policy(&self) -> JobPolicy;

    /// Run one attempt (1-based)
    async fn run(&self, attempt: u32) -> PaymentResult<()>;

    /// Called once when the job gives up
    async fn failed(&self, error: &PaymentError) {
        let _ = error;
    }
}

pub type BoxedJob = Arc<dyn Job>;

/// How a job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { attempts: u32 },
    /// Nothing to do: duplicate delivery or work already in progress elsewhere
    Skipped { reason: String },
    Failed { attempts: u32, error: String },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, JobOutcome::Failed { .. })
    }
}

/// Run a job through its policy: timeout per attempt, backoff between
/// attempts, the `failed` hook once on exhaustion.
pub async fn execute(job: &dyn Job) -> JobOutcome {
    let policy = job.policy();
    let name = job.name();
    let started = Instant::now();
    let mut attempt = 1u32;

    loop {
        let result = match tokio::time::timeout(policy.timeout, job.run(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(PaymentError::Timeout(format!(
                "{} exceeded {:?} on attempt {}",
                name, policy.timeout, attempt
            ))),
        };

        let err = match result {
            Ok(()) => {
                info!(job = %name, queue = %job.queue(), attempt, "Job completed");
                return JobOutcome::Completed { attempts: attempt };
            }
            Err(e) => e,
        };

        if matches!(
            err.root(),
            PaymentError::LockContention { .. } | PaymentError::IdempotencyConflict { .. }
        ) {
            warn!(job = %name, reason = %err, "Job skipped");
            return JobOutcome::Skipped {
                reason: err.to_string(),
            };
        }

        let delay = policy.delay_after(attempt);
        let window_closed = policy
            .retry_window
            .is_some_and(|window| started.elapsed() + delay >= window);
        let give_up = err.is_fatal_for_job() || attempt >= policy.max_attempts || window_closed;

        if give_up {
            error!(
                job = %name,
                queue = %job.queue(),
                attempt,
                fatal = err.is_fatal_for_job(),
                window_closed,
                error = %err,
                "Job failed"
            );
            job.failed(&err).await;
            return JobOutcome::Failed {
                attempts: attempt,
                error: err.to_string(),
            };
        }

        warn!(
            job = %name,
            attempt,
            error = %err,
            "Job attempt failed, retrying in {:?}",
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Anything that can accept jobs for later execution
pub trait JobScheduler: Send + Sync {
    fn schedule(&self, job: BoxedJob, delay: Duration) -> PaymentResult<()>;
}

/// Worker pools over named queues
pub struct JobRunner {
    senders: RwLock<HashMap<Queue, mpsc::UnboundedSender<BoxedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Flips to true on shutdown; delayed dispatches waiting on it give up
    stopping: watch::Sender<bool>,
}

impl JobRunner {
    /// Spawn `workers` tasks for each listed queue
    pub fn start(pools: &[(Queue, usize)]) -> Self {
        let mut senders = HashMap::new();
        let mut workers = Vec::new();

        for &(queue, count) in pools {
            let (tx, rx) = mpsc::unbounded_channel::<BoxedJob>();
            let rx = Arc::new(Mutex::new(rx));
            for worker in 0..count.max(1) {
                let rx = rx.clone();
                workers.push(tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(job) = next else { break };
                        execute(job.as_ref()).await;
                    }
                    info!(%queue, worker, "Worker stopped");
                }));
            }
            info!(%queue, workers = count.max(1), "Queue started");
            senders.insert(queue, tx);
        }

        Self {
            senders: RwLock::new(senders),
            workers: Mutex::new(workers),
            stopping: watch::Sender::new(false),
        }
    }

    fn sender(&self, queue: Queue) -> PaymentResult<mpsc::UnboundedSender<BoxedJob>> {
        let senders = self
            .senders
            .read()
            .map_err(|_| PaymentError::Internal("job runner lock poisoned".into()))?;
        senders
            .get(&queue)
            .cloned()
            .ok_or_else(|| PaymentError::Configuration(format!("queue {} is not running", queue)))
    }

    /// Enqueue a job on its queue
    pub fn dispatch(&self, job: BoxedJob) -> PaymentResult<()> {
        let queue = job.queue();
        self.sender(queue)?
            .send(job)
            .map_err(|_| PaymentError::Internal(format!("queue {} is shut down", queue)))
    }

    /// Enqueue a job after `delay`.
    ///
    /// A job still waiting when the runner shuts down is dropped and logged.
    pub fn dispatch_after(&self, job: BoxedJob, delay: Duration) -> PaymentResult<()> {
        if delay.is_zero() {
            return self.dispatch(job);
        }
        let queue = job.queue();
        let sender = self.sender(queue)?;
        let mut stopping = self.stopping.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if sender.send(job).is_err() {
                        warn!(%queue, "Delayed job dropped: queue shut down");
                    }
                }
                _ = stopping.wait_for(|stop| *stop) => {
                    warn!(%queue, job = %job.name(), ?delay, "Delayed job dropped at shutdown");
                }
            }
        });
        Ok(())
    }

    /// Stop accepting jobs, drop jobs still waiting out a delay and wait for
    /// workers to drain their queues.
    pub async fn shutdown(&self) {
        self.stopping.send_replace(true);
        match self.senders.write() {
            Ok(mut senders) => senders.clear(),
            Err(_) => error!("Job runner lock poisoned; workers left running"),
        }
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Worker panicked");
            }
        }
    }
}

impl JobScheduler for JobRunner {
    fn schedule(&self, job: BoxedJob, delay: Duration) -> PaymentResult<()> {
        self.dispatch_after(job, delay)
    }
}
