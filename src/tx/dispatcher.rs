//! Parallel transfer dispatch with nonce coordination and retry logic

use super::monitor::ExecutionMonitor;
use super::nonce::NonceCoordinator;
use crate::config::RunConfig;
use crate::context::RunContext;
use crate::error::{LoadgenError, LoadgenResult};
use crate::finality::FinalityTracker;
use crate::metrics::Metrics;
use crate::rpc::RpcGateway;

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Substrings marking a transport or availability failure
const RETRYABLE_ERRORS: &[&str] = &[
    "connection refused",
    "timeout",
    "temporary",
    "network",
    "502",
    "503",
    "504",
];

/// Substrings marking a validation failure that will recur on retry
const NON_RETRYABLE_ERRORS: &[&str] = &[
    "nonce too low",
    "nonce mismatch",
    "invalid nonce",
    "insufficient funds",
    "invalid signature",
];

/// One transfer to submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    /// Caller-assigned sequence index
    pub id: u64,
    pub receiver: String,
    pub value: u64,
}

/// Result of driving one request to acceptance or failure
#[derive(Debug)]
pub struct TransactionOutcome {
    pub id: u64,
    pub nonce: u64,
    /// Present only when the node accepted the transfer
    pub tx_id: Option<String>,
    pub success: bool,
    /// Present only when `success` is false
    pub error: Option<LoadgenError>,
    /// From nonce allocation to the final attempt's resolution
    pub latency: Duration,
}

/// Tuning for a dispatch run
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum requests with a submission in flight
    pub workers: usize,
    pub max_retries: u32,
    /// Retry `n` sleeps `n * base_backoff`
    pub base_backoff: Duration,
    /// Delay between launching consecutive requests
    pub stagger: Duration,
    pub monitor_interval: Duration,
}

impl DispatcherConfig {
    pub fn from_settings(run: &RunConfig, monitor_interval: Duration) -> Self {
        Self {
            workers: run.workers,
            max_retries: run.max_retries,
            base_backoff: run.base_backoff(),
            stagger: run.stagger(),
            monitor_interval,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            max_retries: 5,
            base_backoff: Duration::from_millis(100),
            stagger: Duration::from_millis(10),
            monitor_interval: Duration::from_secs(1),
        }
    }
}

/// Whether a failed submission is worth another attempt.
///
/// Errors matching neither list are retried. That keeps unfamiliar transport
/// failures alive, at the cost of retrying unrecognised permanent rejections
/// until `max_retries` is spent.
pub fn should_retry(err: &LoadgenError) -> bool {
    let message = err.to_string().to_lowercase();

    if RETRYABLE_ERRORS.iter().any(|s| message.contains(s)) {
        return true;
    }
    if NON_RETRYABLE_ERRORS.iter().any(|s| message.contains(s)) {
        return false;
    }
    true
}

/// Per-request submission driver, cloned into each worker task
#[derive(Clone)]
struct Submitter {
    gateway: Arc<dyn RpcGateway>,
    nonces: Arc<NonceCoordinator>,
    metrics: Arc<Metrics>,
    max_retries: u32,
    base_backoff: Duration,
}

impl Submitter {
    async fn submit(&self, request: TransactionRequest) -> TransactionOutcome {
        let started = Instant::now();
        let nonce = self.nonces.allocate_nonce().await;

        debug!("Processing transaction {} with nonce {}", request.id, nonce);

        for attempt in 1..=self.max_retries {
            let err = match self
                .gateway
                .transfer_fund(&request.receiver, request.value, nonce)
                .await
            {
                Ok(tx_id) => {
                    self.nonces.mark_submitted(nonce, &tx_id).await;
                    let latency = started.elapsed();
                    self.metrics.record_tx_submitted(latency.as_secs_f64());
                    return TransactionOutcome {
                        id: request.id,
                        nonce,
                        tx_id: Some(tx_id),
                        success: true,
                        error: None,
                        latency,
                    };
                }
                Err(err) => err,
            };

            if attempt < self.max_retries && should_retry(&err) {
                let backoff = self.base_backoff * attempt;
                warn!(
                    "Transaction {} (nonce={}) attempt {} failed, retrying in {:?}: {}",
                    request.id, nonce, attempt, backoff, err
                );
                self.metrics.record_tx_retry();
                sleep(backoff).await;
                continue;
            }

            return self
                .fail(&request, nonce, started, attempt, err.to_string())
                .await;
        }

        self.fail(
            &request,
            nonce,
            started,
            0,
            "no submission attempts configured".to_string(),
        )
        .await
    }

    async fn fail(
        &self,
        request: &TransactionRequest,
        nonce: u64,
        started: Instant,
        attempts: u32,
        last_error: String,
    ) -> TransactionOutcome {
        self.nonces.mark_failed(nonce).await;
        let latency = started.elapsed();
        self.metrics.record_tx_failed(latency.as_secs_f64());

        TransactionOutcome {
            id: request.id,
            nonce,
            tx_id: None,
            success: false,
            error: Some(LoadgenError::SubmissionFailed {
                attempts,
                last_error,
            }),
            latency,
        }
    }
}

/// Submits batches of transfers under a bounded concurrency budget
pub struct TransactionDispatcher {
    ctx: RunContext,
    nonces: Arc<NonceCoordinator>,
    tracker: Arc<FinalityTracker>,
    config: DispatcherConfig,
}

impl TransactionDispatcher {
    pub fn new(
        ctx: RunContext,
        nonces: Arc<NonceCoordinator>,
        tracker: Arc<FinalityTracker>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            ctx,
            nonces,
            tracker,
            config,
        }
    }

    pub fn nonces(&self) -> &Arc<NonceCoordinator> {
        &self.nonces
    }

    pub fn tracker(&self) -> &Arc<FinalityTracker> {
        &self.tracker
    }

    /// Submit every request and return one outcome per request, in completion order
    pub async fn execute_transactions(
        &self,
        requests: Vec<TransactionRequest>,
    ) -> LoadgenResult<Vec<TransactionOutcome>> {
        if requests.is_empty() {
            return Err(LoadgenError::EmptyBatch);
        }

        let total = requests.len();
        let gate = Arc::new(Semaphore::new(self.config.workers));
        let results = Arc::new(Mutex::new(Vec::with_capacity(total)));
        let submitter = Submitter {
            gateway: self.ctx.gateway.clone(),
            nonces: self.nonces.clone(),
            metrics: self.ctx.metrics.clone(),
            max_retries: self.config.max_retries,
            base_backoff: self.config.base_backoff,
        };

        info!(
            "Dispatching {} transactions with {} workers",
            total, self.config.workers
        );

        let mut handles = Vec::with_capacity(total);
        for (index, request) in requests.into_iter().enumerate() {
            let gate = gate.clone();
            let results = results.clone();
            let submitter = submitter.clone();
            let tracker = self.tracker.clone();

            handles.push(tokio::spawn(async move {
                let request_id = request.id;
                let outcome = {
                    let _permit = match gate.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            error!("Admission gate closed for transaction {}: {}", request_id, e);
                            return;
                        }
                    };
                    submitter.submit(request).await
                };

                let mut results = results.lock().await;
                if let Some(tx_id) = outcome.tx_id.as_deref().filter(|_| outcome.success) {
                    tracker.register_submission(tx_id, Instant::now()).await;
                }
                results.push(outcome);
            }));

            if index + 1 < total {
                sleep(self.config.stagger).await;
            }
        }

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                error!("Submission task aborted: {}", e);
            }
        }

        let outcomes = std::mem::take(&mut *results.lock().await);
        let failed = outcomes.iter().filter(|o| !o.success).count();
        info!(
            "Submission phase finished: {} accepted, {} failed",
            outcomes.len() - failed,
            failed
        );

        Ok(outcomes)
    }

    /// Wait for tracked transactions to settle while the execution monitor
    /// runs alongside. Returns (executed, finalized) when polling stops.
    pub async fn wait_for_completion(&self) -> (usize, usize) {
        info!(
            "Waiting for completion of {} transactions...",
            self.tracker.tracked_count().await
        );

        let monitor = ExecutionMonitor::new(
            self.ctx.gateway.clone(),
            self.nonces.clone(),
            self.config.monitor_interval,
        )
        .spawn();

        let counts = self.tracker.poll_until_settled_or_timeout().await;

        monitor.stop().await;
        counts
    }
}
