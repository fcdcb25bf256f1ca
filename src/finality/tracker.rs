//! Polling tracker for execution and finality of submitted transfers

use super::summary::Summary;
use crate::context::RunContext;
use crate::error::LoadgenResult;
use crate::metrics::Metrics;
use crate::rpc::RpcGateway;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Observed lifecycle of one accepted transfer
#[derive(Debug, Clone)]
pub struct TxTimeline {
    pub submitted: Instant,
    pub executed: Option<Instant>,
    pub finalized: Option<Instant>,
    /// Execution time as reported by the node (unix seconds)
    pub exec_unix: i64,
    pub exec_status: String,
}

impl TxTimeline {
    fn new(submitted: Instant) -> Self {
        Self {
            submitted,
            executed: None,
            finalized: None,
            exec_unix: 0,
            exec_status: String::new(),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.executed.is_some() && self.finalized.is_some()
    }
}

/// Tracks execution and finality for every registered transaction
pub struct FinalityTracker {
    gateway: Arc<dyn RpcGateway>,
    metrics: Arc<Metrics>,
    /// Transaction id -> timeline
    timelines: RwLock<HashMap<String, TxTimeline>>,
    poll_interval: Duration,
    timeout: Duration,
}

impl FinalityTracker {
    pub fn new(ctx: &RunContext, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            gateway: ctx.gateway.clone(),
            metrics: ctx.metrics.clone(),
            timelines: RwLock::new(HashMap::new()),
            poll_interval,
            timeout,
        }
    }

    /// Start tracking `tx_id` as submitted at `at`.
    ///
    /// Registering an id twice keeps the latest submission instant. Execution
    /// and finality already observed for that id are kept, so its latency is
    /// measured from the later submission.
    pub async fn register_submission(&self, tx_id: &str, at: Instant) {
        let mut timelines = self.timelines.write().await;
        match timelines.get_mut(tx_id) {
            Some(existing) => {
                warn!("Transaction {} registered twice; keeping latest submission", tx_id);
                existing.submitted = at;
            }
            None => {
                timelines.insert(tx_id.to_string(), TxTimeline::new(at));
            }
        }
    }

    pub async fn tracked_count(&self) -> usize {
        self.timelines.read().await.len()
    }

    #[cfg(test)]
    pub async fn timeline(&self, tx_id: &str) -> Option<TxTimeline> {
        self.timelines.read().await.get(tx_id).cloned()
    }

    /// Poll the node until every tracked transaction is executed and final,
    /// or until the overall timeout elapses. Returns (executed, finalized).
    pub async fn poll_until_settled_or_timeout(&self) -> (usize, usize) {
        let deadline = Instant::now() + self.timeout;

        loop {
            let pending = self.pending_ids().await;
            if pending.is_empty() {
                debug!("All tracked transactions settled");
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    "Finality polling timed out after {:?} with {} transactions unsettled",
                    self.timeout,
                    pending.len()
                );
                break;
            }

            for tx_id in &pending {
                self.poll_transaction(tx_id).await;
            }
            if self.pending_ids().await.is_empty() {
                continue;
            }

            sleep(self.poll_interval).await;
        }

        self.settled_counts().await
    }

    /// Count of transactions observed executed and observed final
    pub async fn settled_counts(&self) -> (usize, usize) {
        let timelines = self.timelines.read().await;
        let executed = timelines.values().filter(|t| t.executed.is_some()).count();
        let finalized = timelines.values().filter(|t| t.finalized.is_some()).count();
        (executed, finalized)
    }

    /// Derive the run summary from the current timelines
    pub async fn summarize(&self) -> LoadgenResult<Summary> {
        let timelines = self.timelines.read().await;
        Summary::from_timelines(&timelines)
    }

    async fn pending_ids(&self) -> Vec<String> {
        self.timelines
            .read()
            .await
            .iter()
            .filter(|(_, t)| !t.is_settled())
            .map(|(id, _)| id.clone())
            .collect()
    }

    async fn poll_transaction(&self, tx_id: &str) {
        let details = match self.gateway.get_transaction_details(tx_id).await {
            Ok(details) => details,
            Err(e) if e.is_not_found() => return,
            Err(e) => {
                error!("poll {} error: {}", tx_id, e);
                return;
            }
        };

        let now = Instant::now();
        let mut timelines = self.timelines.write().await;
        let Some(timeline) = timelines.get_mut(tx_id) else {
            return;
        };

        if details.is_executed() && timeline.executed.is_none() {
            timeline.executed = Some(now);
            timeline.exec_unix = details.execution_timestamp;
            timeline.exec_status = details.execution_status.clone();
            self.metrics.record_tx_executed();
            info!(target: "metrics", "Tx {} executed (status={})", tx_id, details.execution_status);
        }
        if details.is_final && timeline.finalized.is_none() {
            timeline.finalized = Some(now);
            self.metrics.record_tx_finalized();
            info!(target: "metrics", "Tx {} is final", tx_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadgenError;
    use crate::rpc::{MockRpcGateway, TransactionDetails};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const POLL: Duration = Duration::from_secs(2);
    const TIMEOUT: Duration = Duration::from_secs(300);

    fn tracker(gateway: MockRpcGateway) -> FinalityTracker {
        let ctx = RunContext::new(
            Arc::new(gateway),
            Arc::new(Metrics::new().unwrap()),
            "sender",
        );
        FinalityTracker::new(&ctx, POLL, TIMEOUT)
    }

    fn details(status: &str, is_final: bool, ts: i64) -> TransactionDetails {
        TransactionDetails {
            id: String::new(),
            transaction_id: String::new(),
            execution_status: status.to_string(),
            is_final,
            execution_timestamp: ts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_executed_then_final() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut gateway = MockRpcGateway::new();
        gateway
            .expect_get_transaction_details()
            .returning(move |_| match seen.fetch_add(1, Ordering::SeqCst) {
                0 => Err(LoadgenError::NotFound {
                    tx_id: "tx".to_string(),
                }),
                1 => Ok(details("SUCCESS", false, 1_700_000_000)),
                _ => Ok(details("SUCCESS", true, 1_700_000_000)),
            });
        let tracker = tracker(gateway);

        let start = Instant::now();
        tracker.register_submission("tx", start).await;
        let (executed, finalized) = tracker.poll_until_settled_or_timeout().await;

        assert_eq!((executed, finalized), (1, 1));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let timeline = tracker.timeline("tx").await.unwrap();
        assert_eq!(timeline.executed.unwrap() - start, POLL);
        assert_eq!(timeline.finalized.unwrap() - start, POLL * 2);
        assert_eq!(timeline.exec_unix, 1_700_000_000);
        assert_eq!(timeline.exec_status, "SUCCESS");

        let summary = tracker.summarize().await.unwrap();
        assert_eq!(summary.latency_secs.get("tx"), Some(&2.0));
        assert_eq!(summary.time_to_final_secs.get("tx"), Some(&4.0));
        assert_eq!(summary.throughput_tps, Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_deadline_when_never_settled() {
        let mut gateway = MockRpcGateway::new();
        gateway
            .expect_get_transaction_details()
            .returning(|_| Ok(details("PENDING", false, 0)));
        let tracker = tracker(gateway);

        tracker.register_submission("slow", Instant::now()).await;
        let start = Instant::now();
        let counts = tracker.poll_until_settled_or_timeout().await;

        assert_eq!(counts, (0, 0));
        assert!(start.elapsed() >= TIMEOUT);
        assert!(start.elapsed() < TIMEOUT + POLL * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_errors_do_not_abort_polling() {
        let mut gateway = MockRpcGateway::new();
        gateway
            .expect_get_transaction_details()
            .withf(|tx_id| tx_id == "broken")
            .returning(|_| {
                Err(LoadgenError::Transport {
                    method: "xygle_getTransaction".to_string(),
                    message: "RPC HTTP status 500: boom".to_string(),
                })
            });
        gateway
            .expect_get_transaction_details()
            .withf(|tx_id| tx_id == "healthy")
            .returning(|_| Ok(details("SUCCESS", true, 42)));
        let tracker = FinalityTracker::new(
            &RunContext::new(
                Arc::new(gateway),
                Arc::new(Metrics::new().unwrap()),
                "sender",
            ),
            POLL,
            Duration::from_secs(10),
        );

        tracker.register_submission("broken", Instant::now()).await;
        tracker.register_submission("healthy", Instant::now()).await;
        let counts = tracker.poll_until_settled_or_timeout().await;

        assert_eq!(counts, (1, 1));
        assert!(!tracker.timeline("broken").await.unwrap().is_settled());
        assert!(tracker.timeline("healthy").await.unwrap().is_settled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_without_sleeping_once_settled() {
        let mut gateway = MockRpcGateway::new();
        gateway
            .expect_get_transaction_details()
            .times(1)
            .returning(|_| Ok(details("SUCCESS", true, 1_700_000_000)));
        let tracker = tracker(gateway);

        tracker.register_submission("fast", Instant::now()).await;
        let start = Instant::now();
        assert_eq!(tracker.poll_until_settled_or_timeout().await, (1, 1));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_tracker_returns_immediately() {
        let tracker = tracker(MockRpcGateway::new());
        let start = Instant::now();
        assert_eq!(tracker.poll_until_settled_or_timeout().await, (0, 0));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_registration_last_write_wins() {
        let mut gateway = MockRpcGateway::new();
        gateway
            .expect_get_transaction_details()
            .returning(|_| Ok(details("SUCCESS", true, 7)));
        let tracker = tracker(gateway);

        let first = Instant::now();
        tracker.register_submission("dup", first).await;
        let second = first + Duration::from_millis(500);
        tracker.register_submission("dup", second).await;

        assert_eq!(tracker.tracked_count().await, 1);
        assert_eq!(tracker.timeline("dup").await.unwrap().submitted, second);

        tracker.poll_until_settled_or_timeout().await;
        let executed_at = tracker.timeline("dup").await.unwrap().executed.unwrap();

        // Re-registering after execution moves the submission but keeps the observation
        let third = second + Duration::from_secs(1);
        tracker.register_submission("dup", third).await;
        let timeline = tracker.timeline("dup").await.unwrap();
        assert_eq!(timeline.submitted, third);
        assert_eq!(timeline.executed, Some(executed_at));
        assert!(timeline.finalized.is_some());
    }

    #[tokio::test]
    async fn test_summarize_without_executions() {
        let tracker = tracker(MockRpcGateway::new());
        tracker.register_submission("never", Instant::now()).await;

        let summary = match tracker.summarize().await.unwrap_err() {
            LoadgenError::NoExecutions(summary) => summary,
            other => panic!("expected NoExecutions, got {}", other),
        };
        assert_eq!(summary.executed_count, 0);
        assert_eq!(summary.finalized_count, 0);
        assert!(summary.throughput_tps.is_none());
    }
}
