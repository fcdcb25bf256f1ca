//! Background re-check of submitted nonces against the node
//!
//! The monitor only updates the nonce coordinator. It polls independently of
//! the finality tracker, so the two views of a transaction may briefly
//! disagree; neither waits on the other.

use super::nonce::NonceCoordinator;
use crate::rpc::RpcGateway;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Periodically flips submitted nonces to executed once the node reports success
pub struct ExecutionMonitor {
    gateway: Arc<dyn RpcGateway>,
    nonces: Arc<NonceCoordinator>,
    interval: Duration,
}

/// Stop signal and task handle for a running monitor
pub struct MonitorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ExecutionMonitor {
    pub fn new(
        gateway: Arc<dyn RpcGateway>,
        nonces: Arc<NonceCoordinator>,
        interval: Duration,
    ) -> Self {
        Self {
            gateway,
            nonces,
            interval,
        }
    }

    /// Run the monitor on its own task until the handle is stopped
    pub fn spawn(self) -> MonitorHandle {
        let (stop, mut stopped) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {
                        let flipped = self.check_outstanding().await;
                        if flipped > 0 {
                            debug!("Monitor marked {} nonces executed", flipped);
                        }
                    }
                }
            }
        });

        MonitorHandle { stop, task }
    }

    /// One pass over submitted nonces; returns how many were marked executed
    pub async fn check_outstanding(&self) -> usize {
        let mut flipped = 0;

        for record in self.nonces.snapshot().await {
            if !record.awaiting_execution() {
                continue;
            }
            let Some(tx_id) = record.tx_id.as_deref() else {
                continue;
            };

            match self.gateway.get_transaction_details(tx_id).await {
                Ok(details) if details.is_executed() => {
                    self.nonces.mark_executed(record.nonce).await;
                    flipped += 1;
                }
                Ok(_) => {}
                Err(e) => debug!("Monitor lookup for {} failed: {}", tx_id, e),
            }
        }

        flipped
    }
}

impl MonitorHandle {
    /// Signal the monitor to stop and wait for its task to exit
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!("Execution monitor task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadgenError;
    use crate::metrics::Metrics;
    use crate::rpc::{MockRpcGateway, TransactionDetails};
    use crate::tx::nonce::NonceState;

    fn executed(tx_id: &str) -> TransactionDetails {
        TransactionDetails {
            id: tx_id.to_string(),
            transaction_id: String::new(),
            execution_status: "SUCCESS".to_string(),
            is_final: false,
            execution_timestamp: 1,
        }
    }

    async fn coordinator_with_submissions() -> Arc<NonceCoordinator> {
        let nonces = Arc::new(NonceCoordinator::with_start(
            "sender",
            0,
            Arc::new(Metrics::new().unwrap()),
        ));
        let first = nonces.allocate_nonce().await;
        let second = nonces.allocate_nonce().await;
        let _unsubmitted = nonces.allocate_nonce().await;
        nonces.mark_submitted(first, "tx-1").await;
        nonces.mark_submitted(second, "tx-2").await;
        nonces
    }

    #[tokio::test]
    async fn test_check_marks_only_successful_submissions() {
        let nonces = coordinator_with_submissions().await;
        let mut gateway = MockRpcGateway::new();
        gateway
            .expect_get_transaction_details()
            .withf(|tx_id| tx_id == "tx-1")
            .times(1)
            .returning(|id| Ok(executed(id)));
        gateway
            .expect_get_transaction_details()
            .withf(|tx_id| tx_id == "tx-2")
            .times(1)
            .returning(|id| {
                Err(LoadgenError::NotFound {
                    tx_id: id.to_string(),
                })
            });

        let monitor = ExecutionMonitor::new(Arc::new(gateway), nonces.clone(), Duration::from_secs(1));
        assert_eq!(monitor.check_outstanding().await, 1);

        let states: Vec<NonceState> = nonces.snapshot().await.iter().map(|r| r.state).collect();
        assert_eq!(
            states,
            vec![NonceState::Executed, NonceState::Submitted, NonceState::Allocated]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_ticks_until_stopped() {
        let nonces = coordinator_with_submissions().await;
        let mut gateway = MockRpcGateway::new();
        gateway
            .expect_get_transaction_details()
            .returning(|id| Ok(executed(id)));

        let handle = ExecutionMonitor::new(Arc::new(gateway), nonces.clone(), Duration::from_secs(1))
            .spawn();

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        handle.stop().await;

        let records = nonces.snapshot().await;
        assert!(records[0].is_executed());
        assert!(records[1].is_executed());
        assert_eq!(records[2].state, NonceState::Allocated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_tick() {
        let nonces = coordinator_with_submissions().await;
        let handle = ExecutionMonitor::new(
            Arc::new(MockRpcGateway::new()),
            nonces.clone(),
            Duration::from_secs(1),
        )
        .spawn();

        handle.stop().await;
        assert!(nonces.snapshot().await.iter().all(|r| !r.is_executed()));
    }
}
