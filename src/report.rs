//! Metric log lines for a finished run

use crate::finality::Summary;
use crate::tx::{NonceRecord, TransactionOutcome};

use chrono::{DateTime, Utc};
use tracing::info;

/// Accepted and failed submission counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubmissionTally {
    pub successful: usize,
    pub failed: usize,
}

/// Final nonce states as seen by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NonceTally {
    pub allocated: usize,
    pub submitted: usize,
    pub executed: usize,
    pub failed: usize,
}

/// Log one line per outcome and return the totals
pub fn log_outcomes(outcomes: &[TransactionOutcome]) -> SubmissionTally {
    let mut tally = SubmissionTally::default();

    for outcome in outcomes {
        if outcome.success {
            tally.successful += 1;
            info!(
                target: "metrics",
                "Transaction {} submitted successfully (nonce={}, txID={}, latency={:.3}s)",
                outcome.id,
                outcome.nonce,
                outcome.tx_id.as_deref().unwrap_or_default(),
                outcome.latency.as_secs_f64()
            );
        } else {
            tally.failed += 1;
            info!(
                target: "metrics",
                "Transaction {} failed (nonce={}): {}",
                outcome.id,
                outcome.nonce,
                outcome
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default()
            );
        }
    }

    info!(
        target: "metrics",
        "Submission phase completed: {} successful, {} failed",
        tally.successful, tally.failed
    );
    tally
}

/// Log per-transaction and aggregate figures
pub fn log_summary(summary: &Summary, submissions: SubmissionTally) {
    let mut latencies: Vec<_> = summary.latency_secs.iter().collect();
    latencies.sort_by(|a, b| a.0.cmp(b.0));
    for (tx_id, latency) in latencies {
        info!(target: "metrics", "Tx {} latency={:.2}s", tx_id, latency);
    }

    let mut finals: Vec<_> = summary.time_to_final_secs.iter().collect();
    finals.sort_by(|a, b| a.0.cmp(b.0));
    for (tx_id, time_to_final) in finals {
        info!(target: "metrics", "Tx {} time_to_final={:.2}s", tx_id, time_to_final);
    }

    info!(target: "metrics", "PERFORMANCE SUMMARY");
    info!(
        target: "metrics",
        "Total submitted: {}, Successful: {}, Failed: {}",
        submissions.successful + submissions.failed,
        submissions.successful,
        submissions.failed
    );
    info!(
        target: "metrics",
        "Executed: {}, Finalized: {}",
        summary.executed_count, summary.finalized_count
    );

    match summary.avg_latency_secs {
        Some(avg) => info!(
            target: "metrics",
            "Average latency: {:.2}s over {} executed txs",
            avg, summary.executed_count
        ),
        None => info!(target: "metrics", "No txs executed within the timeout window"),
    }
    match summary.avg_time_to_final_secs {
        Some(avg) => info!(
            target: "metrics",
            "Average time-to-finality: {:.2}s over {} finalized txs",
            avg, summary.finalized_count
        ),
        None => info!(target: "metrics", "No txs reached finality within the timeout window"),
    }

    if let (Some(first), Some(last)) = (summary.first_execution_unix, summary.last_execution_unix) {
        info!(
            target: "metrics",
            "Execution window: {} .. {}",
            render_unix(first),
            render_unix(last)
        );
    }

    match summary.throughput_tps {
        Some(tps) => info!(target: "metrics", "Estimated TPS: {:.2}", tps),
        None => info!(target: "metrics", "Estimated TPS: unavailable"),
    }
}

/// Count nonce records by state and log the result
pub fn log_nonce_tally(records: &[NonceRecord]) -> NonceTally {
    let mut tally = NonceTally::default();
    for record in records {
        if record.is_executed() {
            tally.executed += 1;
        } else if record.is_failed() {
            tally.failed += 1;
        } else if record.awaiting_execution() {
            tally.submitted += 1;
        } else {
            tally.allocated += 1;
        }
    }

    info!(
        target: "metrics",
        "Nonce states: {} executed, {} submitted, {} failed, {} unsent",
        tally.executed, tally.submitted, tally.failed, tally.allocated
    );
    tally
}

fn render_unix(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadgenError;
    use crate::metrics::Metrics;
    use crate::tx::NonceCoordinator;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_outcome_tally() {
        let outcomes = vec![
            TransactionOutcome {
                id: 1,
                nonce: 5,
                tx_id: Some("tx-5".to_string()),
                success: true,
                error: None,
                latency: Duration::from_millis(20),
            },
            TransactionOutcome {
                id: 2,
                nonce: 6,
                tx_id: None,
                success: false,
                error: Some(LoadgenError::SubmissionFailed {
                    attempts: 1,
                    last_error: "nonce too low".to_string(),
                }),
                latency: Duration::from_millis(5),
            },
        ];

        assert_eq!(
            log_outcomes(&outcomes),
            SubmissionTally {
                successful: 1,
                failed: 1
            }
        );
    }

    #[tokio::test]
    async fn test_nonce_tally() {
        let nonces = NonceCoordinator::with_start("sender", 0, Arc::new(Metrics::new().unwrap()));
        for _ in 0..4 {
            nonces.allocate_nonce().await;
        }
        nonces.mark_submitted(1, "a").await;
        nonces.mark_executed(1).await;
        nonces.mark_submitted(2, "b").await;
        nonces.mark_failed(3).await;

        let tally = log_nonce_tally(&nonces.snapshot().await);
        assert_eq!(
            tally,
            NonceTally {
                allocated: 1,
                submitted: 1,
                executed: 1,
                failed: 1
            }
        );
    }

    #[test]
    fn test_render_unix() {
        assert_eq!(render_unix(0), "1970-01-01T00:00:00+00:00");
    }
}
