//! Aggregate statistics derived from transaction timelines

use super::tracker::TxTimeline;
use crate::error::{LoadgenError, LoadgenResult};

use std::collections::HashMap;

/// Immutable snapshot of what the tracker observed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    /// Execution instant minus submission instant, per transaction
    pub latency_secs: HashMap<String, f64>,
    /// Finalization instant minus submission instant, per transaction
    pub time_to_final_secs: HashMap<String, f64>,
    /// Node-reported execution unix timestamp, per executed transaction
    pub exec_unix_timestamps: HashMap<String, i64>,
    pub avg_latency_secs: Option<f64>,
    pub avg_time_to_final_secs: Option<f64>,
    /// Executed transactions per second; `None` when nothing executed
    pub throughput_tps: Option<f64>,
    pub executed_count: usize,
    pub finalized_count: usize,
    pub first_execution_unix: Option<i64>,
    pub last_execution_unix: Option<i64>,
}

impl Summary {
    /// Derive a summary, failing with `NoExecutions` (carrying the partial
    /// summary) when no transaction reached the executed state
    pub fn from_timelines(timelines: &HashMap<String, TxTimeline>) -> LoadgenResult<Self> {
        let mut summary = Summary::default();

        for (tx_id, timeline) in timelines {
            if let Some(executed) = timeline.executed {
                let latency = executed.duration_since(timeline.submitted).as_secs_f64();
                summary.latency_secs.insert(tx_id.clone(), latency);
                summary
                    .exec_unix_timestamps
                    .insert(tx_id.clone(), timeline.exec_unix);
                summary.executed_count += 1;
            }
            if let Some(finalized) = timeline.finalized {
                let time_to_final = finalized.duration_since(timeline.submitted).as_secs_f64();
                summary.time_to_final_secs.insert(tx_id.clone(), time_to_final);
                summary.finalized_count += 1;
            }
        }

        summary.avg_latency_secs = mean(summary.latency_secs.values());
        summary.avg_time_to_final_secs = mean(summary.time_to_final_secs.values());

        if summary.executed_count == 0 {
            return Err(LoadgenError::NoExecutions(Box::new(summary)));
        }

        // Nodes report 0 when they have no execution timestamp
        let reported = summary
            .exec_unix_timestamps
            .values()
            .copied()
            .filter(|ts| *ts > 0);
        summary.first_execution_unix = reported.clone().min();
        summary.last_execution_unix = reported.max();

        let executed = summary.executed_count as f64;
        let span = match (summary.first_execution_unix, summary.last_execution_unix) {
            (Some(first), Some(last)) => last - first,
            _ => 0,
        };
        summary.throughput_tps = Some(if span > 0 {
            executed / span as f64
        } else {
            executed
        });

        Ok(summary)
    }
}

fn mean<'a>(values: impl Iterator<Item = &'a f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}
