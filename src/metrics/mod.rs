//! Prometheus metrics for a load run
//!
//! Exposes metrics for:
//! - RPC call latency per method
//! - Nonce allocation and transfer submission outcomes
//! - Execution and finality as observed by the tracker
//!
//! Every instrument lives in a registry owned by [`Metrics`], which is
//! handed to components through the run context.

use crate::error::{LoadgenError, LoadgenResult};

use axum::{extract::State, http::StatusCode, routing::get, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Metric instruments for one run
pub struct Metrics {
    registry: Registry,
    rpc_latency: HistogramVec,
    nonces_allocated: IntCounter,
    tx_submitted: IntCounter,
    tx_failed: IntCounter,
    tx_retried: IntCounter,
    tx_executed: IntCounter,
    tx_finalized: IntCounter,
    submission_latency: Histogram,
}

impl Metrics {
    pub fn new() -> LoadgenResult<Self> {
        let registry = Registry::new();

        let rpc_latency = HistogramVec::new(
            HistogramOpts::new("loadgen_rpc_latency_seconds", "RPC call latency by method")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["method"],
        )?;
        let nonces_allocated = IntCounter::new(
            "loadgen_nonces_allocated_total",
            "Total nonces allocated by the coordinator",
        )?;
        let tx_submitted = IntCounter::new(
            "loadgen_transactions_submitted_total",
            "Total transfers accepted by the node",
        )?;
        let tx_failed = IntCounter::new(
            "loadgen_transactions_failed_total",
            "Total transfers that exhausted or aborted their retries",
        )?;
        let tx_retried = IntCounter::new(
            "loadgen_transaction_retries_total",
            "Total transfer submission retries",
        )?;
        let tx_executed = IntCounter::new(
            "loadgen_transactions_executed_total",
            "Total transactions observed executed",
        )?;
        let tx_finalized = IntCounter::new(
            "loadgen_transactions_finalized_total",
            "Total transactions observed final",
        )?;
        let submission_latency = Histogram::with_opts(
            HistogramOpts::new(
                "loadgen_submission_latency_seconds",
                "Time from nonce allocation to submission resolution",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;

        registry.register(Box::new(rpc_latency.clone()))?;
        registry.register(Box::new(nonces_allocated.clone()))?;
        registry.register(Box::new(tx_submitted.clone()))?;
        registry.register(Box::new(tx_failed.clone()))?;
        registry.register(Box::new(tx_retried.clone()))?;
        registry.register(Box::new(tx_executed.clone()))?;
        registry.register(Box::new(tx_finalized.clone()))?;
        registry.register(Box::new(submission_latency.clone()))?;

        Ok(Self {
            registry,
            rpc_latency,
            nonces_allocated,
            tx_submitted,
            tx_failed,
            tx_retried,
            tx_executed,
            tx_finalized,
            submission_latency,
        })
    }

    pub fn observe_rpc_latency(&self, method: &str, latency_secs: f64) {
        self.rpc_latency
            .with_label_values(&[method])
            .observe(latency_secs);
    }

    pub fn record_nonce_allocated(&self) {
        self.nonces_allocated.inc();
    }

    pub fn record_tx_submitted(&self, latency_secs: f64) {
        self.tx_submitted.inc();
        self.submission_latency.observe(latency_secs);
    }

    pub fn record_tx_failed(&self, latency_secs: f64) {
        self.tx_failed.inc();
        self.submission_latency.observe(latency_secs);
    }

    pub fn record_tx_retry(&self) {
        self.tx_retried.inc();
    }

    pub fn record_tx_executed(&self) {
        self.tx_executed.inc();
    }

    pub fn record_tx_finalized(&self) {
        self.tx_finalized.inc();
    }

    /// Render all instruments in the Prometheus text format
    pub fn encode(&self) -> LoadgenResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| LoadgenError::Internal(e.to_string()))
    }
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
    metrics: Arc<Metrics>,
}

impl MetricsServer {
    pub fn new(port: u16, metrics: Arc<Metrics>) -> Self {
        Self { port, metrics }
    }

    pub async fn run(&self) -> LoadgenResult<()> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(self.metrics.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| LoadgenError::Internal(format!("bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| LoadgenError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> (StatusCode, String) {
    match metrics.encode() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registries_are_independent() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();

        first.record_tx_submitted(0.2);
        first.record_tx_submitted(0.3);
        second.record_tx_failed(1.0);

        assert_eq!(first.tx_submitted.get(), 2);
        assert_eq!(second.tx_submitted.get(), 0);
        assert_eq!(second.tx_failed.get(), 1);
    }

    #[test]
    fn test_encode_includes_method_label() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_rpc_latency("xygle_transferFund", 0.012);
        metrics.record_nonce_allocated();

        let text = metrics.encode().unwrap();
        assert!(text.contains("loadgen_rpc_latency_seconds"));
        assert!(text.contains("method=\"xygle_transferFund\""));
        assert!(text.contains("loadgen_nonces_allocated_total 1"));
    }
}
