//! Xygle Loadgen - concurrent transfer load generation against a Xygle node
//!
//! Submits a batch of value transfers under a bounded worker budget, tracks
//! each one until the node reports it executed and final, and reports
//! latency, time-to-finality and throughput.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod config;
mod context;
mod error;
mod finality;
mod metrics;
mod report;
mod rpc;
mod tx;

use config::Settings;
use context::RunContext;
use error::LoadgenError;
use finality::FinalityTracker;
use metrics::{Metrics, MetricsServer};
use rpc::HttpRpcGateway;
use tx::{DispatcherConfig, NonceCoordinator, TransactionDispatcher, TransactionRequest};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Xygle Loadgen v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration: {} node at {}, {} transfers with {} workers",
        settings.node.node_type, settings.node.url, settings.run.tx_count, settings.run.workers
    );

    let metrics = Arc::new(Metrics::new()?);
    let gateway = Arc::new(HttpRpcGateway::new(
        &settings.node.url,
        &settings.rpc,
        metrics.clone(),
    )?);
    let ctx = RunContext::new(gateway, metrics.clone(), &settings.node.address);

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port, metrics.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let outcome = tokio::select! {
        result = run(&settings, ctx) => result,
        _ = shutdown_signal() => {
            warn!("Shutdown signal received, abandoning run");
            Ok(())
        }
    };

    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Xygle Loadgen stopped");
    outcome
}

/// Submit the configured batch, wait for it to settle and report
async fn run(settings: &Settings, ctx: RunContext) -> Result<()> {
    let nonces = Arc::new(
        NonceCoordinator::initialize(ctx.gateway.as_ref(), &ctx.account, ctx.metrics.clone())
            .await?,
    );
    info!("Nonce coordinator ready for account {}", nonces.account());

    let tracker = Arc::new(FinalityTracker::new(
        &ctx,
        settings.tracker.poll_interval(),
        settings.tracker.timeout(),
    ));
    let dispatcher = TransactionDispatcher::new(
        ctx,
        nonces,
        tracker,
        DispatcherConfig::from_settings(&settings.run, settings.tracker.monitor_interval()),
    );

    let requests: Vec<TransactionRequest> = (1..=settings.run.tx_count)
        .map(|id| TransactionRequest {
            id,
            receiver: settings.run.receiver.clone(),
            value: settings.run.value,
        })
        .collect();

    info!(
        "Starting execution of {} transactions with {} workers",
        requests.len(),
        settings.run.workers
    );

    let outcomes = dispatcher.execute_transactions(requests).await?;
    let submissions = report::log_outcomes(&outcomes);

    let (executed, finalized) = dispatcher.wait_for_completion().await;
    info!(
        target: "metrics",
        "Execution phase completed: Executed={}, Finalized={}",
        executed, finalized
    );

    let summary = match dispatcher.tracker().summarize().await {
        Ok(summary) => summary,
        Err(LoadgenError::NoExecutions(partial)) => {
            info!(target: "metrics", "Summary note: no executed transactions to compute TPS");
            *partial
        }
        Err(e) => return Err(e.into()),
    };
    report::log_summary(&summary, submissions);
    report::log_nonce_tally(&dispatcher.nonces().snapshot().await);

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,xygle_loadgen=debug,hyper=warn,reqwest=warn")
    });

    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
