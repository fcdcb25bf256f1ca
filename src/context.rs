//! Shared run context handed to every component at construction

use crate::metrics::Metrics;
use crate::rpc::RpcGateway;

use std::sync::Arc;

/// Collaborators shared by the coordinator, dispatcher, tracker and monitor
#[derive(Clone)]
pub struct RunContext {
    /// Gateway to the node under load
    pub gateway: Arc<dyn RpcGateway>,
    /// Metric instruments for this run
    pub metrics: Arc<Metrics>,
    /// Sending account
    pub account: String,
}

impl RunContext {
    pub fn new(gateway: Arc<dyn RpcGateway>, metrics: Arc<Metrics>, account: &str) -> Self {
        Self {
            gateway,
            metrics,
            account: account.to_string(),
        }
    }
}
