//! Nonce coordination for concurrent transfer submission
//!
//! Handles:
//! - Seeding the local counter from on-chain account state
//! - Strictly monotonic allocation under concurrent callers
//! - Per-nonce lifecycle records (allocated -> submitted -> executed/failed)

use crate::error::{LoadgenError, LoadgenResult};
use crate::metrics::Metrics;
use crate::rpc::{AccountState, RpcGateway};

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle state of an allocated nonce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceState {
    Allocated,
    Submitted,
    Executed,
    Failed,
}

/// Bookkeeping for one allocated nonce
#[derive(Debug, Clone)]
pub struct NonceRecord {
    pub nonce: u64,
    /// Set once the node accepts the transfer
    pub tx_id: Option<String>,
    pub state: NonceState,
    pub submitted_at: Option<Instant>,
    pub executed_at: Option<Instant>,
}

impl NonceRecord {
    fn allocated(nonce: u64) -> Self {
        Self {
            nonce,
            tx_id: None,
            state: NonceState::Allocated,
            submitted_at: None,
            executed_at: None,
        }
    }

    pub fn is_executed(&self) -> bool {
        self.state == NonceState::Executed
    }

    pub fn is_failed(&self) -> bool {
        self.state == NonceState::Failed
    }

    /// Submitted and still waiting for the node to execute it
    pub fn awaiting_execution(&self) -> bool {
        self.state == NonceState::Submitted
    }
}

/// Owns the account's nonce counter and the record of every nonce handed out
pub struct NonceCoordinator {
    account: String,
    /// Last allocated nonce; the lock also orders record insertion
    current: Mutex<u64>,
    records: DashMap<u64, Arc<RwLock<NonceRecord>>>,
    metrics: Arc<Metrics>,
}

impl NonceCoordinator {
    /// Seed the coordinator from the account's on-chain nonce
    pub async fn initialize(
        gateway: &dyn RpcGateway,
        account: &str,
        metrics: Arc<Metrics>,
    ) -> LoadgenResult<Self> {
        let state = gateway
            .get_account_state(account)
            .await
            .map_err(|e| LoadgenError::Initialization {
                account: account.to_string(),
                message: format!("failed to get account state: {}", e),
            })?;

        let start = parse_nonce(&state).ok_or_else(|| LoadgenError::Initialization {
            account: account.to_string(),
            message: format!("account state has no numeric nonce: {:?}", state.get("nonce")),
        })?;

        info!("Initialized nonce for account {}: {}", account, start);
        Ok(Self::with_start(account, start, metrics))
    }

    /// Create a coordinator whose first allocation is `start + 1`
    pub fn with_start(account: &str, start: u64, metrics: Arc<Metrics>) -> Self {
        Self {
            account: account.to_string(),
            current: Mutex::new(start),
            records: DashMap::new(),
            metrics,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Allocate the next nonce and open an `Allocated` record for it
    pub async fn allocate_nonce(&self) -> u64 {
        let mut current = self.current.lock().await;
        *current += 1;
        let nonce = *current;

        self.records
            .insert(nonce, Arc::new(RwLock::new(NonceRecord::allocated(nonce))));
        drop(current);

        self.metrics.record_nonce_allocated();
        debug!("Allocated nonce {}", nonce);
        nonce
    }

    /// Record that the node accepted the transfer for `nonce`
    pub async fn mark_submitted(&self, nonce: u64, tx_id: &str) {
        let Some(record) = self.record(nonce) else {
            return;
        };

        let mut record = record.write().await;
        match record.state {
            NonceState::Allocated => {
                record.tx_id = Some(tx_id.to_string());
                record.state = NonceState::Submitted;
                record.submitted_at = Some(Instant::now());
            }
            NonceState::Submitted if record.tx_id.as_deref() == Some(tx_id) => {}
            state => warn!(
                "Ignoring submission of nonce {} in state {:?} (tx {})",
                nonce, state, tx_id
            ),
        }
    }

    /// Record that the node executed the transfer for `nonce`
    pub async fn mark_executed(&self, nonce: u64) {
        let Some(record) = self.record(nonce) else {
            return;
        };

        let mut record = record.write().await;
        match record.state {
            NonceState::Submitted => {
                record.state = NonceState::Executed;
                record.executed_at = Some(Instant::now());
            }
            NonceState::Executed => {}
            state => warn!("Ignoring execution of nonce {} in state {:?}", nonce, state),
        }
    }

    /// Record that the transfer for `nonce` will not be submitted
    pub async fn mark_failed(&self, nonce: u64) {
        let Some(record) = self.record(nonce) else {
            return;
        };

        let mut record = record.write().await;
        match record.state {
            NonceState::Allocated | NonceState::Submitted => {
                record.state = NonceState::Failed;
                info!("Marked nonce {} as failed", nonce);
            }
            NonceState::Failed => {}
            NonceState::Executed => {
                warn!("Ignoring failure of already executed nonce {}", nonce)
            }
        }
    }

    /// Copy of every record, ordered by nonce
    pub async fn snapshot(&self) -> Vec<NonceRecord> {
        let handles: Vec<Arc<RwLock<NonceRecord>>> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut records = Vec::with_capacity(handles.len());
        for handle in handles {
            records.push(handle.read().await.clone());
        }
        records.sort_by_key(|r| r.nonce);
        records
    }

    fn record(&self, nonce: u64) -> Option<Arc<RwLock<NonceRecord>>> {
        let record = self.records.get(&nonce).map(|r| r.value().clone());
        if record.is_none() {
            error!("Nonce {} not found in states", nonce);
        }
        record
    }
}

/// Accepts JSON integers and integral floats; anything else is not a nonce
fn parse_nonce(state: &AccountState) -> Option<u64> {
    match state.get("nonce")? {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        _ => None,
    }
}
