//! RPC gateway - the node operations the load generator depends on
//!
//! The engine only talks to the node through [`RpcGateway`], so tests can
//! substitute a mock and the HTTP transport stays in [`client`].

pub mod client;

pub use client::HttpRpcGateway;

use crate::error::LoadgenResult;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Execution status the node reports for a successfully executed transaction
pub const EXECUTION_SUCCESS: &str = "SUCCESS";

/// Raw account state as returned by the node
pub type AccountState = Map<String, Value>;

/// Transaction details reported by the node
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransactionDetails {
    #[serde(default)]
    pub id: String,
    /// Some nodes report the identifier under this key instead of `id`
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub execution_status: String,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub execution_timestamp: i64,
}

impl TransactionDetails {
    /// Settle `id` from `transaction_id` when the node left `id` empty,
    /// then from the identifier that was queried
    pub fn resolve_id(&mut self, requested: &str) {
        if self.id.is_empty() && !self.transaction_id.is_empty() {
            self.id = self.transaction_id.clone();
        }
        if self.id.is_empty() {
            self.id = requested.to_string();
        }
    }

    pub fn is_executed(&self) -> bool {
        self.execution_status == EXECUTION_SUCCESS
    }
}

/// Node operations consumed by the engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RpcGateway: Send + Sync {
    /// Fetch the account state, which carries the current `nonce`
    async fn get_account_state(&self, address: &str) -> LoadgenResult<AccountState>;

    /// Submit a value transfer and return the transaction identifier
    async fn transfer_fund(&self, receiver: &str, value: u64, nonce: u64)
        -> LoadgenResult<String>;

    /// Fetch execution status and finality for a transaction
    async fn get_transaction_details(&self, tx_id: &str) -> LoadgenResult<TransactionDetails>;
}
