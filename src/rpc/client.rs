//! JSON-RPC 2.0 over HTTP POST

use super::{AccountState, RpcGateway, TransactionDetails};
use crate::config::RpcConfig;
use crate::error::{LoadgenError, LoadgenResult};
use crate::metrics::Metrics;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

const METHOD_ACCOUNT_STATE: &str = "xygle_getAccountState";
const METHOD_TRANSFER: &str = "xygle_transferFund";
const METHOD_TRANSACTION: &str = "xygle_getTransaction";

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    #[serde(default)]
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TransferReply {
    #[serde(default)]
    status: String,
    #[serde(default)]
    transaction_id: String,
}

/// HTTP-backed gateway to a single node
pub struct HttpRpcGateway {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
    metrics: Arc<Metrics>,
}

impl HttpRpcGateway {
    /// Create a new gateway for the node at `url`
    pub fn new(url: &str, config: &RpcConfig, metrics: Arc<Metrics>) -> LoadgenResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LoadgenError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.to_string(),
            http,
            next_id: AtomicU64::new(1),
            metrics,
        })
    }

    /// Send one request and return the raw `result` value
    async fn call(&self, method: &str, params: Value) -> LoadgenResult<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let start = Instant::now();
        let sent = self.http.post(&self.url).json(&request).send().await;
        self.metrics
            .observe_rpc_latency(method, start.elapsed().as_secs_f64());

        let response = sent.map_err(|e| {
            let err = LoadgenError::Transport {
                method: method.to_string(),
                message: format!("failed to send request to {}: {}", self.url, error_chain(&e)),
            };
            error!("{}", err);
            err
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| LoadgenError::Transport {
            method: method.to_string(),
            message: format!("failed to read response: {}", e),
        })?;

        if !status.is_success() {
            let err = LoadgenError::Transport {
                method: method.to_string(),
                message: format!("RPC HTTP status {}: {}", status.as_u16(), body),
            };
            error!("{}", err);
            return Err(err);
        }

        let envelope: JsonRpcResponse =
            serde_json::from_str(&body).map_err(|e| LoadgenError::Decode {
                method: method.to_string(),
                message: format!("{}; body: {}", e, body),
            })?;

        if let Some(rpc_error) = envelope.error {
            let message = match rpc_error.data {
                Some(Value::String(data)) if !data.is_empty() => {
                    format!("{} (data: {})", rpc_error.message, data)
                }
                Some(Value::Null) | None => rpc_error.message,
                Some(data) => format!("{} (data: {})", rpc_error.message, data),
            };
            return Err(LoadgenError::Rpc {
                method: method.to_string(),
                code: rpc_error.code,
                message,
            });
        }

        match envelope.result {
            Some(Value::Null) | None => Err(LoadgenError::Rpc {
                method: method.to_string(),
                code: 0,
                message: format!("RPC returned empty result for method {}", method),
            }),
            Some(result) => Ok(result),
        }
    }

    async fn call_typed<T: DeserializeOwned>(&self, method: &str, params: Value) -> LoadgenResult<T> {
        let result = self.call(method, params).await?;
        serde_json::from_value(result).map_err(|e| LoadgenError::Decode {
            method: method.to_string(),
            message: e.to_string(),
        })
    }
}

/// Render an error with its sources so retry classification sees the root cause
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[async_trait]
impl RpcGateway for HttpRpcGateway {
    async fn get_account_state(&self, address: &str) -> LoadgenResult<AccountState> {
        self.call_typed(METHOD_ACCOUNT_STATE, json!({ "address": address }))
            .await
    }

    async fn transfer_fund(
        &self,
        receiver: &str,
        value: u64,
        nonce: u64,
    ) -> LoadgenResult<String> {
        let reply: TransferReply = self
            .call_typed(
                METHOD_TRANSFER,
                json!({ "receiver": receiver, "value": value, "nonce": nonce }),
            )
            .await?;

        if reply.transaction_id.is_empty() {
            return Err(LoadgenError::Rpc {
                method: METHOD_TRANSFER.to_string(),
                code: 0,
                message: format!(
                    "transfer accepted without transaction id (status {:?})",
                    reply.status
                ),
            });
        }

        debug!(
            "Transfer nonce {} accepted: {} ({})",
            nonce, reply.transaction_id, reply.status
        );
        Ok(reply.transaction_id)
    }

    async fn get_transaction_details(&self, tx_id: &str) -> LoadgenResult<TransactionDetails> {
        let mut details: TransactionDetails = self
            .call_typed(METHOD_TRANSACTION, json!({ "id": tx_id }))
            .await
            .map_err(|e| match e {
                LoadgenError::Rpc { ref message, .. }
                    if message.to_lowercase().contains("not found") =>
                {
                    LoadgenError::NotFound {
                        tx_id: tx_id.to_string(),
                    }
                }
                other => other,
            })?;

        details.resolve_id(tx_id);
        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope_shape() {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 7,
            method: METHOD_TRANSFER,
            params: json!({ "receiver": "r", "value": 10, "nonce": 42 }),
        };
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(
            encoded,
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "xygle_transferFund",
                "params": { "receiver": "r", "value": 10, "nonce": 42 }
            })
        );
    }

    #[test]
    fn test_error_envelope_decodes() {
        let envelope: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"nonce too low","data":"expected 51"}}"#,
        )
        .unwrap();
        assert!(envelope.result.is_none());
        let error = envelope.error.unwrap();
        assert_eq!(error.code, -32000);
        assert_eq!(error.message, "nonce too low");
        assert_eq!(error.data, Some(Value::String("expected 51".to_string())));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_transport_error() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let gateway = HttpRpcGateway::new(
            "http://127.0.0.1:1",
            &RpcConfig {
                request_timeout_secs: 2,
            },
            metrics.clone(),
        )
        .unwrap();

        let err = gateway.get_account_state("acct").await.unwrap_err();
        assert!(matches!(err, LoadgenError::Transport { .. }));
        assert!(metrics.encode().unwrap().contains("xygle_getAccountState"));
    }
}
