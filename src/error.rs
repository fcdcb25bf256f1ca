//! Error types for the load generator

use crate::finality::Summary;

use thiserror::Error;

/// Main error type for the load generator
#[derive(Error, Debug)]
pub enum LoadgenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to initialize nonce for account {account}: {message}")]
    Initialization { account: String, message: String },

    #[error("no transaction requests provided")]
    EmptyBatch,

    #[error("failed to send {method} request: {message}")]
    Transport { method: String, message: String },

    #[error("RPC error in {method} (code {code}): {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("Transaction {tx_id} not found")]
    NotFound { tx_id: String },

    #[error("failed to decode {method} response: {message}")]
    Decode { method: String, message: String },

    #[error("transaction failed after {attempts} attempts: {last_error}")]
    SubmissionFailed { attempts: u32, last_error: String },

    #[error("no executed transactions to compute TPS")]
    NoExecutions(Box<Summary>),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LoadgenError {
    /// Check if the node reported the queried object as unknown
    pub fn is_not_found(&self) -> bool {
        match self {
            LoadgenError::NotFound { .. } => true,
            other => other.to_string().to_lowercase().contains("not found"),
        }
    }
}

/// Result type for load generator operations
pub type LoadgenResult<T> = Result<T, LoadgenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        let typed = LoadgenError::NotFound {
            tx_id: "abc".to_string(),
        };
        assert!(typed.is_not_found());

        let textual = LoadgenError::Rpc {
            method: "xygle_getTransaction".to_string(),
            code: -32000,
            message: "Transaction Not Found in pool".to_string(),
        };
        assert!(textual.is_not_found());

        let other = LoadgenError::Transport {
            method: "xygle_getTransaction".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(!other.is_not_found());
    }

    #[test]
    fn test_submission_failure_message_carries_attempts() {
        let err = LoadgenError::SubmissionFailed {
            attempts: 3,
            last_error: "503 service unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "transaction failed after 3 attempts: 503 service unavailable"
        );
    }
}
