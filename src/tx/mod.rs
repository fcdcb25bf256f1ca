//! Transfer submission with nonce coordination, retries and execution monitoring

mod dispatcher;
mod monitor;
mod nonce;

pub use dispatcher::{DispatcherConfig, TransactionDispatcher, TransactionOutcome, TransactionRequest};
pub use nonce::{NonceCoordinator, NonceRecord};
