//! Finality tracking for submitted transfers
//!
//! The tracker records when each transfer was accepted, polls the node until
//! it reports the transfer executed and final, and derives latency,
//! time-to-finality and throughput figures from what it observed.

pub mod summary;
pub mod tracker;

pub use summary::Summary;
pub use tracker::FinalityTracker;
