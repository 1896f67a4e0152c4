//! Ledger Gateway Client
//!
//! Implements the read/write surface this engine needs from the wager
//! ledger:
//! - object-state reads (registry snapshots, dynamic sub-objects)
//! - paginated, filterable event-log queries
//! - signed submit-and-await-result transaction execution
//! - capability ownership checks for the automation signer

pub mod rpc;
pub mod types;

pub use rpc::*;
pub use types::*;
