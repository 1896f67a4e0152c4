//! SquadBot Library
//!
//! Off-chain automation engine that matches squad wagers and settles
//! them once their window expires.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod oracle;
pub mod registry;
pub mod scheduler;
pub mod types;
