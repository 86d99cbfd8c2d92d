//! Ticket Miner
//!
//! A mining session coordinator:
//! - start proof-of-work searches over a fixed 88-byte puzzle header
//! - pause a search and persist it, resume it later from the state file
//! - query live progress without blocking on the search
//! - submit solved tickets to a ledger node over JSON-RPC

pub mod codec;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod persistence;
pub mod registry;
pub mod server;
pub mod target;
pub mod types;
pub mod utils;

pub use config::Config;
pub use coordinator::{BroadcastPolicy, SessionCoordinator, StartRequest};
pub use error::{Error, ErrorKind, Result};
pub use target::Target;
pub use types::*;

/// Application information
pub const APP_NAME: &str = "ticket-miner";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
