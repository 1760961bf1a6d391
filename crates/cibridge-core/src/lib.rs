//! cibridge core library
//!
//! Trigger builds on a Jenkins server and keep track of them on behalf of
//! tool-calling agents:
//!
//! - [`QueueResolver`] submits a build and follows its queue item to a
//!   build number within a bounded time
//! - [`TriggerLedger`] durably records every trigger and refreshes it from
//!   the server on demand
//! - [`LogPaginator`] serves line windows over growing console logs
//! - [`ArtifactAccessor`] lists and downloads archived files
//! - [`CiBridge`] wires all of the above around one gateway

pub mod artifacts;
pub mod bridge;
pub mod config;
pub mod domain;
pub mod ledger;
pub mod log_pager;
pub mod metrics;
pub mod obs;
pub mod resolver;
pub mod telemetry;

pub use artifacts::{guess_content_type, ArtifactAccessor, ArtifactContent};
pub use bridge::CiBridge;
pub use config::{default_store_path, BridgeConfig};
pub use domain::{
    parameters_from_json, parse_parameter_pair, BridgeError, LogWindow, Observation, Result,
    TriggerId, TriggerRecord, TriggerStatus,
};
pub use ledger::{
    JsonFileStore, LedgerStore, MemoryStore, SyncFailure, SyncOptions, SyncReport, TriggerLedger,
};
pub use log_pager::LogPaginator;
pub use resolver::{find_build_for_queue_item, probe_queue, QueueResolver, ResolveOptions};

pub use telemetry::init_tracing;

/// Version of the cibridge crates.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
