//! cibridge-gateway: typed access to the Jenkins remote API
//!
//! This crate is the leaf of the cibridge workspace. It defines the
//! [`CiGateway`] trait the core depends on, the HTTP implementation
//! ([`JenkinsClient`]) and a scripted in-memory double
//! ([`fakes::MemoryGateway`]).
//!
//! Every call is treated as unreliable I/O: errors are classified into
//! not-found, transient and rejected so callers can decide whether a retry
//! makes sense.

mod config;
mod error;
pub mod fakes;
mod gateway;
mod jenkins;
mod types;

pub use config::{JenkinsConfig, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::GatewayError;
pub use gateway::{CiGateway, GatewayResult};
pub use jenkins::{parse_queue_location, JenkinsClient};
pub use types::{
    ArtifactInfo, ArtifactPayload, BuildInfo, BuildParameters, BuildResult, JobInfo,
    ParameterDefinition, QueueItemState,
};
