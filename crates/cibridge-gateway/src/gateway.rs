//! The remote RPC surface consumed by cibridge.
//!
//! Every call is a bounded network request that may fail transiently.
//! `JenkinsClient` talks HTTP; `fakes::MemoryGateway` is the scripted
//! in-memory double used by tests.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::types::{
    ArtifactInfo, ArtifactPayload, BuildInfo, BuildParameters, JobInfo, QueueItemState,
};

/// Result type for gateway calls
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Typed calls onto the CI server.
#[async_trait]
pub trait CiGateway: Send + Sync {
    /// Queue a build of `job_name`. Returns the queue item id.
    ///
    /// Fails with `GatewayError::NotFound` if the job does not exist.
    async fn submit_build(
        &self,
        job_name: &str,
        parameters: &BuildParameters,
    ) -> GatewayResult<u64>;

    /// Read the current state of a queue item.
    async fn get_queue_item(&self, queue_item_id: u64) -> GatewayResult<QueueItemState>;

    /// Remove a queue item before it starts.
    async fn cancel_queue_item(&self, queue_item_id: u64) -> GatewayResult<()>;

    /// Job metadata: latest build and parameter definitions.
    async fn get_job(&self, job_name: &str) -> GatewayResult<JobInfo>;

    /// State of a single build.
    async fn get_build(&self, job_name: &str, build_number: u64) -> GatewayResult<BuildInfo>;

    /// Full console text of a build as currently available.
    async fn get_console_text(&self, job_name: &str, build_number: u64) -> GatewayResult<String>;

    /// Archived files of a build, in server order.
    async fn list_artifacts(
        &self,
        job_name: &str,
        build_number: u64,
    ) -> GatewayResult<Vec<ArtifactInfo>>;

    /// Paths of the archived files, without sizes.
    async fn list_artifact_paths(
        &self,
        job_name: &str,
        build_number: u64,
    ) -> GatewayResult<Vec<String>> {
        let artifacts = self.list_artifacts(job_name, build_number).await?;
        Ok(artifacts.into_iter().map(|a| a.path).collect())
    }

    /// Raw content of one archived file.
    async fn get_artifact(
        &self,
        job_name: &str,
        build_number: u64,
        path: &str,
    ) -> GatewayResult<ArtifactPayload>;

    /// Ask the server to abort a running build.
    async fn stop_build(&self, job_name: &str, build_number: u64) -> GatewayResult<()>;
}
