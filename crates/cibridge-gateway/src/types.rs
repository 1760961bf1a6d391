//! Data returned by the CI server, independent of the wire format.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Build parameters as submitted to the server.
///
/// Ordered so that form encoding and persisted records are deterministic.
pub type BuildParameters = BTreeMap<String, String>;

/// Where a queue item stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QueueItemState {
    /// No executor assigned yet.
    Waiting,
    /// An executor picked the item up and a build number exists.
    Assigned { build_number: u64 },
    /// The item was cancelled or discarded before a build started.
    Cancelled,
}

/// Final outcome reported by the server for a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BuildResult {
    Success,
    Failure,
    Unstable,
    Aborted,
    NotBuilt,
    Other(String),
}

impl BuildResult {
    pub fn as_str(&self) -> &str {
        match self {
            BuildResult::Success => "SUCCESS",
            BuildResult::Failure => "FAILURE",
            BuildResult::Unstable => "UNSTABLE",
            BuildResult::Aborted => "ABORTED",
            BuildResult::NotBuilt => "NOT_BUILT",
            BuildResult::Other(s) => s,
        }
    }
}

impl From<String> for BuildResult {
    fn from(s: String) -> Self {
        match s.as_str() {
            "SUCCESS" => BuildResult::Success,
            "FAILURE" => BuildResult::Failure,
            "UNSTABLE" => BuildResult::Unstable,
            "ABORTED" => BuildResult::Aborted,
            "NOT_BUILT" => BuildResult::NotBuilt,
            _ => BuildResult::Other(s),
        }
    }
}

impl From<BuildResult> for String {
    fn from(result: BuildResult) -> Self {
        result.as_str().to_string()
    }
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a single build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    /// Build number within its job.
    pub number: u64,

    /// Outcome, `None` while the build is still running.
    pub result: Option<BuildResult>,

    /// Whether an executor is still working on the build.
    pub building: bool,

    /// Start time in milliseconds since the Unix epoch.
    pub started_at_ms: Option<i64>,

    /// Duration in milliseconds (0 while building).
    pub duration_ms: u64,

    /// Server's estimate of the total duration.
    pub estimated_duration_ms: Option<u64>,

    pub display_name: String,

    pub url: String,

    /// Queue item the build was started from, when the server reports it.
    pub queue_id: Option<u64>,
}

impl BuildInfo {
    /// A build is finished once it stopped building and has a result.
    pub fn is_finished(&self) -> bool {
        !self.building && self.result.is_some()
    }
}

/// A parameter a job accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,

    /// Parameter class as reported by the server (e.g. `StringParameterDefinition`).
    #[serde(rename = "type")]
    pub kind: String,

    pub description: String,

    pub default_value: Option<serde_json::Value>,

    /// Allowed values for choice parameters.
    pub choices: Option<Vec<String>>,
}

/// Job-level information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub name: String,

    /// Number of the most recent build, if any build exists.
    pub last_build: Option<u64>,

    /// Numbers of the builds the server still lists, newest first.
    pub recent_builds: Vec<u64>,

    pub parameters: Vec<ParameterDefinition>,
}

/// An archived file of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    /// Path relative to the build's artifact root.
    pub path: String,

    /// Size in bytes when the server reports it.
    pub size: Option<u64>,
}

/// Raw artifact content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPayload {
    pub bytes: Vec<u8>,

    /// `Content-Type` as sent by the server.
    pub content_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_result_round_trips_known_and_unknown_values() {
        for raw in ["SUCCESS", "FAILURE", "UNSTABLE", "ABORTED", "NOT_BUILT", "CUSTOM"] {
            let parsed = BuildResult::from(raw.to_string());
            assert_eq!(parsed.as_str(), raw);
        }
        assert_eq!(
            BuildResult::from("CUSTOM".to_string()),
            BuildResult::Other("CUSTOM".to_string())
        );
    }

    #[test]
    fn test_build_result_serializes_as_plain_string() {
        let json = serde_json::to_string(&BuildResult::Aborted).unwrap();
        assert_eq!(json, "\"ABORTED\"");
    }

    #[test]
    fn test_build_info_finished() {
        let mut info = BuildInfo {
            number: 3,
            result: None,
            building: true,
            started_at_ms: Some(1_700_000_000_000),
            duration_ms: 0,
            estimated_duration_ms: Some(60_000),
            display_name: "#3".to_string(),
            url: String::new(),
            queue_id: Some(12),
        };
        assert!(!info.is_finished());

        info.building = false;
        info.result = Some(BuildResult::Success);
        assert!(info.is_finished());
    }

    #[test]
    fn test_queue_state_serialization_is_tagged() {
        let json = serde_json::to_value(QueueItemState::Assigned { build_number: 17 }).unwrap();
        assert_eq!(json["state"], "assigned");
        assert_eq!(json["build_number"], 17);
    }
}
