//! Triggered-build records and their status transitions.

use std::fmt;

use chrono::{DateTime, Utc};
use cibridge_gateway::{BuildInfo, BuildParameters, BuildResult, QueueItemState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Locally generated identifier of one trigger action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerId(String);

impl TriggerId {
    /// Generate a new random TriggerId
    pub fn new() -> Self {
        TriggerId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TriggerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for TriggerId {
    fn from(s: String) -> Self {
        TriggerId(s)
    }
}

impl From<&str> for TriggerId {
    fn from(s: &str) -> Self {
        TriggerId(s.to_string())
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last known state of a triggered build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerStatus {
    Queued,
    Running,
    Success,
    Failure,
    Aborted,
    Unknown,
    QueueCancelled,
}

impl TriggerStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TriggerStatus::Success
                | TriggerStatus::Failure
                | TriggerStatus::Aborted
                | TriggerStatus::QueueCancelled
        )
    }

    /// Whether a record in this status carries a build number.
    pub fn has_build(self) -> bool {
        !matches!(self, TriggerStatus::Queued | TriggerStatus::QueueCancelled)
    }

    /// Map a remote build snapshot onto the status enumeration.
    ///
    /// `UNSTABLE` counts as a failure; results the enumeration cannot
    /// express (`NOT_BUILT`, custom results, finished without result)
    /// become `Unknown`.
    pub fn from_build(info: &BuildInfo) -> Self {
        if info.building {
            return TriggerStatus::Running;
        }
        match &info.result {
            Some(BuildResult::Success) => TriggerStatus::Success,
            Some(BuildResult::Failure | BuildResult::Unstable) => TriggerStatus::Failure,
            Some(BuildResult::Aborted) => TriggerStatus::Aborted,
            Some(BuildResult::NotBuilt | BuildResult::Other(_)) | None => TriggerStatus::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerStatus::Queued => "QUEUED",
            TriggerStatus::Running => "RUNNING",
            TriggerStatus::Success => "SUCCESS",
            TriggerStatus::Failure => "FAILURE",
            TriggerStatus::Aborted => "ABORTED",
            TriggerStatus::Unknown => "UNKNOWN",
            TriggerStatus::QueueCancelled => "QUEUE_CANCELLED",
        }
    }
}

impl fmt::Display for TriggerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single look at the CI server revealed about a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The queue item still waits for an executor.
    StillQueued,
    /// The queue item was cancelled before a build started.
    QueueCancelled,
    /// A build number exists but its state was not read.
    BuildAssigned { build_number: u64 },
    /// The build was read.
    BuildState {
        build_number: u64,
        status: TriggerStatus,
    },
}

impl Observation {
    pub fn from_queue(state: QueueItemState) -> Self {
        match state {
            QueueItemState::Waiting => Observation::StillQueued,
            QueueItemState::Cancelled => Observation::QueueCancelled,
            QueueItemState::Assigned { build_number } => {
                Observation::BuildAssigned { build_number }
            }
        }
    }

    pub fn from_build(info: &BuildInfo) -> Self {
        Observation::BuildState {
            build_number: info.number,
            status: TriggerStatus::from_build(info),
        }
    }
}

/// One trigger performed through cibridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub trigger_id: TriggerId,

    /// Hierarchical job path (`folder/job`).
    pub job_name: String,

    pub parameters: BuildParameters,

    /// Queue placement returned by the submit call.
    pub queue_item_id: Option<u64>,

    /// Set exactly once, when the queue item turns into a build.
    pub build_number: Option<u64>,

    pub status: TriggerStatus,

    pub triggered_at: DateTime<Utc>,

    pub last_synced_at: DateTime<Utc>,
}

impl TriggerRecord {
    /// A freshly submitted trigger, waiting in the queue.
    pub fn queued(job_name: &str, parameters: BuildParameters, queue_item_id: u64) -> Self {
        Self::queued_at(job_name, parameters, queue_item_id, Utc::now())
    }

    pub fn queued_at(
        job_name: &str,
        parameters: BuildParameters,
        queue_item_id: u64,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            trigger_id: TriggerId::new(),
            job_name: job_name.to_string(),
            parameters,
            queue_item_id: Some(queue_item_id),
            build_number: None,
            status: TriggerStatus::Queued,
            triggered_at: at,
            last_synced_at: at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply an observation and return the next record.
    ///
    /// Terminal records come back unchanged. A build number, once set, is
    /// never replaced, and a queue cancellation cannot undo an assigned
    /// build. `last_synced_at` moves to `now` for every non-terminal record.
    pub fn observe(&self, observation: Observation, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        if self.is_terminal() {
            return next;
        }
        next.last_synced_at = now;

        match observation {
            Observation::StillQueued => {}
            Observation::QueueCancelled => {
                if self.build_number.is_none() {
                    next.status = TriggerStatus::QueueCancelled;
                }
            }
            Observation::BuildAssigned { build_number } => {
                if self.build_number.is_none() {
                    next.build_number = Some(build_number);
                    next.status = TriggerStatus::Running;
                }
            }
            Observation::BuildState {
                build_number,
                status,
            } => {
                let status = if status.has_build() {
                    status
                } else {
                    TriggerStatus::Unknown
                };
                match self.build_number {
                    None => {
                        next.build_number = Some(build_number);
                        next.status = status;
                    }
                    Some(known) if known == build_number => next.status = status,
                    Some(_) => {}
                }
            }
        }
        next
    }

    /// Check the build-number/status invariant.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match (self.status.has_build(), self.build_number) {
            (true, None) => Err(format!(
                "trigger {} is {} but has no build number",
                self.trigger_id, self.status
            )),
            (false, Some(n)) => Err(format!(
                "trigger {} is {} but has build number {}",
                self.trigger_id, self.status, n
            )),
            _ => Ok(()),
        }
    }
}
