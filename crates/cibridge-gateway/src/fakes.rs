//! In-memory fake CI server (testing only)
//!
//! `MemoryGateway` satisfies the [`CiGateway`] contract without any network.
//! Tests script it: register jobs, decide after how many polls a queue item
//! gets a build, complete builds, append console output, archive files and
//! make individual builds unreachable.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::gateway::{CiGateway, GatewayResult};
use crate::types::{
    ArtifactInfo, ArtifactPayload, BuildInfo, BuildParameters, BuildResult, JobInfo,
    ParameterDefinition, QueueItemState,
};

#[derive(Debug, Clone)]
struct FakeBuild {
    result: Option<BuildResult>,
    building: bool,
    console: String,
    artifacts: BTreeMap<String, Vec<u8>>,
    parameters: BuildParameters,
    queue_id: Option<u64>,
}

#[derive(Debug)]
struct FakeJob {
    next_build: u64,
    /// Queue polls answered with `Waiting` before a build is assigned.
    /// `None` keeps items queued until the test assigns them.
    assign_after_polls: Option<u32>,
    parameters: Vec<ParameterDefinition>,
    builds: BTreeMap<u64, FakeBuild>,
}

#[derive(Debug)]
struct QueueEntry {
    job_name: String,
    parameters: BuildParameters,
    polls: u32,
    state: QueueItemState,
}

#[derive(Debug, Default)]
struct GatewayState {
    jobs: HashMap<String, FakeJob>,
    queue: HashMap<u64, QueueEntry>,
    next_queue_id: u64,
    unreachable_builds: HashSet<(String, u64)>,
    unreachable: bool,
}

impl GatewayState {
    fn job(&self, job_name: &str) -> GatewayResult<&FakeJob> {
        self.jobs
            .get(job_name)
            .ok_or_else(|| GatewayError::NotFound(format!("job '{job_name}'")))
    }

    fn job_mut(&mut self, job_name: &str) -> GatewayResult<&mut FakeJob> {
        self.jobs
            .get_mut(job_name)
            .ok_or_else(|| GatewayError::NotFound(format!("job '{job_name}'")))
    }

    fn build(&self, job_name: &str, build_number: u64) -> GatewayResult<&FakeBuild> {
        self.job(job_name)?.builds.get(&build_number).ok_or_else(|| {
            GatewayError::NotFound(format!("build #{build_number} of job '{job_name}'"))
        })
    }

    fn build_mut(&mut self, job_name: &str, build_number: u64) -> GatewayResult<&mut FakeBuild> {
        self.job_mut(job_name)?
            .builds
            .get_mut(&build_number)
            .ok_or_else(|| {
                GatewayError::NotFound(format!("build #{build_number} of job '{job_name}'"))
            })
    }

    fn check_reachable(&self, job_name: &str, build_number: u64) -> GatewayResult<()> {
        if self.unreachable
            || self
                .unreachable_builds
                .contains(&(job_name.to_string(), build_number))
        {
            return Err(GatewayError::Transient(format!(
                "connection reset while reading build #{build_number} of job '{job_name}'"
            )));
        }
        Ok(())
    }

    fn start_build(&mut self, queue_item_id: u64) -> GatewayResult<u64> {
        let entry = self
            .queue
            .get(&queue_item_id)
            .ok_or_else(|| GatewayError::NotFound(format!("queue item {queue_item_id}")))?;
        if entry.state != QueueItemState::Waiting {
            return Err(GatewayError::Rejected {
                status: 409,
                message: format!("queue item {queue_item_id} already left the queue"),
            });
        }
        let job_name = entry.job_name.clone();
        let parameters = entry.parameters.clone();

        let job = self.job_mut(&job_name)?;
        let number = job.next_build;
        job.next_build += 1;
        job.builds.insert(
            number,
            FakeBuild {
                result: None,
                building: true,
                console: String::new(),
                artifacts: BTreeMap::new(),
                parameters,
                queue_id: Some(queue_item_id),
            },
        );

        if let Some(entry) = self.queue.get_mut(&queue_item_id) {
            entry.state = QueueItemState::Assigned {
                build_number: number,
            };
        }
        Ok(number)
    }
}

/// Scripted in-memory CI server.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<GatewayState>,
    queue_polls: AtomicUsize,
    build_queries: AtomicUsize,
    console_fetches: AtomicUsize,
    sized_listings: AtomicUsize,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GatewayState {
                next_queue_id: 1,
                ..GatewayState::default()
            }),
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a job whose queue items get a build on the first poll.
    pub fn add_job(&self, job_name: &str) {
        self.add_job_with(job_name, Some(0), Vec::new());
    }

    /// Register a job with explicit queue behaviour and parameter definitions.
    pub fn add_job_with(
        &self,
        job_name: &str,
        assign_after_polls: Option<u32>,
        parameters: Vec<ParameterDefinition>,
    ) {
        self.lock().jobs.insert(
            job_name.to_string(),
            FakeJob {
                next_build: 1,
                assign_after_polls,
                parameters,
                builds: BTreeMap::new(),
            },
        );
    }

    /// Make the next build of `job_name` get `number`.
    pub fn set_next_build_number(&self, job_name: &str, number: u64) {
        if let Some(job) = self.lock().jobs.get_mut(job_name) {
            job.next_build = number;
        }
    }

    /// Assign a build to a waiting queue item right now.
    pub fn assign_queue_item(&self, queue_item_id: u64) -> GatewayResult<u64> {
        self.lock().start_build(queue_item_id)
    }

    /// Drop a queue item the way the server does some time after it left
    /// the queue. Later queue lookups answer not-found.
    pub fn forget_queue_item(&self, queue_item_id: u64) {
        self.lock().queue.remove(&queue_item_id);
    }

    /// Add a finished or running build that was never queued through the gateway.
    pub fn add_build(&self, job_name: &str, build_number: u64, result: Option<BuildResult>) {
        let mut state = self.lock();
        if let Some(job) = state.jobs.get_mut(job_name) {
            job.builds.insert(
                build_number,
                FakeBuild {
                    building: result.is_none(),
                    result,
                    console: String::new(),
                    artifacts: BTreeMap::new(),
                    parameters: BuildParameters::new(),
                    queue_id: None,
                },
            );
            job.next_build = job.next_build.max(build_number + 1);
        }
    }

    /// Finish a build with `result`.
    pub fn complete_build(&self, job_name: &str, build_number: u64, result: BuildResult) {
        if let Ok(build) = self.lock().build_mut(job_name, build_number) {
            build.building = false;
            build.result = Some(result);
        }
    }

    /// Append text to a build's console output.
    pub fn append_console(&self, job_name: &str, build_number: u64, text: &str) {
        if let Ok(build) = self.lock().build_mut(job_name, build_number) {
            build.console.push_str(text);
        }
    }

    /// Archive a file for a build.
    pub fn add_artifact(&self, job_name: &str, build_number: u64, path: &str, bytes: &[u8]) {
        if let Ok(build) = self.lock().build_mut(job_name, build_number) {
            build.artifacts.insert(path.to_string(), bytes.to_vec());
        }
    }

    /// Make calls about one build fail with a transient error.
    pub fn set_build_unreachable(&self, job_name: &str, build_number: u64, unreachable: bool) {
        let key = (job_name.to_string(), build_number);
        let mut state = self.lock();
        if unreachable {
            state.unreachable_builds.insert(key);
        } else {
            state.unreachable_builds.remove(&key);
        }
    }

    /// Make every call fail with a transient error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Parameters a build was started with.
    pub fn build_parameters(&self, job_name: &str, build_number: u64) -> Option<BuildParameters> {
        self.lock()
            .build(job_name, build_number)
            .ok()
            .map(|b| b.parameters.clone())
    }

    /// Whether a build is still running.
    pub fn is_building(&self, job_name: &str, build_number: u64) -> Option<bool> {
        self.lock()
            .build(job_name, build_number)
            .ok()
            .map(|b| b.building)
    }

    pub fn queue_polls(&self) -> usize {
        self.queue_polls.load(Ordering::SeqCst)
    }

    pub fn build_queries(&self) -> usize {
        self.build_queries.load(Ordering::SeqCst)
    }

    pub fn console_fetches(&self) -> usize {
        self.console_fetches.load(Ordering::SeqCst)
    }

    /// Artifact listings that asked for sizes.
    pub fn sized_listings(&self) -> usize {
        self.sized_listings.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> GatewayResult<()> {
        if self.lock().unreachable {
            return Err(GatewayError::Transient("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CiGateway for MemoryGateway {
    async fn submit_build(
        &self,
        job_name: &str,
        parameters: &BuildParameters,
    ) -> GatewayResult<u64> {
        self.check_online()?;
        let mut state = self.lock();
        state.job(job_name)?;
        let id = state.next_queue_id;
        state.next_queue_id += 1;
        state.queue.insert(
            id,
            QueueEntry {
                job_name: job_name.to_string(),
                parameters: parameters.clone(),
                polls: 0,
                state: QueueItemState::Waiting,
            },
        );
        Ok(id)
    }

    async fn get_queue_item(&self, queue_item_id: u64) -> GatewayResult<QueueItemState> {
        self.queue_polls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let mut state = self.lock();
        let entry = state
            .queue
            .get_mut(&queue_item_id)
            .ok_or_else(|| GatewayError::NotFound(format!("queue item {queue_item_id}")))?;
        if entry.state != QueueItemState::Waiting {
            return Ok(entry.state);
        }

        let polls = entry.polls;
        entry.polls += 1;
        let job_name = entry.job_name.clone();
        let assign_after = state.job(&job_name)?.assign_after_polls;

        match assign_after {
            Some(limit) if polls >= limit => {
                let build_number = state.start_build(queue_item_id)?;
                Ok(QueueItemState::Assigned { build_number })
            }
            _ => Ok(QueueItemState::Waiting),
        }
    }

    async fn cancel_queue_item(&self, queue_item_id: u64) -> GatewayResult<()> {
        self.check_online()?;
        let mut state = self.lock();
        let entry = state
            .queue
            .get_mut(&queue_item_id)
            .ok_or_else(|| GatewayError::NotFound(format!("queue item {queue_item_id}")))?;
        if entry.state == QueueItemState::Waiting {
            entry.state = QueueItemState::Cancelled;
        }
        Ok(())
    }

    async fn get_job(&self, job_name: &str) -> GatewayResult<JobInfo> {
        self.check_online()?;
        let state = self.lock();
        let job = state.job(job_name)?;
        Ok(JobInfo {
            name: job_name.to_string(),
            last_build: job.builds.keys().next_back().copied(),
            recent_builds: job.builds.keys().rev().copied().collect(),
            parameters: job.parameters.clone(),
        })
    }

    async fn get_build(&self, job_name: &str, build_number: u64) -> GatewayResult<BuildInfo> {
        self.build_queries.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();
        state.check_reachable(job_name, build_number)?;
        let build = state.build(job_name, build_number)?;
        Ok(BuildInfo {
            number: build_number,
            result: build.result.clone(),
            building: build.building,
            started_at_ms: None,
            duration_ms: 0,
            estimated_duration_ms: None,
            display_name: format!("#{build_number}"),
            url: format!("memory://{job_name}/{build_number}/"),
            queue_id: build.queue_id,
        })
    }

    async fn get_console_text(&self, job_name: &str, build_number: u64) -> GatewayResult<String> {
        self.console_fetches.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();
        state.check_reachable(job_name, build_number)?;
        Ok(state.build(job_name, build_number)?.console.clone())
    }

    async fn list_artifacts(
        &self,
        job_name: &str,
        build_number: u64,
    ) -> GatewayResult<Vec<ArtifactInfo>> {
        self.sized_listings.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();
        state.check_reachable(job_name, build_number)?;
        Ok(state
            .build(job_name, build_number)?
            .artifacts
            .iter()
            .map(|(path, bytes)| ArtifactInfo {
                path: path.clone(),
                size: Some(bytes.len() as u64),
            })
            .collect())
    }

    async fn list_artifact_paths(
        &self,
        job_name: &str,
        build_number: u64,
    ) -> GatewayResult<Vec<String>> {
        let state = self.lock();
        state.check_reachable(job_name, build_number)?;
        Ok(state
            .build(job_name, build_number)?
            .artifacts
            .keys()
            .cloned()
            .collect())
    }

    async fn get_artifact(
        &self,
        job_name: &str,
        build_number: u64,
        path: &str,
    ) -> GatewayResult<ArtifactPayload> {
        let state = self.lock();
        state.check_reachable(job_name, build_number)?;
        let bytes = state
            .build(job_name, build_number)?
            .artifacts
            .get(path)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("artifact '{path}'")))?;
        Ok(ArtifactPayload {
            bytes,
            content_type: None,
        })
    }

    async fn stop_build(&self, job_name: &str, build_number: u64) -> GatewayResult<()> {
        let mut state = self.lock();
        state.check_reachable(job_name, build_number)?;
        let build = state.build_mut(job_name, build_number)?;
        if build.building {
            build.building = false;
            build.result = Some(BuildResult::Aborted);
        }
        Ok(())
    }
}
