//! The `CiBridge` facade: one object per process that owns the ledger and
//! the components talking to the CI server.

use std::sync::Arc;

use cibridge_gateway::{ArtifactInfo, BuildInfo, BuildParameters, CiGateway, ParameterDefinition};
use tracing::info;

use crate::artifacts::{ArtifactAccessor, ArtifactContent};
use crate::config::BridgeConfig;
use crate::domain::{LogWindow, Result, TriggerId, TriggerRecord};
use crate::ledger::{SyncOptions, SyncReport, TriggerLedger};
use crate::log_pager::LogPaginator;
use crate::resolver::{QueueResolver, ResolveOptions};

pub struct CiBridge {
    gateway: Arc<dyn CiGateway>,
    ledger: Arc<TriggerLedger>,
    resolver: QueueResolver,
    logs: LogPaginator,
    artifacts: ArtifactAccessor,
    resolve: ResolveOptions,
    sync: SyncOptions,
}

impl CiBridge {
    /// Assemble a bridge around an already opened ledger.
    pub fn new(
        gateway: Arc<dyn CiGateway>,
        ledger: Arc<TriggerLedger>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            resolver: QueueResolver::new(gateway.clone(), ledger.clone()),
            logs: LogPaginator::with_cache(
                gateway.clone(),
                config.log_cache_ttl,
                config.log_cache_capacity,
            ),
            artifacts: ArtifactAccessor::new(gateway.clone()),
            resolve: config.resolve,
            sync: config.sync.clone(),
            gateway,
            ledger,
        }
    }

    /// Open the ledger file named in `config` and assemble a bridge.
    pub fn open(gateway: Arc<dyn CiGateway>, config: &BridgeConfig) -> Result<Self> {
        let ledger = Arc::new(TriggerLedger::open_file(&config.store_path)?);
        Ok(Self::new(gateway, ledger, config))
    }

    pub fn ledger(&self) -> &Arc<TriggerLedger> {
        &self.ledger
    }

    /// Polling schedule used by [`CiBridge::trigger`].
    pub fn resolve_options(&self) -> ResolveOptions {
        self.resolve
    }

    pub async fn trigger(
        &self,
        job_name: &str,
        parameters: BuildParameters,
    ) -> Result<TriggerRecord> {
        self.trigger_with(job_name, parameters, &self.resolve).await
    }

    pub async fn trigger_with(
        &self,
        job_name: &str,
        parameters: BuildParameters,
        options: &ResolveOptions,
    ) -> Result<TriggerRecord> {
        self.resolver
            .submit_and_resolve(job_name, parameters, options)
            .await
    }

    /// Current status of one trigger, refreshed from the server.
    pub async fn status(&self, trigger_id: &TriggerId) -> Result<TriggerRecord> {
        self.ledger.sync(self.gateway.as_ref(), trigger_id).await
    }

    pub async fn status_all(&self) -> SyncReport {
        self.ledger.sync_all(self.gateway.as_ref(), &self.sync).await
    }

    /// Ledger contents as last recorded, without contacting the server.
    pub fn list_triggers(&self) -> Vec<TriggerRecord> {
        self.ledger.list()
    }

    /// State of a build, or of the job's latest build when `build_number`
    /// is `None`. `Ok(None)` means the job has never run.
    pub async fn build_status(
        &self,
        job_name: &str,
        build_number: Option<u64>,
    ) -> Result<Option<BuildInfo>> {
        let number = match build_number {
            Some(n) => n,
            None => match self.gateway.get_job(job_name).await?.last_build {
                Some(n) => n,
                None => return Ok(None),
            },
        };
        Ok(Some(self.gateway.get_build(job_name, number).await?))
    }

    pub async fn job_parameters(&self, job_name: &str) -> Result<Vec<ParameterDefinition>> {
        Ok(self.gateway.get_job(job_name).await?.parameters)
    }

    pub async fn read_log(
        &self,
        job_name: &str,
        build_number: u64,
        start_line: usize,
        max_lines: usize,
        from_end: bool,
    ) -> Result<LogWindow> {
        self.logs
            .read(job_name, build_number, start_line, max_lines, from_end)
            .await
    }

    /// Ask the server to abort a running build.
    pub async fn cancel_build(&self, job_name: &str, build_number: u64) -> Result<()> {
        self.gateway.stop_build(job_name, build_number).await?;
        self.logs.invalidate(job_name, build_number);
        info!(job = %job_name, build_number, "build stop requested");
        Ok(())
    }

    /// Cancel whatever a trigger currently is: the build if one exists,
    /// otherwise its queue item. Returns the re-synced record.
    pub async fn cancel_trigger(&self, trigger_id: &TriggerId) -> Result<TriggerRecord> {
        let record = self.ledger.get(trigger_id)?;
        if record.is_terminal() {
            return Ok(record);
        }

        match (record.build_number, record.queue_item_id) {
            (Some(build_number), _) => self.cancel_build(&record.job_name, build_number).await?,
            (None, Some(queue_item_id)) => {
                self.gateway.cancel_queue_item(queue_item_id).await?;
                info!(trigger_id = %trigger_id, queue_item_id, "queue item cancel requested");
            }
            (None, None) => {}
        }
        self.status(trigger_id).await
    }

    pub async fn list_artifacts(
        &self,
        job_name: &str,
        build_number: u64,
    ) -> Result<Vec<ArtifactInfo>> {
        self.artifacts.list(job_name, build_number).await
    }

    pub async fn fetch_artifact(
        &self,
        job_name: &str,
        build_number: u64,
        artifact_path: &str,
    ) -> Result<ArtifactContent> {
        self.artifacts
            .fetch(job_name, build_number, artifact_path)
            .await
    }
}
