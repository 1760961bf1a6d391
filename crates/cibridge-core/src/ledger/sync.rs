//! Refreshing ledger entries from the CI server.

use std::time::Duration;

use cibridge_gateway::CiGateway;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, warn, Instrument};

use super::{blocking_write, TriggerLedger};
use crate::domain::{BridgeError, Result, TriggerId, TriggerRecord};
use crate::metrics::{Counter, METRICS};
use crate::obs;
use crate::resolver::{find_build_for_queue_item, observe_build, probe_queue};

/// Knobs for [`TriggerLedger::sync_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Entries synced at the same time.
    pub concurrency: usize,

    /// Tries per entry, counting the first. Only transient errors are retried.
    pub attempts: u32,

    pub retry_delay: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            attempts: 2,
            retry_delay: Duration::from_millis(250),
        }
    }
}

/// An entry [`TriggerLedger::sync_all`] could not refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub trigger_id: TriggerId,
    pub message: String,
    pub transient: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Every record, oldest first. Failed entries keep their last-known state.
    pub records: Vec<TriggerRecord>,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl TriggerLedger {
    /// Refresh one record from the CI server.
    ///
    /// Terminal records are returned without contacting the server. Errors
    /// from the server propagate and leave the record as it was.
    pub async fn sync(
        &self,
        gateway: &dyn CiGateway,
        trigger_id: &TriggerId,
    ) -> Result<TriggerRecord> {
        let record = self.get(trigger_id)?;
        if record.is_terminal() {
            return Ok(record);
        }

        let span = obs::trigger_span(trigger_id.as_str(), &record.job_name);
        async {
            let observation = match (record.build_number, record.queue_item_id) {
                (Some(build_number), _) => {
                    observe_build(gateway, &record.job_name, build_number).await?
                }
                (None, Some(queue_item_id)) => {
                    match probe_queue(gateway, &record.job_name, queue_item_id).await {
                        Err(err) if err.is_not_found() => {
                            let found = find_build_for_queue_item(
                                gateway,
                                &record.job_name,
                                queue_item_id,
                            )
                            .await?;
                            match found {
                                Some(observation) => observation,
                                None => return Err(err),
                            }
                        }
                        other => other?,
                    }
                }
                (None, None) => {
                    return Err(BridgeError::NotFound(format!(
                        "trigger {trigger_id} has neither a build nor a queue item"
                    )))
                }
            };
            debug!(?observation, "observed");

            let updated =
                blocking_write(|| self.record_observation(trigger_id, observation))?;
            METRICS.incr(Counter::Syncs);
            obs::emit_trigger_synced(
                trigger_id.as_str(),
                updated.status.as_str(),
                updated.build_number,
            );
            Ok(updated)
        }
        .instrument(span)
        .await
    }

    /// Refresh every non-terminal record.
    ///
    /// One unreachable entry never hides the others: its failure is
    /// reported and its last-known record kept.
    pub async fn sync_all(&self, gateway: &dyn CiGateway, options: &SyncOptions) -> SyncReport {
        let pending: Vec<TriggerId> = self
            .list()
            .into_iter()
            .filter(|r| !r.is_terminal())
            .map(|r| r.trigger_id)
            .collect();
        debug!(pending = pending.len(), "syncing triggers");

        let failures: Vec<SyncFailure> = stream::iter(pending)
            .map(|trigger_id| async move {
                self.sync_with_retry(gateway, &trigger_id, options)
                    .await
                    .err()
                    .map(|err| SyncFailure {
                        trigger_id,
                        transient: err.is_transient(),
                        message: err.to_string(),
                    })
            })
            .buffered(options.concurrency.max(1))
            .filter_map(|failure| async move { failure })
            .collect()
            .await;

        SyncReport {
            records: self.list(),
            failures,
        }
    }

    async fn sync_with_retry(
        &self,
        gateway: &dyn CiGateway,
        trigger_id: &TriggerId,
        options: &SyncOptions,
    ) -> Result<TriggerRecord> {
        let attempts = options.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.sync(gateway, trigger_id).await {
                Ok(record) => return Ok(record),
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!(
                        trigger_id = %trigger_id,
                        attempt,
                        error = %err,
                        "transient sync failure, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(options.retry_delay).await;
                }
                Err(err) => {
                    METRICS.incr(Counter::SyncFailures);
                    obs::emit_trigger_sync_failed(trigger_id.as_str(), &err);
                    return Err(err);
                }
            }
        }
    }
}
