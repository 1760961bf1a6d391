//! Queue placement to build number resolution.
//!
//! A trigger on the CI server only yields a queue item. The build number
//! appears once an executor picks the item up, which can take anywhere from
//! milliseconds to hours. [`QueueResolver`] records the trigger first, then
//! polls for a bounded time; whatever is known at the deadline is what the
//! ledger keeps, and later syncs continue from there.

use std::sync::Arc;
use std::time::Duration;

use cibridge_gateway::{BuildParameters, CiGateway, QueueItemState};
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info, warn, Instrument};

use crate::domain::{BridgeError, Observation, Result, TriggerRecord};
use crate::ledger::{blocking_write, TriggerLedger};
use crate::metrics::{Counter, METRICS};
use crate::obs;

pub const DEFAULT_TRIGGER_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_POLL_INTERVAL: Duration = Duration::from_millis(5000);
/// Upper bound for the timeout and both poll intervals.
pub const MAX_TRIGGER_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
/// Recent builds inspected when a queue item is no longer known.
pub const QUEUE_FALLBACK_SCAN: usize = 25;

/// Polling schedule for one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Hard deadline for submitting and resolving, measured from the call.
    pub timeout: Duration,

    /// Delay after the first empty poll.
    pub poll_interval: Duration,

    /// Upper bound for the doubling delay.
    pub max_poll_interval: Duration,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TRIGGER_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_interval: DEFAULT_MAX_POLL_INTERVAL,
        }
    }
}

impl ResolveOptions {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(BridgeError::InvalidArgument(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        for (name, value) in [
            ("timeout", self.timeout),
            ("poll interval", self.poll_interval),
            ("max poll interval", self.max_poll_interval),
        ] {
            if value > MAX_TRIGGER_TIMEOUT {
                return Err(BridgeError::InvalidArgument(format!(
                    "{name} of {}s exceeds the limit of {}s",
                    value.as_secs(),
                    MAX_TRIGGER_TIMEOUT.as_secs()
                )));
            }
        }
        Ok(())
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay
            .saturating_mul(2)
            .min(self.max_poll_interval.max(self.poll_interval))
    }
}

/// Look at a queue item once.
///
/// When the item already has a build, the build is read as well; if that
/// read fails the assignment alone is reported.
pub async fn probe_queue(
    gateway: &dyn CiGateway,
    job_name: &str,
    queue_item_id: u64,
) -> Result<Observation> {
    match gateway.get_queue_item(queue_item_id).await? {
        QueueItemState::Assigned { build_number } => {
            Ok(observe_started_build(gateway, job_name, build_number).await)
        }
        state => Ok(Observation::from_queue(state)),
    }
}

/// Read the state of a known build.
pub async fn observe_build(
    gateway: &dyn CiGateway,
    job_name: &str,
    build_number: u64,
) -> Result<Observation> {
    let info = gateway.get_build(job_name, build_number).await?;
    Ok(Observation::from_build(&info))
}

/// Find the build started from `queue_item_id` among the job's recent builds.
///
/// Jenkins forgets queue items a few minutes after they leave the queue;
/// from then on only the build's own queue id links it to the trigger.
pub async fn find_build_for_queue_item(
    gateway: &dyn CiGateway,
    job_name: &str,
    queue_item_id: u64,
) -> Result<Option<Observation>> {
    let job = gateway.get_job(job_name).await?;
    for build_number in job.recent_builds.into_iter().take(QUEUE_FALLBACK_SCAN) {
        let info = match gateway.get_build(job_name, build_number).await {
            Ok(info) => info,
            Err(err) if err.is_not_found() => continue,
            Err(err) => return Err(err.into()),
        };
        if info.queue_id == Some(queue_item_id) {
            debug!(job = %job_name, queue_item_id, build_number, "queue item found by build scan");
            return Ok(Some(Observation::from_build(&info)));
        }
    }
    Ok(None)
}

async fn observe_started_build(
    gateway: &dyn CiGateway,
    job_name: &str,
    build_number: u64,
) -> Observation {
    match observe_build(gateway, job_name, build_number).await {
        Ok(observation) => observation,
        Err(err) => {
            debug!(
                job = %job_name,
                build_number,
                error = %err,
                "build assigned but not readable yet"
            );
            Observation::BuildAssigned { build_number }
        }
    }
}

/// Submits builds and follows their queue items.
#[derive(Clone)]
pub struct QueueResolver {
    gateway: Arc<dyn CiGateway>,
    ledger: Arc<TriggerLedger>,
}

impl QueueResolver {
    pub fn new(gateway: Arc<dyn CiGateway>, ledger: Arc<TriggerLedger>) -> Self {
        Self { gateway, ledger }
    }

    /// Trigger `job_name` and wait a bounded time for its build number.
    ///
    /// A failed submit writes nothing. Once the server has accepted the
    /// build, a QUEUED record exists in the ledger before any polling, so
    /// dropping this future still leaves a record that later syncs resolve.
    pub async fn submit_and_resolve(
        &self,
        job_name: &str,
        parameters: BuildParameters,
        options: &ResolveOptions,
    ) -> Result<TriggerRecord> {
        if job_name.trim().is_empty() {
            return Err(BridgeError::InvalidArgument(
                "job name must not be empty".to_string(),
            ));
        }
        options.validate()?;
        let deadline = Instant::now().checked_add(options.timeout).ok_or_else(|| {
            BridgeError::InvalidArgument(format!("timeout {:?} is too large", options.timeout))
        })?;

        let queue_item_id = timeout_at(deadline, self.gateway.submit_build(job_name, &parameters))
            .await
            .map_err(|_| {
                BridgeError::Transient(format!(
                    "submitting '{job_name}' did not finish within {:?}",
                    options.timeout
                ))
            })??;

        let queued = TriggerRecord::queued(job_name, parameters, queue_item_id);
        let record = blocking_write(|| self.ledger.create(queued))?;
        METRICS.incr(Counter::TriggersSubmitted);
        obs::emit_trigger_submitted(record.trigger_id.as_str(), job_name, queue_item_id);

        let span = obs::trigger_span(record.trigger_id.as_str(), job_name);
        let record = self
            .poll_until_resolved(record, queue_item_id, deadline, options)
            .instrument(span)
            .await?;

        obs::emit_trigger_resolved(
            record.trigger_id.as_str(),
            record.status.as_str(),
            record.build_number,
        );
        Ok(record)
    }

    async fn poll_until_resolved(
        &self,
        record: TriggerRecord,
        queue_item_id: u64,
        deadline: Instant,
        options: &ResolveOptions,
    ) -> Result<TriggerRecord> {
        let gateway = self.gateway.as_ref();
        let mut delay = options.poll_interval;
        let mut polls = 0u32;

        loop {
            polls += 1;
            match timeout_at(deadline, probe_queue(gateway, &record.job_name, queue_item_id)).await
            {
                Ok(Ok(Observation::StillQueued)) => {}
                Ok(Ok(observation)) => {
                    debug!(polls, ?observation, "queue item resolved");
                    return blocking_write(|| {
                        self.ledger.record_observation(&record.trigger_id, observation)
                    });
                }
                Ok(Err(err)) if err.is_transient() => {
                    warn!(polls, error = %err, "transient failure polling queue item");
                }
                Ok(Err(err)) => {
                    warn!(
                        polls,
                        error = %err,
                        "queue polling stopped, trigger stays queued"
                    );
                    return Ok(record);
                }
                Err(_) => break,
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wake = now.checked_add(delay).map_or(deadline, |at| at.min(deadline));
            sleep_until(wake).await;
            delay = options.next_delay(delay);
        }

        info!(
            polls,
            queue_item_id, "queue item not resolved before deadline, trigger stays queued"
        );
        blocking_write(|| {
            self.ledger
                .record_observation(&record.trigger_id, Observation::StillQueued)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let options = ResolveOptions {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            max_poll_interval: Duration::from_millis(3000),
        };
        let mut delay = options.poll_interval;
        let mut seen = Vec::new();
        for _ in 0..5 {
            delay = options.next_delay(delay);
            seen.push(delay.as_millis());
        }
        assert_eq!(seen, vec![1000, 2000, 3000, 3000, 3000]);
    }

    #[test]
    fn test_cap_below_interval_keeps_interval() {
        let options = ResolveOptions {
            timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(800),
            max_poll_interval: Duration::from_millis(100),
        };
        assert_eq!(
            options.next_delay(options.poll_interval),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let options = ResolveOptions {
            poll_interval: Duration::ZERO,
            ..ResolveOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(BridgeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_limits_are_enforced() {
        let day = MAX_TRIGGER_TIMEOUT;
        let ok = ResolveOptions {
            timeout: day,
            poll_interval: Duration::from_secs(1),
            max_poll_interval: day,
        };
        assert!(ok.validate().is_ok());

        let too_long = ResolveOptions {
            timeout: Duration::from_secs(u64::MAX),
            ..ResolveOptions::default()
        };
        let err = too_long.validate().unwrap_err();
        assert!(err.to_string().contains("timeout"));

        let huge_poll = ResolveOptions {
            poll_interval: day + Duration::from_secs(1),
            ..ResolveOptions::default()
        };
        assert!(huge_poll.validate().is_err());
    }

    #[test]
    fn test_next_delay_saturates() {
        let options = ResolveOptions {
            timeout: Duration::from_secs(1),
            poll_interval: Duration::MAX,
            max_poll_interval: Duration::MAX,
        };
        assert_eq!(options.next_delay(Duration::MAX), Duration::MAX);
    }
}
