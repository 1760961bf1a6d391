//! Paging through console logs.
//!
//! The remote API only serves the whole console text, so the paginator
//! fetches it, keeps it for a moment, and cuts line windows out of it.
//! Text fetched after the build finished never changes and stays cached
//! until evicted; text of a running build is reused only within a short TTL.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cibridge_gateway::CiGateway;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{BridgeError, LogWindow, Result};
use crate::metrics::{Counter, METRICS};
use crate::obs;

pub const DEFAULT_LOG_CACHE_TTL: Duration = Duration::from_millis(2000);
pub const DEFAULT_LOG_CACHE_CAPACITY: usize = 16;

type LogKey = (String, u64);

#[derive(Debug, Clone)]
struct CachedLog {
    text: Arc<str>,
    finished: bool,
    fetched_at: Instant,
}

#[derive(Debug, Default)]
struct LogCache {
    entries: HashMap<LogKey, CachedLog>,
    order: VecDeque<LogKey>,
}

impl LogCache {
    fn fresh(&self, key: &LogKey, ttl: Duration) -> Option<CachedLog> {
        let entry = self.entries.get(key)?;
        if entry.finished || entry.fetched_at.elapsed() < ttl {
            Some(entry.clone())
        } else {
            None
        }
    }

    fn insert(&mut self, key: LogKey, entry: CachedLog, capacity: usize) {
        if self.entries.insert(key.clone(), entry).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn remove(&mut self, key: &LogKey) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }
}

/// Line-window reads over build console output.
pub struct LogPaginator {
    gateway: Arc<dyn CiGateway>,
    cache: Mutex<LogCache>,
    ttl: Duration,
    capacity: usize,
}

impl LogPaginator {
    pub fn new(gateway: Arc<dyn CiGateway>) -> Self {
        Self::with_cache(gateway, DEFAULT_LOG_CACHE_TTL, DEFAULT_LOG_CACHE_CAPACITY)
    }

    pub fn with_cache(gateway: Arc<dyn CiGateway>, ttl: Duration, capacity: usize) -> Self {
        Self {
            gateway,
            cache: Mutex::new(LogCache::default()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    fn cache(&self) -> MutexGuard<'_, LogCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read up to `max_lines` lines after skipping `start_line` lines from
    /// the head, or from the tail when `from_end` is set.
    pub async fn read(
        &self,
        job_name: &str,
        build_number: u64,
        start_line: usize,
        max_lines: usize,
        from_end: bool,
    ) -> Result<LogWindow> {
        if max_lines == 0 {
            return Err(BridgeError::InvalidArgument(
                "max_lines must be greater than zero".to_string(),
            ));
        }

        let log = self.console(job_name, build_number).await?;
        let window = LogWindow::slice(&log.text, start_line, max_lines, from_end, log.finished);

        obs::emit_log_window_served(
            job_name,
            build_number,
            window.start_line,
            window.lines.len(),
            window.is_complete,
        );
        Ok(window)
    }

    async fn console(&self, job_name: &str, build_number: u64) -> Result<CachedLog> {
        let key = (job_name.to_string(), build_number);
        if let Some(hit) = self.cache().fresh(&key, self.ttl) {
            METRICS.incr(Counter::LogCacheHits);
            return Ok(hit);
        }
        METRICS.incr(Counter::LogCacheMisses);

        // State first: a build seen finished here has final console text.
        let info = self.gateway.get_build(job_name, build_number).await?;
        let text = self.gateway.get_console_text(job_name, build_number).await?;
        let entry = CachedLog {
            text: Arc::from(text),
            finished: info.is_finished(),
            fetched_at: Instant::now(),
        };
        debug!(
            job = %job_name,
            build_number,
            bytes = entry.text.len(),
            finished = entry.finished,
            "console text fetched"
        );

        self.cache().insert(key, entry.clone(), self.capacity);
        Ok(entry)
    }

    /// Drop the cached text of one build.
    pub fn invalidate(&self, job_name: &str, build_number: u64) {
        self.cache().remove(&(job_name.to_string(), build_number));
    }

    pub fn cached_builds(&self) -> usize {
        self.cache().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(finished: bool) -> CachedLog {
        CachedLog {
            text: Arc::from("a\nb\n"),
            finished,
            fetched_at: Instant::now(),
        }
    }

    #[test]
    fn test_cache_evicts_oldest() {
        let mut cache = LogCache::default();
        for n in 1..=4 {
            cache.insert(("job".to_string(), n), entry(true), 3);
        }
        assert_eq!(cache.entries.len(), 3);
        assert!(!cache.entries.contains_key(&("job".to_string(), 1)));
        assert!(cache.entries.contains_key(&("job".to_string(), 4)));
    }

    #[test]
    fn test_reinsert_does_not_duplicate_order() {
        let mut cache = LogCache::default();
        let key = ("job".to_string(), 1);
        cache.insert(key.clone(), entry(false), 2);
        cache.insert(key.clone(), entry(true), 2);
        assert_eq!(cache.order.len(), 1);
        cache.remove(&key);
        assert!(cache.order.is_empty());
        assert!(cache.entries.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_entry_expires() {
        let mut cache = LogCache::default();
        let key = ("job".to_string(), 1);
        cache.insert(key.clone(), entry(false), 2);
        let ttl = Duration::from_secs(2);
        assert!(cache.fresh(&key, ttl).is_some());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(cache.fresh(&key, ttl).is_none());
    }
}
