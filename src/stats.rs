//! Per-queue metrics.
//!
//! Counters are updated lock-free; only `last_processed_at` sits behind a
//! lock. [`QueueStats`] is the public snapshot handed out by the queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of a queue's counters.
///
/// Counters increase monotonically for the lifetime of the queue; the
/// snapshot itself is a plain value and can be serialized for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Name of the queue the snapshot belongs to.
    pub queue_name: String,
    /// Jobs whose handler returned success.
    pub jobs_processed: u64,
    /// Handler invocations that returned an error.
    pub jobs_failed: u64,
    /// Failed jobs that were re-armed for another attempt.
    pub jobs_retried: u64,
    /// Jobs that exhausted their retries (dead-lettered or dropped).
    pub jobs_moved_to_dlq: u64,
    /// Total process time divided by processed jobs.
    pub average_process_time: Duration,
    /// When a handler last finished, successfully or not.
    pub last_processed_at: Option<DateTime<Utc>>,
}

/// Live counters behind a queue.
#[derive(Debug, Default)]
pub(crate) struct QueueMetrics {
    jobs_processed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_moved_to_dlq: AtomicU64,
    total_process_nanos: AtomicU64,
    last_processed_at: RwLock<Option<DateTime<Utc>>>,
}

impl QueueMetrics {
    pub fn record_processed(&self, elapsed: Duration) {
        self.jobs_processed.fetch_add(1, Ordering::SeqCst);
        self.record_fire(elapsed);
    }

    pub fn record_failed(&self, elapsed: Duration) {
        self.jobs_failed.fetch_add(1, Ordering::SeqCst);
        self.record_fire(elapsed);
    }

    pub fn record_retried(&self) {
        self.jobs_retried.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_moved_to_dlq(&self) {
        self.jobs_moved_to_dlq.fetch_add(1, Ordering::SeqCst);
    }

    fn record_fire(&self, elapsed: Duration) {
        self.total_process_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::SeqCst);
        *self.last_processed_at.write().unwrap() = Some(Utc::now());
    }

    pub fn snapshot(&self, queue_name: &str) -> QueueStats {
        let jobs_processed = self.jobs_processed.load(Ordering::SeqCst);
        let total_nanos = self.total_process_nanos.load(Ordering::SeqCst);
        let average_process_time = if jobs_processed > 0 {
            Duration::from_nanos(total_nanos / jobs_processed)
        } else {
            Duration::ZERO
        };

        QueueStats {
            queue_name: queue_name.to_string(),
            jobs_processed,
            jobs_failed: self.jobs_failed.load(Ordering::SeqCst),
            jobs_retried: self.jobs_retried.load(Ordering::SeqCst),
            jobs_moved_to_dlq: self.jobs_moved_to_dlq.load(Ordering::SeqCst),
            average_process_time,
            last_processed_at: *self.last_processed_at.read().unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_has_zeroes() {
        let metrics = QueueMetrics::default();
        let stats = metrics.snapshot("q");
        assert_eq!(stats.queue_name, "q");
        assert_eq!(stats.jobs_processed, 0);
        assert_eq!(stats.jobs_failed, 0);
        assert_eq!(stats.average_process_time, Duration::ZERO);
        assert!(stats.last_processed_at.is_none());
    }

    #[test]
    fn average_is_total_over_processed() {
        let metrics = QueueMetrics::default();
        metrics.record_processed(Duration::from_millis(100));
        metrics.record_processed(Duration::from_millis(300));

        let stats = metrics.snapshot("q");
        assert_eq!(stats.jobs_processed, 2);
        assert_eq!(stats.average_process_time, Duration::from_millis(200));
        assert!(stats.last_processed_at.is_some());
    }

    #[test]
    fn failures_count_toward_time_but_not_processed() {
        let metrics = QueueMetrics::default();
        metrics.record_failed(Duration::from_millis(50));
        metrics.record_retried();

        let stats = metrics.snapshot("q");
        assert_eq!(stats.jobs_processed, 0);
        assert_eq!(stats.jobs_failed, 1);
        assert_eq!(stats.jobs_retried, 1);
        // no successful job yet, so no average
        assert_eq!(stats.average_process_time, Duration::ZERO);
    }

    #[test]
    fn counters_are_monotonic() {
        let metrics = QueueMetrics::default();
        metrics.record_processed(Duration::from_millis(10));
        let first = metrics.snapshot("q");
        metrics.record_failed(Duration::from_millis(10));
        metrics.record_moved_to_dlq();
        let second = metrics.snapshot("q");

        assert!(second.jobs_processed >= first.jobs_processed);
        assert!(second.jobs_failed > first.jobs_failed);
        assert_eq!(second.jobs_moved_to_dlq, 1);
    }
}
