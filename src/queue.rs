//! One logical delay queue: push, fire, retry, dead-letter.

use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::time::Instant;

use crate::config::QueueConfig;
use crate::error::{RequeueError, Result};
use crate::handler::{HandlerError, JobHandler};
use crate::job::{DlqEntry, JobData, JobId};
use crate::keys::QueueKeys;
use crate::stats::{QueueMetrics, QueueStats};

/// Value stored under trigger keys; only the key's TTL carries meaning.
const TRIGGER_SENTINEL: &str = "1";

/// Attempts to read the data key after a trigger expires. The expired event
/// can be delivered marginally before the data key is visible to the
/// subscriber's connection.
const DATA_READ_ATTEMPTS: u32 = 3;

/// Pause between data key read attempts.
const DATA_READ_BACKOFF: Duration = Duration::from_millis(100);

/// A single delay queue owned by a [`Manager`](crate::Manager).
///
/// Jobs are scheduled with [`push`](Queue::push) and executed through the
/// queue's handler once their trigger key expires. Failed jobs are re-armed
/// up to `max_retry` times, then exiled to the dead-letter list (or dropped
/// when none is configured).
pub struct Queue {
    name: String,
    keys: QueueKeys,
    conn: ConnectionManager,
    handler: JobHandler,
    max_retry: u32,
    retry_delay: Duration,
    dlq_key: Option<String>,
    metrics: QueueMetrics,
}

impl Queue {
    pub(crate) fn new(
        config: QueueConfig,
        conn: ConnectionManager,
        handler: JobHandler,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            name: config.name,
            keys: QueueKeys::new(config.key_prefix),
            conn,
            handler,
            max_retry: config.max_retry,
            retry_delay: config.retry_delay,
            dlq_key: config.dlq_key,
            metrics: QueueMetrics::default(),
        })
    }

    /// Get the queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    /// Get a snapshot of the queue's counters.
    pub fn stats(&self) -> QueueStats {
        self.metrics.snapshot(&self.name)
    }

    /// Schedule a payload to fire after `delay`.
    ///
    /// Writes the data key (no TTL) and the trigger key (TTL = delay) in one
    /// atomic pipeline, so no observer sees one without the other. Returns
    /// the job's id; pushing the same payload twice schedules two jobs.
    pub async fn push(&self, payload: impl Into<String>, delay: Duration) -> Result<JobId> {
        let payload = payload.into();
        if payload.is_empty() {
            return Err(RequeueError::InvalidArgument(
                "payload cannot be empty".to_string(),
            ));
        }
        if delay.is_zero() {
            return Err(RequeueError::InvalidArgument(
                "delay must be positive".to_string(),
            ));
        }

        let id = JobId::new();
        let data_key = self.keys.data(&id);
        let trigger_key = self.keys.trigger(&id);
        let json = JobData::new(payload).to_json()?;

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(&data_key, &json)
            .ignore()
            .set_ex(&trigger_key, TRIGGER_SENTINEL, ttl_secs(delay))
            .ignore();
        pipe.query_async::<()>(&mut conn).await?;

        tracing::info!(
            queue = %self.name,
            id = %id,
            delay_secs = ttl_secs(delay),
            "job pushed"
        );

        Ok(id)
    }

    /// Handle a key observed on the expiration channel.
    ///
    /// Keys outside this queue's trigger namespace are ignored silently; the
    /// manager fans every expired key out to every queue.
    pub(crate) async fn handle_expired_key(&self, key: &str) {
        let Some(suffix) = self.keys.trigger_suffix(key) else {
            return;
        };
        let Some(id) = JobId::parse(suffix) else {
            tracing::warn!(queue = %self.name, key = %key, "malformed trigger key");
            return;
        };

        tracing::debug!(queue = %self.name, id = %id, "processing expired job");
        self.process_from_data_key(&self.keys.data(&id), &id).await;
    }

    /// Fire a job straight from its data key.
    ///
    /// Entered from the recovery scan when the trigger key is already gone,
    /// and from [`handle_expired_key`](Queue::handle_expired_key) once the
    /// id is known.
    pub(crate) async fn process_from_data_key(&self, data_key: &str, id: &JobId) {
        let start = Instant::now();

        let Some(raw) = self.read_job_data(data_key, id).await else {
            return;
        };

        let job = match JobData::from_json(&raw) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(
                    queue = %self.name,
                    id = %id,
                    error = %e,
                    "failed to decode job data, abandoning job"
                );
                return;
            }
        };

        self.run_handler(id, job, start).await;
    }

    /// Read the job record, tolerating the expiry-event race.
    async fn read_job_data(&self, data_key: &str, id: &JobId) -> Option<String> {
        let mut conn = self.conn.clone();

        for attempt in 0..DATA_READ_ATTEMPTS {
            match conn.get::<_, Option<String>>(data_key).await {
                Ok(Some(raw)) => return Some(raw),
                Ok(None) => {
                    if attempt + 1 < DATA_READ_ATTEMPTS {
                        tokio::time::sleep(DATA_READ_BACKOFF).await;
                        continue;
                    }
                    tracing::warn!(
                        queue = %self.name,
                        id = %id,
                        attempts = DATA_READ_ATTEMPTS,
                        "job data not found after retries, abandoning job"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        queue = %self.name,
                        id = %id,
                        error = %e,
                        "failed to read job data"
                    );
                    return None;
                }
            }
        }

        None
    }

    async fn run_handler(&self, id: &JobId, mut job: JobData, start: Instant) {
        let result = (self.handler)(id.clone(), job.payload.clone()).await;
        let elapsed = start.elapsed();

        match result {
            Ok(()) => {
                self.metrics.record_processed(elapsed);
                tracing::info!(
                    queue = %self.name,
                    id = %id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "job completed"
                );
                self.delete_data_key(id).await;
            }
            Err(err) => {
                self.metrics.record_failed(elapsed);
                tracing::error!(
                    queue = %self.name,
                    id = %id,
                    error = %err,
                    retry_count = job.retry_count,
                    max_retry = self.max_retry,
                    "job handler failed"
                );

                if job.retry_count < self.max_retry {
                    self.metrics.record_retried();
                    if let Err(e) = self.requeue_for_retry(id, &mut job).await {
                        tracing::error!(
                            queue = %self.name,
                            id = %id,
                            error = %e,
                            "failed to schedule retry"
                        );
                    }
                } else {
                    self.metrics.record_moved_to_dlq();
                    if let Err(e) = self.move_to_dlq(id, &job, &err).await {
                        tracing::error!(
                            queue = %self.name,
                            id = %id,
                            error = %e,
                            "failed to move job to dead letter queue"
                        );
                    }
                }
            }
        }
    }

    /// Re-arm a failed job under the same id.
    async fn requeue_for_retry(&self, id: &JobId, job: &mut JobData) -> Result<()> {
        job.retry_count += 1;
        job.updated_at = Utc::now();
        let json = job.to_json()?;

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(self.keys.data(id), &json)
            .ignore()
            .set_ex(
                self.keys.trigger(id),
                TRIGGER_SENTINEL,
                ttl_secs(self.retry_delay),
            )
            .ignore();
        pipe.query_async::<()>(&mut conn).await?;

        tracing::info!(
            queue = %self.name,
            id = %id,
            retry_count = job.retry_count,
            max_retry = self.max_retry,
            delay_secs = ttl_secs(self.retry_delay),
            "job scheduled for retry"
        );

        Ok(())
    }

    /// Exile a permanently failed job, then clean up its data key.
    async fn move_to_dlq(&self, id: &JobId, job: &JobData, err: &HandlerError) -> Result<()> {
        match &self.dlq_key {
            Some(dlq_key) => {
                let entry = DlqEntry {
                    uuid: id.clone(),
                    payload: job.payload.clone(),
                    retry_count: job.retry_count,
                    error: err.to_string(),
                    failed_at: Utc::now(),
                    queue_name: self.name.clone(),
                    created_at: job.created_at,
                    updated_at: job.updated_at,
                };
                let json = entry.to_json()?;

                let mut conn = self.conn.clone();
                conn.rpush::<_, _, ()>(dlq_key, &json).await?;

                tracing::warn!(
                    queue = %self.name,
                    id = %id,
                    dlq = %dlq_key,
                    "job moved to dead letter queue"
                );
            }
            None => {
                tracing::warn!(
                    queue = %self.name,
                    id = %id,
                    "job failed permanently, no dead letter queue configured"
                );
            }
        }

        self.delete_data_key(id).await;
        Ok(())
    }

    async fn delete_data_key(&self, id: &JobId) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn.del::<_, ()>(self.keys.data(id)).await {
            tracing::warn!(
                queue = %self.name,
                id = %id,
                error = %e,
                "failed to clean up job data"
            );
        }
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("prefix", &self.keys.prefix())
            .field("max_retry", &self.max_retry)
            .field("retry_delay", &self.retry_delay)
            .field("dlq_key", &self.dlq_key)
            .finish_non_exhaustive()
    }
}

/// TTL in whole seconds for a trigger key.
///
/// Redis EX has whole-second granularity; anything shorter than a second
/// still has to arm the trigger.
fn ttl_secs(delay: Duration) -> u64 {
    delay.as_secs().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_whole_seconds_with_floor_of_one() {
        assert_eq!(ttl_secs(Duration::from_secs(30)), 30);
        assert_eq!(ttl_secs(Duration::from_millis(1500)), 1);
        assert_eq!(ttl_secs(Duration::from_millis(200)), 1);
    }
}
