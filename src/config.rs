//! Queue configuration.

use std::time::Duration;

use crate::error::{RequeueError, Result};

/// Configuration for one delay queue, immutable after registration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue name, used in logs, stats, and dead-letter entries.
    pub name: String,
    /// Prefix under which all of this queue's Redis keys live.
    pub key_prefix: String,
    /// Number of additional attempts after the first failed one.
    pub max_retry: u32,
    /// TTL applied to retried trigger keys.
    pub retry_delay: Duration,
    /// Dead-letter list key; `None` logs and drops permanent failures.
    pub dlq_key: Option<String>,
}

impl QueueConfig {
    /// Create a config with the given name and key prefix.
    pub fn new(name: impl Into<String>, key_prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_prefix: key_prefix.into(),
            max_retry: 3,
            retry_delay: Duration::from_secs(10),
            dlq_key: None,
        }
    }

    /// Set the maximum number of retries.
    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Set the delay before a failed job fires again.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the dead-letter list key.
    pub fn dlq_key(mut self, key: impl Into<String>) -> Self {
        self.dlq_key = Some(key.into());
        self
    }

    /// Validate the config.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(RequeueError::InvalidArgument(
                "queue name cannot be empty".to_string(),
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(RequeueError::InvalidArgument(
                "key prefix cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = QueueConfig::new("emails", "emails");
        assert_eq!(cfg.max_retry, 3);
        assert_eq!(cfg.retry_delay, Duration::from_secs(10));
        assert!(cfg.dlq_key.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn builder_setters() {
        let cfg = QueueConfig::new("emails", "app:emails")
            .max_retry(5)
            .retry_delay(Duration::from_secs(2))
            .dlq_key("app:emails:dead");
        assert_eq!(cfg.max_retry, 5);
        assert_eq!(cfg.retry_delay, Duration::from_secs(2));
        assert_eq!(cfg.dlq_key.as_deref(), Some("app:emails:dead"));
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = QueueConfig::new("", "prefix").validate().unwrap_err();
        assert!(matches!(err, RequeueError::InvalidArgument(_)));
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let err = QueueConfig::new("name", "").validate().unwrap_err();
        assert!(matches!(err, RequeueError::InvalidArgument(_)));
    }
}
