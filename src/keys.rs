//! Redis key management for a queue's namespace.

use crate::job::JobId;

/// Builds and parses the keys owned by one queue.
///
/// Every key for a queue lives under its prefix. The trigger key is the
/// schedule signal: it carries only a sentinel value and a TTL, and its
/// expiration event fires the job. The data key holds the serialized record
/// and never expires; it is deleted explicitly on a terminal outcome.
#[derive(Debug, Clone)]
pub struct QueueKeys {
    prefix: String,
}

impl QueueKeys {
    /// Create a new QueueKeys instance with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Get the prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key for a job's serialized record (no TTL).
    pub fn data(&self, id: &JobId) -> String {
        format!("{}:data:{}", self.prefix, id)
    }

    /// Key for a job's schedule trigger (sentinel value, TTL = delay).
    pub fn trigger(&self, id: &JobId) -> String {
        format!("{}:trigger:{}", self.prefix, id)
    }

    /// Pattern matching every data key of this queue, for recovery scans.
    pub fn data_pattern(&self) -> String {
        format!("{}:data:*", self.prefix)
    }

    /// Strip the trigger prefix from a key, returning the id suffix.
    ///
    /// `None` means the key belongs to some other queue (or is not a trigger
    /// key at all); the suffix still has to be parsed as a [`JobId`].
    pub fn trigger_suffix<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.prefix)?
            .strip_prefix(":trigger:")
    }

    /// Strip the data prefix from a key, returning the id suffix.
    pub fn data_suffix<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.prefix)?.strip_prefix(":data:")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_keys() {
        let id = JobId::new();
        let keys = QueueKeys::new("orders");
        assert_eq!(keys.data(&id), format!("orders:data:{id}"));
        assert_eq!(keys.trigger(&id), format!("orders:trigger:{id}"));
        assert_eq!(keys.data_pattern(), "orders:data:*");
    }

    #[test]
    fn trigger_suffix_round_trips() {
        let id = JobId::new();
        let keys = QueueKeys::new("orders");
        let trigger = keys.trigger(&id);
        let suffix = keys.trigger_suffix(&trigger).unwrap();
        assert_eq!(JobId::parse(suffix), Some(id));
    }

    #[test]
    fn foreign_keys_do_not_match() {
        let id = JobId::new();
        let keys = QueueKeys::new("orders");
        assert_eq!(keys.trigger_suffix(&format!("payments:trigger:{id}")), None);
        assert_eq!(keys.trigger_suffix(&format!("orders:data:{id}")), None);
        assert_eq!(keys.data_suffix(&format!("orders:trigger:{id}")), None);
        assert_eq!(keys.trigger_suffix("something else entirely"), None);
    }

    #[test]
    fn colon_in_prefix_is_supported() {
        let id = JobId::new();
        let keys = QueueKeys::new("app:orders");
        let trigger = keys.trigger(&id);
        assert_eq!(trigger, format!("app:orders:trigger:{id}"));
        let suffix = keys.trigger_suffix(&trigger).unwrap();
        assert_eq!(JobId::parse(suffix), Some(id));
    }
}
