//! Job records and their wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a job.
///
/// Generated randomly (v4) on every push; callers keep it as the handle for
/// the job across retries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new random JobId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a JobId from the suffix of a data or trigger key.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The record stored under a job's data key.
///
/// The payload is opaque to the queue; retry bookkeeping lives alongside it
/// so a retried job re-arms with its full history intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobData {
    /// The opaque job payload.
    pub payload: String,
    /// Number of failed attempts so far.
    pub retry_count: u32,
    /// When the job was first pushed.
    pub created_at: DateTime<Utc>,
    /// When the record was last rewritten (push or retry).
    pub updated_at: DateTime<Utc>,
}

impl JobData {
    /// Create a fresh record for a newly pushed payload.
    pub fn new(payload: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            payload: payload.into(),
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Serialize the record to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a record from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Entry appended to a dead-letter list when a job exhausts its retries.
///
/// The field names and RFC 3339 timestamps are a stable wire shape; external
/// consumers drain the list without going through this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEntry {
    /// The job's id.
    pub uuid: JobId,
    /// The opaque job payload.
    pub payload: String,
    /// Failed attempts at the time the job was exiled.
    pub retry_count: u32,
    /// Message of the final handler error.
    pub error: String,
    /// When the final attempt failed.
    pub failed_at: DateTime<Utc>,
    /// Name of the queue the job belonged to.
    pub queue_name: String,
    /// When the job was first pushed.
    pub created_at: DateTime<Utc>,
    /// When the job record was last rewritten.
    pub updated_at: DateTime<Utc>,
}

impl DlqEntry {
    /// Serialize the entry to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize an entry from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fixed_time(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn job_id_is_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn job_id_display_round_trips() {
        let id = JobId::new();
        assert_eq!(JobId::parse(&id.to_string()), Some(id));
    }

    #[test]
    fn job_id_rejects_garbage() {
        assert_eq!(JobId::parse("not-a-uuid"), None);
        assert_eq!(JobId::parse(""), None);
    }

    #[test]
    fn job_data_round_trips() {
        let job = JobData::new("hello");
        let json = job.to_json().unwrap();
        assert_eq!(JobData::from_json(&json).unwrap(), job);
    }

    #[test]
    fn job_data_round_trips_unicode() {
        let mut job = JobData::new("héllo wörld \u{1F980} ラスト");
        job.retry_count = 7;
        let json = job.to_json().unwrap();
        assert_eq!(JobData::from_json(&json).unwrap(), job);
    }

    #[test]
    fn job_data_round_trips_large_payload() {
        let job = JobData::new("x".repeat(1 << 20));
        let json = job.to_json().unwrap();
        assert_eq!(JobData::from_json(&json).unwrap(), job);
    }

    #[test]
    fn dlq_entry_wire_shape_is_stable() {
        let entry = DlqEntry {
            uuid: JobId::new(),
            payload: "p".to_string(),
            retry_count: 1,
            error: "handler failed".to_string(),
            failed_at: fixed_time(1_700_000_100),
            queue_name: "Q".to_string(),
            created_at: fixed_time(1_700_000_000),
            updated_at: fixed_time(1_700_000_050),
        };

        let value: serde_json::Value = serde_json::from_str(&entry.to_json().unwrap()).unwrap();
        for field in [
            "uuid",
            "payload",
            "retry_count",
            "error",
            "failed_at",
            "queue_name",
            "created_at",
            "updated_at",
        ] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(value["retry_count"], 1);
        assert_eq!(value["queue_name"], "Q");
        // chrono renders RFC 3339 timestamps
        assert!(value["failed_at"].as_str().unwrap().starts_with("2023-11-"));
    }

    #[test]
    fn dlq_entry_round_trips() {
        let entry = DlqEntry {
            uuid: JobId::new(),
            payload: "payload".to_string(),
            retry_count: 3,
            error: "gave up".to_string(),
            failed_at: fixed_time(1_700_000_100),
            queue_name: "orders".to_string(),
            created_at: fixed_time(1_700_000_000),
            updated_at: fixed_time(1_700_000_050),
        };
        let json = entry.to_json().unwrap();
        assert_eq!(DlqEntry::from_json(&json).unwrap(), entry);
    }

    proptest! {
        #[test]
        fn job_data_round_trips_arbitrary(payload in ".*", retry_count in 0u32..1000) {
            let job = JobData {
                payload,
                retry_count,
                created_at: fixed_time(1_700_000_000),
                updated_at: fixed_time(1_700_000_050),
            };
            let json = job.to_json().unwrap();
            prop_assert_eq!(JobData::from_json(&json).unwrap(), job);
        }
    }
}
