//! # requeue - Redis-Backed Delay Queue
//!
//! A Rust library for scheduling opaque payloads to fire after a delay,
//! built on Redis key-expiration events. Failed jobs are retried a bounded
//! number of times and then exiled to a dead-letter list.
//!
//! ## Features
//!
//! - **Delayed execution**: push a payload with a delay; it fires when the
//!   trigger key's TTL expires
//! - **Many queues, one subscription**: a single [`Manager`] multiplexes the
//!   Redis expiration-event stream across every registered [`Queue`]
//! - **Automatic retries**: per-queue retry budget and delay, with the job
//!   id preserved across attempts
//! - **Dead letter queue**: permanently failed jobs land on a Redis list as
//!   self-describing JSON entries
//! - **Crash recovery**: a startup scan fires jobs whose trigger expired
//!   while the process was down
//! - **Graceful shutdown**: stop waits for the listener and leaves in-flight
//!   work to finish in the background
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use requeue::{Manager, QueueConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> requeue::Result<()> {
//!     let manager = Manager::connect("redis://localhost").await?;
//!
//!     let emails = manager.register(
//!         QueueConfig::new("emails", "app:emails")
//!             .max_retry(2)
//!             .retry_delay(Duration::from_secs(5))
//!             .dlq_key("app:emails:dead"),
//!         |id, payload| async move {
//!             println!("sending {id}: {payload}");
//!             Ok(())
//!         },
//!     )?;
//!
//!     manager.start()?;
//!
//!     // Fires in roughly 30 seconds.
//!     let job_id = emails.push("welcome aboard", Duration::from_secs(30)).await?;
//!     println!("scheduled {job_id}");
//!
//!     // ... later ...
//!     manager.stop(Duration::from_secs(10)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## How it works
//!
//! Each pushed job writes two keys in one pipeline: a **data key** holding
//! the serialized record with no TTL, and a **trigger key** holding a
//! sentinel with TTL = delay. The manager subscribes to
//! `__keyevent@0__:expired` and fans each expired key out to every queue;
//! the owning queue reads the record, runs its handler, and either deletes
//! the data key, re-arms the trigger with a bumped retry count, or pushes a
//! dead-letter entry. Expiration events are lost while no subscriber is
//! connected, so [`Manager::start`] also scans each queue's data keys for
//! triggers that are missing or out of TTL and fires those jobs once.

pub mod config;
pub mod error;
pub mod handler;
pub mod job;
pub mod keys;
pub mod manager;
pub mod queue;
pub mod stats;

// Re-export main types
pub use config::QueueConfig;
pub use error::{RequeueError, Result};
pub use handler::{handler_fn, HandlerError, HandlerFuture, HandlerResult, JobHandler};
pub use job::{DlqEntry, JobData, JobId};
pub use manager::Manager;
pub use queue::Queue;
pub use stats::QueueStats;
