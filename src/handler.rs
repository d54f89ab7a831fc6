//! Job handler contract.
//!
//! A handler receives the job id and the opaque payload, and its result
//! drives the retry / dead-letter state machine: `Ok(())` completes the job,
//! any error re-arms it until retries are exhausted. Handlers run under the
//! manager's per-dispatch timeout, so a handler future may be dropped
//! mid-flight on shutdown or timeout; handlers should therefore be
//! idempotent (startup recovery can also replay a job whose process died
//! before cleanup).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::job::JobId;

/// Result type for job handlers.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Boxed future returned by a [`JobHandler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Type-erased job handler stored by a queue.
///
/// Use [`handler_fn`] to build one from an async function or closure.
pub type JobHandler = Arc<dyn Fn(JobId, String) -> HandlerFuture + Send + Sync>;

/// Error returned from job handlers.
#[derive(Debug)]
pub struct HandlerError {
    /// Error message recorded in logs and dead-letter entries.
    pub message: String,
}

impl HandlerError {
    /// Create a new handler error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl<E: std::error::Error> From<E> for HandlerError {
    fn from(err: E) -> Self {
        Self::new(err.to_string())
    }
}

/// Box an async function or closure into a [`JobHandler`].
pub fn handler_fn<F, Fut>(f: F) -> JobHandler
where
    F: Fn(JobId, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |id: JobId, payload: String| -> HandlerFuture { Box::pin(f(id, payload)) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_from_std_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: HandlerError = io_err.into();
        assert_eq!(err.message, "boom");
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn handler_fn_invokes_wrapped_closure() {
        let handler = handler_fn(|id: JobId, payload: String| async move {
            if payload == "fail" {
                return Err(HandlerError::new(format!("{} failed", id)));
            }
            Ok(())
        });

        let id = JobId::new();
        assert!(handler(id.clone(), "ok".to_string()).await.is_ok());

        let err = handler(id, "fail".to_string()).await.unwrap_err();
        assert!(err.message.ends_with("failed"));
    }
}
