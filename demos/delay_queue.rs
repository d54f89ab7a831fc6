//! Delay queue example: delayed execution and retry on failure.
//!
//! Prerequisites:
//! - Redis server running on localhost:6379 (keyspace notifications are
//!   enabled automatically)
//!
//! Run with: `cargo run --example delay_queue`

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use requeue::{HandlerError, Manager, QueueConfig};

// Track webhook attempts for demo purposes
static WEBHOOK_ATTEMPTS: AtomicU32 = AtomicU32::new(0);

#[tokio::main]
async fn main() -> requeue::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost".to_string());

    println!("Connecting to {}...", redis_url);
    let manager = Manager::connect(&redis_url).await?;

    let emails = manager.register(
        QueueConfig::new("emails", "demo:emails"),
        |id, payload| async move {
            println!("[emails] {} -> {}", id, payload);
            Ok(())
        },
    )?;

    let webhooks = manager.register(
        QueueConfig::new("webhooks", "demo:webhooks")
            .max_retry(3)
            .retry_delay(Duration::from_secs(2)),
        |id, payload| async move {
            let attempt = WEBHOOK_ATTEMPTS.fetch_add(1, Ordering::SeqCst) + 1;
            println!("[webhooks] {} attempt={} payload={}", id, attempt, payload);

            // Fail twice to show the retry path.
            if attempt <= 2 {
                return Err(HandlerError::new("connection timeout"));
            }
            Ok(())
        },
    )?;

    manager.start()?;

    let id = emails.push("welcome aboard", Duration::from_secs(2)).await?;
    println!("scheduled email {id} (fires in ~2s)");

    let id = webhooks
        .push(r#"{"event":"order.completed"}"#, Duration::from_secs(2))
        .await?;
    println!("scheduled webhook {id} (fails twice, then succeeds)");

    tokio::time::sleep(Duration::from_secs(10)).await;

    for (name, stats) in manager.stats() {
        println!(
            "{}: processed={} failed={} retried={} dead-lettered={}",
            name,
            stats.jobs_processed,
            stats.jobs_failed,
            stats.jobs_retried,
            stats.jobs_moved_to_dlq
        );
    }

    manager.stop(Duration::from_secs(5)).await?;
    Ok(())
}
