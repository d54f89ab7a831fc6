//! Dead-letter example: exhaust retries and inspect the DLQ entry.
//!
//! Prerequisites:
//! - Redis server running on localhost:6379
//!
//! Run with: `cargo run --example dead_letters`

use std::time::Duration;

use redis::AsyncCommands;
use requeue::{DlqEntry, HandlerError, Manager, QueueConfig};

const DLQ_KEY: &str = "demo:payments:dead";

#[tokio::main]
async fn main() -> requeue::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost".to_string());
    let manager = Manager::connect(&redis_url).await?;

    let payments = manager.register(
        QueueConfig::new("payments", "demo:payments")
            .max_retry(1)
            .retry_delay(Duration::from_secs(1))
            .dlq_key(DLQ_KEY),
        |id, _payload| async move {
            println!("[payments] {} -> declining", id);
            Err(HandlerError::new("card declined"))
        },
    )?;

    manager.start()?;

    let id = payments.push("order ORD-042", Duration::from_secs(1)).await?;
    println!("scheduled {id}; it will fail twice and land on {DLQ_KEY}");

    tokio::time::sleep(Duration::from_secs(6)).await;

    // Drain the DLQ the way an external consumer would.
    let client = redis::Client::open(redis_url.as_str())?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let entries: Vec<String> = conn.lrange(DLQ_KEY, 0, -1).await?;

    for raw in &entries {
        let entry = DlqEntry::from_json(raw)?;
        println!(
            "dead letter: job={} queue={} retries={} error={:?} failed_at={}",
            entry.uuid, entry.queue_name, entry.retry_count, entry.error, entry.failed_at
        );
    }

    manager.stop(Duration::from_secs(5)).await?;
    Ok(())
}
