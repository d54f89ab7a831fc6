//! Manager: event subscription, queue registry, lifecycle, recovery scan.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::QueueConfig;
use crate::error::{RequeueError, Result};
use crate::handler::{handler_fn, HandlerResult, JobHandler};
use crate::job::JobId;
use crate::queue::Queue;
use crate::stats::QueueStats;

/// Keyevent channel for expired keys on database 0.
const EXPIRED_EVENT_CHANNEL: &str = "__keyevent@0__:expired";

/// Flags enabling keyevent notifications for expired keys.
const KEYSPACE_EVENT_FLAGS: &str = "Ex";

/// Timeout for the CONFIG calls made before subscribing.
const CONFIG_TIMEOUT: Duration = Duration::from_secs(5);

/// Pub/sub receive timeout; hitting it on an idle channel is normal.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between keep-alive pings while subscribed.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pause before re-subscribing after a pub/sub failure.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Budget for one fan-out worker, handler time included.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for scanning one queue during recovery.
const SCAN_TIMEOUT: Duration = Duration::from_secs(30);

/// Owner of the delay queues and the Redis expiration-event stream.
///
/// One manager multiplexes a single `__keyevent@0__:expired` subscription
/// across every registered [`Queue`]; each expired key is fanned out to all
/// of them and matched against their prefixes. Starting the manager also
/// kicks off a recovery scan that fires jobs whose triggers expired while no
/// subscriber was connected.
pub struct Manager {
    client: redis::Client,
    conn: ConnectionManager,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    running: bool,
    queues: Vec<Arc<Queue>>,
    shutdown: Option<watch::Sender<bool>>,
    listener: Option<JoinHandle<()>>,
}

impl Manager {
    /// Create a manager from an existing Redis client.
    pub async fn new(client: redis::Client) -> Result<Self> {
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            conn,
            inner: RwLock::new(Inner::default()),
        })
    }

    /// Create a manager connected to the given Redis URL.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        Self::new(redis::Client::open(redis_url)?).await
    }

    /// Register a new queue.
    ///
    /// Fails once the manager is running; the registry is frozen at
    /// [`start`](Manager::start).
    pub fn register<F, Fut>(&self, config: QueueConfig, handler: F) -> Result<Arc<Queue>>
    where
        F: Fn(JobId, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_handler(config, handler_fn(handler))
    }

    /// Register a new queue with an already boxed handler.
    pub fn register_handler(&self, config: QueueConfig, handler: JobHandler) -> Result<Arc<Queue>> {
        let mut inner = self.inner.write().unwrap();
        if inner.running {
            return Err(RequeueError::IllegalState(
                "cannot register a queue while the manager is running".to_string(),
            ));
        }

        let max_retry = config.max_retry;
        let dlq = config.dlq_key.clone().unwrap_or_default();
        let queue = Arc::new(Queue::new(config, self.conn.clone(), handler)?);
        inner.queues.push(Arc::clone(&queue));

        tracing::info!(
            queue = %queue.name(),
            prefix = %queue.keys().prefix(),
            max_retry,
            dlq = %dlq,
            "queue registered"
        );
        Ok(queue)
    }

    /// Start the listener and the startup recovery scan.
    ///
    /// Returns an error if the manager is already running. Must be called
    /// from within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.running {
            return Err(RequeueError::IllegalState(
                "manager is already running".to_string(),
            ));
        }
        inner.running = true;

        let (tx, rx) = watch::channel(false);
        let queues = inner.queues.clone();

        let listener = Listener {
            client: self.client.clone(),
            conn: self.conn.clone(),
            queues: queues.clone(),
            shutdown: rx,
        };
        inner.shutdown = Some(tx);
        inner.listener = Some(tokio::spawn(listener.run()));

        // Recovery runs concurrently with the fresh subscription; both paths
        // converge on the same fire logic and the data key delete makes a
        // second attempt observe not-found.
        let conn = self.conn.clone();
        tokio::spawn(async move {
            scan_queues(conn, &queues).await;
        });

        tracing::info!("delay queue manager started");
        Ok(())
    }

    /// Stop the manager, waiting up to `wait` for the listener to exit.
    ///
    /// Idempotent on a stopped manager. On timeout the listener keeps
    /// winding down in the background and in-flight fan-out workers run to
    /// completion; nothing is aborted.
    pub async fn stop(&self, wait: Duration) -> Result<()> {
        let (tx, handle) = {
            let mut inner = self.inner.write().unwrap();
            if !inner.running {
                return Ok(());
            }
            inner.running = false;
            (inner.shutdown.take(), inner.listener.take())
        };

        tracing::info!("stopping delay queue manager");
        if let Some(tx) = tx {
            let _ = tx.send(true);
        }

        if let Some(handle) = handle {
            match timeout(wait, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if e.is_panic() {
                        tracing::error!("listener task panicked");
                    }
                }
                Err(_) => {
                    tracing::warn!("delay queue manager stop timed out");
                    return Err(RequeueError::Timeout(
                        "timed out waiting for listener to stop".to_string(),
                    ));
                }
            }
        }

        tracing::info!("delay queue manager stopped");
        Ok(())
    }

    /// Whether the manager is currently running.
    pub fn is_running(&self) -> bool {
        self.inner.read().unwrap().running
    }

    /// Snapshot the counters of every registered queue, by name.
    pub fn stats(&self) -> HashMap<String, QueueStats> {
        let inner = self.inner.read().unwrap();
        inner
            .queues
            .iter()
            .map(|q| (q.name().to_string(), q.stats()))
            .collect()
    }

    /// Look up a registered queue by name.
    pub fn queue(&self, name: &str) -> Option<Arc<Queue>> {
        let inner = self.inner.read().unwrap();
        inner.queues.iter().find(|q| q.name() == name).cloned()
    }

    /// Manually trigger a recovery scan.
    ///
    /// Fails when the manager is not running.
    pub async fn scan_expired_jobs(&self) -> Result<()> {
        let queues = {
            let inner = self.inner.read().unwrap();
            if !inner.running {
                return Err(RequeueError::IllegalState(
                    "manager is not running".to_string(),
                ));
            }
            inner.queues.clone()
        };

        tracing::info!("manual expired job scan triggered");
        scan_queues(self.conn.clone(), &queues).await;
        Ok(())
    }
}

/// The subscription task spawned by [`Manager::start`].
struct Listener {
    client: redis::Client,
    conn: ConnectionManager,
    queues: Vec<Arc<Queue>>,
    shutdown: watch::Receiver<bool>,
}

impl Listener {
    async fn run(self) {
        let Listener {
            client,
            mut conn,
            queues,
            mut shutdown,
        } = self;

        match timeout(CONFIG_TIMEOUT, enable_keyspace_notifications(&mut conn)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "failed to enable keyspace notifications");
                return;
            }
            Err(_) => {
                tracing::error!("timed out enabling keyspace notifications");
                return;
            }
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            match listen(&client, &mut conn, &queues, &mut shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    if *shutdown.borrow() {
                        break;
                    }
                    tracing::warn!(
                        error = %e,
                        delay_secs = RECONNECT_DELAY.as_secs(),
                        "pub/sub connection error, re-subscribing after delay"
                    );
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }

        tracing::info!("expired event listener stopped");
    }
}

/// One subscription session: subscribe, then receive until shutdown or a
/// connection error.
async fn listen(
    client: &redis::Client,
    conn: &mut ConnectionManager,
    queues: &[Arc<Queue>],
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.psubscribe(EXPIRED_EVENT_CHANNEL).await?;
    tracing::info!(channel = EXPIRED_EVENT_CHANNEL, "subscribed to expired key events");

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping.tick().await; // the first tick fires immediately

    let mut stream = pubsub.on_message();

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            _ = ping.tick() => {
                if let Err(e) = redis::cmd("PING").query_async::<String>(conn).await {
                    tracing::warn!(error = %e, "redis ping failed, connection may be stale");
                }
            }
            received = timeout(RECEIVE_TIMEOUT, stream.next()) => {
                match received {
                    // Idle channel; nothing expired within the window.
                    Err(_) => continue,
                    Ok(None) => {
                        return Err(RequeueError::PubSub(
                            "subscription stream closed".to_string(),
                        ));
                    }
                    Ok(Some(msg)) => {
                        let key: String = match msg.get_payload() {
                            Ok(key) => key,
                            Err(e) => {
                                tracing::warn!(error = %e, "unreadable expiration event payload");
                                continue;
                            }
                        };
                        tracing::debug!(key = %key, "received expired key event");
                        dispatch_expired_key(queues, &key);
                    }
                }
            }
        }
    }
}

/// Fan one expired key out to every queue on its own worker task.
///
/// Workers are detached: they survive manager shutdown and finish in the
/// background. Panics in a handler are caught at the join handle and logged.
fn dispatch_expired_key(queues: &[Arc<Queue>], key: &str) {
    for queue in queues {
        let queue = Arc::clone(queue);
        let key = key.to_string();
        let name = queue.name().to_string();

        let worker = tokio::spawn(async move {
            if timeout(DISPATCH_TIMEOUT, queue.handle_expired_key(&key))
                .await
                .is_err()
            {
                tracing::warn!(
                    queue = %queue.name(),
                    key = %key,
                    "expired key handling timed out"
                );
            }
        });

        tokio::spawn(async move {
            if let Err(e) = worker.await {
                if e.is_panic() {
                    tracing::error!(queue = %name, "panic while handling expired key");
                }
            }
        });
    }
}

/// Turn on `Ex` keyevent notifications, logging the config before and after.
async fn enable_keyspace_notifications(conn: &mut ConnectionManager) -> Result<()> {
    let before: Vec<String> = redis::cmd("CONFIG")
        .arg("GET")
        .arg("notify-keyspace-events")
        .query_async(conn)
        .await?;
    tracing::info!(config = ?before, "current keyspace notification config");

    redis::cmd("CONFIG")
        .arg("SET")
        .arg("notify-keyspace-events")
        .arg(KEYSPACE_EVENT_FLAGS)
        .query_async::<()>(conn)
        .await?;

    let after: Vec<String> = redis::cmd("CONFIG")
        .arg("GET")
        .arg("notify-keyspace-events")
        .query_async(conn)
        .await?;
    tracing::info!(config = ?after, "keyspace notification config updated");

    Ok(())
}

/// Recovery scan over every queue.
///
/// Fires jobs whose trigger expired while no subscriber was connected. Safe
/// to run concurrently with live expiration events: whichever path fires
/// first deletes the data key, and the loser observes not-found.
async fn scan_queues(conn: ConnectionManager, queues: &[Arc<Queue>]) {
    tracing::info!("scanning for expired jobs");

    for queue in queues {
        match timeout(SCAN_TIMEOUT, scan_queue(conn.clone(), queue)).await {
            Ok(Ok(processed)) => {
                if processed > 0 {
                    tracing::info!(
                        queue = %queue.name(),
                        processed,
                        "recovered expired jobs"
                    );
                }
            }
            Ok(Err(e)) => {
                tracing::error!(
                    queue = %queue.name(),
                    error = %e,
                    "failed to scan queue for expired jobs"
                );
            }
            Err(_) => {
                tracing::warn!(queue = %queue.name(), "expired job scan timed out");
            }
        }
    }

    tracing::info!("expired job scan complete");
}

/// Scan one queue's data keys for jobs with a missing or spent trigger.
async fn scan_queue(mut conn: ConnectionManager, queue: &Arc<Queue>) -> Result<usize> {
    let pattern = queue.keys().data_pattern();
    let data_keys: Vec<String> = conn.keys(&pattern).await?;
    if data_keys.is_empty() {
        return Ok(0);
    }

    tracing::debug!(
        queue = %queue.name(),
        count = data_keys.len(),
        "checking data keys for missing triggers"
    );

    let mut processed = 0;
    for data_key in data_keys {
        let Some(id) = queue.keys().data_suffix(&data_key).and_then(JobId::parse) else {
            tracing::warn!(queue = %queue.name(), key = %data_key, "malformed data key during scan");
            continue;
        };
        let trigger_key = queue.keys().trigger(&id);

        let exists = match conn.exists::<_, bool>(&trigger_key).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::error!(
                    queue = %queue.name(),
                    id = %id,
                    error = %e,
                    "failed to check trigger key"
                );
                continue;
            }
        };

        if !exists {
            // Trigger already expired and its event is gone; fire from the
            // data key directly.
            queue.process_from_data_key(&data_key, &id).await;
            processed += 1;
            continue;
        }

        let ttl = match conn.ttl::<_, i64>(&trigger_key).await {
            Ok(ttl) => ttl,
            Err(e) => {
                tracing::error!(
                    queue = %queue.name(),
                    id = %id,
                    error = %e,
                    "failed to check trigger key TTL"
                );
                continue;
            }
        };

        if ttl <= 0 {
            queue.handle_expired_key(&trigger_key).await;
            processed += 1;
        }
    }

    Ok(processed)
}
