//! Worker pool for queue consumption
//!
//! Runs one poll loop per subscribed queue and applies the transport
//! delivery policy: a handler `Ok` deletes the message, an `Err` leaves it
//! to reappear after its visibility timeout, and a message delivered more
//! than `max_dequeue_count` times is moved to `<queue>-poison`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::poller::{PollerConfig, QueuePoller};
use crate::transport::{MessageQueue, QueueError, ReceivedMessage};

/// Suffix of the dead-letter queue paired with every consumed queue
pub const POISON_SUFFIX: &str = "-poison";

/// Name of the dead-letter queue for `queue`
pub fn poison_queue_name(queue: &str) -> String {
    format!("{queue}{POISON_SUFFIX}")
}

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct QueuePoolConfig {
    /// Unique worker ID (generated if not provided)
    pub worker_id: String,

    /// Maximum concurrent message handlers across all queues
    pub max_concurrency: usize,

    /// Deliveries allowed before a message is dead-lettered
    pub max_dequeue_count: u32,

    /// Poller configuration
    pub poller: PollerConfig,

    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl Default for QueuePoolConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            max_concurrency: 10,
            max_dequeue_count: 5,
            poller: PollerConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl QueuePoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_max_dequeue_count(mut self, max: u32) -> Self {
        self.max_dequeue_count = max.max(1);
        self
    }

    pub fn with_poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePoolStatus {
    Running,
    /// Finishing in-flight handlers, not receiving new messages
    Draining,
    Stopped,
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum QueuePoolError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("worker pool is already running")]
    AlreadyRunning,

    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

/// Message handling result; `Err` leaves the message for redelivery
pub type HandlerResult = Result<(), String>;

/// Message handler function type
pub type MessageHandler = Arc<
    dyn Fn(ReceivedMessage) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync,
>;

/// Worker pool consuming transport queues
///
/// # Example
///
/// ```ignore
/// use inbound_durable::worker::{QueuePool, QueuePoolConfig};
///
/// let pool = QueuePool::new(queue, QueuePoolConfig::new().with_max_concurrency(10));
///
/// pool.register_handler("pii-in", move |message| {
///     let executor = executor.clone();
///     async move {
///         executor.execute(&message.body, &ctx).await.map(|_| ()).map_err(|e| e.to_string())
///     }
/// });
///
/// pool.start().await?;
/// // ... later
/// pool.shutdown().await?;
/// ```
pub struct QueuePool {
    queue: Arc<dyn MessageQueue>,
    config: QueuePoolConfig,
    handlers: RwLock<HashMap<String, MessageHandler>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    status: RwLock<QueuePoolStatus>,
    active_handlers: Arc<Semaphore>,
    poll_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl QueuePool {
    pub fn new(queue: Arc<dyn MessageQueue>, config: QueuePoolConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            queue,
            active_handlers: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            handlers: RwLock::new(HashMap::new()),
            shutdown_tx,
            shutdown_rx,
            status: RwLock::new(QueuePoolStatus::Stopped),
            poll_handles: Mutex::new(Vec::new()),
        }
    }

    /// Register the handler for a queue
    pub fn register_handler<F, Fut>(&self, queue_name: &str, handler: F)
    where
        F: Fn(ReceivedMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: MessageHandler = Arc::new(move |message| Box::pin(handler(message)));
        self.handlers
            .write()
            .insert(queue_name.to_string(), handler);
    }

    /// Queues with a registered handler, sorted
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Create every subscribed queue and start polling
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn start(&self) -> Result<(), QueuePoolError> {
        if self.status() == QueuePoolStatus::Running {
            return Err(QueuePoolError::AlreadyRunning);
        }

        let handlers: Vec<(String, MessageHandler)> = self
            .handlers
            .read()
            .iter()
            .map(|(name, handler)| (name.clone(), Arc::clone(handler)))
            .collect();

        for (name, _) in &handlers {
            self.queue.create_if_not_exists(name).await?;
        }

        info!(
            queues = ?handlers.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            max_concurrency = self.config.max_concurrency,
            "Starting worker pool"
        );

        *self.status.write() = QueuePoolStatus::Running;
        let mut poll_handles = self.poll_handles.lock();
        for (name, handler) in handlers {
            poll_handles.push(self.spawn_poll_loop(name, handler));
        }
        Ok(())
    }

    /// Stop receiving and wait for in-flight handlers
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), QueuePoolError> {
        if self.status() == QueuePoolStatus::Stopped {
            return Ok(());
        }

        info!("Initiating graceful shutdown");
        *self.status.write() = QueuePoolStatus::Draining;
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = self.poll_handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Poll loop panicked: {}", e);
            }
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            let available = self.active_handlers.available_permits();
            if available == self.config.max_concurrency {
                debug!("All handlers completed");
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.config.max_concurrency - available,
                    "Shutdown timeout reached"
                );
                return Err(QueuePoolError::ShutdownTimeout);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        *self.status.write() = QueuePoolStatus::Stopped;
        info!("Worker pool stopped");
        Ok(())
    }

    pub fn status(&self) -> QueuePoolStatus {
        *self.status.read()
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Number of handlers currently running
    pub fn active_handlers(&self) -> usize {
        self.config.max_concurrency - self.active_handlers.available_permits()
    }

    fn spawn_poll_loop(&self, queue_name: String, handler: MessageHandler) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let active_handlers = Arc::clone(&self.active_handlers);
        let max_dequeue_count = self.config.max_dequeue_count;
        let mut poller = QueuePoller::new(
            Arc::clone(&queue),
            queue_name.clone(),
            self.config.poller.clone(),
            self.shutdown_rx.clone(),
        );

        tokio::spawn(async move {
            loop {
                if poller.is_shutdown() {
                    debug!(queue = %queue_name, "Poll loop: shutdown requested");
                    break;
                }

                let available = active_handlers.available_permits();
                if available == 0 {
                    if poller.wait().await {
                        break;
                    }
                    continue;
                }

                match poller.poll(available).await {
                    Ok(messages) => {
                        for message in messages {
                            if message.dequeue_count > max_dequeue_count {
                                dead_letter(queue.as_ref(), &message).await;
                                continue;
                            }

                            let permit = match Arc::clone(&active_handlers).try_acquire_owned() {
                                Ok(p) => p,
                                Err(_) => {
                                    debug!("No permits available");
                                    break;
                                }
                            };

                            let queue = Arc::clone(&queue);
                            let handler = Arc::clone(&handler);
                            tokio::spawn(async move {
                                let id = message.id;
                                match handler(message.clone()).await {
                                    Ok(()) => {
                                        if let Err(e) = queue.delete(&message).await {
                                            warn!(%id, "Failed to delete handled message: {}", e);
                                        }
                                    }
                                    Err(e) => {
                                        warn!(
                                            %id,
                                            queue = %message.queue,
                                            dequeue_count = message.dequeue_count,
                                            "Handler failed, message left for redelivery: {}",
                                            e
                                        );
                                    }
                                }
                                drop(permit);
                            });
                        }
                    }
                    Err(e) => {
                        error!(queue = %queue_name, "Poll error: {}", e);
                    }
                }

                if poller.wait().await {
                    break;
                }
            }

            debug!(queue = %queue_name, "Poll loop exited");
        })
    }
}

/// Move a message that keeps failing to the poison queue
async fn dead_letter(queue: &dyn MessageQueue, message: &ReceivedMessage) {
    let poison = poison_queue_name(&message.queue);
    warn!(
        id = %message.id,
        queue = %message.queue,
        dequeue_count = message.dequeue_count,
        %poison,
        "Moving message to poison queue"
    );

    let moved = async {
        queue.create_if_not_exists(&poison).await?;
        queue.send(&poison, &message.body, Duration::ZERO).await?;
        queue.delete(message).await
    };
    if let Err(e) = moved.await {
        error!(id = %message.id, "Failed to dead-letter message: {}", e);
    }
}
