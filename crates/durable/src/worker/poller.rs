//! Queue polling with exponential backoff
//!
//! An idle queue is polled less and less often, up to `max_interval`; the
//! first non-empty receive snaps the interval back to `min_interval`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, instrument, trace};

use crate::transport::{MessageQueue, QueueError, ReceivedMessage};

/// Polling configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Interval while messages are flowing
    pub min_interval: Duration,
    /// Upper bound of the idle interval
    pub max_interval: Duration,
    /// Growth factor applied after each empty receive
    pub backoff_multiplier: f64,
    /// Maximum messages to receive per poll
    pub batch_size: usize,
    /// How long a received message stays hidden from other consumers
    pub visibility_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            batch_size: 16,
            visibility_timeout: Duration::from_secs(300),
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_interval(self, min_interval: Duration) -> Self {
        Self { min_interval, ..self }
    }

    pub fn with_max_interval(self, max_interval: Duration) -> Self {
        Self { max_interval, ..self }
    }

    pub fn with_backoff_multiplier(self, multiplier: f64) -> Self {
        Self {
            backoff_multiplier: multiplier.max(1.0),
            ..self
        }
    }

    pub fn with_batch_size(self, size: usize) -> Self {
        Self {
            batch_size: size.max(1),
            ..self
        }
    }

    pub fn with_visibility_timeout(self, visibility_timeout: Duration) -> Self {
        Self {
            visibility_timeout,
            ..self
        }
    }
}

/// Idle interval state of one poll loop
#[derive(Debug, Clone, Copy)]
struct IdleBackoff {
    floor: Duration,
    ceiling: Duration,
    factor: f64,
    current: Duration,
}

impl IdleBackoff {
    fn from_config(config: &PollerConfig) -> Self {
        Self {
            floor: config.min_interval,
            ceiling: config.max_interval.max(config.min_interval),
            factor: config.backoff_multiplier,
            current: config.min_interval,
        }
    }

    fn record(&mut self, received: usize) {
        self.current = if received > 0 {
            self.floor
        } else {
            Duration::from_secs_f64(self.current.as_secs_f64() * self.factor).min(self.ceiling)
        };
    }
}

/// Poller for one queue
pub struct QueuePoller {
    queue: Arc<dyn MessageQueue>,
    queue_name: String,
    batch_size: usize,
    visibility_timeout: Duration,
    backoff: IdleBackoff,
    shutdown_rx: watch::Receiver<bool>,
}

impl QueuePoller {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        queue_name: impl Into<String>,
        config: PollerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
            batch_size: config.batch_size,
            visibility_timeout: config.visibility_timeout,
            backoff: IdleBackoff::from_config(&config),
            shutdown_rx,
        }
    }

    /// Receive up to `max_messages` (capped by the batch size)
    #[instrument(skip(self), fields(queue = %self.queue_name))]
    pub async fn poll(&mut self, max_messages: usize) -> Result<Vec<ReceivedMessage>, QueueError> {
        if self.is_shutdown() {
            return Ok(Vec::new());
        }

        let messages = self
            .queue
            .receive(
                &self.queue_name,
                max_messages.min(self.batch_size),
                self.visibility_timeout,
            )
            .await?;
        self.backoff.record(messages.len());

        if messages.is_empty() {
            trace!(interval_ms = self.backoff.current.as_millis(), "Queue idle");
        } else {
            debug!(count = messages.len(), "Received messages");
        }
        Ok(messages)
    }

    /// Sleep for the current interval; `true` when shutdown interrupted it
    pub async fn wait(&mut self) -> bool {
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.backoff.current) => false,
            _ = shutdown_rx.changed() => true,
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.backoff.current
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}
