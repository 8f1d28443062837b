//! Queue router / dispatcher

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::alerting::AlertPublisher;
use crate::config::RoutingTable;
use crate::envelope::{codec, EnvelopeError, WorkflowEnvelope};
use crate::transport::{MessageQueue, QueueError};

/// Error type for dispatch
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Encode(#[from] EnvelopeError),
}

/// Sends to queues, creating each one before its first use
///
/// The known-queue set only saves round trips; creation itself is
/// idempotent on every backend.
pub struct QueueSender {
    queue: Arc<dyn MessageQueue>,
    known: Mutex<HashSet<String>>,
}

impl QueueSender {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self {
            queue,
            known: Mutex::new(HashSet::new()),
        }
    }

    /// The underlying transport
    pub fn transport(&self) -> &Arc<dyn MessageQueue> {
        &self.queue
    }

    /// Create the queue unless this sender has already done so
    pub async fn ensure(&self, name: &str) -> Result<(), QueueError> {
        let mut known = self.known.lock().await;
        if !known.contains(name) {
            self.queue.create_if_not_exists(name).await?;
            known.insert(name.to_string());
        }
        Ok(())
    }

    pub async fn send(
        &self,
        name: &str,
        body: &str,
        visibility_delay: Duration,
    ) -> Result<Uuid, QueueError> {
        self.ensure(name).await?;
        self.queue.send(name, body, visibility_delay).await
    }
}

/// What [`Dispatcher::route`] did with an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Enqueued on the step's queue
    Enqueued { queue: String, message_id: Uuid },
    /// No queue configured for the step; alerted and dropped
    Unroutable,
    /// Envelope had already failed; dropped
    Refused,
}

/// Routes envelopes to the queue of their current step
pub struct Dispatcher {
    sender: Arc<QueueSender>,
    routing: RoutingTable,
    alerts: Arc<AlertPublisher>,
}

impl Dispatcher {
    pub fn new(
        sender: Arc<QueueSender>,
        routing: RoutingTable,
        alerts: Arc<AlertPublisher>,
    ) -> Self {
        Self {
            sender,
            routing,
            alerts,
        }
    }

    pub fn sender(&self) -> &Arc<QueueSender> {
        &self.sender
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    /// Enqueue an envelope on the queue of its current step
    ///
    /// An unknown step is a configuration error: it is alerted and the
    /// envelope dropped, since redelivery would reproduce it. Queue errors
    /// are returned to the caller.
    #[instrument(
        skip(self, envelope),
        fields(reference_id = %envelope.reference_id, step = %envelope.current_step)
    )]
    pub async fn route(&self, envelope: &WorkflowEnvelope) -> Result<RouteOutcome, DispatchError> {
        if envelope.is_terminal() {
            warn!("refusing to dispatch a failed envelope");
            return Ok(RouteOutcome::Refused);
        }

        let Some(queue) = self.routing.queue_for(&envelope.current_step) else {
            error!("no queue configured for step");
            self.alerts
                .publish_alert(
                    &envelope.blob_path,
                    Some(&envelope.reference_id),
                    &envelope.current_step,
                    &format!("no queue configured for step '{}'", envelope.current_step),
                )
                .await;
            return Ok(RouteOutcome::Unroutable);
        };

        let body = codec::encode(envelope)?;
        let message_id = self.sender.send(queue, &body, Duration::ZERO).await?;

        info!(queue, %message_id, "dispatched envelope");
        debug!(remaining = envelope.remaining_steps.len(), "envelope dispatched");
        Ok(RouteOutcome::Enqueued {
            queue: queue.to_string(),
            message_id,
        })
    }
}
