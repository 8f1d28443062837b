//! MessageQueue trait definition

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Queue has not been created
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// Message was deleted or its receipt has expired
    #[error("message not found: {0}")]
    MessageNotFound(Uuid),

    /// Queue name is not acceptable to the backend
    #[error("invalid queue name: {0:?}")]
    InvalidName(String),

    /// Backend error
    #[error("queue backend error: {0}")]
    Backend(String),
}

/// A message handed out by [`MessageQueue::receive`]
///
/// The message stays invisible for the visibility timeout given to
/// `receive`. Deleting it requires the receipt of this delivery; once the
/// message has been handed out again the old receipt is stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub id: Uuid,
    pub queue: String,
    pub receipt: Uuid,
    pub body: String,
    /// How many times the message has been delivered, including this one
    pub dequeue_count: u32,
}

/// Transport queue with visibility-timeout delivery
///
/// Delivery is at-least-once. A received message that is not deleted
/// before its visibility timeout runs out is delivered again.
#[async_trait]
pub trait MessageQueue: Send + Sync + 'static {
    /// Create the queue unless it already exists
    async fn create_if_not_exists(&self, queue: &str) -> Result<(), QueueError>;

    /// Enqueue a message that becomes visible after `visibility_delay`
    async fn send(
        &self,
        queue: &str,
        body: &str,
        visibility_delay: Duration,
    ) -> Result<Uuid, QueueError>;

    /// Receive up to `max` visible messages, hiding them for `visibility_timeout`
    async fn receive(
        &self,
        queue: &str,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Delete a received message
    async fn delete(&self, message: &ReceivedMessage) -> Result<(), QueueError>;
}

/// Check a queue name: lowercase letters, digits and single hyphens,
/// 3 to 63 characters, starting and ending with a letter or digit
pub fn validate_queue_name(queue: &str) -> Result<(), QueueError> {
    let invalid = || QueueError::InvalidName(queue.to_string());

    if !(3..=63).contains(&queue.len()) {
        return Err(invalid());
    }
    if queue.starts_with('-') || queue.ends_with('-') || queue.contains("--") {
        return Err(invalid());
    }
    if !queue
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid());
    }
    Ok(())
}
