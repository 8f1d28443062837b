//! In-memory implementation of MessageQueue for testing and local runs

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use super::queue::*;

struct StoredMessage {
    id: Uuid,
    body: String,
    visible_at: Instant,
    delay: Duration,
    dequeue_count: u32,
    receipt: Option<Uuid>,
}

/// In-memory implementation of MessageQueue
///
/// Visibility is tracked with `tokio::time::Instant`, so tests running on a
/// paused clock can step past delays with `tokio::time::advance`.
///
/// # Example
///
/// ```
/// use inbound_durable::InMemoryMessageQueue;
///
/// let queue = InMemoryMessageQueue::new();
/// ```
#[derive(Default)]
pub struct InMemoryMessageQueue {
    queues: RwLock<HashMap<String, VecDeque<StoredMessage>>>,
}

impl InMemoryMessageQueue {
    /// Create a new in-memory queue backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all created queues, sorted
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of messages in a queue, visible or not
    pub fn len(&self, queue: &str) -> usize {
        self.queues.read().get(queue).map_or(0, VecDeque::len)
    }

    /// Whether a queue holds no messages
    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    /// Bodies of every message in a queue, in enqueue order
    pub fn bodies(&self, queue: &str) -> Vec<String> {
        self.queues
            .read()
            .get(queue)
            .map(|q| q.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Bodies and send delays of every message in a queue
    pub fn delayed_bodies(&self, queue: &str) -> Vec<(String, Duration)> {
        self.queues
            .read()
            .get(queue)
            .map(|q| q.iter().map(|m| (m.body.clone(), m.delay)).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn create_if_not_exists(&self, queue: &str) -> Result<(), QueueError> {
        validate_queue_name(queue)?;
        self.queues.write().entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn send(
        &self,
        queue: &str,
        body: &str,
        visibility_delay: Duration,
    ) -> Result<Uuid, QueueError> {
        let mut queues = self.queues.write();
        let messages = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))?;

        let id = Uuid::now_v7();
        messages.push_back(StoredMessage {
            id,
            body: body.to_string(),
            visible_at: Instant::now() + visibility_delay,
            delay: visibility_delay,
            dequeue_count: 0,
            receipt: None,
        });
        Ok(id)
    }

    async fn receive(
        &self,
        queue: &str,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut queues = self.queues.write();
        let messages = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))?;

        let now = Instant::now();
        let mut received = Vec::new();
        for message in messages.iter_mut() {
            if received.len() >= max {
                break;
            }
            if message.visible_at > now {
                continue;
            }

            let receipt = Uuid::new_v4();
            message.visible_at = now + visibility_timeout;
            message.dequeue_count += 1;
            message.receipt = Some(receipt);

            received.push(ReceivedMessage {
                id: message.id,
                queue: queue.to_string(),
                receipt,
                body: message.body.clone(),
                dequeue_count: message.dequeue_count,
            });
        }
        Ok(received)
    }

    async fn delete(&self, message: &ReceivedMessage) -> Result<(), QueueError> {
        let mut queues = self.queues.write();
        let messages = queues
            .get_mut(&message.queue)
            .ok_or_else(|| QueueError::QueueNotFound(message.queue.clone()))?;

        let position = messages
            .iter()
            .position(|m| m.id == message.id && m.receipt == Some(message.receipt))
            .ok_or(QueueError::MessageNotFound(message.id))?;
        messages.remove(position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(60);

    async fn queue_with(name: &str) -> InMemoryMessageQueue {
        let queue = InMemoryMessageQueue::new();
        queue.create_if_not_exists(name).await.unwrap();
        queue
    }

    #[tokio::test]
    async fn test_send_requires_existing_queue() {
        let queue = InMemoryMessageQueue::new();
        let err = queue.send("pii-in", "x", Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, QueueError::QueueNotFound(_)));
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let queue = queue_with("pii-in").await;
        queue.send("pii-in", "x", Duration::ZERO).await.unwrap();
        queue.create_if_not_exists("pii-in").await.unwrap();
        assert_eq!(queue.len("pii-in"), 1);
    }

    #[tokio::test]
    async fn test_receive_hides_message_until_timeout() {
        tokio::time::pause();
        let queue = queue_with("pii-in").await;
        queue.send("pii-in", "hello", Duration::ZERO).await.unwrap();

        let first = queue.receive("pii-in", 10, TIMEOUT).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].dequeue_count, 1);
        assert!(queue
            .receive("pii-in", 10, TIMEOUT)
            .await
            .unwrap()
            .is_empty());

        tokio::time::advance(TIMEOUT + Duration::from_secs(1)).await;

        let second = queue.receive("pii-in", 10, TIMEOUT).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].dequeue_count, 2);
        assert_eq!(second[0].body, "hello");
    }

    #[tokio::test]
    async fn test_visibility_delay() {
        tokio::time::pause();
        let queue = queue_with("poll-queue").await;
        queue
            .send("poll-queue", "later", Duration::from_secs(30))
            .await
            .unwrap();

        assert!(queue
            .receive("poll-queue", 1, TIMEOUT)
            .await
            .unwrap()
            .is_empty());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(queue.receive("poll-queue", 1, TIMEOUT).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_with_stale_receipt_fails() {
        tokio::time::pause();
        let queue = queue_with("pii-in").await;
        queue.send("pii-in", "x", Duration::ZERO).await.unwrap();

        let stale = queue.receive("pii-in", 1, TIMEOUT).await.unwrap().remove(0);
        tokio::time::advance(TIMEOUT).await;
        let fresh = queue.receive("pii-in", 1, TIMEOUT).await.unwrap().remove(0);

        assert!(matches!(
            queue.delete(&stale).await,
            Err(QueueError::MessageNotFound(_))
        ));
        queue.delete(&fresh).await.unwrap();
        assert!(queue.is_empty("pii-in"));
    }

    #[tokio::test]
    async fn test_receive_respects_max() {
        let queue = queue_with("pii-in").await;
        for i in 0..5 {
            queue
                .send("pii-in", &i.to_string(), Duration::ZERO)
                .await
                .unwrap();
        }
        let batch = queue.receive("pii-in", 3, TIMEOUT).await.unwrap();
        let bodies: Vec<_> = batch.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["0", "1", "2"]);
    }
}
