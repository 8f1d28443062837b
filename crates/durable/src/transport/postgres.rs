//! PostgreSQL implementation of MessageQueue
//!
//! Messages live in `inbound_queue_messages`. Receiving claims rows with
//! `FOR UPDATE SKIP LOCKED` and pushes their `visible_at` forward by the
//! visibility timeout, so any number of workers can poll one queue without
//! contending on the same rows.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::queue::*;

/// Postgres error code for a foreign key violation
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// PostgreSQL implementation of MessageQueue
///
/// # Example
///
/// ```ignore
/// use inbound_durable::PostgresMessageQueue;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/inbound").await?;
/// let queue = PostgresMessageQueue::new(pool);
/// queue.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresMessageQueue {
    pool: PgPool,
}

impl PostgresMessageQueue {
    /// Create a new queue backend over a connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `database_url`
    pub async fn connect(database_url: &str) -> Result<Self, QueueError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Apply the schema migrations shipped with this crate
    pub async fn migrate(&self) -> Result<(), QueueError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn backend(context: &'static str) -> impl Fn(sqlx::Error) -> QueueError {
    move |e| {
        error!("{context}: {e}");
        QueueError::Backend(e.to_string())
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl MessageQueue for PostgresMessageQueue {
    #[instrument(skip(self))]
    async fn create_if_not_exists(&self, queue: &str) -> Result<(), QueueError> {
        validate_queue_name(queue)?;

        sqlx::query("INSERT INTO inbound_queues (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(queue)
            .execute(&self.pool)
            .await
            .map_err(backend("Failed to create queue"))?;
        Ok(())
    }

    #[instrument(skip(self, body))]
    async fn send(
        &self,
        queue: &str,
        body: &str,
        visibility_delay: Duration,
    ) -> Result<Uuid, QueueError> {
        let id = Uuid::now_v7();

        let result = sqlx::query(
            r#"
            INSERT INTO inbound_queue_messages (id, queue_name, body, visible_at)
            VALUES ($1, $2, $3, NOW() + ($4::bigint * INTERVAL '1 millisecond'))
            "#,
        )
        .bind(id)
        .bind(queue)
        .bind(body)
        .bind(millis(visibility_delay))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(%id, queue, "enqueued message");
                Ok(id)
            }
            Err(sqlx::Error::Database(db))
                if db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) =>
            {
                Err(QueueError::QueueNotFound(queue.to_string()))
            }
            Err(e) => Err(backend("Failed to enqueue message")(e)),
        }
    }

    #[instrument(skip(self))]
    async fn receive(
        &self,
        queue: &str,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        if max == 0 {
            return Ok(vec![]);
        }
        let receipt = Uuid::new_v4();

        let rows = sqlx::query(
            r#"
            WITH visible AS (
                SELECT id
                FROM inbound_queue_messages
                WHERE queue_name = $1
                  AND visible_at <= NOW()
                ORDER BY visible_at, enqueued_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE inbound_queue_messages m
            SET visible_at = NOW() + ($3::bigint * INTERVAL '1 millisecond'),
                dequeue_count = m.dequeue_count + 1,
                pop_receipt = $4
            FROM visible v
            WHERE m.id = v.id
            RETURNING m.id, m.body, m.dequeue_count
            "#,
        )
        .bind(queue)
        .bind(i64::try_from(max).unwrap_or(i64::MAX))
        .bind(millis(visibility_timeout))
        .bind(receipt)
        .fetch_all(&self.pool)
        .await
        .map_err(backend("Failed to receive messages"))?;

        Ok(rows
            .into_iter()
            .map(|row| ReceivedMessage {
                id: row.get("id"),
                queue: queue.to_string(),
                receipt,
                body: row.get("body"),
                dequeue_count: u32::try_from(row.get::<i32, _>("dequeue_count")).unwrap_or(0),
            })
            .collect())
    }

    #[instrument(skip(self, message), fields(id = %message.id, queue = %message.queue))]
    async fn delete(&self, message: &ReceivedMessage) -> Result<(), QueueError> {
        let result =
            sqlx::query("DELETE FROM inbound_queue_messages WHERE id = $1 AND pop_receipt = $2")
                .bind(message.id)
                .bind(message.receipt)
                .execute(&self.pool)
                .await
                .map_err(backend("Failed to delete message"))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::MessageNotFound(message.id));
        }
        Ok(())
    }
}
