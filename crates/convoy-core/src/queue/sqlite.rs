//! Durable queue on the `queue_messages` table.
//!
//! `receive` leases the oldest visible message in one `UPDATE ... RETURNING`
//! statement, so two consumers can never hold the same lease. A message is
//! visible when it has no lease or its lease has expired; an expired lease is
//! how a crashed consumer's message comes back.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use super::{Delivery, QueueError, TaskQueue};
use crate::store::sqlite::encode_timestamp;
use crate::store::SqliteStore;

pub const DEFAULT_LEASE: Duration = Duration::from_secs(300);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
    lease: Duration,
    poll_interval: Duration,
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            lease: DEFAULT_LEASE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Share the pool (and therefore the database file) of a [`SqliteStore`].
    pub fn from_store(store: &SqliteStore) -> Self {
        Self::new(store.pool().clone())
    }

    /// How long a received message stays invisible without an ack.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Sleep between polls while the queue is empty.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Messages not yet acknowledged, leased or not.
    pub async fn depth(&self) -> Result<i64, QueueError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue_messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    fn lease_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let lease = chrono::Duration::from_std(self.lease).unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(lease).unwrap_or(now)
    }

    async fn try_lease(&self) -> Result<Option<Delivery>, QueueError> {
        let now = Utc::now();
        let leased_until = self.lease_deadline(now);

        let row: Option<(i64, String, i64)> = sqlx::query_as(
            "UPDATE queue_messages \
             SET leased_until = ?1, delivery_count = delivery_count + 1 \
             WHERE id = (SELECT id FROM queue_messages \
                         WHERE leased_until IS NULL OR leased_until <= ?2 \
                         ORDER BY id LIMIT 1) \
             RETURNING id, task_id, delivery_count",
        )
        .bind(encode_timestamp(leased_until))
        .bind(encode_timestamp(now))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(tag, task_id, deliveries)| Delivery {
            task_id,
            tag,
            attempt: u32::try_from(deliveries).unwrap_or(u32::MAX),
        }))
    }
}

impl TaskQueue for SqliteQueue {
    async fn publish(&self, task_id: &str) -> Result<(), QueueError> {
        sqlx::query("INSERT INTO queue_messages (task_id, enqueued_at) VALUES (?1, ?2)")
            .bind(task_id)
            .bind(encode_timestamp(Utc::now()))
            .execute(&self.pool)
            .await?;
        tracing::debug!(task_id, "task published");
        Ok(())
    }

    async fn receive(&self, cancel: &CancellationToken) -> Result<Option<Delivery>, QueueError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(delivery) = self.try_lease().await? {
                return Ok(Some(delivery));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM queue_messages WHERE id = ?1")
            .bind(delivery.tag)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        sqlx::query("UPDATE queue_messages SET leased_until = NULL WHERE id = ?1")
            .bind(delivery.tag)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// No-op once the message was handed out again after this delivery.
    async fn extend(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let leased_until = self.lease_deadline(Utc::now());
        sqlx::query(
            "UPDATE queue_messages SET leased_until = ?1 \
             WHERE id = ?2 AND delivery_count = ?3",
        )
        .bind(encode_timestamp(leased_until))
        .bind(delivery.tag)
        .bind(i64::from(delivery.attempt))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn lease(&self) -> Option<Duration> {
        Some(self.lease)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn queue() -> SqliteQueue {
        let store = SqliteStore::in_memory().await.unwrap();
        SqliteQueue::from_store(&store).with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn leased_message_is_invisible_until_settled() {
        let queue = queue().await;
        queue.publish("t-1").await.unwrap();
        let cancel = CancellationToken::new();

        let delivery = queue.receive(&cancel).await.unwrap().unwrap();
        assert_eq!(delivery.task_id, "t-1");
        assert_eq!(delivery.attempt, 1);
        assert!(queue.try_lease().await.unwrap().is_none());

        queue.ack(&delivery).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn nack_makes_message_visible_again() {
        let queue = queue().await;
        queue.publish("t-2").await.unwrap();
        let cancel = CancellationToken::new();

        let first = queue.receive(&cancel).await.unwrap().unwrap();
        queue.nack(&first).await.unwrap();
        let second = queue.receive(&cancel).await.unwrap().unwrap();
        assert_eq!(second.tag, first.tag);
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test]
    async fn expired_lease_is_redelivered() {
        let queue = queue().await.with_lease(Duration::ZERO);
        queue.publish("t-3").await.unwrap();
        let cancel = CancellationToken::new();

        let first = queue.receive(&cancel).await.unwrap().unwrap();
        // Never acked: the zero-length lease has already lapsed.
        let again = queue.receive(&cancel).await.unwrap().unwrap();
        assert_eq!(again.task_id, first.task_id);
        assert_eq!(again.attempt, 2);
    }

    #[tokio::test]
    async fn extended_lease_outlives_the_original() {
        let queue = queue().await.with_lease(Duration::from_millis(300));
        queue.publish("t-4").await.unwrap();
        let cancel = CancellationToken::new();

        let delivery = queue.receive(&cancel).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        queue.extend(&delivery).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(queue.try_lease().await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let again = queue.try_lease().await.unwrap().unwrap();
        assert_eq!(again.attempt, 2);
    }

    #[tokio::test]
    async fn stale_delivery_cannot_extend_a_newer_lease() {
        let queue = queue().await.with_lease(Duration::ZERO);
        queue.publish("t-5").await.unwrap();
        let cancel = CancellationToken::new();

        let stale = queue.receive(&cancel).await.unwrap().unwrap();
        let current = queue.receive(&cancel).await.unwrap().unwrap();
        assert_eq!(current.attempt, 2);

        let queue = queue.with_lease(Duration::from_secs(60));
        queue.extend(&stale).await.unwrap();
        assert!(queue.try_lease().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let queue = queue().await;
        for id in ["a", "b", "c"] {
            queue.publish(id).await.unwrap();
        }
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();
        for _ in 0..3 {
            let d = queue.receive(&cancel).await.unwrap().unwrap();
            queue.ack(&d).await.unwrap();
            seen.push(d.task_id);
        }
        assert_eq!(seen, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn empty_queue_receive_stops_on_cancel() {
        let queue = queue().await;
        let cancel = CancellationToken::new();
        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.receive(&cancel).await })
        };
        cancel.cancel();
        assert!(waiter.await.unwrap().unwrap().is_none());
    }
}
