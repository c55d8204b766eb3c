//! Task-identifier queue.
//!
//! The queue decouples task creation from execution and carries nothing but
//! task ids. Delivery is at-least-once: a [`Delivery`] that is neither
//! acknowledged nor rejected before its consumer goes away becomes visible
//! again. Ordering across tasks is not guaranteed.
//!
//! Two implementations ship with the crate:
//! - [`SqliteQueue`] – durable, lease-based, shares the store's pool.
//! - [`MemoryQueue`] – `flume` channel for tests and single-process runs.
//!
//! [`AnyQueue`] lets the binary pick one at startup.

mod memory;
mod sqlite;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use memory::MemoryQueue;
pub use sqlite::SqliteQueue;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue can no longer deliver or accept messages.
    #[error("queue closed")]
    Closed,

    #[error("queue database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// One handed-out message. Must be settled with `ack` or `nack`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub task_id: String,
    /// Implementation-specific receipt identifying this message.
    pub tag: i64,
    /// How many times the message has been handed out, including this one.
    pub attempt: u32,
}

/// At-least-once queue of task identifiers.
pub trait TaskQueue: Send + Sync + 'static {
    /// Enqueue `task_id`; durable until acknowledged.
    fn publish(&self, task_id: &str) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Wait for the next message. Resolves to `None` once `cancel` fires.
    fn receive(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Option<Delivery>, QueueError>> + Send;

    /// Remove a processed message for good.
    fn ack(&self, delivery: &Delivery) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Return a message to the queue for redelivery.
    fn nack(&self, delivery: &Delivery) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Keep an unsettled message invisible for another full lease.
    fn extend(&self, delivery: &Delivery) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// How long a message stays invisible after `receive` or `extend`.
    /// `None` when deliveries never time out.
    fn lease(&self) -> Option<Duration> {
        None
    }
}

/// Continuous stream of deliveries, ending when `cancel` fires.
///
/// Receive errors are yielded in-band so the consumer decides whether to
/// back off or give up.
pub fn consume<Q: TaskQueue>(
    queue: Arc<Q>,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Delivery, QueueError>> + Send {
    futures::stream::unfold((queue, cancel), |(queue, cancel)| async move {
        match queue.receive(&cancel).await {
            Ok(Some(delivery)) => Some((Ok(delivery), (queue, cancel))),
            Ok(None) => None,
            Err(e) => Some((Err(e), (queue, cancel))),
        }
    })
}

/// Runtime-selected queue backend.
#[derive(Debug)]
pub enum AnyQueue {
    Sqlite(SqliteQueue),
    Memory(MemoryQueue),
}

impl TaskQueue for AnyQueue {
    async fn publish(&self, task_id: &str) -> Result<(), QueueError> {
        match self {
            AnyQueue::Sqlite(q) => q.publish(task_id).await,
            AnyQueue::Memory(q) => q.publish(task_id).await,
        }
    }

    async fn receive(&self, cancel: &CancellationToken) -> Result<Option<Delivery>, QueueError> {
        match self {
            AnyQueue::Sqlite(q) => q.receive(cancel).await,
            AnyQueue::Memory(q) => q.receive(cancel).await,
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        match self {
            AnyQueue::Sqlite(q) => q.ack(delivery).await,
            AnyQueue::Memory(q) => q.ack(delivery).await,
        }
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        match self {
            AnyQueue::Sqlite(q) => q.nack(delivery).await,
            AnyQueue::Memory(q) => q.nack(delivery).await,
        }
    }

    async fn extend(&self, delivery: &Delivery) -> Result<(), QueueError> {
        match self {
            AnyQueue::Sqlite(q) => q.extend(delivery).await,
            AnyQueue::Memory(q) => q.extend(delivery).await,
        }
    }

    fn lease(&self) -> Option<Duration> {
        match self {
            AnyQueue::Sqlite(q) => q.lease(),
            AnyQueue::Memory(q) => q.lease(),
        }
    }
}
