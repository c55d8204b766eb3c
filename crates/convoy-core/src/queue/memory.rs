use std::sync::atomic::{AtomicI64, Ordering};

use tokio_util::sync::CancellationToken;

use super::{Delivery, QueueError, TaskQueue};

#[derive(Debug)]
struct Envelope {
    task_id: String,
    tag: i64,
    deliveries: u32,
}

/// In-process queue over an unbounded `flume` channel.
///
/// Messages survive only as long as the process; `nack` re-sends the message
/// to the back of the channel.
#[derive(Debug)]
pub struct MemoryQueue {
    tx: flume::Sender<Envelope>,
    rx: flume::Receiver<Envelope>,
    next_tag: AtomicI64,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            next_tag: AtomicI64::new(1),
        }
    }

    /// Messages waiting to be received.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl TaskQueue for MemoryQueue {
    async fn publish(&self, task_id: &str) -> Result<(), QueueError> {
        let envelope = Envelope {
            task_id: task_id.to_owned(),
            tag: self.next_tag.fetch_add(1, Ordering::Relaxed),
            deliveries: 0,
        };
        self.tx.send(envelope).map_err(|_| QueueError::Closed)
    }

    async fn receive(&self, cancel: &CancellationToken) -> Result<Option<Delivery>, QueueError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            next = self.rx.recv_async() => {
                let envelope = next.map_err(|_| QueueError::Closed)?;
                Ok(Some(Delivery {
                    task_id: envelope.task_id,
                    tag: envelope.tag,
                    attempt: envelope.deliveries + 1,
                }))
            }
        }
    }

    async fn ack(&self, _delivery: &Delivery) -> Result<(), QueueError> {
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let envelope = Envelope {
            task_id: delivery.task_id.clone(),
            tag: delivery.tag,
            deliveries: delivery.attempt,
        };
        self.tx.send(envelope).map_err(|_| QueueError::Closed)
    }

    /// Received messages stay with their consumer until settled.
    async fn extend(&self, _delivery: &Delivery) -> Result<(), QueueError> {
        Ok(())
    }
}
