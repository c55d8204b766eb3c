//! Fixed-size pool of queue consumers.
//!
//! Each worker pulls one delivery at a time, marks the task `running` before
//! any external call, runs the [`Migrator`], and records the terminal status.
//! A delivery is acknowledged only after that final write, so a crash between
//! consume and ack leads to redelivery rather than a lost task.
//!
//! While a task runs, its delivery's lease is renewed at a third of the
//! queue's lease so no other worker picks the same message up.
//!
//! Cancellation stops workers from taking new deliveries; a task already in
//! progress runs to completion and [`WorkerPoolHandle::shutdown`] waits for it.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::migrator::{MIGRATED, Migrator};
use crate::model::TaskStatus;
use crate::queue::{self, Delivery, TaskQueue};
use crate::store::{StoreError, TaskStore};

const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

/// What to do with a delivery once processing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    Ack,
    Nack,
}

pub struct WorkerPool<T, Q> {
    store: Arc<T>,
    queue: Arc<Q>,
    migrator: Arc<dyn Migrator>,
    size: usize,
    receive_backoff: Duration,
    heartbeat: Option<Duration>,
}

impl<T, Q> Clone for WorkerPool<T, Q> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            queue: Arc::clone(&self.queue),
            migrator: Arc::clone(&self.migrator),
            size: self.size,
            receive_backoff: self.receive_backoff,
            heartbeat: self.heartbeat,
        }
    }
}

impl<T: TaskStore, Q: TaskQueue> WorkerPool<T, Q> {
    pub fn new(store: Arc<T>, queue: Arc<Q>, migrator: Arc<dyn Migrator>, size: usize) -> Self {
        let heartbeat = queue.lease().map(|lease| lease / 3).filter(|every| !every.is_zero());
        Self {
            store,
            queue,
            migrator,
            size: size.max(1),
            receive_backoff: RECEIVE_BACKOFF,
            heartbeat,
        }
    }

    /// Pause after a failed receive before trying again.
    pub fn with_receive_backoff(mut self, backoff: Duration) -> Self {
        self.receive_backoff = backoff;
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawn the consumers. They run until `cancel` fires.
    pub fn start(&self, cancel: CancellationToken) -> WorkerPoolHandle {
        let mut workers = JoinSet::new();
        for worker in 0..self.size {
            let pool = self.clone();
            let cancel = cancel.clone();
            workers.spawn(async move { pool.run_worker(worker, cancel).await });
        }
        tracing::info!(workers = self.size, "worker pool started");
        WorkerPoolHandle { workers, cancel }
    }

    async fn run_worker(self, worker: usize, cancel: CancellationToken) {
        let mut deliveries = std::pin::pin!(queue::consume(Arc::clone(&self.queue), cancel.clone()));
        while let Some(next) = deliveries.next().await {
            match next {
                Ok(delivery) => {
                    let span = tracing::info_span!(
                        "task",
                        task_id = %delivery.task_id,
                        worker,
                        attempt = delivery.attempt
                    );
                    self.handle(delivery).instrument(span).await;
                }
                Err(e) => {
                    tracing::warn!(worker, error = %e, "queue receive failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.receive_backoff) => {}
                    }
                }
            }
        }
        tracing::debug!(worker, "worker stopped");
    }

    /// Process one delivery and settle it with the queue.
    pub(crate) async fn handle(&self, delivery: Delivery) {
        let outcome = match self.heartbeat {
            Some(every) => tokio::select! {
                outcome = self.process(&delivery) => outcome,
                never = self.keep_leased(&delivery, every) => match never {},
            },
            None => self.process(&delivery).await,
        };
        let settled = match outcome {
            Settle::Ack => self.queue.ack(&delivery).await,
            Settle::Nack => self.queue.nack(&delivery).await,
        };
        if let Err(e) = settled {
            tracing::error!(error = %e, "failed to settle delivery");
        }
    }

    /// Renew the lease every `every` until dropped.
    async fn keep_leased(&self, delivery: &Delivery, every: Duration) -> Infallible {
        let mut ticks = tokio::time::interval(every);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticks.tick().await;
        loop {
            ticks.tick().await;
            if let Err(e) = self.queue.extend(delivery).await {
                tracing::warn!(error = %e, "failed to extend delivery lease");
            }
        }
    }

    async fn process(&self, delivery: &Delivery) -> Settle {
        let mut task = match self.store.get_task(&delivery.task_id).await {
            Ok(task) => task,
            Err(e) if e.is_not_found() => {
                tracing::warn!("unknown task id; dropping delivery");
                return Settle::Ack;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load task");
                return Settle::Nack;
            }
        };
        if task.status.is_terminal() {
            tracing::info!(status = %task.status, "task already finished; skipping");
            return Settle::Ack;
        }

        task.status = TaskStatus::Running;
        if let Err(e) = self.store.update_task(&mut task).await {
            return settle_failed_write(e, "running");
        }
        tracing::info!("task running");

        match self.migrator.migrate(&task).await {
            Ok(report) => {
                task.status = TaskStatus::Success;
                task.result = MIGRATED.to_owned();
                task.error.clear();
                tracing::info!(
                    team_id = %report.team_id,
                    channel_id = %report.channel_id,
                    messages_posted = report.messages_posted,
                    unmapped_senders = report.unmapped_senders.len(),
                    members_added = report.members_added,
                    "task succeeded"
                );
            }
            Err(e) if e.is_cancelled() => {
                tracing::warn!(error = %e, "task interrupted by shutdown; returning to queue");
                return Settle::Nack;
            }
            Err(e) => {
                task.status = TaskStatus::Failed;
                task.error = e.to_string();
                tracing::warn!(error = %e, "task failed");
            }
        }

        match self.store.update_task(&mut task).await {
            Ok(()) => Settle::Ack,
            Err(e) => settle_failed_write(e, task.status.as_ref()),
        }
    }
}

/// A rejected transition means another worker already finished the task.
fn settle_failed_write(error: StoreError, status: &str) -> Settle {
    match error {
        StoreError::InvalidTransition { from, .. } => {
            tracing::info!(current = %from, "task settled elsewhere; dropping delivery");
            Settle::Ack
        }
        StoreError::NotFound { .. } => {
            tracing::warn!("task vanished while processing; dropping delivery");
            Settle::Ack
        }
        e => {
            tracing::error!(error = %e, status, "failed to record task status");
            Settle::Nack
        }
    }
}

/// Running pool. Dropping it aborts the workers, in-flight tasks included;
/// call [`shutdown`](Self::shutdown) to let them finish.
pub struct WorkerPoolHandle {
    workers: JoinSet<()>,
    cancel: CancellationToken,
}

impl WorkerPoolHandle {
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop taking deliveries and wait for in-flight tasks to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.join().await;
    }

    /// Wait for every worker to exit.
    pub async fn join(mut self) {
        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "worker task panicked");
            }
        }
        tracing::info!("worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;
    use tracing_test::traced_test;

    use super::*;
    use crate::migrator::{ClientError, MigrationError, MigrationReport};
    use crate::model::{Task, TaskPayload};
    use crate::poller::PollError;
    use crate::queue::{MemoryQueue, SqliteQueue};
    use crate::store::SqliteStore;

    enum Behaviour {
        Succeed,
        Fail,
        Cancelled,
        /// Signal `started`, then wait for `release` before succeeding.
        Gate { started: Arc<Notify>, release: Arc<Notify> },
        /// Succeed after the given time.
        Slow(Duration),
    }

    struct FakeMigrator {
        behaviour: Behaviour,
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl FakeMigrator {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Migrator for FakeMigrator {
        async fn migrate(&self, _task: &Task) -> Result<MigrationReport, MigrationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(running, Ordering::SeqCst);
            let result = self.run().await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    impl FakeMigrator {
        async fn run(&self) -> Result<MigrationReport, MigrationError> {
            match &self.behaviour {
                Behaviour::Succeed => Ok(MigrationReport::default()),
                Behaviour::Fail => Err(MigrationError::SourceFetch {
                    stage: "fetch messages",
                    source: ClientError::Status {
                        service: "zoom",
                        status: 500,
                        body: "down".into(),
                    },
                }),
                Behaviour::Cancelled => Err(MigrationError::DestinationProvision {
                    stage: "ensure team",
                    source: ClientError::Poll(PollError::Cancelled),
                }),
                Behaviour::Gate { started, release } => {
                    started.notify_one();
                    release.notified().await;
                    Ok(MigrationReport::default())
                }
                Behaviour::Slow(duration) => {
                    tokio::time::sleep(*duration).await;
                    Ok(MigrationReport::default())
                }
            }
        }
    }

    struct Fixture {
        store: Arc<SqliteStore>,
        queue: Arc<MemoryQueue>,
        pool: WorkerPool<SqliteStore, MemoryQueue>,
    }

    async fn fixture(migrator: Arc<FakeMigrator>) -> Fixture {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let queue = Arc::new(MemoryQueue::new());
        let pool = WorkerPool::new(store.clone(), queue.clone(), migrator, 2);
        Fixture { store, queue, pool }
    }

    async fn enqueue(fx: &Fixture) -> String {
        let mut payload = TaskPayload::new();
        payload.insert("conversation_id".into(), "room-1".into());
        let id = fx.store.create_task(Task::new("zoom", "teams", payload)).await.unwrap();
        fx.queue.publish(&id).await.unwrap();
        id
    }

    async fn next_delivery(queue: &MemoryQueue) -> Delivery {
        queue.receive(&CancellationToken::new()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn success_is_recorded_and_acked() {
        let fx = fixture(FakeMigrator::new(Behaviour::Succeed)).await;
        let id = enqueue(&fx).await;

        fx.pool.handle(next_delivery(&fx.queue).await).await;

        let task = fx.store.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.result, "migrated");
        assert!(task.error.is_empty());
        assert!(fx.queue.is_empty());
    }

    #[tokio::test]
    async fn failure_records_stage_prefixed_error() {
        let fx = fixture(FakeMigrator::new(Behaviour::Fail)).await;
        let id = enqueue(&fx).await;

        fx.pool.handle(next_delivery(&fx.queue).await).await;

        let task = fx.store.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error, "fetch messages: zoom api error: 500: down");
        assert!(fx.queue.is_empty(), "failed tasks are not retried automatically");
    }

    #[tokio::test]
    #[traced_test]
    async fn unknown_task_is_dropped() {
        let migrator = FakeMigrator::new(Behaviour::Succeed);
        let fx = fixture(migrator.clone()).await;
        fx.queue.publish("no-such-task").await.unwrap();

        fx.pool.handle(next_delivery(&fx.queue).await).await;

        assert!(fx.queue.is_empty());
        assert_eq!(migrator.calls.load(Ordering::SeqCst), 0);
        assert!(logs_contain("unknown task id"));
    }

    #[tokio::test]
    async fn terminal_task_is_not_rerun() {
        let migrator = FakeMigrator::new(Behaviour::Succeed);
        let fx = fixture(migrator.clone()).await;
        let id = enqueue(&fx).await;
        fx.pool.handle(next_delivery(&fx.queue).await).await;

        // Redeliver the finished task.
        fx.queue.publish(&id).await.unwrap();
        fx.pool.handle(next_delivery(&fx.queue).await).await;

        assert_eq!(migrator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.store.get_task(&id).await.unwrap().status, TaskStatus::Success);
        assert!(fx.queue.is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_is_requeued_and_left_running() {
        let fx = fixture(FakeMigrator::new(Behaviour::Cancelled)).await;
        let id = enqueue(&fx).await;

        fx.pool.handle(next_delivery(&fx.queue).await).await;

        assert_eq!(fx.store.get_task(&id).await.unwrap().status, TaskStatus::Running);
        let again = next_delivery(&fx.queue).await;
        assert_eq!(again.task_id, id);
        assert_eq!(again.attempt, 2);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_task() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let fx = fixture(FakeMigrator::new(Behaviour::Gate {
            started: started.clone(),
            release: release.clone(),
        }))
        .await;
        let id = enqueue(&fx).await;

        let handle = fx.pool.start(CancellationToken::new());
        started.notified().await;
        assert_eq!(fx.store.get_task(&id).await.unwrap().status, TaskStatus::Running);

        handle.cancel_token().cancel();
        let shutdown = tokio::spawn(handle.join());
        tokio::task::yield_now().await;
        assert!(!shutdown.is_finished());

        release.notify_one();
        shutdown.await.unwrap();
        assert_eq!(fx.store.get_task(&id).await.unwrap().status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn idle_pool_shuts_down_promptly() {
        let fx = fixture(FakeMigrator::new(Behaviour::Succeed)).await;
        let handle = fx.pool.start(CancellationToken::new());
        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("pool did not stop");
    }

    #[tokio::test]
    async fn long_task_keeps_its_lease() {
        let migrator = FakeMigrator::new(Behaviour::Slow(Duration::from_millis(800)));
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let queue = Arc::new(
            SqliteQueue::from_store(&store)
                .with_lease(Duration::from_millis(200))
                .with_poll_interval(Duration::from_millis(20)),
        );
        let pool = WorkerPool::new(store.clone(), queue.clone(), migrator.clone(), 2);
        let id = store
            .create_task(Task::new("zoom", "teams", TaskPayload::new()))
            .await
            .unwrap();
        queue.publish(&id).await.unwrap();

        let handle = pool.start(CancellationToken::new());
        tokio::time::timeout(Duration::from_secs(5), async {
            while !store.get_task(&id).await.unwrap().status.is_terminal() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("task did not finish");
        handle.shutdown().await;

        assert_eq!(store.get_task(&id).await.unwrap().status, TaskStatus::Success);
        assert_eq!(migrator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(migrator.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn memory_queue_needs_no_heartbeat() {
        let fx = fixture(FakeMigrator::new(Behaviour::Succeed)).await;
        assert_eq!(fx.pool.heartbeat, None);
    }
}
