//! convoy-core – task execution pipeline for chat migrations.
//!
//! A migration is a durable [`model::Task`] row. Its identifier travels
//! through a [`queue::TaskQueue`] to a [`worker::WorkerPool`] consumer, which
//! marks the task running, hands it to a [`migrator::Migrator`] and writes the
//! terminal status back to the [`store::TaskStore`].
//!
//! Layout:
//! - [`model`]    – task and identity records.
//! - [`store`]    – persistence contracts plus the SQLite implementation.
//! - [`queue`]    – at-least-once delivery of task identifiers.
//! - [`poller`]   – resolves asynchronous destination-side creations.
//! - [`migrator`] – orchestration, translation and platform clients.
//! - [`worker`]   – the bounded consumer pool.

pub mod migrator;
pub mod model;
pub mod poller;
pub mod queue;
pub mod store;
pub mod worker;

pub use model::{Identity, Task, TaskPayload, TaskStatus};
pub use store::{IdentityStore, SqliteStore, StoreError, TaskStore};
pub use worker::{WorkerPool, WorkerPoolHandle};
