//! Durable records shared by the store, the worker pool and the HTTP layer.

mod identity;
mod task;

pub use identity::Identity;
pub use task::{Task, TaskPayload, TaskStatus};
