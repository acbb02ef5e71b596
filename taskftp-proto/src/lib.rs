//! Shared definitions for the `TaskFtp` task-list file.
//!
//! [`task`] holds the in-memory model, [`codec`] the XML document format
//! stored on the remote host.

pub mod codec;
pub mod task;

pub use task::{Task, TaskId, TaskList};
