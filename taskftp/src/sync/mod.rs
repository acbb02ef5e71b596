//! Queue-driven synchronization of a local task list with one remote file.
//!
//! ```text
//! TaskSync ── persist ──> TaskStore (local file)
//!    │  └── set ──> DirtyFlag <── take ── UploadPoller ──┐
//!    └── Download / Quit ─────────────> CommandQueue <───┘ Upload
//!                                            │
//!                                      SyncWorker ── RemoteSession
//! ```
//!
//! The worker owns the only remote session and runs one command at a time,
//! so fetches and stores never overlap. Results and failures flow back to
//! the caller as [`SyncEvent`]s.

pub mod dirty;
pub mod facade;
pub mod queue;
pub mod store;
pub mod worker;

pub use dirty::{DirtyFlag, PollerHandle, UploadPoller};
pub use facade::{SyncConfig, TaskSync};
pub use queue::{Command, CommandQueue, CommandReceiver, command_queue};
pub use store::TaskStore;
pub use worker::{SyncWorker, WorkerState};

use taskftp_proto::{Task, TaskId, TaskList};
use thiserror::Error;
use tokio::sync::mpsc;

/// Notifications delivered to the application.
///
/// `TaskAdded`, `TaskRemoved` and `TaskUpdated` are sent before the mutating
/// call returns. `TasksLoaded` and `Error` come from the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A download finished and the collection was replaced.
    TasksLoaded(TaskList),
    /// A task was created locally.
    TaskAdded {
        /// Fresh id of the task.
        id: TaskId,
        /// Its title.
        title: String,
    },
    /// A task was deleted locally.
    TaskRemoved(TaskId),
    /// A task's fields were replaced.
    TaskUpdated(Task),
    /// A remote or local-file operation failed. The message is human-readable.
    Error(String),
}

/// Receiving end of the event channel returned by [`TaskSync::start`].
pub type SyncEvents = mpsc::UnboundedReceiver<SyncEvent>;

/// Errors returned directly by [`TaskSync`] operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No task with this id exists.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// Writing the local task file failed.
    #[error("failed to write local task file: {0}")]
    Persist(#[from] std::io::Error),

    /// [`TaskSync::close`] has already been called.
    #[error("task sync is closed")]
    Closed,
}
