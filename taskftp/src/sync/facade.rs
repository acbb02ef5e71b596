//! Public entry point of the sync engine.
//!
//! [`TaskSync`] owns the in-memory collection. Mutations are applied and
//! persisted synchronously, then the dirty flag is set and the poller takes
//! care of the upload. `load` and `close` hand work to the worker.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use taskftp_proto::codec::NO_DUE_DATE;
use taskftp_proto::{Task, TaskId, TaskList};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::dirty::{DirtyFlag, PollerHandle, UploadPoller};
use super::queue::{Command, CommandQueue, command_queue};
use super::store::TaskStore;
use super::worker::{SyncWorker, WorkerState};
use super::{SyncError, SyncEvent, SyncEvents};
use crate::transport::{RemoteConnector, RemoteEndpoint};

/// Name of the remote task file unless configured otherwise.
pub const DEFAULT_FILE_NAME: &str = "tasks.xml";

/// How often the poller checks for unuploaded changes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Everything [`TaskSync::start`] needs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Remote host, credentials and directory.
    pub endpoint: RemoteEndpoint,
    /// Fixed name of the remote task file.
    pub file_name: String,
    /// Local copy of the task file.
    pub local_file: PathBuf,
    /// Upload poll interval.
    pub poll_interval: Duration,
}

impl SyncConfig {
    /// A config with the default file name and poll interval.
    #[must_use]
    pub fn new(endpoint: RemoteEndpoint, local_file: impl Into<PathBuf>) -> Self {
        Self {
            endpoint,
            file_name: DEFAULT_FILE_NAME.to_string(),
            local_file: local_file.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Handle to a running sync engine.
///
/// All methods take `&self`; wrap in an `Arc` to share between tasks.
pub struct TaskSync {
    store: Arc<TaskStore>,
    dirty: Arc<DirtyFlag>,
    queue: CommandQueue,
    events: mpsc::UnboundedSender<SyncEvent>,
    state: watch::Receiver<WorkerState>,
    closed: RwLock<bool>,
    poller: Mutex<Option<PollerHandle>>,
    worker: Mutex<Option<JoinHandle<WorkerState>>>,
}

impl TaskSync {
    /// Spawn the worker and the upload poller.
    ///
    /// The worker starts connecting right away. Connection failures arrive
    /// as a [`SyncEvent::Error`] and the worker ends in
    /// [`WorkerState::Failed`]. Must be called from within a tokio runtime.
    pub fn start<C: RemoteConnector>(config: SyncConfig, connector: C) -> (Self, SyncEvents) {
        let store = Arc::new(TaskStore::new(config.local_file));
        let dirty = Arc::new(DirtyFlag::new());
        let (queue, commands) = command_queue();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let (worker, state) = SyncWorker::new(
            connector,
            config.endpoint,
            config.file_name,
            Arc::clone(&store),
            commands,
            events_tx.clone(),
        );
        let worker = worker.spawn();
        let poller = UploadPoller::spawn(Arc::clone(&dirty), queue.clone(), config.poll_interval);

        let sync = Self {
            store,
            dirty,
            queue,
            events: events_tx,
            state,
            closed: RwLock::new(false),
            poller: Mutex::new(Some(poller)),
            worker: Mutex::new(Some(worker)),
        };
        (sync, events_rx)
    }

    /// Request a download. The result arrives as [`SyncEvent::TasksLoaded`]
    /// (or [`SyncEvent::Error`]), after which the downloaded collection is
    /// the current one.
    ///
    /// # Errors
    ///
    /// [`SyncError::Closed`] after [`close`](Self::close).
    pub fn load(&self) -> Result<(), SyncError> {
        let _open = self.open_guard()?;
        self.queue.enqueue(Command::Download);
        Ok(())
    }

    /// Create a task with a fresh id, persist, and mark dirty.
    ///
    /// # Errors
    ///
    /// [`SyncError::Persist`] if the local file cannot be written (nothing
    /// changes in that case), [`SyncError::Closed`] after close.
    pub fn add(&self, title: impl Into<String>) -> Result<TaskId, SyncError> {
        let _open = self.open_guard()?;
        let task = Task::new(TaskId::generate(), title);
        let (id, title) = (task.id.clone(), task.title.clone());
        self.store.mutate(|tasks| {
            tasks.insert(task);
            Ok(())
        })?;
        self.dirty.set();
        tracing::debug!(%id, "task added");
        let _ = self.events.send(SyncEvent::TaskAdded {
            id: id.clone(),
            title,
        });
        Ok(id)
    }

    /// Delete a task, persist, and mark dirty. Returns the removed task.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotFound`] if no task has this id; the collection and
    /// local file are left untouched.
    pub fn remove(&self, id: &TaskId) -> Result<Task, SyncError> {
        let _open = self.open_guard()?;
        let removed = self
            .store
            .mutate(|tasks| tasks.remove(id).ok_or_else(|| SyncError::NotFound(id.clone())))?;
        self.dirty.set();
        tracing::debug!(%id, "task removed");
        let _ = self.events.send(SyncEvent::TaskRemoved(id.clone()));
        Ok(removed)
    }

    /// Replace every field of an existing task, persist, and mark dirty.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotFound`] if `task.id` is unknown; nothing changes.
    pub fn update(&self, mut task: Task) -> Result<(), SyncError> {
        let _open = self.open_guard()?;
        // The file format spells "no due date" as the sentinel itself.
        if task.due == Some(NO_DUE_DATE) {
            task.due = None;
        }
        let updated = task.clone();
        self.store.mutate(|tasks| {
            if !tasks.contains(&task.id) {
                return Err(SyncError::NotFound(task.id.clone()));
            }
            tasks.insert(task);
            Ok(())
        })?;
        self.dirty.set();
        tracing::debug!(id = %updated.id, "task updated");
        let _ = self.events.send(SyncEvent::TaskUpdated(updated));
        Ok(())
    }

    /// A copy of the current collection.
    #[must_use]
    pub fn tasks(&self) -> TaskList {
        self.store.snapshot()
    }

    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.store.with_tasks(|tasks| tasks.get(id).cloned())
    }

    #[must_use]
    pub fn worker_state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// A receiver that observes worker state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    /// Whether local changes are waiting for the poller.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.is_set()
    }

    /// Flush and shut down.
    ///
    /// Rewrites the local file, queues an upload of it, clears the dirty
    /// flag, stops the poller and queues `Quit`. Returns without waiting;
    /// use [`closed`](Self::closed) for that. Work already queued runs
    /// before the final upload.
    ///
    /// # Errors
    ///
    /// [`SyncError::Closed`] on a second call. [`SyncError::Persist`] if the
    /// local file cannot be written; the engine still shuts down but skips
    /// the final upload.
    pub fn close(&self) -> Result<(), SyncError> {
        // Held to the end so no mutation can slip in between the final
        // persist and clearing the dirty flag.
        let mut closed = self.closed.write();
        if *closed {
            return Err(SyncError::Closed);
        }
        *closed = true;

        let persisted = self.store.persist();
        if persisted.is_ok() {
            self.queue.enqueue(Command::Upload);
        }
        self.dirty.clear();
        if let Some(poller) = self.poller.lock().as_ref() {
            poller.stop();
        }
        self.queue.enqueue(Command::Quit);
        tracing::info!("task sync closing");

        persisted.map_err(SyncError::from)
    }

    /// Wait for the poller and worker to exit and return the worker's final
    /// state.
    pub async fn closed(&self) -> WorkerState {
        let poller = self.poller.lock().take();
        if let Some(poller) = poller {
            poller.join().await;
        }
        let worker = self.worker.lock().take();
        match worker {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "sync worker task failed");
                WorkerState::Failed
            }),
            None => self.worker_state(),
        }
    }

    /// Guard held by a mutation from its closed check until its dirty mark
    /// is set.
    fn open_guard(&self) -> Result<RwLockReadGuard<'_, bool>, SyncError> {
        let guard = self.closed.read();
        if *guard {
            Err(SyncError::Closed)
        } else {
            Ok(guard)
        }
    }
}

impl Drop for TaskSync {
    fn drop(&mut self) {
        // With the poller gone the last queue handle is ours, so the worker
        // sees the queue close and stops.
        if let Some(poller) = self.poller.get_mut().as_ref() {
            poller.stop();
        }
    }
}
