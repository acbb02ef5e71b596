//! The sync worker: sole owner of the remote session.
//!
//! Connects once, changes into the configured directory, then drains the
//! command queue one command at a time until it reads [`Command::Quit`].
//! Per-command failures are reported as [`SyncEvent::Error`] and the worker
//! moves on; there is no automatic retry. A failure while connecting is
//! fatal: the worker reports it, enters [`WorkerState::Failed`] and never
//! processes a command.

use std::sync::Arc;

use taskftp_proto::TaskList;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::queue::{Command, CommandReceiver};
use super::store::{self, StoreError, TaskStore};
use super::SyncEvent;
use crate::transport::{RemoteConnector, RemoteEndpoint, RemoteSession, TransportError};

/// Lifecycle of a [`SyncWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Opening the session and changing directory.
    Connecting,
    /// Idle, waiting for the next command.
    Ready,
    /// Executing a command.
    Draining,
    /// Processed `Quit` and closed the session.
    Stopped,
    /// Could not open a session. Terminal.
    Failed,
}

impl WorkerState {
    /// `true` for [`Stopped`](Self::Stopped) and [`Failed`](Self::Failed).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

#[derive(Debug, Error)]
enum CommandError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("local task file: {0}")]
    Local(#[from] StoreError),
}

impl From<std::io::Error> for CommandError {
    fn from(e: std::io::Error) -> Self {
        Self::Local(StoreError::Io(e))
    }
}

/// Executes queued commands against one remote session.
pub struct SyncWorker<C: RemoteConnector> {
    connector: C,
    endpoint: RemoteEndpoint,
    file_name: String,
    store: Arc<TaskStore>,
    commands: CommandReceiver,
    events: mpsc::UnboundedSender<SyncEvent>,
    state: watch::Sender<WorkerState>,
}

impl<C: RemoteConnector> SyncWorker<C> {
    /// Build a worker. Returns it with a receiver for its state changes.
    pub fn new(
        connector: C,
        endpoint: RemoteEndpoint,
        file_name: impl Into<String>,
        store: Arc<TaskStore>,
        commands: CommandReceiver,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> (Self, watch::Receiver<WorkerState>) {
        let (state, state_rx) = watch::channel(WorkerState::Connecting);
        let worker = Self {
            connector,
            endpoint,
            file_name: file_name.into(),
            store,
            commands,
            events,
            state,
        };
        (worker, state_rx)
    }

    /// Run the worker on its own task.
    pub fn spawn(self) -> JoinHandle<WorkerState> {
        tokio::spawn(self.run())
    }

    /// Connect, then drain the queue until `Quit` (or until every queue
    /// handle is dropped). Returns the terminal state.
    pub async fn run(mut self) -> WorkerState {
        self.set_state(WorkerState::Connecting);
        let mut session = match self.open_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(remote = %self.endpoint, error = %e, "sync worker could not connect");
                self.report(e.to_string());
                self.set_state(WorkerState::Failed);
                return WorkerState::Failed;
            }
        };
        tracing::info!(remote = %self.endpoint, "sync worker connected");
        self.set_state(WorkerState::Ready);

        loop {
            let Some(command) = self.commands.dequeue().await else {
                tracing::debug!("command queue closed, stopping");
                break;
            };
            tracing::debug!(?command, "executing command");
            match command {
                Command::Quit => break,
                Command::Download => {
                    self.set_state(WorkerState::Draining);
                    match self.download(&mut session).await {
                        Ok(tasks) => {
                            tracing::info!(count = tasks.len(), "tasks loaded");
                            let _ = self.events.send(SyncEvent::TasksLoaded(tasks));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "download failed");
                            self.report(format!("download failed: {e}"));
                        }
                    }
                }
                Command::Upload => {
                    self.set_state(WorkerState::Draining);
                    match self.upload(&mut session).await {
                        Ok(bytes) => tracing::debug!(bytes, "task file uploaded"),
                        Err(e) => {
                            tracing::warn!(error = %e, "upload failed");
                            self.report(format!("upload failed: {e}"));
                        }
                    }
                }
            }
            self.set_state(WorkerState::Ready);
        }

        if let Err(e) = session.disconnect().await {
            tracing::debug!(error = %e, "disconnect failed");
        }
        tracing::info!("sync worker stopped");
        self.set_state(WorkerState::Stopped);
        WorkerState::Stopped
    }

    async fn open_session(&self) -> Result<C::Session, TransportError> {
        let mut session = self.connector.connect(&self.endpoint).await?;
        session
            .change_dir(&self.endpoint.directory)
            .await
            .map_err(|e| {
                if e.is_session_fatal() || matches!(e, TransportError::Timeout) {
                    e
                } else {
                    TransportError::DirectoryNotFound(format!("{}: {e}", self.endpoint.directory))
                }
            })?;
        Ok(session)
    }

    /// Fetch the remote file into the staging file and install it, or
    /// bootstrap an empty collection when the remote file does not exist.
    async fn download(&self, session: &mut C::Session) -> Result<TaskList, CommandError> {
        let names = session.list().await?;
        let present = names
            .iter()
            .any(|name| name.rsplit('/').next() == Some(self.file_name.as_str()));
        if !present {
            tracing::info!(file = %self.file_name, "remote task file missing, starting empty");
            return Ok(self.store.install_empty()?);
        }

        let staging = self.store.staging_path().to_path_buf();
        store::discard(&staging);
        let fetched = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&staging)
                .await?;
            let bytes = session.fetch(&self.file_name, &mut file).await?;
            file.flush().await?;
            Ok::<_, CommandError>(bytes)
        }
        .await;

        match fetched {
            Ok(bytes) => {
                tracing::debug!(bytes, "task file fetched");
                Ok(self.store.install_download(&staging)?)
            }
            Err(e) => {
                store::discard(&staging);
                Err(e)
            }
        }
    }

    async fn upload(&self, session: &mut C::Session) -> Result<u64, CommandError> {
        let bytes = self.store.snapshot_bytes()?;
        let mut source = bytes.as_slice();
        Ok(session.store(&self.file_name, &mut source).await?)
    }

    fn report(&self, message: String) {
        let _ = self.events.send(SyncEvent::Error(message));
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }
}
