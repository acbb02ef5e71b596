//! In-memory task collection plus its local file.
//!
//! Every read and write of the local file happens under the same lock as the
//! collection, so the worker never uploads a half-written file and a download
//! never interleaves with a local mutation. The lock is never held across an
//! `.await`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use taskftp_proto::TaskList;
use taskftp_proto::codec::{self, CodecError};
use thiserror::Error;

use super::SyncError;

/// Failures while installing a downloaded file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("could not parse task file: {0}")]
    Decode(#[from] CodecError),
}

/// Mutex-guarded [`TaskList`] backed by a local file.
#[derive(Debug)]
pub struct TaskStore {
    tasks: Mutex<TaskList>,
    path: PathBuf,
    staging: PathBuf,
}

impl TaskStore {
    /// An empty collection backed by `path`. The file is not touched.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut staging = path.clone().into_os_string();
        staging.push(".part");
        Self {
            tasks: Mutex::new(TaskList::new()),
            path,
            staging: PathBuf::from(staging),
        }
    }

    /// The local task file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where downloads are written before they replace the local file.
    #[must_use]
    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    /// A copy of the current collection.
    #[must_use]
    pub fn snapshot(&self) -> TaskList {
        self.tasks.lock().clone()
    }

    /// Run `f` against the current collection.
    pub fn with_tasks<R>(&self, f: impl FnOnce(&TaskList) -> R) -> R {
        f(&self.tasks.lock())
    }

    /// Apply `f` to a copy of the collection, write the result to the local
    /// file, then make it current.
    ///
    /// If `f` or the write fails, neither the collection nor the file changes.
    ///
    /// # Errors
    ///
    /// Whatever `f` returns, or [`SyncError::Persist`] if the write fails.
    pub fn mutate<R>(
        &self,
        f: impl FnOnce(&mut TaskList) -> Result<R, SyncError>,
    ) -> Result<R, SyncError> {
        let mut tasks = self.tasks.lock();
        let mut next = tasks.clone();
        let result = f(&mut next)?;
        fs::write(&self.path, codec::encode(&next))?;
        *tasks = next;
        Ok(result)
    }

    /// Rewrite the local file from the current collection.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the write fails.
    pub fn persist(&self) -> io::Result<()> {
        let tasks = self.tasks.lock();
        fs::write(&self.path, codec::encode(&tasks))
    }

    /// The local file's current bytes, as an upload would send them.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be read.
    pub fn snapshot_bytes(&self) -> io::Result<Vec<u8>> {
        let _tasks = self.tasks.lock();
        fs::read(&self.path)
    }

    /// Parse a completed download at `staging`, move it over the local file
    /// and adopt its contents.
    ///
    /// On a parse failure the staging file is discarded and both the local
    /// file and the collection stay as they were.
    ///
    /// # Errors
    ///
    /// [`StoreError::Decode`] for an unparsable file, [`StoreError::Io`] for
    /// read or rename failures.
    pub fn install_download(&self, staging: &Path) -> Result<TaskList, StoreError> {
        let mut tasks = self.tasks.lock();
        let bytes = fs::read(staging)?;
        let parsed = match codec::decode_bytes(&bytes) {
            Ok(parsed) => parsed,
            Err(e) => {
                discard(staging);
                return Err(e.into());
            }
        };
        fs::rename(staging, &self.path)?;
        tasks.clone_from(&parsed);
        Ok(parsed)
    }

    /// Write the empty document to the local file and adopt an empty
    /// collection. Used when the remote file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the write fails.
    pub fn install_empty(&self) -> io::Result<TaskList> {
        let mut tasks = self.tasks.lock();
        fs::write(&self.path, codec::EMPTY_DOCUMENT)?;
        *tasks = TaskList::new();
        Ok(TaskList::new())
    }

    /// Replace the in-memory collection without touching the file.
    pub fn adopt(&self, tasks: TaskList) {
        *self.tasks.lock() = tasks;
    }
}

/// Remove a leftover staging file, ignoring "not found".
pub(crate) fn discard(staging: &Path) {
    match fs::remove_file(staging) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            tracing::warn!(path = %staging.display(), error = %e, "could not remove staging file");
        }
        _ => {}
    }
}
