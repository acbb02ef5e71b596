//! In-process remote for testing.
//!
//! [`MemoryRemote`] keeps directories of files in memory behind a shared
//! lock. Every clone sees the same state, so a test can hand one clone to
//! the sync engine and inspect another. It records each call in order,
//! tracks how many operations were ever in flight at once, and can inject
//! failures and latency.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{RemoteConnector, RemoteEndpoint, RemoteSession, TransportError};

/// One recorded remote operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    /// A connection attempt (successful or not).
    Connect,
    /// `change_dir` to the given path.
    ChangeDir(String),
    /// Directory listing.
    List,
    /// Fetch of the named file.
    Fetch(String),
    /// Store of the named file.
    Store(String),
    /// Session close.
    Disconnect,
}

#[derive(Debug, Default)]
struct RemoteState {
    /// Directory path -> (file name -> contents).
    dirs: HashMap<String, HashMap<String, Vec<u8>>>,
    credentials: Option<(String, String)>,
    refuse_connections: bool,
    failing_fetches: u32,
    failing_stores: u32,
    latency: Duration,
    calls: Vec<RemoteCall>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Shared in-memory remote host.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    /// Creates a remote with a single empty root directory `/`.
    #[must_use]
    pub fn new() -> Self {
        Self::default().with_directory("/")
    }

    /// Adds an empty directory.
    #[must_use]
    pub fn with_directory(self, path: &str) -> Self {
        self.state.lock().dirs.entry(path.to_string()).or_default();
        self
    }

    /// Requires this user name and password on connect.
    #[must_use]
    pub fn with_credentials(self, username: &str, password: &str) -> Self {
        self.state.lock().credentials = Some((username.to_string(), password.to_string()));
        self
    }

    /// Delays every session operation by `latency`.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = latency;
        self
    }

    /// Writes a file, creating the directory if needed.
    pub fn put_file(&self, dir: &str, name: &str, contents: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .dirs
            .entry(dir.to_string())
            .or_default()
            .insert(name.to_string(), contents.into());
    }

    /// Returns a copy of a file's contents.
    #[must_use]
    pub fn file(&self, dir: &str, name: &str) -> Option<Vec<u8>> {
        self.state.lock().dirs.get(dir)?.get(name).cloned()
    }

    /// Makes subsequent connection attempts fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_connections = refuse;
    }

    /// Makes the next `count` fetches fail halfway through.
    pub fn fail_next_fetches(&self, count: u32) {
        self.state.lock().failing_fetches = count;
    }

    /// Makes the next `count` stores fail without changing the file.
    pub fn fail_next_stores(&self, count: u32) {
        self.state.lock().failing_stores = count;
    }

    /// All calls made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// Number of stores made so far.
    #[must_use]
    pub fn store_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, RemoteCall::Store(_)))
            .count()
    }

    /// Highest number of session operations that were ever running at once.
    #[must_use]
    pub fn max_concurrent_operations(&self) -> usize {
        self.state.lock().max_in_flight
    }
}

impl RemoteConnector for MemoryRemote {
    type Session = MemorySession;

    async fn connect(&self, endpoint: &RemoteEndpoint) -> Result<MemorySession, TransportError> {
        {
            let mut state = self.state.lock();
            state.calls.push(RemoteCall::Connect);
            if state.refuse_connections {
                return Err(TransportError::Connect(format!(
                    "{}:{}: connection refused",
                    endpoint.host, endpoint.port
                )));
            }
            let rejected = state.credentials.as_ref().is_some_and(|(user, password)| {
                user != &endpoint.username || password != &endpoint.password
            });
            if rejected {
                return Err(TransportError::Connect(
                    "login rejected: 530 Login incorrect".to_string(),
                ));
            }
        }

        Ok(MemorySession {
            state: Arc::clone(&self.state),
            cwd: "/".to_string(),
        })
    }
}

/// A session on a [`MemoryRemote`].
#[derive(Debug)]
pub struct MemorySession {
    state: Arc<Mutex<RemoteState>>,
    cwd: String,
}

impl MemorySession {
    /// Records the call, bumps the in-flight gauge and waits out the latency.
    async fn begin(&self, call: RemoteCall) {
        let latency = {
            let mut state = self.state.lock();
            state.calls.push(call);
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn end(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    fn missing_dir(&self) -> TransportError {
        TransportError::Transfer(format!("directory {} vanished", self.cwd))
    }
}

impl RemoteSession for MemorySession {
    async fn change_dir(&mut self, path: &str) -> Result<(), TransportError> {
        self.begin(RemoteCall::ChangeDir(path.to_string())).await;
        let exists = self.state.lock().dirs.contains_key(path);
        self.end();
        if exists {
            self.cwd = path.to_string();
            Ok(())
        } else {
            Err(TransportError::DirectoryNotFound(path.to_string()))
        }
    }

    async fn list(&mut self) -> Result<Vec<String>, TransportError> {
        self.begin(RemoteCall::List).await;
        let names = self.state.lock().dirs.get(&self.cwd).map(|files| {
            let mut names: Vec<String> = files.keys().cloned().collect();
            names.sort();
            names
        });
        self.end();
        names.ok_or_else(|| self.missing_dir())
    }

    async fn fetch<W: AsyncWrite + Unpin + Send>(
        &mut self,
        name: &str,
        sink: &mut W,
    ) -> Result<u64, TransportError> {
        self.begin(RemoteCall::Fetch(name.to_string())).await;
        let (contents, fail) = {
            let mut state = self.state.lock();
            let fail = state.failing_fetches > 0;
            if fail {
                state.failing_fetches -= 1;
            }
            let contents = state
                .dirs
                .get(&self.cwd)
                .and_then(|files| files.get(name))
                .cloned();
            (contents, fail)
        };

        let result = match contents {
            None => Err(TransportError::Transfer(format!(
                "RETR {name}: 550 No such file"
            ))),
            Some(bytes) if fail => {
                // Deliver half the file, then drop the "connection".
                let half = &bytes[..bytes.len() / 2];
                match sink.write_all(half).await {
                    Ok(()) => Err(TransportError::Transfer(format!(
                        "RETR {name}: connection reset"
                    ))),
                    Err(e) => Err(e.into()),
                }
            }
            Some(bytes) => match sink.write_all(&bytes).await {
                Ok(()) => sink
                    .flush()
                    .await
                    .map(|()| bytes.len() as u64)
                    .map_err(TransportError::from),
                Err(e) => Err(e.into()),
            },
        };
        self.end();
        result
    }

    async fn store<R: AsyncRead + Unpin + Send>(
        &mut self,
        name: &str,
        source: &mut R,
    ) -> Result<u64, TransportError> {
        self.begin(RemoteCall::Store(name.to_string())).await;
        let mut bytes = Vec::new();
        let read = source.read_to_end(&mut bytes).await;

        let result = match read {
            Err(e) => Err(TransportError::from(e)),
            Ok(len) => {
                let mut state = self.state.lock();
                if state.failing_stores > 0 {
                    state.failing_stores -= 1;
                    Err(TransportError::Transfer(format!(
                        "STOR {name}: connection reset"
                    )))
                } else {
                    match state.dirs.get_mut(&self.cwd) {
                        Some(files) => {
                            files.insert(name.to_string(), bytes);
                            Ok(len as u64)
                        }
                        None => Err(self.missing_dir()),
                    }
                }
            }
        };
        self.end();
        result
    }

    async fn disconnect(self) -> Result<(), TransportError> {
        self.state.lock().calls.push(RemoteCall::Disconnect);
        Ok(())
    }
}
