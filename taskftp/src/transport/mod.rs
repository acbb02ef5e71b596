//! Remote file transport for `TaskFtp`.
//!
//! A [`RemoteConnector`] opens a [`RemoteSession`]: one connection to the
//! remote host on which whole files are listed, fetched and stored.
//! Implementations:
//! - [`ftp::FtpConnector`]: FTP over TCP
//! - [`memory::MemoryRemote`]: in-process remote for tests
//!
//! Sessions are never shared. The sync worker owns the only one.

pub mod ftp;
pub mod memory;

use std::fmt;
use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};

/// Where the remote task file lives and how to log in.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    /// Host name or address.
    pub host: String,
    /// Control port.
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Directory holding the task file.
    pub directory: String,
}

impl fmt::Debug for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("directory", &self.directory)
            .finish()
    }
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}{}", self.username, self.host, self.port, self.directory)
    }
}

/// Errors that can occur during remote operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Host unreachable, login rejected, or the greeting was bad.
    #[error("error connecting to server: {0}")]
    Connect(String),

    /// The target directory does not exist on the server.
    #[error("the directory '{0}' does not exist on the server")]
    DirectoryNotFound(String),

    /// A single list, fetch or store failed.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// The server did not answer in time.
    #[error("remote operation timed out")]
    Timeout,

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Returns `true` for failures that end a session before it is usable.
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::DirectoryNotFound(_))
    }
}

/// Opens sessions to a remote host.
pub trait RemoteConnector: Send + Sync + 'static {
    /// Session type produced by [`connect`](Self::connect).
    type Session: RemoteSession;

    /// Connect and log in.
    ///
    /// Any failure here is reported as [`TransportError::Connect`] or
    /// [`TransportError::Timeout`].
    fn connect(
        &self,
        endpoint: &RemoteEndpoint,
    ) -> impl Future<Output = Result<Self::Session, TransportError>> + Send;
}

/// One open connection to the remote host.
///
/// Each method completes one request/response exchange before returning,
/// so a caller holding `&mut self` never has two operations in flight.
pub trait RemoteSession: Send + 'static {
    /// Change the working directory.
    fn change_dir(
        &mut self,
        path: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// List the names in the working directory.
    fn list(&mut self) -> impl Future<Output = Result<Vec<String>, TransportError>> + Send;

    /// Stream the whole file `name` into `sink`, returning the byte count.
    fn fetch<W>(
        &mut self,
        name: &str,
        sink: &mut W,
    ) -> impl Future<Output = Result<u64, TransportError>> + Send
    where
        W: AsyncWrite + Unpin + Send;

    /// Replace the file `name` with everything read from `source`.
    fn store<R>(
        &mut self,
        name: &str,
        source: &mut R,
    ) -> impl Future<Output = Result<u64, TransportError>> + Send
    where
        R: AsyncRead + Unpin + Send;

    /// Close the connection.
    fn disconnect(self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
