//! FTP protocol handling: accept loop, per-connection command loop, and
//! passive-mode data transfers.
//!
//! Only the commands a task-file client needs are implemented. Everything
//! else is answered with `502`.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::store::{FileStore, normalize, split_path};

/// How long a passive listener waits for the client to connect.
const DATA_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Any other socket failure.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared server state: the file tree and optional required credentials.
#[derive(Default)]
pub struct ServerState {
    /// Files served to clients.
    pub store: FileStore,
    credentials: Option<(String, String)>,
}

impl ServerState {
    /// Anonymous access to `store`.
    #[must_use]
    pub fn new(store: FileStore) -> Self {
        Self {
            store,
            credentials: None,
        }
    }

    /// Require this user name and password.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    fn accepts(&self, user: Option<&str>, password: &str) -> bool {
        match &self.credentials {
            None => true,
            Some((u, p)) => user == Some(u.as_str()) && password == p,
        }
    }
}

/// Starts the server with the given state.
///
/// Returns the bound address (useful with port `0`) and the accept loop's
/// handle. Aborting the handle stops accepting new connections.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the listener cannot bind.
pub async fn start_server(
    addr: &str,
    state: Arc<ServerState>,
) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        tracing::info!(%peer, "client connected");
                        if let Err(e) = handle_connection(stream, state).await {
                            tracing::warn!(%peer, error = %e, "connection error");
                        }
                        tracing::info!(%peer, "client disconnected");
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    });

    Ok((bound_addr, handle))
}

/// Per-connection protocol state.
struct Session {
    state: Arc<ServerState>,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    local_ip: IpAddr,
    user: Option<String>,
    logged_in: bool,
    cwd: String,
    passive: Option<TcpListener>,
}

async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) -> std::io::Result<()> {
    let local_ip = stream.local_addr()?.ip();
    let (read, write) = stream.into_split();
    let mut session = Session {
        state,
        reader: BufReader::new(read),
        writer: write,
        local_ip,
        user: None,
        logged_in: false,
        cwd: "/".to_string(),
        passive: None,
    };

    session.reply(220, "taskftp-devserver ready").await?;

    let mut line = String::new();
    loop {
        line.clear();
        if session.reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        let (verb, arg) = match trimmed.split_once(' ') {
            Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.trim().to_string()),
            None => (trimmed.to_ascii_uppercase(), String::new()),
        };
        tracing::debug!(verb = %verb, "command");

        if !session.dispatch(&verb, &arg).await? {
            return Ok(());
        }
    }
}

impl Session {
    async fn reply(&mut self, code: u16, text: &str) -> std::io::Result<()> {
        self.writer
            .write_all(format!("{code} {text}\r\n").as_bytes())
            .await?;
        self.writer.flush().await
    }

    /// Handles one command. Returns `false` once the client has quit.
    async fn dispatch(&mut self, verb: &str, arg: &str) -> std::io::Result<bool> {
        match verb {
            "USER" => self.user(arg).await?,
            "PASS" => self.pass(arg).await?,
            "QUIT" => {
                self.reply(221, "Goodbye").await?;
                return Ok(false);
            }
            "NOOP" => self.reply(200, "NOOP ok").await?,
            "SYST" => self.reply(215, "UNIX Type: L8").await?,
            _ if !self.logged_in => self.reply(530, "Please login with USER and PASS").await?,
            "TYPE" => match arg.to_ascii_uppercase().as_str() {
                "I" | "A" | "L 8" => self.reply(200, "Type set").await?,
                _ => self.reply(504, "Unsupported type").await?,
            },
            "PWD" => {
                let text = format!("\"{}\" is the current directory", self.cwd);
                self.reply(257, &text).await?;
            }
            "CWD" => self.cwd(arg).await?,
            "EPSV" => self.epsv().await?,
            "PASV" => self.pasv().await?,
            "NLST" => self.nlst().await?,
            "RETR" => self.retr(arg).await?,
            "STOR" => self.stor(arg).await?,
            _ => self.reply(502, "Command not implemented").await?,
        }
        Ok(true)
    }

    async fn user(&mut self, name: &str) -> std::io::Result<()> {
        self.logged_in = false;
        self.user = Some(name.to_string());
        if self.state.credentials.is_none() {
            self.logged_in = true;
            self.reply(230, "Login successful").await
        } else {
            self.reply(331, "Please specify the password").await
        }
    }

    async fn pass(&mut self, password: &str) -> std::io::Result<()> {
        if self.logged_in {
            return self.reply(230, "Already logged in").await;
        }
        if self.user.is_some() && self.state.accepts(self.user.as_deref(), password) {
            self.logged_in = true;
            tracing::info!(user = ?self.user, "login successful");
            self.reply(230, "Login successful").await
        } else {
            tracing::warn!(user = ?self.user, "login rejected");
            self.user = None;
            self.reply(530, "Login incorrect").await
        }
    }

    async fn cwd(&mut self, arg: &str) -> std::io::Result<()> {
        let target = normalize(&self.cwd, arg);
        if self.state.store.has_dir(&target).await {
            self.cwd = target;
            self.reply(250, "Directory successfully changed").await
        } else {
            self.reply(550, "Failed to change directory").await
        }
    }

    async fn epsv(&mut self) -> std::io::Result<()> {
        let listener = TcpListener::bind(SocketAddr::new(self.local_ip, 0)).await?;
        let port = listener.local_addr()?.port();
        self.passive = Some(listener);
        let text = format!("Entering Extended Passive Mode (|||{port}|)");
        self.reply(229, &text).await
    }

    async fn pasv(&mut self) -> std::io::Result<()> {
        let IpAddr::V4(ip) = self.local_ip else {
            return self.reply(522, "PASV needs IPv4, use EPSV").await;
        };
        let listener = TcpListener::bind(SocketAddr::new(self.local_ip, 0)).await?;
        let port = listener.local_addr()?.port();
        self.passive = Some(listener);
        let [a, b, c, d] = ip.octets();
        let text = format!(
            "Entering Passive Mode ({a},{b},{c},{d},{},{})",
            port >> 8,
            port & 0xff
        );
        self.reply(227, &text).await
    }

    /// Accepts the client's data connection on the pending passive listener.
    async fn accept_data(&mut self) -> std::io::Result<Option<TcpStream>> {
        let Some(listener) = self.passive.take() else {
            self.reply(425, "Use PASV or EPSV first").await?;
            return Ok(None);
        };
        self.reply(150, "Opening data connection").await?;
        match tokio::time::timeout(DATA_ACCEPT_TIMEOUT, listener.accept()).await {
            Ok(Ok((stream, _))) => Ok(Some(stream)),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "data accept failed");
                self.reply(425, "Can't open data connection").await?;
                Ok(None)
            }
            Err(_) => {
                self.reply(425, "Data connection timed out").await?;
                Ok(None)
            }
        }
    }

    async fn nlst(&mut self) -> std::io::Result<()> {
        let names = self.state.store.list(&self.cwd).await.unwrap_or_default();
        if names.is_empty() {
            self.passive = None;
            return self.reply(450, "No files found").await;
        }
        let Some(mut data) = self.accept_data().await? else {
            return Ok(());
        };
        let mut listing = String::new();
        for name in &names {
            listing.push_str(name);
            listing.push_str("\r\n");
        }
        data.write_all(listing.as_bytes()).await?;
        data.shutdown().await?;
        drop(data);
        self.reply(226, "Directory send OK").await
    }

    async fn retr(&mut self, arg: &str) -> std::io::Result<()> {
        let (dir, name) = split_path(&normalize(&self.cwd, arg));
        let Some(contents) = self.state.store.read(&dir, &name).await else {
            self.passive = None;
            return self.reply(550, "Failed to open file").await;
        };
        let Some(mut data) = self.accept_data().await? else {
            return Ok(());
        };
        data.write_all(&contents).await?;
        data.shutdown().await?;
        drop(data);
        tracing::debug!(dir = %dir, name = %name, bytes = contents.len(), "file sent");
        self.reply(226, "Transfer complete").await
    }

    async fn stor(&mut self, arg: &str) -> std::io::Result<()> {
        let (dir, name) = split_path(&normalize(&self.cwd, arg));
        if name.is_empty() || !self.state.store.has_dir(&dir).await {
            self.passive = None;
            return self.reply(553, "Could not create file").await;
        }
        let Some(mut data) = self.accept_data().await? else {
            return Ok(());
        };
        let mut contents = Vec::new();
        data.read_to_end(&mut contents).await?;
        drop(data);

        let len = contents.len();
        if self.state.store.write(&dir, &name, contents).await {
            tracing::debug!(dir = %dir, name = %name, bytes = len, "file stored");
            self.reply(226, "Transfer complete").await
        } else {
            self.reply(553, "Could not create file").await
        }
    }
}
