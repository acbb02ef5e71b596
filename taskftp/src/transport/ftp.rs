//! FTP transport.
//!
//! Speaks the small subset of RFC 959 needed to move one whole file back
//! and forth: login, `TYPE I`, `CWD`, passive data connections (`EPSV`,
//! falling back to `PASV`), `NLST`, `RETR`, `STOR` and `QUIT`.
//!
//! Passive-mode replies can carry a private address when the server sits
//! behind NAT, so the data connection always goes to the control
//! connection's peer IP and only the announced port is used.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::{RemoteConnector, RemoteEndpoint, RemoteSession, TransportError};

/// Default timeout for establishing the control connection and logging in.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a single server reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens [`FtpSession`]s.
#[derive(Debug, Clone)]
pub struct FtpConnector {
    connect_timeout: Duration,
    reply_timeout: Duration,
}

impl FtpConnector {
    /// Creates a connector with the given connect timeout.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    /// Overrides the per-reply timeout.
    #[must_use]
    pub const fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }
}

impl Default for FtpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl RemoteConnector for FtpConnector {
    type Session = FtpSession;

    async fn connect(&self, endpoint: &RemoteEndpoint) -> Result<FtpSession, TransportError> {
        FtpSession::open(endpoint, self.connect_timeout, self.reply_timeout).await
    }
}

/// Reclassifies a handshake failure as a connect failure.
fn into_connect_error(e: TransportError) -> TransportError {
    match e {
        TransportError::Connect(_) | TransportError::Timeout => e,
        other => TransportError::Connect(other.to_string()),
    }
}

/// A server reply: three-digit code plus text (joined for multi-line replies).
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    const fn is_preliminary(&self) -> bool {
        self.code >= 100 && self.code < 200
    }

    const fn is_completion(&self) -> bool {
        self.code >= 200 && self.code < 300
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}

/// An open, logged-in FTP control connection.
///
/// If an operation fails after its command went out but before the final
/// reply was read (a reply timeout, a broken data connection), the control
/// stream is out of step with the server. The next operation then opens a
/// fresh control connection, logs in again and restores the working
/// directory before doing anything else.
#[derive(Debug)]
pub struct FtpSession {
    control: BufReader<TcpStream>,
    peer: SocketAddr,
    endpoint: RemoteEndpoint,
    connect_timeout: Duration,
    reply_timeout: Duration,
    cwd: Option<String>,
    awaiting_reply: bool,
}

impl FtpSession {
    /// Connects, reads the greeting, logs in and switches to binary mode.
    ///
    /// The whole handshake is bounded by `connect_timeout`.
    async fn open(
        endpoint: &RemoteEndpoint,
        connect_timeout: Duration,
        reply_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let handshake = async {
            let addr = format!("{}:{}", endpoint.host, endpoint.port);
            let stream = TcpStream::connect(&addr)
                .await
                .map_err(|e| TransportError::Connect(format!("{addr}: {e}")))?;
            let peer = stream
                .peer_addr()
                .map_err(|e| TransportError::Connect(format!("{addr}: {e}")))?;

            let mut session = Self {
                control: BufReader::new(stream),
                peer,
                endpoint: endpoint.clone(),
                connect_timeout,
                reply_timeout,
                cwd: None,
                awaiting_reply: false,
            };
            session.login().await.map_err(into_connect_error)?;
            Ok::<_, TransportError>(session)
        };

        tokio::time::timeout(connect_timeout, handshake)
            .await
            .map_err(|_| {
                tracing::warn!(host = %endpoint.host, port = endpoint.port, "ftp connect timed out");
                TransportError::Timeout
            })?
    }

    /// Replaces a control connection left mid-reply with a fresh one.
    async fn resync(&mut self) -> Result<(), TransportError> {
        if !self.awaiting_reply {
            return Ok(());
        }
        tracing::warn!(remote = %self.endpoint, "ftp control connection out of step, reconnecting");
        let mut fresh = Self::open(&self.endpoint, self.connect_timeout, self.reply_timeout).await?;
        if let Some(dir) = self.cwd.clone() {
            fresh.cwd(&dir).await?;
        }
        let _ = self.control.get_mut().shutdown().await;
        *self = fresh;
        Ok(())
    }

    async fn cwd(&mut self, path: &str) -> Result<(), TransportError> {
        let reply = self.command(&format!("CWD {path}")).await?;
        if reply.is_completion() {
            self.cwd = Some(path.to_string());
            Ok(())
        } else {
            tracing::debug!(path, %reply, "CWD refused");
            Err(TransportError::DirectoryNotFound(path.to_string()))
        }
    }
    async fn login(&mut self) -> Result<(), TransportError> {
        let endpoint = self.endpoint.clone();
        let greeting = self.read_reply().await?;
        if greeting.code != 220 {
            return Err(TransportError::Connect(format!(
                "unexpected greeting: {greeting}"
            )));
        }

        let reply = self.command(&format!("USER {}", endpoint.username)).await?;
        match reply.code {
            230 => {}
            331 | 332 => {
                let reply = self.command(&format!("PASS {}", endpoint.password)).await?;
                if !matches!(reply.code, 202 | 230) {
                    return Err(TransportError::Connect(format!("login rejected: {reply}")));
                }
            }
            _ => return Err(TransportError::Connect(format!("login rejected: {reply}"))),
        }

        let reply = self.command("TYPE I").await?;
        if !reply.is_completion() {
            return Err(TransportError::Connect(format!(
                "binary mode refused: {reply}"
            )));
        }

        tracing::debug!(host = %endpoint.host, user = %endpoint.username, "ftp login complete");
        Ok(())
    }

    /// Sends one command line and reads its reply.
    ///
    /// A preliminary (1xx) reply leaves the session awaiting the final one.
    async fn command(&mut self, line: &str) -> Result<Reply, TransportError> {
        let verb = line.split(' ').next().unwrap_or(line);
        tracing::trace!(verb, "ftp command");

        self.awaiting_reply = true;
        let stream = self.control.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;
        let reply = self.read_reply().await?;
        self.awaiting_reply = reply.is_preliminary();
        Ok(reply)
    }

    async fn read_reply(&mut self) -> Result<Reply, TransportError> {
        let first = self.read_line().await?;
        let (code, multi_line, text) = parse_reply_line(&first)?;
        let mut text = text.to_string();

        if multi_line {
            loop {
                let line = self.read_line().await?;
                let is_last = line.get(..3) == first.get(..3) && line.as_bytes().get(3) == Some(&b' ');
                text.push('\n');
                if is_last {
                    text.push_str(line.get(4..).unwrap_or(""));
                    break;
                }
                text.push_str(&line);
            }
        }

        Ok(Reply { code, text })
    }

    async fn read_line(&mut self) -> Result<String, TransportError> {
        let mut line = String::new();
        let n = tokio::time::timeout(self.reply_timeout, self.control.read_line(&mut line))
            .await
            .map_err(|_| TransportError::Timeout)??;
        if n == 0 {
            return Err(TransportError::Transfer(
                "server closed the control connection".to_string(),
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Waits for the final reply that closes a data transfer.
    async fn expect_completion(&mut self, what: &str) -> Result<(), TransportError> {
        let reply = self.read_reply().await?;
        self.awaiting_reply = false;
        if reply.is_completion() {
            Ok(())
        } else {
            Err(TransportError::Transfer(format!("{what}: {reply}")))
        }
    }

    /// Negotiates a passive data connection and connects to it.
    async fn open_data(&mut self) -> Result<TcpStream, TransportError> {
        let reply = self.command("EPSV").await?;
        let port = match reply.code {
            229 => parse_epsv(&reply.text)?,
            500..=599 => {
                let reply = self.command("PASV").await?;
                if reply.code != 227 {
                    return Err(TransportError::Transfer(format!(
                        "passive mode refused: {reply}"
                    )));
                }
                parse_pasv(&reply.text)?
            }
            _ => {
                return Err(TransportError::Transfer(format!(
                    "passive mode refused: {reply}"
                )));
            }
        };

        let addr = SocketAddr::new(self.peer.ip(), port);
        tokio::time::timeout(self.reply_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Transfer(format!("data connection to {addr} failed: {e}")))
    }
}

impl RemoteSession for FtpSession {
    async fn change_dir(&mut self, path: &str) -> Result<(), TransportError> {
        self.resync().await?;
        self.cwd(path).await
    }

    async fn list(&mut self) -> Result<Vec<String>, TransportError> {
        self.resync().await?;
        let mut data = self.open_data().await?;
        let reply = self.command("NLST").await?;
        if matches!(reply.code, 450 | 550) {
            // Some servers answer an empty directory with "no files".
            drop(data);
            return Ok(Vec::new());
        }
        if !reply.is_preliminary() {
            return Err(TransportError::Transfer(format!("NLST: {reply}")));
        }

        let mut raw = Vec::new();
        data.read_to_end(&mut raw)
            .await
            .map_err(|e| TransportError::Transfer(format!("NLST: {e}")))?;
        drop(data);
        self.expect_completion("NLST").await?;

        Ok(parse_name_list(&String::from_utf8_lossy(&raw)))
    }

    async fn fetch<W: AsyncWrite + Unpin + Send>(
        &mut self,
        name: &str,
        sink: &mut W,
    ) -> Result<u64, TransportError> {
        self.resync().await?;
        let mut data = self.open_data().await?;
        let reply = self.command(&format!("RETR {name}")).await?;
        if !reply.is_preliminary() {
            return Err(TransportError::Transfer(format!("RETR {name}: {reply}")));
        }

        let copied = tokio::io::copy(&mut data, sink)
            .await
            .map_err(|e| TransportError::Transfer(format!("RETR {name}: {e}")))?;
        drop(data);
        sink.flush().await?;
        self.expect_completion(&format!("RETR {name}")).await?;

        tracing::debug!(name, bytes = copied, "ftp fetch complete");
        Ok(copied)
    }

    async fn store<R: AsyncRead + Unpin + Send>(
        &mut self,
        name: &str,
        source: &mut R,
    ) -> Result<u64, TransportError> {
        self.resync().await?;
        let mut data = self.open_data().await?;
        let reply = self.command(&format!("STOR {name}")).await?;
        if !reply.is_preliminary() {
            return Err(TransportError::Transfer(format!("STOR {name}: {reply}")));
        }

        let copied = tokio::io::copy(source, &mut data)
            .await
            .map_err(|e| TransportError::Transfer(format!("STOR {name}: {e}")))?;
        data.shutdown()
            .await
            .map_err(|e| TransportError::Transfer(format!("STOR {name}: {e}")))?;
        drop(data);
        self.expect_completion(&format!("STOR {name}")).await?;

        tracing::debug!(name, bytes = copied, "ftp store complete");
        Ok(copied)
    }

    async fn disconnect(mut self) -> Result<(), TransportError> {
        if self.awaiting_reply {
            // The server may still answer an earlier command; just hang up.
            let _ = self.control.get_mut().shutdown().await;
            return Ok(());
        }
        let reply = self.command("QUIT").await;
        let _ = self.control.get_mut().shutdown().await;
        reply.map(|_| ())
    }
}

/// Splits a reply line into code, continuation marker and text.
fn parse_reply_line(line: &str) -> Result<(u16, bool, &str), TransportError> {
    let code = line
        .get(..3)
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| TransportError::Transfer(format!("malformed reply: {line:?}")))?;
    let multi_line = line.as_bytes().get(3) == Some(&b'-');
    Ok((code, multi_line, line.get(4..).unwrap_or("")))
}

/// Extracts the port from `229 Entering Extended Passive Mode (|||6446|)`.
fn parse_epsv(text: &str) -> Result<u16, TransportError> {
    let malformed = || TransportError::Transfer(format!("malformed EPSV reply: {text}"));
    let start = text.find('(').ok_or_else(malformed)?;
    let end = text.rfind(')').ok_or_else(malformed)?;
    let inner = text.get(start + 1..end).ok_or_else(malformed)?;
    let delimiter = inner.chars().next().ok_or_else(malformed)?;
    inner
        .split(delimiter)
        .nth(3)
        .and_then(|p| p.parse().ok())
        .ok_or_else(malformed)
}

/// Extracts the port from `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
fn parse_pasv(text: &str) -> Result<u16, TransportError> {
    let malformed = || TransportError::Transfer(format!("malformed PASV reply: {text}"));
    let numbers: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .collect();
    let parts: Vec<u8> = numbers
        .split(',')
        .map(str::parse::<u8>)
        .collect::<Result<_, _>>()
        .map_err(|_| malformed())?;
    match parts.as_slice() {
        [_, _, _, _, hi, lo] => Ok((u16::from(*hi) << 8) | u16::from(*lo)),
        _ => Err(malformed()),
    }
}

/// Reduces an `NLST` listing to bare file names.
fn parse_name_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| line.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
