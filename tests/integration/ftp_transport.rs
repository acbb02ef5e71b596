//! Integration tests for the FTP transport against the in-memory dev server.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use taskftp::transport::ftp::FtpConnector;
use taskftp::transport::{RemoteConnector, RemoteEndpoint, RemoteSession, TransportError};
use taskftp_devserver::{FileStore, ServerState, start_server};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

async fn serve(state: ServerState) -> (SocketAddr, Arc<ServerState>) {
    let state = Arc::new(state);
    let (addr, _handle) = start_server("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start dev server");
    (addr, state)
}

fn endpoint(addr: SocketAddr, user: &str, password: &str, directory: &str) -> RemoteEndpoint {
    RemoteEndpoint {
        host: addr.ip().to_string(),
        port: addr.port(),
        username: user.to_string(),
        password: password.to_string(),
        directory: directory.to_string(),
    }
}

fn connector() -> FtpConnector {
    FtpConnector::new(Duration::from_secs(5)).with_reply_timeout(Duration::from_secs(5))
}

/// A minimal scripted FTP server whose every `NLST` lists `tasks.xml`.
///
/// On the first control connection the `226` closing the first `NLST` is
/// held back for `stall`. Returns the address and a count of accepted
/// control connections.
async fn stalling_server(stall: Duration) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let index = counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(scripted_session(stream, index == 0, stall));
        }
    });
    (addr, connections)
}

async fn scripted_session(stream: tokio::net::TcpStream, stall_first_list: bool, stall: Duration) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut passive: Option<TcpListener> = None;
    let mut stall_next = stall_first_list;

    let _ = write.write_all(b"220 scripted\r\n").await;
    while let Ok(Some(line)) = lines.next_line().await {
        let verb = line.split(' ').next().unwrap_or("").to_ascii_uppercase();
        let reply = match verb.as_str() {
            "USER" => "230 ok".to_string(),
            "TYPE" => "200 ok".to_string(),
            "CWD" => "250 ok".to_string(),
            "EPSV" => {
                let data = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let port = data.local_addr().unwrap().port();
                passive = Some(data);
                format!("229 Entering Extended Passive Mode (|||{port}|)")
            }
            "NLST" => {
                let Some(data) = passive.take() else {
                    let _ = write.write_all(b"425 no data connection\r\n").await;
                    continue;
                };
                let _ = write.write_all(b"150 here\r\n").await;
                if let Ok((mut conn, _)) = data.accept().await {
                    let _ = conn.write_all(b"tasks.xml\r\n").await;
                    let _ = conn.shutdown().await;
                }
                if stall_next {
                    stall_next = false;
                    tokio::time::sleep(stall).await;
                }
                "226 done".to_string()
            }
            "QUIT" => {
                let _ = write.write_all(b"221 bye\r\n").await;
                return;
            }
            _ => "502 not implemented".to_string(),
        };
        if write.write_all(format!("{reply}\r\n").as_bytes()).await.is_err() {
            return;
        }
    }
}

// ===========================================================================
// Transfers
// ===========================================================================

#[tokio::test]
async fn store_list_fetch_round_trip() {
    let (addr, state) = serve(ServerState::new(FileStore::with_directories(["/todo"]))).await;
    let ep = endpoint(addr, "anonymous", "", "/todo");

    let mut session = connector().connect(&ep).await.unwrap();
    session.change_dir("/todo").await.unwrap();
    assert!(session.list().await.unwrap().is_empty());

    let body = b"<tasklist>\n</tasklist>".to_vec();
    let stored = session
        .store("tasks.xml", &mut body.as_slice())
        .await
        .unwrap();
    assert_eq!(stored, body.len() as u64);
    assert_eq!(session.list().await.unwrap(), vec!["tasks.xml"]);

    let mut fetched = Vec::new();
    let n = session.fetch("tasks.xml", &mut fetched).await.unwrap();
    assert_eq!(n, body.len() as u64);
    assert_eq!(fetched, body);

    session.disconnect().await.unwrap();
    assert_eq!(state.store.read("/todo", "tasks.xml").await.unwrap(), body);
    assert_eq!(state.store.write_count(), 1);
}

#[tokio::test]
async fn store_replaces_existing_file() {
    let (addr, state) = serve(ServerState::default()).await;
    state.store.write("/", "tasks.xml", b"old".to_vec()).await;
    let ep = endpoint(addr, "anonymous", "", "/");

    let mut session = connector().connect(&ep).await.unwrap();
    session.store("tasks.xml", &mut &b"new contents"[..]).await.unwrap();
    session.disconnect().await.unwrap();

    assert_eq!(
        state.store.read("/", "tasks.xml").await.unwrap(),
        b"new contents"
    );
}

#[tokio::test]
async fn large_file_survives_transfer() {
    let (addr, _state) = serve(ServerState::default()).await;
    let ep = endpoint(addr, "anonymous", "", "/");
    let body: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();

    let mut session = connector().connect(&ep).await.unwrap();
    session.store("big.xml", &mut body.as_slice()).await.unwrap();
    let mut fetched = Vec::new();
    session.fetch("big.xml", &mut fetched).await.unwrap();
    assert_eq!(fetched, body);
}

#[tokio::test]
async fn fetch_of_missing_file_is_a_transfer_error() {
    let (addr, _state) = serve(ServerState::default()).await;
    let ep = endpoint(addr, "anonymous", "", "/");

    let mut session = connector().connect(&ep).await.unwrap();
    let mut sink = Vec::new();
    let result = session.fetch("nothing.xml", &mut sink).await;
    assert!(matches!(result, Err(TransportError::Transfer(_))), "{result:?}");

    // The session is still usable afterwards.
    assert!(session.list().await.unwrap().is_empty());
}

// ===========================================================================
// Session failures
// ===========================================================================

#[tokio::test]
async fn login_with_credentials() {
    let state = ServerState::new(FileStore::new()).with_credentials("alice", "secret");
    let (addr, _state) = serve(state).await;

    let ok = connector()
        .connect(&endpoint(addr, "alice", "secret", "/"))
        .await;
    assert!(ok.is_ok());

    let rejected = connector()
        .connect(&endpoint(addr, "alice", "wrong", "/"))
        .await;
    assert!(
        matches!(&rejected, Err(TransportError::Connect(m)) if m.contains("530")),
        "{rejected:?}"
    );
}

#[tokio::test]
async fn missing_directory_is_not_found() {
    let (addr, _state) = serve(ServerState::default()).await;
    let mut session = connector()
        .connect(&endpoint(addr, "anonymous", "", "/missing"))
        .await
        .unwrap();

    let result = session.change_dir("/missing").await;
    assert!(matches!(result, Err(TransportError::DirectoryNotFound(_))));
}

#[tokio::test]
async fn late_reply_does_not_derail_later_commands() {
    let (addr, connections) = stalling_server(Duration::from_millis(400)).await;
    let connector =
        FtpConnector::new(Duration::from_secs(5)).with_reply_timeout(Duration::from_millis(200));

    let mut session = connector
        .connect(&endpoint(addr, "anonymous", "", "/todo"))
        .await
        .unwrap();
    session.change_dir("/todo").await.unwrap();

    let first = session.list().await;
    assert!(matches!(first, Err(TransportError::Timeout)), "{first:?}");

    // The late 226 must not be taken as the answer to anything that follows.
    assert_eq!(session.list().await.unwrap(), vec!["tasks.xml"]);
    assert_eq!(session.list().await.unwrap(), vec!["tasks.xml"]);
    assert_eq!(connections.load(Ordering::SeqCst), 2);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn unreachable_host_is_a_connect_error() {
    // Bind then drop to get a port with nothing listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = connector()
        .connect(&endpoint(addr, "anonymous", "", "/"))
        .await;
    assert!(matches!(result, Err(TransportError::Connect(_))));
}

#[tokio::test]
async fn silent_server_times_out() {
    // Accepts the TCP connection but never sends a greeting.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _hold = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(stream);
    });

    let result = FtpConnector::new(Duration::from_millis(200))
        .connect(&endpoint(addr, "anonymous", "", "/"))
        .await;
    assert!(matches!(result, Err(TransportError::Timeout)));
}
