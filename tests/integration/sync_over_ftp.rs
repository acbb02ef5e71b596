//! End-to-end tests: the sync engine talking FTP to the dev server.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use taskftp::cli;
use taskftp::config::TaskCommand;
use taskftp::sync::{SyncConfig, SyncEvent, SyncEvents, TaskSync, WorkerState};
use taskftp::transport::RemoteEndpoint;
use taskftp::transport::ftp::FtpConnector;
use taskftp_devserver::{FileStore, ServerState, start_server};
use taskftp_proto::{TaskId, codec};

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

fn sync_config(addr: SocketAddr, directory: &str, local: &tempfile::TempDir) -> SyncConfig {
    let endpoint = RemoteEndpoint {
        host: addr.ip().to_string(),
        port: addr.port(),
        username: "alice".to_string(),
        password: "secret".to_string(),
        directory: directory.to_string(),
    };
    let mut config = SyncConfig::new(endpoint, local.path().join("tasks.xml"));
    config.poll_interval = Duration::from_secs(3600);
    config
}

fn connector() -> FtpConnector {
    FtpConnector::new(Duration::from_secs(5))
}

async fn next_event(events: &mut SyncEvents) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for a sync event")
        .expect("event channel closed")
}

// ===========================================================================
// Engine over FTP
// ===========================================================================

#[tokio::test]
async fn first_sync_bootstraps_and_uploads() {
    let state = ServerState::new(FileStore::with_directories(["/todo"]))
        .with_credentials("alice", "secret");
    let (addr, state) = serve(state).await;
    let local = tempfile::tempdir().unwrap();

    let (sync, mut events) = TaskSync::start(sync_config(addr, "/todo", &local), connector());
    sync.load().unwrap();
    match next_event(&mut events).await {
        SyncEvent::TasksLoaded(tasks) => assert!(tasks.is_empty()),
        other => panic!("expected TasksLoaded, got {other:?}"),
    }

    let id = sync.add("Buy milk").unwrap();
    sync.close().unwrap();
    assert_eq!(sync.closed().await, WorkerState::Stopped);

    let remote = state.store.read("/todo", "tasks.xml").await.unwrap();
    let tasks = codec::decode_bytes(&remote).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks.get(&id).unwrap().title, "Buy milk");
    assert_eq!(state.store.write_count(), 1);
}

#[tokio::test]
async fn second_client_sees_first_clients_changes() {
    let (addr, _state) = serve(ServerState::new(FileStore::with_directories(["/todo"]))).await;
    let local_a = tempfile::tempdir().unwrap();
    let local_b = tempfile::tempdir().unwrap();

    let (a, mut a_events) = TaskSync::start(sync_config(addr, "/todo", &local_a), connector());
    a.load().unwrap();
    next_event(&mut a_events).await;
    let id = a.add("Shared").unwrap();
    a.close().unwrap();
    a.closed().await;

    let (b, mut b_events) = TaskSync::start(sync_config(addr, "/todo", &local_b), connector());
    b.load().unwrap();
    match next_event(&mut b_events).await {
        SyncEvent::TasksLoaded(tasks) => {
            assert_eq!(tasks.get(&id).unwrap().title, "Shared");
        }
        other => panic!("expected TasksLoaded, got {other:?}"),
    }
    assert_eq!(b.get(&id).unwrap().title, "Shared");
    b.close().unwrap();
    b.closed().await;
}

#[tokio::test]
async fn missing_directory_fails_the_worker() {
    let (addr, _state) = serve(ServerState::default()).await;
    let local = tempfile::tempdir().unwrap();

    let (sync, mut events) = TaskSync::start(sync_config(addr, "/nope", &local), connector());
    sync.load().unwrap();
    match next_event(&mut events).await {
        SyncEvent::Error(message) => assert!(message.contains("/nope"), "{message}"),
        other => panic!("expected Error, got {other:?}"),
    }
    sync.close().unwrap();
    assert_eq!(sync.closed().await, WorkerState::Failed);
}

#[tokio::test]
async fn wrong_password_fails_the_worker() {
    let state = ServerState::new(FileStore::new()).with_credentials("alice", "other");
    let (addr, _state) = serve(state).await;
    let local = tempfile::tempdir().unwrap();

    let (sync, mut events) = TaskSync::start(sync_config(addr, "/", &local), connector());
    match next_event(&mut events).await {
        SyncEvent::Error(message) => assert!(message.contains("530"), "{message}"),
        other => panic!("expected Error, got {other:?}"),
    }
    let mut state = sync.subscribe_state();
    state.wait_for(|s| *s == WorkerState::Failed).await.unwrap();
}

// ===========================================================================
// Command-line workflow
// ===========================================================================

#[tokio::test]
async fn cli_commands_round_trip_through_the_server() {
    let (addr, state) = serve(ServerState::new(FileStore::with_directories(["/todo"]))).await;
    let local = tempfile::tempdir().unwrap();
    let run = |command| cli::execute(sync_config(addr, "/todo", &local), connector(), command);

    let id = run(TaskCommand::Add {
        title: "Write report".to_string(),
    })
    .await
    .unwrap();

    let edited = run(TaskCommand::Edit {
        id: id.clone(),
        title: None,
        comment: Some("section 3 first".to_string()),
        due: Some("2026-11-30".to_string()),
    })
    .await
    .unwrap();
    assert!(edited.contains("(due 2026-11-30)"), "{edited}");

    run(TaskCommand::Done { id: id.clone() }).await.unwrap();

    let listing = run(TaskCommand::List { json: false }).await.unwrap();
    assert!(listing.starts_with(&format!("[x] {id}  Write report")), "{listing}");
    assert!(listing.contains("section 3 first"), "{listing}");

    let json = run(TaskCommand::List { json: true }).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value[&id]["done"], serde_json::Value::Bool(true));

    run(TaskCommand::Remove { id: id.clone() }).await.unwrap();
    let remote = state.store.read("/todo", "tasks.xml").await.unwrap();
    assert!(
        !codec::decode_bytes(&remote)
            .unwrap()
            .contains(&TaskId::new(id))
    );
}

#[tokio::test]
async fn cli_rejects_bad_due_date_before_connecting() {
    let (addr, state) = serve(ServerState::new(FileStore::with_directories(["/todo"]))).await;
    let local = tempfile::tempdir().unwrap();

    let result = cli::execute(
        sync_config(addr, "/todo", &local),
        connector(),
        TaskCommand::Edit {
            id: "x".to_string(),
            title: None,
            comment: None,
            due: Some("next tuesday".to_string()),
        },
    )
    .await;
    assert!(matches!(result, Err(cli::CliError::InvalidDue(_))));
    assert_eq!(state.store.write_count(), 0);
}
