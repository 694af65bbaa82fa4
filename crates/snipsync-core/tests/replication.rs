//! End-to-end replication through a real relay
//!
//! Every test binds its own relay on an ephemeral port and drives one
//! creator and one or more joiners through it.

use std::sync::Arc;
use std::time::Duration;

use snipsync_core::{
    AppState, Catalog, CodeSnippet, CollaborationSession, Collection, Group, LocalSink,
    LocalSource, RelayConfig, RelayServer, ReplicationController, SessionState, TransportConfig,
    TransportEvent,
};

async fn start_relay() -> TransportConfig {
    let relay = RelayServer::bind(RelayConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        ..RelayConfig::default()
    })
    .await
    .unwrap();
    let addr = relay.local_addr().unwrap();
    tokio::spawn(async move { relay.run().await });

    TransportConfig {
        relay_url: format!("ws://{}", addr),
        handshake_timeout: Duration::from_secs(5),
    }
}

/// Poll until `check` holds, failing after a few seconds
async fn wait_until(what: &str, check: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

fn names(state: &AppState) -> Vec<String> {
    state.groups().into_iter().map(|g| g.name).collect()
}

fn eng() -> Group {
    Group::new("eng", "blue")
}

fn design() -> Group {
    Group::new("design", "pink")
}

#[tokio::test]
async fn test_joiner_converges_to_creator() {
    let config = start_relay().await;

    let a = Arc::new(AppState::with_values(vec![eng()], Vec::new()));
    let mut creator = ReplicationController::new(config.clone(), a.clone());
    creator
        .start(CollaborationSession::create("s1", Some(eng())))
        .await
        .unwrap();

    let b = Arc::new(AppState::new());
    let mut joiner = ReplicationController::new(config, b.clone());
    joiner
        .start(CollaborationSession::join("s1"))
        .await
        .unwrap();
    assert_eq!(joiner.state(), SessionState::JoinerActive);

    wait_until("initial groups", || b.groups() == vec![eng()]).await;

    a.set_groups(vec![eng(), design()]);
    wait_until("added group", || names(&b) == vec!["eng", "design"]).await;

    // Joiner never wrote anything of its own
    let reader = joiner.reader().unwrap();
    assert_eq!(reader.local_writes().await, 0);
    assert_eq!(joiner.stats().pushes, 0);
    assert!(joiner.stats().pulls >= 2);
}

#[tokio::test]
async fn test_joiner_reports_connectivity_and_sync() {
    let config = start_relay().await;

    let a = Arc::new(AppState::with_values(vec![eng()], Vec::new()));
    let mut creator = ReplicationController::new(config.clone(), a);
    creator
        .start(CollaborationSession::create("s1", None))
        .await
        .unwrap();

    let b = Arc::new(AppState::new());
    let mut joiner = ReplicationController::new(config, b);
    let mut events = joiner.take_events().unwrap();
    joiner
        .start(CollaborationSession::join("s1"))
        .await
        .unwrap();

    let mut connected = false;
    let mut synced = false;
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connectivity(true) => connected = true,
                TransportEvent::SyncCompleted(true) => {
                    synced = true;
                    break;
                }
                _ => {}
            }
        }
    })
    .await;

    assert!(result.is_ok(), "timed out waiting for sync");
    assert!(connected);
    assert!(synced);
}

#[tokio::test]
async fn test_collections_replicate_with_snippets() {
    let config = start_relay().await;

    let mut catalog = Catalog::new();
    let group = catalog.create_group("eng", vec!["alice".to_string()], "blue").unwrap();
    catalog
        .create_collection("rust", vec![group], Vec::new(), "orange")
        .unwrap();
    catalog
        .create_snippet(
            "eng",
            "rust",
            CodeSnippet::new("hello", "alice")
                .with_description("prints hello")
                .with_files(vec!["main.rs".to_string()]),
        )
        .unwrap();

    let a = Arc::new(AppState::new());
    catalog.refresh(a.as_ref());

    let mut creator = ReplicationController::new(config.clone(), a.clone());
    creator
        .start(CollaborationSession::create("s1", None))
        .await
        .unwrap();

    let b = Arc::new(AppState::new());
    let mut joiner = ReplicationController::new(config, b.clone());
    joiner
        .start(CollaborationSession::join("s1"))
        .await
        .unwrap();

    wait_until("collections", || b.collections() == a.collections()).await;

    let rust: Collection = b.collection("rust").unwrap();
    assert!(rust.belongs_to("eng"));
    assert_eq!(
        rust.snippet("hello").map(|s| s.files.clone()),
        Some(vec!["main.rs".to_string()])
    );
    assert_eq!(b.groups(), a.groups());
}

#[tokio::test]
async fn test_joiner_edits_stay_local() {
    let config = start_relay().await;

    let a = Arc::new(AppState::with_values(vec![eng()], Vec::new()));
    let mut creator = ReplicationController::new(config.clone(), a.clone());
    creator
        .start(CollaborationSession::create("s1", None))
        .await
        .unwrap();

    let b = Arc::new(AppState::new());
    let mut joiner = ReplicationController::new(config, b.clone());
    joiner
        .start(CollaborationSession::join("s1"))
        .await
        .unwrap();
    wait_until("initial groups", || b.groups() == vec![eng()]).await;

    b.set_groups(vec![Group::new("mine", "red")]);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(a.groups(), vec![eng()]);
    assert_eq!(creator.reader().unwrap().groups().await.unwrap(), vec![eng()]);
    // The creator only pushed its seed
    assert_eq!(creator.stats().pushes, 2);
}

#[tokio::test]
async fn test_stopped_joiner_receives_nothing() {
    let config = start_relay().await;

    let a = Arc::new(AppState::with_values(vec![eng()], Vec::new()));
    let mut creator = ReplicationController::new(config.clone(), a.clone());
    creator
        .start(CollaborationSession::create("s1", None))
        .await
        .unwrap();

    let b = Arc::new(AppState::new());
    let mut joiner = ReplicationController::new(config.clone(), b.clone());
    joiner
        .start(CollaborationSession::join("s1"))
        .await
        .unwrap();
    wait_until("initial groups", || b.groups() == vec![eng()]).await;

    joiner.stop().await;
    assert_eq!(joiner.state(), SessionState::Closed);
    let pulls = joiner.stats().pulls;

    // A second joiner proves the creator's edit still goes out
    let c = Arc::new(AppState::new());
    let mut witness = ReplicationController::new(config, c.clone());
    witness
        .start(CollaborationSession::join("s1"))
        .await
        .unwrap();

    a.set_groups(vec![eng(), design()]);
    wait_until("witness update", || names(&c) == vec!["eng", "design"]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(b.groups(), vec![eng()]);
    assert_eq!(joiner.stats().pulls, pulls);
}

#[tokio::test]
async fn test_late_joiner_gets_current_state() {
    let config = start_relay().await;

    let a = Arc::new(AppState::with_values(vec![eng()], Vec::new()));
    let mut creator = ReplicationController::new(config.clone(), a.clone());
    creator
        .start(CollaborationSession::create("s1", None))
        .await
        .unwrap();

    // Edits made before anyone joins
    a.set_groups(vec![eng(), design()]);
    a.set_groups(vec![design()]);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let b = Arc::new(AppState::new());
    let mut joiner = ReplicationController::new(config, b.clone());
    joiner
        .start(CollaborationSession::join("s1"))
        .await
        .unwrap();

    wait_until("current groups", || b.groups() == vec![design()]).await;
}

#[tokio::test]
async fn test_sessions_do_not_leak() {
    let config = start_relay().await;

    let a = Arc::new(AppState::with_values(vec![eng()], Vec::new()));
    let mut creator = ReplicationController::new(config.clone(), a);
    creator
        .start(CollaborationSession::create("s1", None))
        .await
        .unwrap();

    let b = Arc::new(AppState::new());
    let mut joiner = ReplicationController::new(config, b.clone());
    joiner
        .start(CollaborationSession::join("other"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(b.groups().is_empty());
}

#[tokio::test]
async fn test_restart_reports_only_current_session_events() {
    let config = start_relay().await;

    let local = Arc::new(AppState::new());
    let mut joiner = ReplicationController::new(config, local);
    let mut events = joiner.take_events().unwrap();

    joiner
        .start(CollaborationSession::join("first"))
        .await
        .unwrap();
    let first = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .unwrap();
    assert_eq!(first, Some(TransportEvent::Connectivity(true)));

    joiner
        .start(CollaborationSession::join("second"))
        .await
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .unwrap();
    assert_eq!(second, Some(TransportEvent::Connectivity(true)));

    // Stopping the second session reports nothing either
    joiner.stop().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(events.try_recv().is_err());
}
