//! Node lifecycle against a scripted stand-in for a daemon binary, with the rpc api served by a
//! mock server.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use ipfs_interop::{Error, Factory, InteropConfig, NodeKind, NodeState, PeerId, SpawnOptions};
use reqwest::Url;
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PEER: &str = "QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN";

const SCRIPT: &str = r#"#!/bin/sh
case "$1" in
  init)
    mkdir -p "$IPFS_PATH"
    printf '{"Identity":{"PeerID":"%s"},"Bootstrap":["/dnsaddr/bootstrap.libp2p.io"]}' \
      "$FAKE_PEER_ID" > "$IPFS_PATH/config"
    echo "initializing IPFS node at $IPFS_PATH"
    ;;
  daemon)
    echo "$@" > "$IPFS_PATH/daemon-args"
    if [ -n "$FAKE_EXIT" ]; then
      echo "Error: $FAKE_EXIT" >&2
      exit 1
    fi
    if [ -n "$FAKE_HANG" ]; then
      exec sleep 600
    fi
    if [ -n "$FAKE_API_FILE" ]; then
      echo "$FAKE_API_FILE" > "$IPFS_PATH/api"
    fi
    echo "Initializing daemon..."
    echo "RPC API server listening on $FAKE_API_ADDR"
    echo "Daemon is ready"
    exec sleep 600
    ;;
  *)
    exit 2
    ;;
esac
"#;

/// The script is written once so that no test forks while it is open for writing.
fn fake_binary() -> &'static Path {
    static BINARY: OnceLock<(TempDir, PathBuf)> = OnceLock::new();
    let (_, path) = BINARY.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-ipfs");
        std::fs::write(&path, SCRIPT).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        (dir, path)
    });
    path
}

fn config() -> InteropConfig {
    InteropConfig::default()
        .with_binary(NodeKind::Go, fake_binary())
        .with_binary(NodeKind::Js, fake_binary())
        .with_startup_timeout(Duration::from_secs(10))
        .with_shutdown_grace(Duration::from_millis(200))
}

async fn api() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ID": PEER,
            "Addresses": [
                "/ip4/127.0.0.1/tcp/4001",
                "/ip4/127.0.0.1/tcp/4002/ws",
                format!("/ip4/1.2.3.4/tcp/4001/p2p/{PEER}/p2p-circuit"),
            ],
            "AgentVersion": "kubo/0.0.0/fake",
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v0/shutdown"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

fn api_multiaddr(server: &MockServer) -> String {
    let addr = server.address();
    format!("/ip4/{}/tcp/{}", addr.ip(), addr.port())
}

fn options(kind: NodeKind, server: &MockServer) -> SpawnOptions {
    SpawnOptions::new(kind)
        .env("FAKE_PEER_ID", PEER)
        .env("FAKE_API_ADDR", api_multiaddr(server))
}

async fn repo_config(repo: &Path) -> Value {
    let bytes = tokio::fs::read(repo.join("config")).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn full_lifecycle() {
    let server = api().await;
    let factory = Factory::new(config());

    let mut node = factory
        .spawn(options(NodeKind::Go, &server).init(false).start(false))
        .await
        .unwrap();
    assert_eq!(node.state(), NodeState::Created);
    assert!(!node.is_attached());
    assert!(matches!(node.peer_id(), Err(Error::InvalidState { .. })));
    assert!(matches!(node.start().await, Err(Error::InvalidState { .. })));

    node.init().await.unwrap();
    assert_eq!(node.state(), NodeState::Initialized);
    assert_eq!(node.peer_id().unwrap(), PEER.parse::<PeerId>().unwrap());

    let repo = node.repo_path().unwrap().to_path_buf();
    let config = repo_config(&repo).await;
    assert_eq!(config["Bootstrap"], json!([]));
    assert_eq!(config["Identity"]["PeerID"], json!(PEER));
    assert!(config["Addresses"]["API"].as_str().unwrap().starts_with("/ip4/127.0.0.1/tcp/"));

    node.start().await.unwrap();
    assert_eq!(node.state(), NodeState::Running);
    assert_eq!(node.addrs().len(), 2, "relayed addresses are left out");
    assert!(node
        .addrs()
        .iter()
        .all(|addr| addr.to_string().ends_with(&format!("/p2p/{PEER}"))));
    assert_eq!(
        node.addr_for(ipfs_interop::Transport::WebSocket)
            .unwrap()
            .to_string(),
        format!("/ip4/127.0.0.1/tcp/4002/ws/p2p/{PEER}")
    );

    // the stand-in ignores shutdown, so this goes through the kill path
    assert!(matches!(node.cleanup().await, Err(Error::InvalidState { .. })));
    node.stop().await.unwrap();
    assert_eq!(node.state(), NodeState::Stopped);
    assert!(matches!(node.stop().await, Err(Error::InvalidState { .. })));

    node.cleanup().await.unwrap();
    assert_eq!(node.state(), NodeState::Removed);
    assert!(!repo.exists());
    // cleaning up twice is fine
    node.cleanup().await.unwrap();
}

#[tokio::test]
async fn daemon_flags_follow_options() {
    let server = api().await;
    let factory = Factory::new(config());

    let node = factory
        .spawn(options(NodeKind::Go, &server).ipns_pubsub(true).arg("--migrate"))
        .await
        .unwrap();
    let args = tokio::fs::read_to_string(node.repo_path().unwrap().join("daemon-args"))
        .await
        .unwrap();
    assert_eq!(
        args.trim(),
        "daemon --enable-pubsub-experiment --enable-namesys-pubsub --migrate"
    );

    let node = factory
        .spawn(options(NodeKind::Js, &server).offline(true))
        .await
        .unwrap();
    let args = tokio::fs::read_to_string(node.repo_path().unwrap().join("daemon-args"))
        .await
        .unwrap();
    assert_eq!(args.trim(), "daemon --offline");
}

#[tokio::test]
async fn config_overrides_win_over_defaults() {
    let server = api().await;
    let factory = Factory::new(config());

    let node = factory
        .spawn(
            options(NodeKind::Go, &server)
                .start(false)
                .config(json!({ "Bootstrap": ["/ip4/10.0.0.1/tcp/4001"] }))
                .config(json!({ "Datastore": { "StorageMax": "1GB" } })),
        )
        .await
        .unwrap();

    let config = repo_config(node.repo_path().unwrap()).await;
    assert_eq!(config["Bootstrap"], json!(["/ip4/10.0.0.1/tcp/4001"]));
    assert_eq!(config["Datastore"]["StorageMax"], json!("1GB"));
}

#[tokio::test]
async fn api_file_takes_precedence() {
    let server = api().await;
    let factory = Factory::new(config());

    // the announced address is wrong, only the api file leads to the mock
    let node = factory
        .spawn(
            options(NodeKind::Go, &server)
                .env("FAKE_API_ADDR", "/ip4/127.0.0.1/tcp/1")
                .env("FAKE_API_FILE", api_multiaddr(&server)),
        )
        .await
        .unwrap();
    assert_eq!(node.state(), NodeState::Running);
    assert_eq!(
        node.base_url(),
        &Url::parse(&server.uri()).unwrap()
    );
}

#[tokio::test]
async fn announced_api_address_is_the_fallback() {
    let server = api().await;
    let factory = Factory::new(config());

    let node = factory
        .spawn(options(NodeKind::Js, &server))
        .await
        .unwrap();
    assert_eq!(node.base_url(), &Url::parse(&server.uri()).unwrap());
    assert_eq!(node.peer_id().unwrap(), PEER.parse::<PeerId>().unwrap());
}

#[tokio::test]
async fn early_exit_reports_output() {
    let server = api().await;
    let factory = Factory::new(config());

    let err = factory
        .spawn(options(NodeKind::Go, &server).env("FAKE_EXIT", "repo is locked"))
        .await
        .unwrap_err();

    match err {
        Error::ProcessExited { output, .. } => assert!(output.contains("repo is locked"), "{output}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn startup_timeout_kills_the_daemon() {
    let server = api().await;
    let factory = Factory::new(config().with_startup_timeout(Duration::from_millis(500)));

    let err = factory
        .spawn(options(NodeKind::Go, &server).env("FAKE_HANG", "1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StartupTimeout { .. }), "{err:?}");
}

#[tokio::test]
async fn missing_binary_is_reported() {
    let factory = Factory::new(InteropConfig::default());
    assert!(!factory.config().is_enabled(NodeKind::Go));

    let err = factory.spawn(SpawnOptions::new(NodeKind::Go)).await.unwrap_err();
    assert!(matches!(err, Error::BinaryNotConfigured(NodeKind::Go)), "{err:?}");
}

#[tokio::test]
async fn kept_repositories_survive_the_node() {
    let server = api().await;
    let factory = Factory::new(config());
    let parent = tempfile::tempdir().unwrap();
    let repo = parent.path().join("kept");

    let node = factory
        .spawn(options(NodeKind::Go, &server).repo_path(&repo).start(false))
        .await
        .unwrap();
    drop(node);
    assert!(repo.join("config").is_file());

    // an initialized repository is reused, identity included
    let node = factory
        .spawn(options(NodeKind::Go, &server).repo_path(&repo).disposable(true))
        .await
        .unwrap();
    assert_eq!(node.peer_id().unwrap(), PEER.parse::<PeerId>().unwrap());
    drop(node);
    assert!(!repo.exists());
}

#[tokio::test]
async fn non_disposable_temporary_repository_is_kept() {
    let server = api().await;
    let factory = Factory::new(config());

    let node = factory
        .spawn(options(NodeKind::Js, &server).disposable(false).start(false))
        .await
        .unwrap();
    let repo = node.repo_path().unwrap().to_path_buf();
    drop(node);

    assert!(repo.join("config").is_file());
    std::fs::remove_dir_all(&repo).unwrap();
}

#[tokio::test]
async fn attaches_to_running_endpoint() {
    let server = api().await;
    let url = Url::parse(&server.uri()).unwrap();
    let factory = Factory::new(InteropConfig::default().with_rpc_endpoint(NodeKind::Js, url));
    assert!(factory.config().is_enabled(NodeKind::Js));

    let mut node = factory.spawn(SpawnOptions::new(NodeKind::Js)).await.unwrap();
    assert!(node.is_attached());
    assert_eq!(node.state(), NodeState::Running);
    assert_eq!(node.peer_id().unwrap(), PEER.parse::<PeerId>().unwrap());
    assert!(node.repo_path().is_none());

    // nothing to do for a daemon the harness does not own
    node.init().await.unwrap();
    node.start().await.unwrap();

    node.stop().await.unwrap();
    assert_eq!(node.state(), NodeState::Stopped);

    let shutdowns = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|request| request.url.path() == "/api/v0/shutdown")
        .count();
    assert_eq!(shutdowns, 1);
}
