//! Cluster bootstrap: address normalization and fatal setup failures

use quorate::common::{node_id_for, MetricsRegistry, RaftSettings};
use quorate::consensus::Membership;
use quorate::{setup_raft, Error, Throttler};
use std::sync::Arc;
use tempfile::TempDir;

fn settings(bind: &str, nodes: &[&str], default_port: u16) -> RaftSettings {
    RaftSettings {
        bind: bind.to_string(),
        nodes: nodes.iter().map(|n| n.to_string()).collect(),
        default_port,
        ..RaftSettings::default()
    }
}

#[test]
fn test_membership_from_bare_hostnames() {
    let membership =
        Membership::resolve(&settings("node1", &["node1", "node2", "node3"], 10008)).unwrap();
    assert_eq!(membership.bind, "node1:10008");
    assert_eq!(
        membership.addresses(),
        vec!["node1:10008", "node2:10008", "node3:10008"]
    );
    assert_eq!(membership.members[&node_id_for("node2:10008")], "node2:10008");
}

#[test]
fn test_zero_default_port_leaves_addresses_alone() {
    let membership = Membership::resolve(&settings("node1", &["node2", "node3:7000"], 0)).unwrap();
    assert_eq!(membership.bind, "node1");
    assert_eq!(membership.addresses(), vec!["node1", "node2", "node3:7000"]);
}

#[test]
fn test_blank_peers_ignored() {
    let membership = Membership::resolve(&settings("10.0.0.1:10008", &["", " "], 10008)).unwrap();
    assert_eq!(membership.members.len(), 1);
}

async fn try_setup(settings: &RaftSettings) -> quorate::Result<()> {
    let store = setup_raft(
        settings,
        Arc::new(Throttler::new()),
        Arc::new(MetricsRegistry::new()),
    )
    .await?;
    store.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unusable_data_dir_is_fatal() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("not-a-dir");
    std::fs::write(&file, b"occupied").unwrap();

    let mut settings = settings("127.0.0.1:0", &[], 0);
    settings.data_dir = file;
    assert!(try_setup(&settings).await.is_err());
}

#[tokio::test]
async fn test_bind_in_use_is_fatal() {
    let dir = TempDir::new().unwrap();
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap().to_string();

    let mut settings = settings(&addr, &[], 0);
    settings.data_dir = dir.path().to_path_buf();
    let err = try_setup(&settings).await.unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)), "{}", err);
}

#[tokio::test]
async fn test_invalid_ticks_are_fatal() {
    let dir = TempDir::new().unwrap();
    let mut settings = settings("127.0.0.1:0", &[], 0);
    settings.data_dir = dir.path().to_path_buf();
    settings.election_tick = 1;
    settings.heartbeat_tick = 2;
    assert!(matches!(
        try_setup(&settings).await,
        Err(Error::InvalidConfig(_))
    ));
}
