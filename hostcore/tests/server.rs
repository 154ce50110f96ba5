mod common;

use common::{key, Harness};
use hostcore::{
    models::SiteStatus,
    php::InstanceStatus,
    server::{self, ControlClient, ServerState},
    HostcoreError,
};
use tokio::sync::oneshot;

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_control_api_round_trip() -> anyhow::Result<()> {
    let harness = Harness::new();
    let declared = harness.alice_state(SiteStatus::Active);
    std::fs::write(
        harness.config.get_state_file(),
        serde_json::to_string(&declared)?,
    )?;

    let state = ServerState::new(
        harness.reconciler.clone(),
        declared,
        harness.config.get_state_file().clone(),
        harness.config.layout(),
    );

    let socket = harness.config.get_control_socket().clone();
    let listener = server::bind(&socket).await?;
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server::serve(listener, state, async move {
        let _ = stopped.await;
    }));

    let client = ControlClient::new(&socket);
    let alice = key("alice", "8.4");

    let report = client.reconcile().await?;
    assert_eq!(report.instances.started, vec![alice.clone()]);

    let instances = client.instances().await?;
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].status, InstanceStatus::Running);

    let jail = client.jail_status("alice").await?;
    assert!(jail.is_jailed);
    assert!(jail.sftp_only);
    assert!(!jail.can_ssh);

    let message = client.restart_workers(&alice).await?;
    assert_eq!(message, "restarted workers of alice:8.4");

    let message = client.stop(&alice).await?;
    assert_eq!(message, "stopped alice:8.4");
    assert_eq!(harness.launcher.live_count(), 0);

    let info = client.start(&alice).await?;
    assert_eq!(info.status, InstanceStatus::Running);

    let info = client.restart(&alice).await?;
    assert_eq!(info.status, InstanceStatus::Running);

    match client.start(&key("zed", "8.4")).await {
        Err(HostcoreError::ControlServer(message)) => {
            assert!(message.starts_with("404"), "{message}");
            assert!(message.contains("unknown user: zed"), "{message}");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // A second daemon cannot take over a live socket.
    assert!(matches!(
        server::bind(&socket).await,
        Err(HostcoreError::SocketInUse(_))
    ));

    let _ = stop.send(());
    handle.await??;
    assert!(!socket.exists());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_reconcile_rereads_the_state_file() -> anyhow::Result<()> {
    let harness = Harness::new();
    let active = harness.alice_state(SiteStatus::Active);
    let state_file = harness.config.get_state_file().clone();
    std::fs::write(&state_file, serde_json::to_string(&active)?)?;

    let state = ServerState::new(
        harness.reconciler.clone(),
        active,
        state_file.clone(),
        harness.config.layout(),
    );
    state.reconcile().await?;
    assert_eq!(harness.launcher.live_count(), 1);

    let suspended = harness.alice_state(SiteStatus::Suspended);
    std::fs::write(&state_file, serde_json::to_string(&suspended)?)?;
    let report = state.reload_and_reconcile().await?;
    assert_eq!(report.instances.stopped, vec![key("alice", "8.4")]);

    // A broken file keeps the last good state.
    std::fs::write(&state_file, "{ not json")?;
    let report = state.reload_and_reconcile().await?;
    assert!(report.instances.is_unchanged());
    assert_eq!(*state.declared().read().await, suspended);

    Ok(())
}

#[tokio::test]
async fn test_unreachable_daemon_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let client = ControlClient::new(dir.path().join("missing.sock"));

    let result = client.instances().await;
    assert!(matches!(result, Err(HostcoreError::ControlServer(_))));
}
