mod common;

use std::{os::unix::net::UnixListener, time::Duration};

use common::{key, Harness};
use hostcore::{
    models::SiteStatus,
    php::{InstanceStatus, RestartPolicy},
    HostcoreError,
};

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_reconcile_is_idempotent() -> anyhow::Result<()> {
    let harness = Harness::new();
    let state = harness.alice_state(SiteStatus::Active);

    let first = harness.instances.reconcile(&state).await?;
    let second = harness.instances.reconcile(&state).await?;

    assert_eq!(first.started, vec![key("alice", "8.4")]);
    assert!(second.is_unchanged());
    assert_eq!(second.running, vec![key("alice", "8.4")]);
    assert_eq!(harness.launcher.attempts().len(), 1);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_status_reports_running_instance() -> anyhow::Result<()> {
    let harness = Harness::new();
    harness
        .instances
        .reconcile(&harness.alice_state(SiteStatus::Active))
        .await?;

    let infos = harness.instances.status().await;
    assert_eq!(infos.len(), 1);

    let info = &infos[0];
    assert_eq!(info.status, InstanceStatus::Running);
    assert_eq!(info.pid, Some(1000));
    assert_eq!(info.thread_count, Some(4));
    assert_eq!(info.site_count, 1);
    assert_eq!(info.restart_attempts, 0);
    assert!(info.started_at.is_some());
    assert!(info.last_error.is_none());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_stop_removes_socket_and_pid_file() -> anyhow::Result<()> {
    let harness = Harness::new();
    let state = harness.alice_state(SiteStatus::Active);
    harness.instances.reconcile(&state).await?;

    let alice = key("alice", "8.4");
    let socket = harness.home_root().join("alice/run/php-8.4.sock");
    let pid_file = harness.home_root().join("alice/run/php-8.4.pid");
    assert!(socket.exists());
    assert!(pid_file.exists());

    harness.instances.stop(&alice).await?;
    assert!(!socket.exists());
    assert!(!pid_file.exists());
    assert_eq!(harness.launcher.live_count(), 0);

    let again = harness.instances.stop(&alice).await;
    assert!(matches!(again, Err(HostcoreError::InstanceNotRunning(_))));

    // Still required, so the next pass brings it back.
    let outcome = harness.instances.reconcile(&state).await?;
    assert_eq!(outcome.started, vec![alice]);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_restart_workers_keeps_the_process() -> anyhow::Result<()> {
    let harness = Harness::new();
    harness
        .instances
        .reconcile(&harness.alice_state(SiteStatus::Active))
        .await?;

    let alice = key("alice", "8.4");
    harness.instances.restart_workers(&alice).await?;

    assert_eq!(*harness.admin.worker_restarts.lock().unwrap(), vec![alice]);
    assert_eq!(harness.launcher.attempts().len(), 1);
    assert!(harness.home_root().join("alice/run/php-8.4.sock").exists());

    let missing = harness.instances.restart_workers(&key("bob", "8.4")).await;
    assert!(matches!(missing, Err(HostcoreError::InstanceNotRunning(_))));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_restart_launches_a_new_process() -> anyhow::Result<()> {
    let harness = Harness::new();
    let state = harness.alice_state(SiteStatus::Active);
    harness.instances.reconcile(&state).await?;

    let info = harness.instances.restart(&key("alice", "8.4"), &state).await?;

    assert_eq!(info.status, InstanceStatus::Running);
    assert_eq!(info.pid, Some(1001));
    assert_eq!(harness.launcher.attempts().len(), 2);
    assert_eq!(harness.launcher.live_count(), 1);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_crash_is_restarted_after_the_delay() -> anyhow::Result<()> {
    let alice = key("alice", "8.4");

    // A long delay keeps the instance deferred.
    let harness = Harness::with_policy(
        RestartPolicy::builder()
            .initial_delay_ms(60_000)
            .max_attempts(5)
            .build(),
    );
    let state = harness.alice_state(SiteStatus::Active);
    harness.instances.reconcile(&state).await?;

    harness.launcher.crash(&alice);
    assert_eq!(harness.instances.check_health().await, vec![alice.clone()]);

    let outcome = harness.instances.reconcile(&state).await?;
    assert_eq!(outcome.deferred, vec![alice.clone()]);
    assert_eq!(harness.launcher.attempts().len(), 1);

    let info = harness.instances.instance(&alice).await?;
    assert_eq!(info.status, InstanceStatus::Stopped);
    assert_eq!(info.restart_attempts, 1);
    assert!(info.last_error.is_some());

    // Without a delay the next pass restarts it over the stale socket.
    let harness = Harness::new();
    let state = harness.alice_state(SiteStatus::Active);
    harness.instances.reconcile(&state).await?;
    harness.launcher.crash(&alice);

    let outcome = harness.instances.reconcile(&state).await?;
    assert_eq!(outcome.started, vec![alice.clone()]);

    let info = harness.instances.instance(&alice).await?;
    assert_eq!(info.status, InstanceStatus::Running);
    assert_eq!(info.restart_attempts, 0);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_exhausted_retries_mark_instance_failed() -> anyhow::Result<()> {
    let alice = key("alice", "8.4");
    let harness = Harness::with_policy(
        RestartPolicy::builder()
            .initial_delay_ms(0)
            .max_attempts(2)
            .build(),
    );
    let state = harness.alice_state(SiteStatus::Active);
    harness.launcher.fail_launches(&alice);

    let first = harness.instances.reconcile(&state).await?;
    assert_eq!(first.failed.len(), 1);
    assert_eq!(
        harness.instances.instance(&alice).await?.status,
        InstanceStatus::Stopped
    );

    harness.instances.reconcile(&state).await?;
    assert_eq!(
        harness.instances.instance(&alice).await?.status,
        InstanceStatus::Failed
    );

    // Failed instances are left alone by reconciliation.
    let third = harness.instances.reconcile(&state).await?;
    assert_eq!(third.failed.len(), 1);
    assert_eq!(harness.launcher.attempts_for(&alice), 2);

    // An explicit start is the operator action that clears it.
    harness.launcher.allow_launches(&alice);
    let info = harness.instances.start(&alice, &state).await?;
    assert_eq!(info.status, InstanceStatus::Running);
    assert_eq!(info.restart_attempts, 0);
    assert!(info.last_error.is_none());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_stale_socket_is_removed_before_start() -> anyhow::Result<()> {
    let harness = Harness::new();
    let run_dir = harness.home_root().join("alice/run");
    std::fs::create_dir_all(&run_dir)?;

    // Left behind by a runtime that died without cleaning up.
    drop(UnixListener::bind(run_dir.join("php-8.4.sock"))?);

    let outcome = harness
        .instances
        .reconcile(&harness.alice_state(SiteStatus::Active))
        .await?;
    assert_eq!(outcome.started, vec![key("alice", "8.4")]);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_socket_held_by_untracked_process_is_refused() -> anyhow::Result<()> {
    let harness = Harness::new();
    let run_dir = harness.home_root().join("alice/run");
    std::fs::create_dir_all(&run_dir)?;
    let _squatter = UnixListener::bind(run_dir.join("php-8.4.sock"))?;

    let result = harness
        .instances
        .start(&key("alice", "8.4"), &harness.alice_state(SiteStatus::Active))
        .await;

    assert!(matches!(result, Err(HostcoreError::SocketInUse(_))));
    assert!(harness.launcher.attempts().is_empty());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_recover_adopts_live_pid_files_and_drops_stale_ones() -> anyhow::Result<()> {
    let harness = Harness::new();
    let state = harness.alice_state(SiteStatus::Active);

    let alice_run = harness.home_root().join("alice/run");
    let bob_run = harness.home_root().join("bob/run");
    std::fs::create_dir_all(&alice_run)?;
    std::fs::create_dir_all(&bob_run)?;
    std::fs::write(alice_run.join("php-8.4.pid"), "4242")?;
    std::fs::write(bob_run.join("php-8.3.pid"), "4343\n")?;
    harness.launcher.mark_adoptable(4242);

    let adopted = harness.instances.recover(&state).await;
    assert_eq!(adopted, vec![key("alice", "8.4")]);
    assert!(!bob_run.join("php-8.3.pid").exists());

    let outcome = harness.instances.reconcile(&state).await?;
    assert_eq!(outcome.running, vec![key("alice", "8.4")]);
    assert!(harness.launcher.attempts().is_empty());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_explicit_control_of_undeclared_instances_fails() {
    let harness = Harness::new();
    let state = harness.alice_state(SiteStatus::Active);

    let unknown_user = harness.instances.start(&key("zed", "8.4"), &state).await;
    assert!(matches!(unknown_user, Err(HostcoreError::UnknownUser(_))));

    let unknown_version = harness.instances.start(&key("alice", "7.4"), &state).await;
    assert!(matches!(
        unknown_version,
        Err(HostcoreError::VersionUnavailable(_))
    ));
}

#[test_log::test(tokio::test)]
async fn test_exit_during_startup_removes_pid_file() -> anyhow::Result<()> {
    let harness = Harness::new();
    let alice = key("alice", "8.4");
    let state = harness.alice_state(SiteStatus::Active);
    let spec = harness.instances.spec(&alice, &state)?;

    harness.launcher.exit_on_launch(&alice);
    let result = harness.instances.start(&alice, &state).await;

    assert!(result.is_err());
    assert!(!spec.pid_file.exists());
    assert_eq!(harness.launcher.live_count(), 0);

    let info = harness.instances.instance(&alice).await?;
    assert_eq!(info.status, InstanceStatus::Stopped);
    assert!(info.last_error.is_some_and(|e| e.contains("exited during startup")));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_start_during_teardown_is_tracked() -> anyhow::Result<()> {
    let harness = Harness::new();
    let alice = key("alice", "8.4");
    let suspended = harness.alice_state(SiteStatus::Suspended);

    harness.instances.start(&alice, &suspended).await?;
    harness.launcher.slow_terminate(Duration::from_millis(300));

    let instances = harness.instances.clone();
    let state = suspended.clone();
    let teardown = tokio::spawn(async move { instances.reconcile(&state).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let info = harness.instances.start(&alice, &suspended).await?;
    let outcome = teardown.await??;

    assert_eq!(outcome.stopped, vec![alice.clone()]);
    assert_eq!(info.status, InstanceStatus::Running);
    assert_eq!(harness.launcher.live_count(), 1);
    assert_eq!(harness.instances.status().await.len(), 1);

    harness.launcher.slow_terminate(Duration::ZERO);
    harness.instances.stop(&alice).await?;
    assert_eq!(harness.launcher.live_count(), 0);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_stop_all_stops_every_instance() -> anyhow::Result<()> {
    let harness = Harness::new();
    let state = harness.state(vec![
        common::site("a", "alice.test", "alice", SiteStatus::Active),
        common::site("b", "bob.test", "bob", SiteStatus::Active),
    ]);
    harness.instances.reconcile(&state).await?;
    assert_eq!(harness.launcher.live_count(), 2);

    let report = harness.instances.stop_all().await;
    assert!(report.is_clean());
    assert_eq!(harness.launcher.live_count(), 0);
    assert!(harness.instances.status().await.is_empty());

    Ok(())
}
