mod common;

use std::sync::atomic::Ordering;

use common::{key, site, Harness};
use hostcore::{models::SiteStatus, os::Owner, HostcoreError};

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_single_site_is_jailed_started_and_routed() -> anyhow::Result<()> {
    let harness = Harness::new();
    let state = harness.alice_state(SiteStatus::Active);

    let report = harness.reconciler.reconcile(&state).await?;

    assert_eq!(report.instances.started, vec![key("alice", "8.4")]);
    assert!(report.host.is_clean(), "{:?}", report.host);
    assert!(report.jail.iter().all(|r| r.is_clean()));
    assert!(report.proxy_reloaded);

    let socket = harness.home_root().join("alice/run/php-8.4.sock");
    let info = harness.instances.instance(&key("alice", "8.4")).await?;
    assert_eq!(info.socket_path, socket);
    assert!(socket.exists());

    let main = harness.main_document();
    assert!(main.contains("http://alice.test {"), "{main}");
    assert!(main.contains(&format!("reverse_proxy unix/{}", socket.display())));

    let instance_doc =
        std::fs::read_to_string(harness.config.instance_config_path("alice", "8.4"))?;
    assert!(instance_doc.contains("host alice.test"));

    let home = harness.os.dir(harness.home_root().join("alice")).unwrap();
    assert_eq!(home.owner, Owner::Root);
    assert_eq!(home.mode, 0o755);
    assert!(harness.os.is_member("alice", "hostcore-jail"));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_second_pass_changes_nothing() -> anyhow::Result<()> {
    let harness = Harness::new();
    let state = harness.alice_state(SiteStatus::Active);

    harness.reconciler.reconcile(&state).await?;
    let report = harness.reconciler.reconcile(&state).await?;

    assert!(report.instances.is_unchanged());
    assert_eq!(report.instances.running, vec![key("alice", "8.4")]);
    assert!(report.changed_documents.is_empty());
    assert!(!report.proxy_reloaded);
    assert!(report.reloaded_instances.is_empty());
    assert_eq!(harness.launcher.attempts().len(), 1);
    assert_eq!(harness.reloads(), 1);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_suspended_site_is_unrouted_and_its_instance_stopped() -> anyhow::Result<()> {
    let harness = Harness::new();
    harness
        .reconciler
        .reconcile(&harness.alice_state(SiteStatus::Active))
        .await?;

    let report = harness
        .reconciler
        .reconcile(&harness.alice_state(SiteStatus::Suspended))
        .await?;

    assert_eq!(report.instances.stopped, vec![key("alice", "8.4")]);
    assert!(report.proxy_reloaded);
    assert!(!harness.main_document().contains("alice.test"));
    assert!(!harness.home_root().join("alice/run/php-8.4.sock").exists());
    assert!(!harness.config.instance_config_path("alice", "8.4").exists());

    // Back to active: a new process on a fresh socket.
    let report = harness
        .reconciler
        .reconcile(&harness.alice_state(SiteStatus::Active))
        .await?;

    assert_eq!(report.instances.started, vec![key("alice", "8.4")]);
    assert_eq!(harness.launcher.attempts_for(&key("alice", "8.4")), 2);
    assert!(harness.main_document().contains("alice.test"));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_main_routing_has_one_block_per_active_site() -> anyhow::Result<()> {
    let harness = Harness::new();
    let state = harness.state(vec![
        site("a", "alice.test", "alice", SiteStatus::Active),
        site("b", "shop.alice.test", "alice", SiteStatus::Active),
        site("c", "old.alice.test", "alice", SiteStatus::Suspended),
        site("d", "bob.test", "bob", SiteStatus::Suspended),
    ]);

    let report = harness.reconciler.reconcile(&state).await?;
    assert_eq!(report.instances.started, vec![key("alice", "8.4")]);

    let main = harness.main_document();
    assert_eq!(main.matches("reverse_proxy unix/").count(), 2);
    assert!(!main.contains("old.alice.test"));
    assert!(!main.contains("bob.test"));
    assert_eq!(main.matches(":80 {").count(), 1);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_changed_document_is_loaded_into_running_instance() -> anyhow::Result<()> {
    let harness = Harness::new();
    harness
        .reconciler
        .reconcile(&harness.alice_state(SiteStatus::Active))
        .await?;
    assert!(harness.admin.loads.lock().unwrap().is_empty());

    let state = harness.state(vec![
        site("alice-test", "alice.test", "alice", SiteStatus::Active),
        site("alice-blog", "blog.alice.test", "alice", SiteStatus::Active),
    ]);
    let report = harness.reconciler.reconcile(&state).await?;

    assert_eq!(report.reloaded_instances, vec![key("alice", "8.4")]);
    assert!(report.instances.started.is_empty());

    let loads = harness.admin.loads.lock().unwrap();
    assert_eq!(loads.len(), 1);
    assert!(loads[0].1.contains("blog.alice.test"));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_proxy_reload_failure_is_returned_and_retried() -> anyhow::Result<()> {
    let harness = Harness::new();
    let state = harness.alice_state(SiteStatus::Active);

    harness.reloader.fail.store(true, Ordering::SeqCst);
    let result = harness.reconciler.reconcile(&state).await;
    assert!(matches!(result, Err(HostcoreError::ProxyReload(_))));

    // The rest of the pass still ran.
    assert_eq!(harness.launcher.attempts().len(), 1);
    assert!(harness.main_document().contains("alice.test"));

    // The document did not change again, but the failed reload is retried.
    harness.reloader.fail.store(false, Ordering::SeqCst);
    let report = harness.reconciler.reconcile(&state).await?;
    assert!(report.changed_documents.is_empty());
    assert!(report.proxy_reloaded);
    assert_eq!(harness.reloads(), 1);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_instance_reload_failure_is_returned_and_retried() -> anyhow::Result<()> {
    let harness = Harness::new();
    harness
        .reconciler
        .reconcile(&harness.alice_state(SiteStatus::Active))
        .await?;

    let state = harness.state(vec![
        site("alice-test", "alice.test", "alice", SiteStatus::Active),
        site("alice-blog", "blog.alice.test", "alice", SiteStatus::Active),
    ]);

    harness.admin.fail_loads.store(true, Ordering::SeqCst);
    let result = harness.reconciler.reconcile(&state).await;
    assert!(matches!(result, Err(HostcoreError::AdminApi { .. })));

    harness.admin.fail_loads.store(false, Ordering::SeqCst);
    let report = harness.reconciler.reconcile(&state).await?;
    assert_eq!(report.reloaded_instances, vec![key("alice", "8.4")]);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_admin_and_shell_users_are_not_jailed() -> anyhow::Result<()> {
    let harness = Harness::new();
    let state = harness.state(vec![site("ops", "ops.test", "ops", SiteStatus::Active)]);

    let report = harness.reconciler.reconcile(&state).await?;

    assert!(!harness.os.is_member("ops", "hostcore-jail"));
    assert_eq!(report.instances.started, vec![key("ops", "8.4")]);

    // The tree is still repaired so the runtime can run as the user.
    let www = harness.os.dir(harness.home_root().join("ops/www")).unwrap();
    assert_eq!(www.owner, Owner::User("ops".into()));

    Ok(())
}
