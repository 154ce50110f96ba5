//! The long-running control plane process behind `hostcore run`.

use std::{path::PathBuf, sync::Arc};

use tokio::{
    signal::unix::{signal, SignalKind},
    sync::oneshot,
    time::{interval_at, Instant, MissedTickBehavior},
};

use crate::{
    config::HostcoreConfig,
    jail::JailManager,
    models::DeclaredState,
    os::SystemOs,
    php::{AdminSocketClient, InstanceManager, SystemLauncher},
    proxy::AdminApiReloader,
    reconcile::Reconciler,
    server::{self, ServerState},
    HostcoreError, HostcoreResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Why the daemon loop woke up.
enum Wakeup {
    Tick,
    Hangup,
    Terminate(&'static str),
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds the production components around `config`.
///
/// The declared state is read from `state_file`, or from the configured path.
pub async fn build(
    config: &HostcoreConfig,
    state_file: Option<PathBuf>,
) -> HostcoreResult<ServerState> {
    let state_file = state_file.unwrap_or_else(|| config.get_state_file().clone());
    let layout = config.layout();
    let declared = DeclaredState::load(&state_file, &layout)
        .await
        .map_err(|e| HostcoreError::InvalidConfig {
            path: state_file.clone(),
            reason: e.to_string(),
        })?;

    let os = Arc::new(SystemOs::new(config.command_timeout()));
    let jail = Arc::new(JailManager::new(os, config));
    let instances = Arc::new(InstanceManager::new(
        config,
        Arc::new(SystemLauncher::new()),
        Arc::new(AdminSocketClient::new(config.command_timeout())),
    ));
    let reloader = Arc::new(AdminApiReloader::new(
        config.get_proxy_admin_url(),
        config.command_timeout(),
    )?);

    let reconciler = Arc::new(Reconciler::new(config, jail, instances, reloader));
    Ok(ServerState::new(reconciler, declared, state_file, layout))
}

/// Runs the daemon until SIGTERM or SIGINT.
///
/// Instances left behind by a previous run are adopted first, then one pass runs before the
/// control API starts serving. Afterwards a pass runs every `reconcile_interval_secs` and on
/// SIGHUP, which also rereads the state file. On shutdown every instance is stopped.
pub async fn run(config: HostcoreConfig, state_file: Option<PathBuf>) -> HostcoreResult<()> {
    let listener = server::bind(config.get_control_socket()).await?;
    let state = build(&config, state_file).await?;
    let instances = state.reconciler().instances().clone();

    let declared = state.declared().read().await.clone();
    let adopted = instances.recover(&declared).await;
    tracing::info!(adopted = adopted.len(), "starting hostcore daemon");

    if let Err(e) = state.reconcile().await {
        tracing::error!("initial reconciliation failed: {e}");
    }

    let (stop_server, server_stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(server::serve(listener, state.clone(), async move {
        let _ = server_stopped.await;
    }));

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    let period = config.reconcile_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let wakeup = tokio::select! {
            _ = ticker.tick() => Wakeup::Tick,
            _ = hangup.recv() => Wakeup::Hangup,
            _ = terminate.recv() => Wakeup::Terminate("SIGTERM"),
            _ = interrupt.recv() => Wakeup::Terminate("SIGINT"),
        };

        let result = match wakeup {
            Wakeup::Tick => {
                let crashed = instances.check_health().await;
                if !crashed.is_empty() {
                    tracing::warn!(count = crashed.len(), "instances died since the last pass");
                }
                state.reconcile().await
            }
            Wakeup::Hangup => {
                tracing::info!("SIGHUP received, rereading declared state");
                state.reload_and_reconcile().await
            }
            Wakeup::Terminate(name) => {
                tracing::info!("{name} received, shutting down");
                break;
            }
        };

        if let Err(e) = result {
            tracing::error!("reconciliation failed: {e}");
        }
    }

    let _ = stop_server.send(());
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("control api stopped with an error: {e}"),
        Err(e) => tracing::error!("control api task failed: {e}"),
    }

    let report = instances.stop_all().await;
    if !report.is_clean() {
        tracing::warn!(
            failures = report.failures().count(),
            "some instances did not stop cleanly"
        );
    }

    tracing::info!("hostcore daemon stopped");
    Ok(())
}
