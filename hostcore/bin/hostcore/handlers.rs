use std::{path::PathBuf, sync::Arc};

use hostcore::{
    cli::{AnsiStyles, JailSubcommand, PhpSubcommand},
    config::HostcoreConfig,
    jail::{JailManager, JailStatus},
    models::DeclaredState,
    os::SystemOs,
    php::{InstanceInfo, InstanceKey, InstanceStatus},
    proxy::ProxyGenerator,
    reconcile::ReconcileReport,
    report::StepReport,
    server::ControlClient,
    HostcoreError, HostcoreResult,
};

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

pub async fn reconcile_subcommand(config: &HostcoreConfig) -> HostcoreResult<()> {
    let report = control_client(config).reconcile().await?;
    print_reconcile_report(&report);
    Ok(())
}

pub async fn render_subcommand(
    config: &HostcoreConfig,
    state: Option<PathBuf>,
    instance: Option<InstanceKey>,
) -> HostcoreResult<()> {
    let declared = load_state(config, state).await?;
    let generator = ProxyGenerator::new(config);

    let document = match instance {
        Some(key) => {
            if declared.user(&key.username).is_none() {
                return Err(HostcoreError::UnknownUser(key.username));
            }
            let version = declared.enabled_version(&key.version)?;
            generator.render_instance_routing(&key, version, declared.get_sites())
        }
        None => generator.render_main_routing(
            declared.get_sites(),
            declared.get_php_versions(),
            *config.get_http_port(),
            *config.get_https_port(),
        ),
    };

    print!("{document}");
    Ok(())
}

pub async fn jail_subcommand(
    config: &HostcoreConfig,
    subcommand: JailSubcommand,
) -> HostcoreResult<()> {
    let jail = JailManager::new(Arc::new(SystemOs::new(config.command_timeout())), config);

    match subcommand {
        JailSubcommand::Ensure => {
            jail.ensure_jail_group().await?;
            let wrote = jail.ensure_sshd_configuration().await?;
            println!(
                "{} {}",
                "jail group".header(),
                jail.jail_group().literal()
            );
            if wrote {
                println!("sshd configuration updated");
            } else {
                println!("sshd configuration already in place");
            }
        }
        JailSubcommand::Sandbox { username } => {
            print_step_report(&jail.sandbox(&username).await?);
        }
        JailSubcommand::Unsandbox { username } => {
            print_step_report(&jail.unsandbox(&username).await?);
        }
        JailSubcommand::Status { username } => {
            print_jail_status(&jail.status(&username).await?);
        }
        JailSubcommand::Repair {
            username,
            all,
            state,
        } => {
            let report = if all {
                let declared = load_state(config, state).await?;
                jail.repair_all(declared.get_users()).await
            } else {
                let username = username.ok_or_else(|| {
                    HostcoreError::custom(anyhow::anyhow!("a username or --all is required"))
                })?;
                jail.repair(&username).await?
            };
            print_step_report(&report);
        }
    }

    Ok(())
}

pub async fn php_subcommand(
    config: &HostcoreConfig,
    subcommand: PhpSubcommand,
) -> HostcoreResult<()> {
    let client = control_client(config);

    match subcommand {
        PhpSubcommand::Status => {
            let instances = client.instances().await?;
            if instances.is_empty() {
                println!("no instances");
            }
            for info in &instances {
                print_instance(info);
            }
        }
        PhpSubcommand::Start { username, version } => {
            let key = InstanceKey::parse(&username, &version)?;
            print_instance(&client.start(&key).await?);
        }
        PhpSubcommand::Stop { username, version } => {
            let key = InstanceKey::parse(&username, &version)?;
            println!("{}", client.stop(&key).await?);
        }
        PhpSubcommand::Restart { username, version } => {
            let key = InstanceKey::parse(&username, &version)?;
            print_instance(&client.restart(&key).await?);
        }
        PhpSubcommand::RestartWorkers { username, version } => {
            let key = InstanceKey::parse(&username, &version)?;
            println!("{}", client.restart_workers(&key).await?);
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn control_client(config: &HostcoreConfig) -> ControlClient {
    ControlClient::new(config.get_control_socket())
}

async fn load_state(
    config: &HostcoreConfig,
    state: Option<PathBuf>,
) -> HostcoreResult<DeclaredState> {
    let path = state.unwrap_or_else(|| config.get_state_file().clone());
    DeclaredState::load(&path, &config.layout()).await
}

fn print_step_report(report: &StepReport) {
    for step in &report.steps {
        match &step.error {
            None => println!("  {} {}", "ok".valid(), step.step),
            Some(error) => println!("  {} {}: {}", "failed".invalid(), step.step, error),
        }
    }

    if report.is_clean() {
        println!("{} {}", report.subject.literal(), "done".valid());
    } else {
        println!(
            "{} {} ({} failed steps)",
            report.subject.literal(),
            "incomplete".invalid(),
            report.failures().count()
        );
    }
}

fn print_jail_status(status: &JailStatus) {
    let state = if status.is_jailed {
        "jailed (sftp only)".valid()
    } else {
        "not jailed (full ssh)".literal()
    };

    println!("{} {}", status.username.header(), state);
    println!("  home: {}", status.home_dir.display());
    println!("  www:  {}", status.www_dir.display());
}

fn print_instance(info: &InstanceInfo) {
    let status = match info.status {
        InstanceStatus::Running => "running".valid(),
        InstanceStatus::Stopped => "stopped".literal(),
        InstanceStatus::Failed => "failed".invalid(),
    };

    let key = format!("{}:{}", info.username, info.version);
    print!("{} {}", key.header(), status);
    if let Some(pid) = info.pid {
        print!(" pid={pid} uptime={}s", info.uptime_secs);
    }
    if let Some(threads) = info.thread_count {
        print!(" threads={threads}");
    }
    println!(" sites={}", info.site_count);
    println!("  socket: {}", info.socket_path.display());

    if let Some(error) = &info.last_error {
        println!(
            "  {} {} (attempts: {})",
            "last error:".error(),
            error,
            info.restart_attempts
        );
    }
}

fn print_reconcile_report(report: &ReconcileReport) {
    for jail in report.jail.iter().filter(|r| !r.is_clean()) {
        print_step_report(jail);
    }

    let outcome = &report.instances;
    println!("{}", "instances".header());
    for key in &outcome.started {
        println!("  {} {key}", "started".valid());
    }
    for key in &outcome.stopped {
        println!("  {} {key}", "stopped".literal());
    }
    for key in &outcome.deferred {
        println!("  {} {key}", "waiting to retry".invalid());
    }
    for failure in &outcome.failed {
        println!("  {} {}: {}", "failed".invalid(), failure.key, failure.error);
    }
    println!("  {} running", outcome.running.len());

    println!("{}", "documents".header());
    for path in &report.changed_documents {
        println!("  {} {}", "changed".valid(), path.display());
    }
    if report.proxy_reloaded {
        println!("proxy reloaded");
    }
}
