mod handlers;

use clap::{CommandFactory, Parser};
use hostcore::{
    cli::{HostcoreArgs, HostcoreSubcommand},
    config::HostcoreConfig,
    HostcoreResult,
};
use tracing_subscriber::EnvFilter;

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> HostcoreResult<()> {
    let _ = dotenvy::dotenv();

    let args = HostcoreArgs::parse();
    init_tracing(args.verbose);

    let config = HostcoreConfig::load(args.config.as_deref()).await?;
    match args.subcommand {
        Some(HostcoreSubcommand::Run { state }) => {
            hostcore::daemon::run(config, state).await?;
        }
        Some(HostcoreSubcommand::Reconcile) => {
            handlers::reconcile_subcommand(&config).await?;
        }
        Some(HostcoreSubcommand::Render { state, instance }) => {
            handlers::render_subcommand(&config, state, instance).await?;
        }
        Some(HostcoreSubcommand::Jail { subcommand }) => {
            handlers::jail_subcommand(&config, subcommand).await?;
        }
        Some(HostcoreSubcommand::Php { subcommand }) => {
            handlers::php_subcommand(&config, subcommand).await?;
        }
        None => {
            HostcoreArgs::command().print_help()?;
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `-v`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
