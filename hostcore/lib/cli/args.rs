use std::path::PathBuf;

use clap::{ArgGroup, Parser};

use crate::php::InstanceKey;

use super::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// hostcore - keeps jailed users, per-user PHP runtimes and proxy routing in line with declared state
#[derive(Debug, Parser)]
#[command(name = "hostcore", author, about, version, styles=styles::styles())]
pub struct HostcoreArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<HostcoreSubcommand>,

    /// Path to the configuration file
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Debug, Parser)]
pub enum HostcoreSubcommand {
    /// Run the daemon in the foreground
    #[command(name = "run")]
    Run {
        /// Declared state file, overriding the configured one
        #[arg(short, long, value_name = "PATH")]
        state: Option<PathBuf>,
    },

    /// Ask the running daemon for an immediate reconciliation pass
    #[command(name = "reconcile")]
    Reconcile,

    /// Print a rendered proxy document without touching the host
    #[command(name = "render")]
    Render {
        /// Declared state file, overriding the configured one
        #[arg(short, long, value_name = "PATH")]
        state: Option<PathBuf>,

        /// Render the document of one instance instead of the main proxy
        #[arg(short, long, value_name = "USER:VERSION", value_parser = parse_instance_key)]
        instance: Option<InstanceKey>,
    },

    /// Manage SFTP jails
    #[command(name = "jail")]
    Jail {
        /// The jail subcommand to run
        #[command(subcommand)]
        subcommand: JailSubcommand,
    },

    /// Manage PHP instances through the running daemon
    #[command(name = "php")]
    Php {
        /// The php subcommand to run
        #[command(subcommand)]
        subcommand: PhpSubcommand,
    },
}

/// Jail subcommands. These act on the host directly and need root.
#[derive(Debug, Parser)]
pub enum JailSubcommand {
    /// Create the jail group and inject the sshd block
    #[command(name = "ensure")]
    Ensure,

    /// Confine a user to SFTP inside their home
    #[command(name = "sandbox")]
    Sandbox {
        /// The user to jail
        username: String,
    },

    /// Give a user full shell access again
    #[command(name = "unsandbox")]
    Unsandbox {
        /// The user to release
        username: String,
    },

    /// Show a user's jail status
    #[command(name = "status")]
    Status {
        /// The user to inspect
        username: String,
    },

    /// Reapply ownership and modes of a user's home tree
    #[command(name = "repair")]
    #[command(group(ArgGroup::new("target").required(true).args(["username", "all"])))]
    Repair {
        /// The user to repair
        username: Option<String>,

        /// Repair every declared user
        #[arg(long)]
        all: bool,

        /// Declared state file used with --all
        #[arg(short, long, value_name = "PATH")]
        state: Option<PathBuf>,
    },
}

/// PHP instance subcommands
#[derive(Debug, Parser)]
pub enum PhpSubcommand {
    /// List every tracked instance
    #[command(name = "status")]
    Status,

    /// Start an instance, clearing a failed state
    #[command(name = "start")]
    Start {
        /// Owner of the instance
        username: String,

        /// PHP version
        version: String,
    },

    /// Stop an instance
    #[command(name = "stop")]
    Stop {
        /// Owner of the instance
        username: String,

        /// PHP version
        version: String,
    },

    /// Restart an instance with a fresh socket
    #[command(name = "restart")]
    Restart {
        /// Owner of the instance
        username: String,

        /// PHP version
        version: String,
    },

    /// Restart the workers of an instance without dropping its socket
    #[command(name = "restart-workers")]
    RestartWorkers {
        /// Owner of the instance
        username: String,

        /// PHP version
        version: String,
    },
}

//-------------------------------------------------------------------------------------------------
// Functions
//-------------------------------------------------------------------------------------------------

/// Parses `user:version`.
pub fn parse_instance_key(value: &str) -> Result<InstanceKey, String> {
    let (username, version) = value
        .split_once(':')
        .ok_or_else(|| format!("expected USER:VERSION, got {value:?}"))?;

    InstanceKey::parse(username, version).map_err(|e| e.to_string())
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_command_is_well_formed() {
        HostcoreArgs::command().debug_assert();
    }

    #[test]
    fn test_parse_render_instance() -> anyhow::Result<()> {
        let args =
            HostcoreArgs::try_parse_from(["hostcore", "render", "--instance", "alice:8.4"])?;
        match args.subcommand {
            Some(HostcoreSubcommand::Render { instance, .. }) => {
                assert_eq!(instance, Some(InstanceKey::new("alice", "8.4")));
            }
            other => panic!("unexpected subcommand: {other:?}"),
        }

        assert!(HostcoreArgs::try_parse_from(["hostcore", "render", "-i", "alice"]).is_err());
        Ok(())
    }

    #[test]
    fn test_repair_needs_a_target() {
        assert!(HostcoreArgs::try_parse_from(["hostcore", "jail", "repair"]).is_err());
        assert!(HostcoreArgs::try_parse_from(["hostcore", "jail", "repair", "--all"]).is_ok());
        assert!(
            HostcoreArgs::try_parse_from(["hostcore", "jail", "repair", "alice", "--all"])
                .is_err()
        );
    }

    #[test]
    fn test_global_flags_after_subcommand() -> anyhow::Result<()> {
        let args = HostcoreArgs::try_parse_from([
            "hostcore",
            "php",
            "stop",
            "alice",
            "8.4",
            "-v",
            "--config",
            "/tmp/h.toml",
        ])?;

        assert!(args.verbose);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/h.toml")));
        Ok(())
    }
}
