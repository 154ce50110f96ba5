//! `hostcore` is the control plane of a single-node PHP hosting server.
//!
//! # Overview
//!
//! hostcore turns a declared set of users, sites and PHP versions into host state and keeps the
//! two in line as the declaration changes. Each pass runs three stages in order:
//!
//! - **Jail**: SFTP-only chroot jails per user, with the home tree owned and moded so that
//!   both the chroot and the user's PHP runtime work.
//! - **PHP instances**: one runtime process per (user, enabled version) pair that has at least
//!   one active site, running as that user and bound to `<home>/run/php-<version>.sock`.
//! - **Proxy**: the main routing document and one routing document per instance, rendered in
//!   full from the current state, written atomically and loaded into the running proxies.
//!
//! Every stage is idempotent, so a pass simply reruns the whole pipeline.
//!
//! # Modules
//!
//! - [`jail`] - chroot jails and the sshd configuration block
//! - [`php`] - instance supervision, crash backoff and runtime admin calls
//! - [`proxy`] - the typed Caddyfile model, rendering, writing and reloading
//! - [`reconcile`] - one full pass over the three stages
//! - [`server`] - the daemon's local control API
//! - [`os`] - the seam to the host's users, groups and files

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;
pub mod config;
pub mod daemon;
pub mod jail;
pub mod layout;
pub mod models;
pub mod os;
pub mod php;
pub mod proxy;
pub mod reconcile;
pub mod report;
pub mod server;
pub mod sync;
pub mod validate;

pub use error::*;
