//! `hostutils` is a library containing general utilities for the hostcore project.
//!
//! It knows nothing about users, sites or PHP. It provides the pieces the control plane
//! builds on: path normalization, a size-rotating log writer, a child process supervisor
//! and a small HTTP client that talks over Unix domain sockets.

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod error;
pub mod http;
pub mod log;
pub mod path;
pub mod runtime;
pub mod term;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use error::*;
pub use http::*;
pub use log::*;
pub use path::*;
pub use runtime::*;
