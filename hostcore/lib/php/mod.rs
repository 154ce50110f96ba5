//! Lifecycle of the per-(user, version) PHP runtime processes.

mod admin;
mod backoff;
mod instance;
mod key;
mod launcher;
mod limits;
mod manager;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use admin::*;
pub use backoff::*;
pub use instance::*;
pub use key::*;
pub use launcher::*;
pub use limits::*;
pub use manager::*;
