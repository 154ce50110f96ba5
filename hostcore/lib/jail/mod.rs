//! SFTP-only chroot jails for hosting users.

mod manager;
mod sshd;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use manager::*;
pub use sshd::*;
