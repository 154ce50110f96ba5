//! `hostutils::log` is a module containing log file utilities.

mod rotating;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Default size in bytes at which a log file is rotated.
pub const DEFAULT_LOG_MAX_SIZE: u64 = 50 * 1024 * 1024;

/// Default number of rotated generations kept next to the live log file.
pub const DEFAULT_LOG_KEEP: usize = 3;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use rotating::*;
