//! `hostutils::runtime` is a module containing process supervision utilities.

mod monitor;
mod supervisor;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use monitor::*;
pub use supervisor::*;
