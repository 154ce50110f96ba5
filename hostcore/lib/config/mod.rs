//! Configuration of the control plane.

mod defaults;
mod hostcore;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use hostcore::*;
