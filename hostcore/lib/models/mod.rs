//! The declared hosting state the control plane reconciles against.
//!
//! These records are owned by an external store. hostcore only reads them; it never persists
//! them back.

mod php;
mod site;
mod state;
mod user;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use php::*;
pub use site::*;
pub use state::*;
pub use user::*;
