//! Rendering, writing and reloading of the reverse-proxy configuration.
//!
//! Every render rebuilds a whole document from the full current state through the typed
//! [`Caddyfile`] model; there is no incremental patching of a previous document.

mod caddyfile;
mod generator;
mod pages;
mod reload;
mod writer;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use caddyfile::*;
pub use generator::*;
pub use reload::*;
pub use writer::*;
