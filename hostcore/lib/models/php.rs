use std::path::PathBuf;

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::config::DEFAULT_NUM_THREADS;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One supported PHP runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct PhpVersionConfig {
    /// The version string, e.g. `8.4`.
    #[builder(setter(into))]
    version: String,

    /// TCP port of the legacy shared listener. Unused by per-user instances.
    #[serde(default)]
    #[builder(default)]
    port: u16,

    /// TCP admin port of the legacy shared listener. Unused by per-user instances.
    #[serde(default)]
    #[builder(default)]
    admin_port: u16,

    /// Path to the runtime binary.
    #[builder(setter(into))]
    binary_path: PathBuf,

    /// Whether sites may run on this version.
    #[serde(default = "default_enabled")]
    #[builder(default = true)]
    enabled: bool,

    /// PHP threads per instance.
    #[serde(default = "default_num_threads")]
    #[builder(default = DEFAULT_NUM_THREADS)]
    num_threads: u32,

    /// Upper bound for automatic thread scaling. Zero leaves it to the runtime.
    #[serde(default)]
    #[builder(default)]
    max_threads: u32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PhpVersionConfig {
    /// Returns true if sites may run on this version.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn default_enabled() -> bool {
    true
}

fn default_num_threads() -> u32 {
    DEFAULT_NUM_THREADS
}
