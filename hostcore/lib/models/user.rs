use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The role of a hosting account.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Administrators. Never jailed.
    Admin,

    /// Regular hosting customers.
    #[default]
    User,
}

/// Resource limits for a user. Zero means unlimited.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters,
)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct UserLimits {
    /// Maximum number of sites.
    #[builder(default)]
    max_sites: u32,

    /// Memory ceiling across the user's instances, in MB.
    #[builder(default)]
    max_ram_mb: u64,

    /// CPU ceiling as a percentage of one core.
    #[builder(default)]
    max_cpu_percent: u32,

    /// Maximum number of processes.
    #[builder(default)]
    max_processes: u32,
}

/// A host account that owns sites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct User {
    /// The Unix username.
    #[builder(setter(into))]
    username: String,

    /// The Unix user id.
    uid: u32,

    /// The Unix primary group id.
    gid: u32,

    /// The account role.
    #[serde(default)]
    #[builder(default)]
    role: Role,

    /// Full SSH access instead of the SFTP-only jail.
    #[serde(default)]
    #[builder(default)]
    shell_access: bool,

    /// Resource limits.
    #[serde(default)]
    #[builder(default)]
    limits: UserLimits,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl UserLimits {
    /// Returns true if no limit is set.
    pub fn is_unlimited(&self) -> bool {
        self.max_ram_mb == 0 && self.max_cpu_percent == 0 && self.max_processes == 0
    }
}

impl User {
    /// Returns true for accounts with the admin role.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Returns true if this user should be confined to the SFTP jail.
    pub fn wants_jail(&self) -> bool {
        !self.is_admin() && !self.shell_access && self.username != "root"
    }
}
