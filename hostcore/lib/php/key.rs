use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::{
    validate::{validate_username, validate_version},
    HostcoreResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Identifies one instance: the user it runs as and the PHP version it serves.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceKey {
    /// Owner of the instance.
    pub username: String,

    /// PHP version.
    pub version: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl InstanceKey {
    /// Creates a key without validation.
    pub fn new(username: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            version: version.into(),
        }
    }

    /// Creates a key, rejecting names that could escape the home layout.
    pub fn parse(username: &str, version: &str) -> HostcoreResult<Self> {
        validate_username(username)?;
        validate_version(version)?;
        Ok(Self::new(username, version))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.username, self.version)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() -> anyhow::Result<()> {
        let key = InstanceKey::parse("alice", "8.4")?;
        assert_eq!(key.to_string(), "alice:8.4");

        assert!(InstanceKey::parse("../etc", "8.4").is_err());
        assert!(InstanceKey::parse("alice", "8.4/../../x").is_err());

        Ok(())
    }
}
