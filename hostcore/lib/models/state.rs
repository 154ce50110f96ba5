use std::{collections::HashSet, path::Path};

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    layout::HomeLayout,
    validate::{validate_username, validate_version},
    HostcoreError, HostcoreResult,
};

use super::{PhpVersionConfig, Site, User};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A snapshot of the declared users, sites and PHP versions.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct DeclaredState {
    /// Hosting accounts.
    #[builder(default)]
    users: Vec<User>,

    /// Hosted sites.
    #[builder(default)]
    sites: Vec<Site>,

    /// Supported PHP runtimes.
    #[builder(default)]
    php_versions: Vec<PhpVersionConfig>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DeclaredState {
    /// Reads a snapshot from a `.json` or `.toml` file and normalizes it.
    pub async fn load(path: &Path, layout: &HomeLayout) -> HostcoreResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let state: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };

        state.normalized(layout)
    }

    /// Validates identifiers and normalizes every site.
    pub fn normalized(self, layout: &HomeLayout) -> HostcoreResult<Self> {
        let mut usernames = HashSet::new();
        for user in &self.users {
            validate_username(user.get_username())?;
            if !usernames.insert(user.get_username().as_str()) {
                return Err(HostcoreError::InvalidUsername(format!(
                    "{} is declared twice",
                    user.get_username()
                )));
            }
        }

        for version in &self.php_versions {
            validate_version(version.get_version())?;
        }

        let mut site_ids = HashSet::new();
        let mut sites = Vec::with_capacity(self.sites.len());
        for site in self.sites {
            if !usernames.contains(site.get_owner().as_str()) {
                return Err(HostcoreError::InvalidSite {
                    site: site.get_id().clone(),
                    reason: format!("owner {} is not declared", site.get_owner()),
                });
            }

            if !site_ids.insert(site.get_id().clone()) {
                return Err(HostcoreError::InvalidSite {
                    site: site.get_id().clone(),
                    reason: "duplicate site id".to_string(),
                });
            }

            sites.push(site.normalized(layout)?);
        }

        Ok(Self {
            users: self.users,
            sites,
            php_versions: self.php_versions,
        })
    }

    /// Looks up a user by name.
    pub fn user(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|u| u.get_username() == username)
    }

    /// Looks up a PHP version.
    pub fn version(&self, version: &str) -> Option<&PhpVersionConfig> {
        self.php_versions.iter().find(|v| v.get_version() == version)
    }

    /// Looks up a PHP version and requires it to be enabled.
    pub fn enabled_version(&self, version: &str) -> HostcoreResult<&PhpVersionConfig> {
        self.version(version)
            .filter(|v| v.is_enabled())
            .ok_or_else(|| HostcoreError::VersionUnavailable(version.to_string()))
    }

    /// Users that own at least one site, in declaration order.
    pub fn site_owners(&self) -> Vec<&User> {
        self.users
            .iter()
            .filter(|u| self.sites.iter().any(|s| s.get_owner() == u.get_username()))
            .collect()
    }

    /// Mutable access to the sites, for callers that apply edits before a reconcile.
    pub fn sites_mut(&mut self) -> &mut Vec<Site> {
        &mut self.sites
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
