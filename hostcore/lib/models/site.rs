use std::{collections::BTreeMap, path::PathBuf};

use getset::Getters;
use hostutils::{is_within, normalize_path, resolve_under, SupportedPathType};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    config::DEFAULT_WORKER_NUM,
    layout::HomeLayout,
    validate::{is_quotable, is_valid_env_name, normalize_aliases, normalize_domain},
    HostcoreError, HostcoreResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Whether a site is routed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    /// Routed and served.
    #[default]
    Active,

    /// Kept as a record but excluded from routing.
    Suspended,
}

/// A hosted website.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Site {
    /// Stable identifier.
    #[builder(setter(into))]
    id: String,

    /// Display name.
    #[serde(default)]
    #[builder(default, setter(into))]
    name: String,

    /// The primary domain.
    #[builder(setter(into))]
    domain: String,

    /// Additional domains routed to the same site.
    #[serde(default)]
    #[builder(default)]
    aliases: Vec<String>,

    /// The owning user.
    #[builder(setter(into))]
    owner: String,

    /// The PHP version the site runs on.
    #[builder(setter(into))]
    php_version: String,

    /// The site root. Defaults to `<home>/<owner>/www/<domain>` and never changes afterwards.
    #[serde(default)]
    #[builder(default, setter(into))]
    root_path: PathBuf,

    /// Sub-path of the root served as the document root.
    #[serde(default)]
    #[builder(default, setter(into))]
    public_path: String,

    /// Routing status.
    #[serde(default)]
    #[builder(default)]
    status: SiteStatus,

    /// Keep the application bootstrapped in persistent workers.
    #[serde(default)]
    #[builder(default)]
    worker_mode: bool,

    /// The worker script, absolute or relative to the document root.
    #[serde(default)]
    #[builder(default, setter(strip_option, into))]
    worker_file: Option<String>,

    /// Number of workers. Zero picks the default.
    #[serde(default)]
    #[builder(default)]
    worker_num: u32,

    /// Environment passed to workers.
    #[serde(default)]
    #[builder(default)]
    environment: BTreeMap<String, String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Site {
    /// Normalizes domains, fills in the default root and checks every path rule.
    pub fn normalized(mut self, layout: &HomeLayout) -> HostcoreResult<Self> {
        self.domain = normalize_domain(&self.domain)?;
        self.aliases = normalize_aliases(&self.domain, &self.aliases)?;

        if self.root_path.as_os_str().is_empty() {
            self.root_path = layout.site_root(&self.owner, &self.domain);
        }

        if self.name.is_empty() {
            self.name = self.domain.clone();
        }

        self.validate(layout)?;
        Ok(self)
    }

    /// Checks that the root lies in the owner's web tree, the public path stays inside the root
    /// and the environment names are usable.
    pub fn validate(&self, layout: &HomeLayout) -> HostcoreResult<()> {
        let www = layout.www(&self.owner);
        let root = self.root_path.to_string_lossy();
        let www = www.to_string_lossy();

        let normalized = normalize_path(&root, SupportedPathType::Absolute)
            .map_err(|e| self.invalid(format!("root path: {e}")))?;
        if normalized == www || !is_within(&www, &normalized) {
            return Err(self.invalid(format!("root path {root} is not under {www}")));
        }

        if !self.public_path.is_empty() {
            resolve_under(&normalized, self.public_path.trim_start_matches('/'))
                .map_err(|e| self.invalid(format!("public path: {e}")))?;
        }

        if let Some(name) = self.environment.keys().find(|k| !is_valid_env_name(k)) {
            return Err(self.invalid(format!("invalid environment variable name {name:?}")));
        }

        if let Some(name) = self
            .environment
            .iter()
            .find(|(_, value)| !is_quotable(value))
            .map(|(name, _)| name)
        {
            return Err(self.invalid(format!(
                "environment variable {name:?} mixes a backslash and a backtick"
            )));
        }

        Ok(())
    }

    /// Returns true if the site should be routed.
    pub fn is_active(&self) -> bool {
        self.status == SiteStatus::Active
    }

    /// The primary domain followed by every alias.
    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.domain.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    /// The directory served to clients.
    pub fn document_root(&self) -> PathBuf {
        let public = self.public_path.trim_matches('/');
        if public.is_empty() {
            self.root_path.clone()
        } else {
            self.root_path.join(public)
        }
    }

    /// The worker script resolved against the document root, if one is configured.
    pub fn worker_path(&self) -> Option<PathBuf> {
        let file = self.worker_file.as_deref()?.trim();
        if file.is_empty() {
            return None;
        }

        let path = PathBuf::from(file);
        if path.is_absolute() {
            Some(path)
        } else {
            Some(self.document_root().join(path))
        }
    }

    /// The number of workers to start.
    pub fn effective_worker_num(&self) -> u32 {
        if self.worker_num == 0 {
            DEFAULT_WORKER_NUM
        } else {
            self.worker_num
        }
    }

    /// Changes the primary domain. The root path is left untouched.
    pub fn rename_domain(&mut self, domain: &str) -> HostcoreResult<()> {
        let domain = normalize_domain(domain)?;
        self.aliases = normalize_aliases(&domain, &self.aliases)?;
        self.domain = domain;
        Ok(())
    }

    /// Sets the routing status.
    pub fn set_status(&mut self, status: SiteStatus) {
        self.status = status;
    }

    fn invalid(&self, reason: String) -> HostcoreError {
        HostcoreError::InvalidSite {
            site: self.id.clone(),
            reason,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn alice_site() -> Site {
        Site::builder()
            .id("s1")
            .domain("Alice.Test")
            .aliases(vec!["WWW.alice.test".into(), "alice.test".into()])
            .owner("alice")
            .php_version("8.4")
            .build()
    }

    #[test]
    fn test_normalized_fills_root_and_aliases() -> anyhow::Result<()> {
        let layout = HomeLayout::new("/home");
        let site = alice_site().normalized(&layout)?;

        assert_eq!(site.get_domain(), "alice.test");
        assert_eq!(site.get_aliases(), &vec!["www.alice.test".to_string()]);
        assert_eq!(site.get_root_path(), &PathBuf::from("/home/alice/www/alice.test"));
        assert_eq!(site.get_name(), "alice.test");
        assert_eq!(
            site.hostnames().collect::<Vec<_>>(),
            vec!["alice.test", "www.alice.test"]
        );

        Ok(())
    }

    #[test]
    fn test_root_outside_owner_tree_is_rejected() {
        let layout = HomeLayout::new("/home");
        let mut site = alice_site();
        site.root_path = PathBuf::from("/var/www/alice.test");
        assert!(matches!(
            site.normalized(&layout),
            Err(HostcoreError::InvalidSite { .. })
        ));

        let mut site = alice_site();
        site.root_path = PathBuf::from("/home/bob/www/alice.test");
        assert!(site.normalized(&layout).is_err());

        let mut site = alice_site();
        site.root_path = PathBuf::from("/home/alice/www/../../bob/www/x");
        assert!(site.normalized(&layout).is_err());
    }

    #[test]
    fn test_public_path_cannot_escape_root() {
        let layout = HomeLayout::new("/home");
        let mut site = alice_site();
        site.public_path = "../../../etc".into();
        assert!(site.normalized(&layout).is_err());
    }

    #[test]
    fn test_rename_keeps_root_path() -> anyhow::Result<()> {
        let layout = HomeLayout::new("/home");
        let mut site = alice_site().normalized(&layout)?;
        let root = site.get_root_path().clone();

        site.rename_domain("alice.example")?;

        assert_eq!(site.get_domain(), "alice.example");
        assert_eq!(site.get_root_path(), &root);
        assert_eq!(site.get_aliases(), &vec!["www.alice.test".to_string()]);

        Ok(())
    }

    #[test]
    fn test_worker_path_and_document_root() -> anyhow::Result<()> {
        let layout = HomeLayout::new("/home");
        let site = Site::builder()
            .id("s2")
            .domain("app.test")
            .owner("alice")
            .php_version("8.4")
            .public_path("public/")
            .worker_mode(true)
            .worker_file("index.php")
            .build()
            .normalized(&layout)?;

        assert_eq!(
            site.document_root(),
            PathBuf::from("/home/alice/www/app.test/public")
        );
        assert_eq!(
            site.worker_path(),
            Some(PathBuf::from("/home/alice/www/app.test/public/index.php"))
        );
        assert_eq!(site.effective_worker_num(), DEFAULT_WORKER_NUM);

        let mut absolute = site.clone();
        absolute.worker_file = Some("/opt/app/worker.php".into());
        assert_eq!(absolute.worker_path(), Some(PathBuf::from("/opt/app/worker.php")));

        Ok(())
    }

    #[test]
    fn test_environment_values_must_be_quotable() {
        let layout = HomeLayout::new("/home");

        let mut site = alice_site();
        site.environment.insert("WIN_PATH".into(), "C:\\app\\".into());
        assert!(site.clone().normalized(&layout).is_ok());

        site.environment.insert("MIXED".into(), "a\\`b".into());
        assert!(site.normalized(&layout).is_err());
    }
}
