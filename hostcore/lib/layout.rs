//! The per-user filesystem layout shared by the jail, the instances and the proxy documents.

use std::path::{Path, PathBuf};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Computes every per-user path from a single home root.
///
/// ```text
/// <root>/<user>/                     root:root 0755, chroot target
/// <root>/<user>/www/<domain>/        site roots
/// <root>/<user>/run/php-<v>.sock     instance socket
/// <root>/<user>/run/php-<v>-admin.sock
/// <root>/<user>/run/php-<v>.pid
/// <root>/<user>/log/php-<v>.log      captured runtime output
/// <root>/<user>/.ssh/                0700
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeLayout {
    root: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HomeLayout {
    /// Creates a layout rooted at `root`, normally `/home`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// The parent of every home directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<user>`
    pub fn home(&self, username: &str) -> PathBuf {
        self.root.join(username)
    }

    /// `<root>/<user>/www`
    pub fn www(&self, username: &str) -> PathBuf {
        self.home(username).join("www")
    }

    /// `<root>/<user>/run`
    pub fn run(&self, username: &str) -> PathBuf {
        self.home(username).join("run")
    }

    /// `<root>/<user>/log`
    pub fn log(&self, username: &str) -> PathBuf {
        self.home(username).join("log")
    }

    /// `<root>/<user>/.ssh`
    pub fn ssh(&self, username: &str) -> PathBuf {
        self.home(username).join(".ssh")
    }

    /// `<root>/<user>/www/<domain>`
    pub fn site_root(&self, username: &str, domain: &str) -> PathBuf {
        self.www(username).join(domain)
    }

    /// The socket an instance serves PHP requests on.
    pub fn socket(&self, username: &str, version: &str) -> PathBuf {
        self.run(username).join(format!("php-{version}.sock"))
    }

    /// The socket an instance exposes its admin API on.
    pub fn admin_socket(&self, username: &str, version: &str) -> PathBuf {
        self.run(username).join(format!("php-{version}-admin.sock"))
    }

    /// The pid file of an instance.
    pub fn pid_file(&self, username: &str, version: &str) -> PathBuf {
        self.run(username).join(format!("php-{version}.pid"))
    }

    /// The captured stdout/stderr of an instance.
    pub fn instance_log(&self, username: &str, version: &str) -> PathBuf {
        self.log(username).join(format!("php-{version}.log"))
    }

    /// The access log an instance writes itself.
    pub fn access_log(&self, username: &str, version: &str) -> PathBuf {
        self.log(username).join(format!("php-{version}-access.log"))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let layout = HomeLayout::new("/home");
        assert_eq!(layout.home("alice"), PathBuf::from("/home/alice"));
        assert_eq!(
            layout.socket("alice", "8.4"),
            PathBuf::from("/home/alice/run/php-8.4.sock")
        );
        assert_eq!(
            layout.admin_socket("alice", "8.4"),
            PathBuf::from("/home/alice/run/php-8.4-admin.sock")
        );
        assert_eq!(
            layout.pid_file("alice", "8.4"),
            PathBuf::from("/home/alice/run/php-8.4.pid")
        );
        assert_eq!(
            layout.instance_log("alice", "8.4"),
            PathBuf::from("/home/alice/log/php-8.4.log")
        );
        assert_eq!(
            layout.site_root("alice", "alice.test"),
            PathBuf::from("/home/alice/www/alice.test")
        );
        assert_eq!(layout.ssh("alice"), PathBuf::from("/home/alice/.ssh"));
    }
}
