use std::{
    error::Error,
    fmt::{self, Display},
    path::PathBuf,
    time::Duration,
};
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a hostcore-related operation.
pub type HostcoreResult<T> = Result<T, HostcoreError>;

/// An error that occurred while reconciling hosting state.
#[derive(pretty_error_debug::Debug, Error)]
pub enum HostcoreError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// An error from one of the hostutils helpers.
    #[error(transparent)]
    Hostutils(#[from] hostutils::HostutilsError),

    /// An error that occurred during an HTTP request.
    #[error("http request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// A JSON document could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A TOML document could not be decoded.
    #[error("toml error: {0}")]
    TomlDecode(#[from] toml::de::Error),

    /// The configuration file could not be loaded.
    #[error("invalid configuration at {path}: {reason}")]
    InvalidConfig {
        /// The configuration file
        path: PathBuf,

        /// What was wrong with it
        reason: String,
    },

    /// A username does not match the allowed pattern.
    #[error("invalid username: {0:?}")]
    InvalidUsername(String),

    /// A domain name could not be normalized.
    #[error("invalid domain: {0:?}")]
    InvalidDomain(String),

    /// A PHP version string is malformed.
    #[error("invalid php version: {0:?}")]
    InvalidVersion(String),

    /// A site definition violates a structural rule.
    #[error("invalid site {site}: {reason}")]
    InvalidSite {
        /// The site id
        site: String,

        /// The violated rule
        reason: String,
    },

    /// A sandbox request was refused before anything was changed.
    #[error("refusing to jail {username:?}: {reason}")]
    JailPrecondition {
        /// The user that was asked to be jailed
        username: String,

        /// Why the request was refused
        reason: JailRefusal,
    },

    /// An external command exited unsuccessfully.
    #[error("`{command}` failed with {code:?}: {stderr}")]
    CommandFailed {
        /// The command line that was run
        command: String,

        /// Exit code, if the process exited normally
        code: Option<i32>,

        /// Captured standard error
        stderr: String,
    },

    /// An external command did not finish in time.
    #[error("`{command}` timed out after {timeout:?}")]
    CommandTimedOut {
        /// The command line that was run
        command: String,

        /// The timeout that elapsed
        timeout: Duration,
    },

    /// The requested user is not part of the declared state.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// The requested PHP version is not declared or not enabled.
    #[error("php version {0} is not declared or not enabled")]
    VersionUnavailable(String),

    /// The instance is not running.
    #[error("instance {0} is not running")]
    InstanceNotRunning(String),

    /// The instance exhausted its restart budget and needs an explicit start.
    #[error("instance {0} is marked failed; start it explicitly to retry")]
    InstanceFailed(String),

    /// Something nobody tracks is listening on an instance socket.
    #[error("socket {0} is held by an untracked process")]
    SocketInUse(PathBuf),

    /// The runtime admin API rejected a request.
    #[error("admin api at {socket} returned {status}: {body}")]
    AdminApi {
        /// The admin socket
        socket: PathBuf,

        /// The HTTP status
        status: u16,

        /// The response body
        body: String,
    },

    /// The external proxy did not accept the new configuration.
    #[error("proxy reload failed: {0}")]
    ProxyReload(String),

    /// The control server could not be reached or answered with an error.
    #[error("control server error: {0}")]
    ControlServer(String),
}

/// Why a user cannot be placed in the jail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JailRefusal {
    /// No username was given.
    EmptyUsername,

    /// The user is `root`.
    RootUser,

    /// The user has the admin role.
    AdminRole,

    /// The user is a member of an admin group.
    AdminGroup(String),

    /// The user's group membership could not be read.
    MembershipUnknown(String),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HostcoreError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> HostcoreError {
        HostcoreError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Returns true if this error is a refused sandbox request.
    pub fn is_precondition(&self) -> bool {
        matches!(self, HostcoreError::JailPrecondition { .. })
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for JailRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JailRefusal::EmptyUsername => write!(f, "username is empty"),
            JailRefusal::RootUser => write!(f, "root can never be jailed"),
            JailRefusal::AdminRole => write!(f, "user has the admin role"),
            JailRefusal::AdminGroup(group) => write!(f, "user is a member of admin group {group}"),
            JailRefusal::MembershipUnknown(e) => {
                write!(f, "group membership could not be determined: {e}")
            }
        }
    }
}

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
