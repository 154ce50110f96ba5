//! `hostutils::error` is a module containing error utilities for the hostcore project.

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

/// The result of a hostutils-related operation.
pub type HostutilsResult<T> = Result<T, HostutilsError>;

/// An error that occurred in one of the hostutils helpers.
#[derive(pretty_error_debug::Debug, Error)]
pub enum HostutilsError {
    /// An error that occurred when validating paths
    #[error("path validation error: {0}")]
    PathValidation(String),

    /// An error that occurred when performing an IO operation
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// The supervised child is already running
    #[error("process already running with pid {0}")]
    AlreadyRunning(u32),

    /// The supervised child exited before it could be tracked
    #[error("process `{0}` exited before it could be tracked")]
    ProcessExited(String),

    /// Sending a signal to a process failed
    #[error("failed to signal process {pid}: {source}")]
    Signal {
        /// The target process id
        pid: i32,

        /// The underlying errno
        #[source]
        source: nix::errno::Errno,
    },

    /// An HTTP exchange over a Unix socket failed
    #[error("http error on {socket}: {source}")]
    Http {
        /// The socket the request was sent to
        socket: PathBuf,

        /// The underlying hyper error
        #[source]
        source: hyper::Error,
    },

    /// An HTTP request could not be built
    #[error("invalid http request: {0}")]
    InvalidRequest(#[from] hyper::http::Error),

    /// An operation did not complete in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Custom error.
    #[error("Custom error: {0}")]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HostutilsError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> HostutilsError {
        HostutilsError::Custom(AnyError {
            error: error.into(),
        })
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
