//! The daemon's local control API.
//!
//! An axum router served on a Unix socket. The socket is created with mode `0600`, so only
//! root can drive the daemon; there is no other authentication.

mod client;
mod handlers;
mod routes;
mod state;
mod types;

use std::{fs::Permissions, future::Future, os::unix::fs::PermissionsExt, path::Path};

use hostutils::socket_accepts;
use tokio::net::UnixListener;

use crate::{HostcoreError, HostcoreResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const CONTROL_SOCKET_MODE: u32 = 0o600;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use client::*;
pub use routes::create_router;
pub use state::*;
pub use types::*;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Binds the control socket.
///
/// A leftover socket file from a previous run is replaced. A socket that still accepts
/// connections means another daemon is running, and is an error.
pub async fn bind(socket: &Path) -> HostcoreResult<UnixListener> {
    if let Some(parent) = socket.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    if socket_accepts(socket).await {
        return Err(HostcoreError::SocketInUse(socket.to_path_buf()));
    }

    match tokio::fs::remove_file(socket).await {
        Ok(()) => tracing::debug!(socket = %socket.display(), "removed stale control socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let listener = UnixListener::bind(socket)?;
    tokio::fs::set_permissions(socket, Permissions::from_mode(CONTROL_SOCKET_MODE)).await?;
    Ok(listener)
}

/// Serves the control API on `listener` until `shutdown` resolves, then removes the socket.
pub async fn serve(
    listener: UnixListener,
    state: ServerState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> HostcoreResult<()> {
    let socket = listener
        .local_addr()
        .ok()
        .and_then(|addr| addr.as_pathname().map(Path::to_path_buf));
    if let Some(socket) = &socket {
        tracing::info!(socket = %socket.display(), "control api listening");
    }

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    if let Some(socket) = socket {
        if let Err(e) = tokio::fs::remove_file(&socket).await {
            tracing::debug!(socket = %socket.display(), "cannot remove control socket: {e}");
        }
    }

    Ok(())
}
