//! Server state management.
//!
//! The control API shares one [`ServerState`] across handlers: the reconciler, the current
//! declared state and where to reread it from.

use std::{path::PathBuf, sync::Arc};

use tokio::sync::{Mutex, RwLock};

use crate::{
    layout::HomeLayout, models::DeclaredState, reconcile::ReconcileReport, reconcile::Reconciler,
    HostcoreResult,
};

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// Shared state of the control server and the daemon loop.
///
/// Reconciliation passes are serialized through `pass`, so a periodic pass and one requested
/// over the API never run side by side.
#[derive(Clone)]
pub struct ServerState {
    reconciler: Arc<Reconciler>,
    declared: Arc<RwLock<DeclaredState>>,
    pass: Arc<Mutex<()>>,
    state_file: PathBuf,
    layout: HomeLayout,
}

//-------------------------------------------------------------------------------------------------
// Methods
//-------------------------------------------------------------------------------------------------

impl ServerState {
    /// Creates the state around an already loaded declared state.
    pub fn new(
        reconciler: Arc<Reconciler>,
        declared: DeclaredState,
        state_file: impl Into<PathBuf>,
        layout: HomeLayout,
    ) -> Self {
        Self {
            reconciler,
            declared: Arc::new(RwLock::new(declared)),
            pass: Arc::new(Mutex::new(())),
            state_file: state_file.into(),
            layout,
        }
    }

    /// The reconciler.
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// The declared state used by the last pass.
    pub fn declared(&self) -> &Arc<RwLock<DeclaredState>> {
        &self.declared
    }

    /// Rereads the state file. On failure the previous state is kept.
    pub async fn reload_declared(&self) -> HostcoreResult<()> {
        let fresh = DeclaredState::load(&self.state_file, &self.layout).await?;
        *self.declared.write().await = fresh;
        tracing::debug!(path = %self.state_file.display(), "reloaded declared state");
        Ok(())
    }

    /// Runs one reconciliation pass against the current declared state.
    pub async fn reconcile(&self) -> HostcoreResult<ReconcileReport> {
        let _pass = self.pass.lock().await;
        let declared = self.declared.read().await.clone();
        self.reconciler.reconcile(&declared).await
    }

    /// Rereads the state file, then reconciles.
    ///
    /// A state file that fails to load is logged and the previous state is reconciled instead,
    /// so a typo in the file never tears down running sites.
    pub async fn reload_and_reconcile(&self) -> HostcoreResult<ReconcileReport> {
        if let Err(e) = self.reload_declared().await {
            tracing::error!(
                path = %self.state_file.display(),
                "cannot reload declared state, keeping the previous one: {e}"
            );
        }

        self.reconcile().await
    }
}
