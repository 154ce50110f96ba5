//! Client side of the control API, used by the CLI.

use std::{path::PathBuf, time::Duration};

use hostutils::{UnixHttpClient, UnixHttpResponse};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    jail::JailStatus,
    php::{InstanceInfo, InstanceKey},
    reconcile::ReconcileReport,
    HostcoreError, HostcoreResult,
};

use super::types::{ActionResponse, ErrorResponse, InstanceRequest, InstancesResponse};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// A full pass can start many runtimes, each waiting for its socket.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(300);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Talks to a running daemon over its control socket.
#[derive(Debug, Clone)]
pub struct ControlClient {
    http: UnixHttpClient,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ControlClient {
    /// Creates a client for the daemon listening on `socket`.
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            http: UnixHttpClient::new(socket).with_timeout(CONTROL_TIMEOUT),
        }
    }

    /// Asks the daemon for an immediate reconciliation pass.
    pub async fn reconcile(&self) -> HostcoreResult<ReconcileReport> {
        let response = self.send_post("/reconcile", None::<&()>).await?;
        decode(response)
    }

    /// Lists every instance the daemon tracks.
    pub async fn instances(&self) -> HostcoreResult<Vec<InstanceInfo>> {
        let response = self
            .http
            .get("/instances")
            .await
            .map_err(|e| self.unreachable(e))?;
        decode::<InstancesResponse>(response).map(|r| r.instances)
    }

    /// Starts an instance.
    pub async fn start(&self, key: &InstanceKey) -> HostcoreResult<InstanceInfo> {
        let response = self
            .send_post("/instances/start", Some(&request(key)))
            .await?;
        decode(response)
    }

    /// Restarts an instance.
    pub async fn restart(&self, key: &InstanceKey) -> HostcoreResult<InstanceInfo> {
        let response = self
            .send_post("/instances/restart", Some(&request(key)))
            .await?;
        decode(response)
    }

    /// Stops an instance.
    pub async fn stop(&self, key: &InstanceKey) -> HostcoreResult<String> {
        let response = self.send_post("/instances/stop", Some(&request(key))).await?;
        decode::<ActionResponse>(response).map(|r| r.message)
    }

    /// Restarts an instance's workers.
    pub async fn restart_workers(&self, key: &InstanceKey) -> HostcoreResult<String> {
        let response = self
            .send_post("/instances/restart-workers", Some(&request(key)))
            .await?;
        decode::<ActionResponse>(response).map(|r| r.message)
    }

    /// Reads a user's jail status as the daemon sees it.
    pub async fn jail_status(&self, username: &str) -> HostcoreResult<JailStatus> {
        let response = self
            .http
            .get(&format!("/jail/{username}"))
            .await
            .map_err(|e| self.unreachable(e))?;
        decode(response)
    }

    async fn send_post<T: Serialize>(
        &self,
        path: &str,
        body: Option<&T>,
    ) -> HostcoreResult<UnixHttpResponse> {
        let (content_type, body) = match body {
            Some(body) => (Some("application/json"), serde_json::to_vec(body)?),
            None => (None, Vec::new()),
        };

        self.http
            .post(path, content_type, body)
            .await
            .map_err(|e| self.unreachable(e))
    }

    fn unreachable(&self, error: hostutils::HostutilsError) -> HostcoreError {
        HostcoreError::ControlServer(format!(
            "cannot reach the daemon at {}: {error}",
            self.http.socket_path().display()
        ))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn request(key: &InstanceKey) -> InstanceRequest {
    InstanceRequest {
        username: key.username.clone(),
        version: key.version.clone(),
    }
}

fn decode<T: DeserializeOwned>(response: UnixHttpResponse) -> HostcoreResult<T> {
    if !response.is_success() {
        let message = serde_json::from_slice::<ErrorResponse>(&response.body)
            .map(|e| e.error)
            .unwrap_or_else(|_| response.text());
        return Err(HostcoreError::ControlServer(format!(
            "{}: {message}",
            response.status
        )));
    }

    Ok(serde_json::from_slice(&response.body)?)
}
