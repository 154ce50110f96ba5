//! Request and response bodies of the control API.

use serde::{Deserialize, Serialize};

use crate::php::InstanceInfo;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// Request body for the `/instances/*` control endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRequest {
    /// Owner of the instance
    pub username: String,
    /// PHP version of the instance
    pub version: String,
}

/// Response body for the GET /instances endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancesResponse {
    /// Every tracked instance, ordered by user then version
    pub instances: Vec<InstanceInfo>,
}

/// Response body for control actions that leave nothing to report beyond success
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    /// What was done, e.g. `stopped alice:8.4`
    pub message: String,
}

/// Error response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
}
