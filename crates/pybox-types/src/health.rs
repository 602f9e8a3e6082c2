//! Health report returned by `GET /health`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Runtime reachable and executor image present.
    Healthy,
    /// Runtime reachable but the executor image is missing.
    Degraded,
    /// Runtime unreachable.
    Unhealthy,
}

impl HealthStatus {
    pub fn from_probe(docker_connected: bool, executor_image_ready: bool) -> Self {
        match (docker_connected, executor_image_ready) {
            (true, true) => HealthStatus::Healthy,
            (true, false) => HealthStatus::Degraded,
            (false, _) => HealthStatus::Unhealthy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub docker_connected: bool,
    pub executor_image_ready: bool,
    pub image: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
