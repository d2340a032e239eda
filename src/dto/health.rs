use serde::Serialize;
use utoipa::ToSchema;

/// Whether the store is installed and answering.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    /// No store installed, or it stopped answering.
    Degraded,
}

/// Body of `GET /healthcheck`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Sessions with at least one live subscriber on this instance.
    pub live_sessions: usize,
    /// Expiry watchers armed on this instance.
    pub armed_timers: usize,
}

impl HealthResponse {
    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}
