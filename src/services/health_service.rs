use tracing::warn;

use crate::{
    dto::health::{HealthResponse, HealthStatus},
    state::SharedState,
};

/// Report whether a storage backend is installed and answering, plus local task counts.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let status = match state.require_session_store().await {
        Ok(store) => match store.health_check().await {
            Ok(()) => HealthStatus::Ok,
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                HealthStatus::Degraded
            }
        },
        Err(_) => {
            warn!("storage unavailable (degraded mode)");
            HealthStatus::Degraded
        }
    };

    HealthResponse {
        status,
        live_sessions: state.feeds().len(),
        armed_timers: state.timers().len(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig, dao::session_store::memory::MemorySessionStore, state::AppState,
    };

    #[tokio::test]
    async fn degraded_until_a_store_is_installed() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(health_status(&state).await.status, HealthStatus::Degraded);

        state
            .set_session_store(Arc::new(MemorySessionStore::new()))
            .await;
        let health = health_status(&state).await;
        assert!(health.is_ok());
        assert_eq!(health.live_sessions, 0);
    }
}
