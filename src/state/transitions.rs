use std::future::Future;

use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{error::ServiceError, state::SharedState, state::state_machine::SessionEvent};

/// Run the durable writes of a planned transition, bounded by the configured timeout.
///
/// The writes are version-guarded, so a timed-out or failed transition leaves either the
/// previous rows or the complete new ones; nothing in process needs rolling back.
pub async fn run_transition<F, Fut, T>(
    state: &SharedState,
    session_id: Uuid,
    event: SessionEvent,
    work: F,
) -> Result<T, ServiceError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let work_future = work();
    let outcome = if let Some(limit) = state.transition_timeout() {
        match timeout(limit, work_future).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%session_id, ?event, "session transition timed out");
                return Err(ServiceError::Timeout);
            }
        }
    } else {
        work_future.await
    };

    match &outcome {
        Ok(_) => info!(%session_id, ?event, "session transition applied"),
        Err(err) if err.is_transient() => {
            warn!(%session_id, ?event, error = %err, "session transition failed")
        }
        Err(err) => debug!(%session_id, ?event, error = %err, "session transition rejected"),
    }
    outcome
}
