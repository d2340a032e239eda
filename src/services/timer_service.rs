//! Host-side expiry watcher.
//!
//! A watcher is a convenience on top of the stored `ends_at`: it only issues the same
//! explicit lock write the host could issue, and the game stays correct without it.

use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{QuestionPhaseEntity, SessionStatus},
    services::phase_service,
    state::SharedState,
};

/// Slack added after the grace period so the stored end has clearly passed on wake-up.
const WAKE_SLACK: Duration = Duration::from_millis(50);

/// Arm the watcher of `phase`'s session, replacing any previous one.
///
/// Does nothing but disarm when the feature is off or the question cannot expire.
pub fn arm(state: &SharedState, phase: &QuestionPhaseEntity) {
    let session_id = phase.session_id;
    let Some(ends_at) = phase.ends_at.filter(|_| !phase.locked && !phase.paused) else {
        disarm(state, session_id);
        return;
    };
    if !state.config().auto_lock_on_expiry {
        return;
    }

    let question_index = phase.question_index;
    let deadline =
        ends_at + Duration::from_millis(state.config().answer_grace_ms) + WAKE_SLACK;
    let delay = deadline
        .duration_since(SystemTime::now())
        .unwrap_or_default();

    let task_state = state.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match phase_service::lock_on_timeout(&task_state, session_id, question_index).await {
            Ok(_) => info!(%session_id, question_index, "question locked on timeout"),
            Err(err) if err.is_transient() => {
                warn!(%session_id, question_index, error = %err, "timeout lock failed")
            }
            Err(err) => {
                debug!(%session_id, question_index, error = %err, "timeout lock skipped")
            }
        }
        let own_id = tokio::task::id();
        task_state
            .timers()
            .remove_if(&session_id, |_, handle| handle.id() == own_id);
    });

    if let Some(previous) = state.timers().insert(session_id, handle) {
        previous.abort();
    }
    // A watcher that fired before its insert could not remove itself.
    state.timers().retain(|_, handle| !handle.is_finished());
    debug!(%session_id, question_index, delay_ms = delay.as_millis() as u64, "expiry watcher armed");
}

/// Cancel the watcher of `session_id`, if any.
pub fn disarm(state: &SharedState, session_id: Uuid) {
    if let Some((_, handle)) = state.timers().remove(&session_id) {
        handle.abort();
    }
}

/// Re-arm watchers for every playing session from the stored phase rows.
///
/// Run whenever a store is (re)installed, since watchers do not survive a restart.
pub async fn rearm_playing_sessions(state: &SharedState) {
    if !state.config().auto_lock_on_expiry {
        return;
    }
    let Some(store) = state.session_store().await else {
        return;
    };

    let sessions = match store.list_sessions_with_status(SessionStatus::Playing).await {
        Ok(sessions) => sessions,
        Err(err) => {
            warn!(error = %err, "failed to list playing sessions; expiry watchers not re-armed");
            return;
        }
    };

    let mut armed = 0usize;
    for session in sessions {
        let Some(index) = session.current_index() else {
            continue;
        };
        match store.find_phase(session.id, index as u32).await {
            Ok(Some(phase)) => {
                arm(state, &phase);
                armed += 1;
            }
            Ok(None) => warn!(session_id = %session.id, index, "playing session without phase row"),
            Err(err) => warn!(session_id = %session.id, error = %err, "failed to read phase row"),
        }
    }
    info!(armed, "expiry watchers re-armed");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig, dao::session_store::memory::MemorySessionStore, state::AppState,
    };

    fn phase(session_id: Uuid, ends_in: Duration) -> QuestionPhaseEntity {
        QuestionPhaseEntity::activate(
            session_id,
            0,
            Uuid::new_v4(),
            ends_in.as_millis() as u64,
            SystemTime::now(),
        )
    }

    async fn state() -> SharedState {
        let mut config = AppConfig::default();
        config.answer_grace_ms = 0;
        AppState::with_store(config, Arc::new(MemorySessionStore::new())).await
    }

    #[tokio::test]
    async fn fired_watcher_leaves_the_registry() {
        let state = state().await;
        let session_id = Uuid::new_v4();
        arm(&state, &phase(session_id, Duration::from_millis(20)));
        assert_eq!(state.timers().len(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(state.timers().is_empty());
    }

    #[tokio::test]
    async fn rearming_replaces_the_previous_watcher() {
        let state = state().await;
        let session_id = Uuid::new_v4();
        arm(&state, &phase(session_id, Duration::from_secs(60)));
        arm(&state, &phase(session_id, Duration::from_secs(60)));
        assert_eq!(state.timers().len(), 1);

        disarm(&state, session_id);
        assert!(state.timers().is_empty());
    }

    #[tokio::test]
    async fn paused_question_is_not_watched() {
        let state = state().await;
        let session_id = Uuid::new_v4();
        let paused = phase(session_id, Duration::from_secs(60)).paused_at(SystemTime::now());
        arm(&state, &paused);
        assert!(state.timers().is_empty());
    }
}
