//! Sub-phase transitions of the current question: pause, resume, lock-and-reveal and
//! leaderboard reveal. Each one is a single version-guarded write of the phase row.

use std::time::SystemTime;

use tracing::debug;
use uuid::Uuid;

use crate::{
    dao::models::QuestionPhaseEntity,
    dto::session::TransitionResponse,
    error::ServiceError,
    services::{context::SessionContext, session_service::transition_response, timer_service},
    state::{
        SharedState,
        state_machine::{LockReason, SessionEvent},
        transitions::run_transition,
    },
};

/// Freeze the timer of the active question.
pub async fn pause(
    state: &SharedState,
    host_id: &str,
    session_id: Uuid,
) -> Result<TransitionResponse, ServiceError> {
    let context = SessionContext::load_for_host(state, session_id, host_id).await?;
    let response = write_phase(state, &context, SessionEvent::Pause, |phase| {
        phase.paused_at(SystemTime::now())
    })
    .await?;
    timer_service::disarm(state, session_id);
    Ok(response)
}

/// Restart the timer of a paused question from its remaining-time snapshot.
pub async fn resume(
    state: &SharedState,
    host_id: &str,
    session_id: Uuid,
) -> Result<TransitionResponse, ServiceError> {
    let context = SessionContext::load_for_host(state, session_id, host_id).await?;
    let timer_ms = context.session.timer_ms();
    let (response, phase) = write_phase_returning(state, &context, SessionEvent::Resume, |phase| {
        phase.resumed_at(SystemTime::now(), timer_ms)
    })
    .await?;
    timer_service::arm(state, &phase);
    Ok(response)
}

/// Stop accepting answers and reveal the results in one write.
pub async fn lock(
    state: &SharedState,
    host_id: &str,
    session_id: Uuid,
) -> Result<TransitionResponse, ServiceError> {
    let context = SessionContext::load_for_host(state, session_id, host_id).await?;
    let response = write_phase(
        state,
        &context,
        SessionEvent::LockAndReveal(LockReason::Host),
        QuestionPhaseEntity::locked_and_revealed,
    )
    .await?;
    timer_service::disarm(state, session_id);
    Ok(response)
}

/// Reveal the leaderboard once the results are shown.
pub async fn reveal_leaderboard(
    state: &SharedState,
    host_id: &str,
    session_id: Uuid,
) -> Result<TransitionResponse, ServiceError> {
    let context = SessionContext::load_for_host(state, session_id, host_id).await?;
    write_phase(
        state,
        &context,
        SessionEvent::RevealLeaderboard,
        QuestionPhaseEntity::with_leaderboard,
    )
    .await
}

/// Lock question `question_index` because its stored end passed.
///
/// Issued by the expiry watcher on the host's behalf. The write only happens if the
/// question is still current, active and expired by stored time.
pub async fn lock_on_timeout(
    state: &SharedState,
    session_id: Uuid,
    question_index: u32,
) -> Result<TransitionResponse, ServiceError> {
    let context = SessionContext::load(state, session_id).await?;
    let phase = context.require_phase()?;
    if phase.question_index != question_index {
        return Err(ServiceError::InvalidState(format!(
            "question {question_index} is no longer current"
        )));
    }
    if !phase.is_expired(SystemTime::now(), state.config().answer_grace_ms) {
        return Err(ServiceError::InvalidState(format!(
            "question {question_index} has not expired"
        )));
    }

    write_phase(
        state,
        &context,
        SessionEvent::LockAndReveal(LockReason::Timeout),
        QuestionPhaseEntity::locked_and_revealed,
    )
    .await
}

async fn write_phase<F>(
    state: &SharedState,
    context: &SessionContext,
    event: SessionEvent,
    next: F,
) -> Result<TransitionResponse, ServiceError>
where
    F: FnOnce(&QuestionPhaseEntity) -> QuestionPhaseEntity,
{
    write_phase_returning(state, context, event, next)
        .await
        .map(|(response, _)| response)
}

async fn write_phase_returning<F>(
    state: &SharedState,
    context: &SessionContext,
    event: SessionEvent,
    next: F,
) -> Result<(TransitionResponse, QuestionPhaseEntity), ServiceError>
where
    F: FnOnce(&QuestionPhaseEntity) -> QuestionPhaseEntity,
{
    let plan = context.plan(event)?;
    let current = context.require_phase()?;
    let updated = next(current);
    let session_id = context.session.id;

    run_transition(state, session_id, plan.event, || async {
        context
            .store
            .update_phase(updated.clone(), current.version)
            .await?;
        Ok(())
    })
    .await?;
    debug!(%session_id, question_index = updated.question_index, to = ?plan.to, "question phase written");

    let response = transition_response(
        &context.session,
        Some(&updated),
        context.game.question_count(),
    );
    Ok((response, updated))
}
