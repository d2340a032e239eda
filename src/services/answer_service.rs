//! Answer submission, the only concurrent-write hot path.
//!
//! The single-answer rule is the store's uniqueness constraint on
//! (session, player, question); nothing here checks for an existing answer first.

use std::time::SystemTime;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{AnswerEntity, QuestionPhaseEntity, SessionStatus},
    dto::player::{AnswerRequest, AnswerView},
    error::ServiceError,
    services::context::{SessionContext, authenticate_player},
    state::{
        SharedState,
        scoring::{ScoringRules, aggregate_score, award_points},
    },
};

/// Record a player's answer to the current question and refresh their score.
pub async fn submit(
    state: &SharedState,
    session_id: Uuid,
    token: &str,
    request: AnswerRequest,
) -> Result<AnswerView, ServiceError> {
    let submitted_at = SystemTime::now();
    let context = SessionContext::load(state, session_id).await?;
    let player = authenticate_player(&context.store, session_id, request.player_id, token).await?;
    if player.removed {
        return Err(ServiceError::InvalidState("player was removed from the session".into()));
    }
    if context.session.status != SessionStatus::Playing {
        return Err(ServiceError::InvalidState(format!(
            "session is {}, answers are not accepted",
            context.session.status.as_str()
        )));
    }

    let phase = context.require_phase()?;
    if phase.question_id != request.question_id {
        return Err(ServiceError::InvalidState(format!(
            "question `{}` is not the current question",
            request.question_id
        )));
    }
    if phase.locked {
        return Err(ServiceError::InvalidState("question is locked".into()));
    }
    if phase.paused {
        return Err(ServiceError::InvalidState("question is paused".into()));
    }
    if phase.is_expired(submitted_at, state.config().answer_grace_ms) {
        return Err(ServiceError::InvalidState("answer window has closed".into()));
    }

    let question = context
        .game
        .question(phase.question_index as usize)
        .ok_or_else(|| ServiceError::InvalidState("current question is missing".into()))?;
    let choice = question.choice(request.choice_id).ok_or_else(|| {
        ServiceError::InvalidInput(format!("choice `{}` is not offered", request.choice_id))
    })?;

    let elapsed_ms = phase.elapsed_ms(submitted_at);
    let rules = ScoringRules {
        timer_seconds: context.session.timer_seconds,
        speed_bonus: context.session.speed_bonus,
    };
    let answer = AnswerEntity {
        id: Uuid::new_v4(),
        session_id,
        player_id: player.id,
        question_id: question.id,
        choice_id: choice.id,
        is_correct: choice.is_correct,
        elapsed_ms,
        points_awarded: award_points(choice.is_correct, elapsed_ms, rules),
        submitted_at,
    };

    context
        .store
        .insert_answer(answer.clone())
        .await
        .inspect_err(|err| {
            debug!(%session_id, player_id = %player.id, error = %err, "answer rejected")
        })?;
    info!(
        %session_id,
        player_id = %player.id,
        question_index = phase.question_index,
        elapsed_ms,
        "answer recorded"
    );

    // Validation read the phase before the insert. A lock committed in between keeps the
    // answer, since it was submitted while the question was open, but the tallies already
    // revealed will move once the feed delivers it.
    match context.store.find_phase(session_id, phase.question_index).await {
        Ok(current) if locked_since(phase, current.as_ref()) => {
            warn!(
                %session_id,
                player_id = %player.id,
                question_index = phase.question_index,
                "answer landed while the question was being locked"
            );
        }
        Ok(_) => {}
        Err(err) => {
            debug!(%session_id, error = %err, "failed to re-read phase after answer")
        }
    }

    // The answer is durable at this point; a failed score refresh is repaired by the next one.
    match context.store.list_player_answers(session_id, player.id).await {
        Ok(answers) => {
            let score = aggregate_score(&answers);
            if let Err(err) = context.store.set_player_score(player.id, score).await {
                warn!(%session_id, player_id = %player.id, error = %err, "failed to store score");
            }
        }
        Err(err) => {
            warn!(%session_id, player_id = %player.id, error = %err, "failed to recompute score")
        }
    }

    Ok(AnswerView::from_entity(&answer, false))
}

/// Whether `current` is a lock written after `validated` was read.
fn locked_since(validated: &QuestionPhaseEntity, current: Option<&QuestionPhaseEntity>) -> bool {
    current.is_some_and(|current| {
        current.locked && !validated.locked && current.version != validated.version
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn open_phase() -> QuestionPhaseEntity {
        let started_at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        QuestionPhaseEntity {
            session_id: Uuid::new_v4(),
            question_index: 0,
            question_id: Uuid::new_v4(),
            started_at,
            ends_at: Some(started_at + Duration::from_secs(20)),
            paused: false,
            paused_remaining_ms: None,
            locked: false,
            show_results: false,
            show_leaderboard: false,
            version: 1,
        }
    }

    #[test]
    fn concurrent_lock_is_noticed() {
        let validated = open_phase();
        let locked = QuestionPhaseEntity {
            locked: true,
            show_results: true,
            version: 2,
            ..validated.clone()
        };
        assert!(locked_since(&validated, Some(&locked)));
    }

    #[test]
    fn untouched_phase_is_not_flagged() {
        let validated = open_phase();
        assert!(!locked_since(&validated, Some(&validated)));
        assert!(!locked_since(&validated, None));

        let paused = QuestionPhaseEntity {
            paused: true,
            version: 2,
            ..validated.clone()
        };
        assert!(!locked_since(&validated, Some(&paused)));
    }
}
