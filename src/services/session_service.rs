//! Session lifecycle: creation with a join code, start, advance and early end.
//!
//! Every operation re-reads the rows it depends on, validates the event against a
//! state machine rebuilt from them and writes with row-version guards, so concurrent
//! or retried host requests are rejected by the store instead of being serialized here.

use std::time::SystemTime;

use rand::{SeedableRng, rngs::StdRng};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{NO_QUESTION, QuestionPhaseEntity, SessionEntity, SessionStatus},
        storage::{Constraint, StorageError},
    },
    dto::{
        phase::PhaseSummary,
        session::{CreateSessionRequest, JoinableSession, SessionSummary, TransitionResponse},
    },
    error::ServiceError,
    services::{
        context::{SessionContext, current_phase, load_game, load_session},
        timer_service,
    },
    state::{
        SharedState,
        join_code::{allocate, generate_code, is_valid_code, normalize_code},
        roster::active_players,
        state_machine::{FinishReason, Plan, SessionEvent, SessionPhase, SessionStateMachine},
        transitions::run_transition,
    },
};

// ---------------------------------------------------------------------------
// Creation and lookup
// ---------------------------------------------------------------------------

/// Open a lobby for `request.game_id` with a freshly allocated join code.
pub async fn create_session(
    state: &SharedState,
    host_id: &str,
    request: CreateSessionRequest,
) -> Result<SessionSummary, ServiceError> {
    let mut rng = StdRng::from_rng(&mut rand::rng());
    create_session_with_codes(state, host_id, request, move || generate_code(&mut rng)).await
}

/// [`create_session`] drawing join code candidates from `next_code`.
pub async fn create_session_with_codes<C>(
    state: &SharedState,
    host_id: &str,
    request: CreateSessionRequest,
    next_code: C,
) -> Result<SessionSummary, ServiceError>
where
    C: FnMut() -> String,
{
    let store = state.require_session_store().await?;
    let timer = state.config().timer;
    let timer_seconds = request.timer_seconds.unwrap_or(timer.default_seconds);
    if !timer.accepts(timer_seconds) {
        return Err(ServiceError::InvalidInput(format!(
            "timer must be between {} and {} seconds",
            timer.min_seconds, timer.max_seconds
        )));
    }

    let game = load_game(&store, request.game_id).await?;
    if game.host_id != host_id {
        return Err(ServiceError::Unauthorized("game is owned by another host".into()));
    }

    let allocation = allocate(
        next_code,
        |code| {
            let lookup = store.find_active_session_by_code(code);
            async move { lookup.await.map(|found| found.is_some()) }
        },
    )
    .await?;
    if allocation.exhausted {
        warn!(
            code = %allocation.code,
            attempts = allocation.attempts,
            "every join code candidate collided; relying on the store constraint"
        );
    }

    let session = SessionEntity {
        id: Uuid::new_v4(),
        host_id: host_id.to_string(),
        game_id: game.id,
        code: allocation.code,
        status: SessionStatus::Lobby,
        current_question_index: NO_QUESTION,
        timer_seconds,
        speed_bonus: request.speed_bonus.unwrap_or(true),
        created_at: SystemTime::now(),
        ended_at: None,
        version: 1,
    };
    store
        .insert_session(session.clone())
        .await
        .inspect_err(|err| debug!(code = %session.code, error = %err, "session insert rejected"))?;

    info!(session_id = %session.id, code = %session.code, "session created");
    Ok(SessionSummary::from_entity(&session, game.question_count()))
}

/// Resolve a user-typed join code to the non-finished session holding it.
pub async fn resolve_code(state: &SharedState, raw: &str) -> Result<JoinableSession, ServiceError> {
    let code = normalize_code(raw);
    if !is_valid_code(&code) {
        return Err(ServiceError::InvalidInput(format!("`{raw}` is not a join code")));
    }

    let store = state.require_session_store().await?;
    let session = store
        .find_active_session_by_code(code.clone())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("no active session with code `{code}`")))?;
    let game = load_game(&store, session.game_id).await?;
    let players = active_players(store.list_players(session.id).await?);

    Ok(JoinableSession {
        session_id: session.id,
        code: session.code,
        title: game.title,
        status: session.status.into(),
        accepting_players: session.status == SessionStatus::Lobby,
        player_count: players.len(),
    })
}

// ---------------------------------------------------------------------------
// Host transitions
// ---------------------------------------------------------------------------

/// Leave the lobby and activate the first question.
pub async fn start(
    state: &SharedState,
    host_id: &str,
    session_id: Uuid,
) -> Result<TransitionResponse, ServiceError> {
    let context = SessionContext::load_for_host(state, session_id, host_id).await?;
    let plan = context.plan(SessionEvent::Start)?;

    let players = active_players(context.store.list_players(session_id).await?);
    if players.is_empty() {
        return Err(ServiceError::InvalidState(
            "cannot start a session without players".into(),
        ));
    }

    let (session, phase) = run_transition(state, session_id, plan.event, || {
        activate_question(&context, &plan, 0)
    })
    .await?;
    timer_service::arm(state, &phase);

    Ok(transition_response(
        &session,
        Some(&phase),
        context.game.question_count(),
    ))
}

/// Activate the next question, or finish the session when none remain.
pub async fn advance(
    state: &SharedState,
    host_id: &str,
    session_id: Uuid,
) -> Result<TransitionResponse, ServiceError> {
    let context = SessionContext::load_for_host(state, session_id, host_id).await?;
    let plan = context.plan(SessionEvent::Advance)?;
    let question_count = context.game.question_count();

    if let Some(reason) = plan.finish {
        let session =
            run_transition(state, session_id, plan.event, || finish(&context, reason)).await?;
        timer_service::disarm(state, session_id);
        return Ok(transition_response(&session, None, question_count));
    }

    let SessionPhase::Playing { index, .. } = plan.to else {
        return Err(ServiceError::InvalidState(format!(
            "advance planned an unexpected target {:?}",
            plan.to
        )));
    };

    let (session, phase) = run_transition(state, session_id, plan.event, || {
        activate_question(&context, &plan, index)
    })
    .await?;
    timer_service::arm(state, &phase);

    Ok(transition_response(&session, Some(&phase), question_count))
}

/// Finish the session immediately, skipping the remaining questions.
pub async fn end_now(
    state: &SharedState,
    host_id: &str,
    session_id: Uuid,
) -> Result<TransitionResponse, ServiceError> {
    let context = SessionContext::load_for_host(state, session_id, host_id).await?;
    let plan = context.plan(SessionEvent::EndNow)?;
    let reason = plan.finish.unwrap_or(FinishReason::EndedByHost);

    let session = run_transition(state, session_id, plan.event, || finish(&context, reason)).await?;
    timer_service::disarm(state, session_id);

    Ok(transition_response(
        &session,
        None,
        context.game.question_count(),
    ))
}

/// Write the phase row of question `index`, then move the session pointer onto it.
///
/// The phase row goes first. If the session write then fails, the row is left orphaned
/// beyond the session pointer and a later activation adopts it, see [`adopt_orphan`].
async fn activate_question(
    context: &SessionContext,
    plan: &Plan,
    index: u32,
) -> Result<(SessionEntity, QuestionPhaseEntity), ServiceError> {
    let session_id = context.session.id;
    let question = context.game.question(index as usize).ok_or_else(|| {
        ServiceError::InvalidState(format!("game has no question at index {index}"))
    })?;
    let timer_ms = context.session.timer_ms();

    let fresh =
        QuestionPhaseEntity::activate(session_id, index, question.id, timer_ms, SystemTime::now());
    match context.store.insert_phase(fresh.clone()).await {
        Ok(()) => {}
        Err(err) if err.constraint() == Some(Constraint::QuestionPhaseIndex) => {
            return adopt_orphan(context, plan, index, question.id, timer_ms).await;
        }
        Err(err) => return Err(err.into()),
    }

    let session = point_at(context, index).await?;
    info!(%session_id, question_index = index, "question activated");
    Ok((session, fresh))
}

/// Take over a phase row for `index` that already exists.
///
/// Only a row that never became current may be refreshed. The plan is re-checked
/// against fresh rows and the session pointer is moved before the row is touched, so a
/// racing activation loses the session write and leaves the row alone.
async fn adopt_orphan(
    context: &SessionContext,
    plan: &Plan,
    index: u32,
    question_id: Uuid,
    timer_ms: u64,
) -> Result<(SessionEntity, QuestionPhaseEntity), ServiceError> {
    let session_id = context.session.id;
    let rejected = || ServiceError::from(StorageError::conflict(Constraint::QuestionPhaseIndex));

    let current = load_session(&context.store, session_id).await?;
    let current_phase_row = current_phase(&context.store, &current).await?;
    let mut machine = SessionStateMachine::from_rows(
        &current,
        current_phase_row.as_ref(),
        context.game.question_count(),
    )?;
    if current.version != context.session.version || machine.apply(plan).is_err() {
        debug!(%session_id, question_index = index, "activation raced another transition");
        return Err(rejected());
    }

    let orphan = context
        .store
        .find_phase(session_id, index)
        .await?
        .ok_or_else(rejected)?;
    if orphan.locked || orphan.show_results {
        return Err(rejected());
    }

    let session = point_at(context, index).await?;
    let refreshed = orphan.reactivated(question_id, timer_ms, SystemTime::now());
    context
        .store
        .update_phase(refreshed.clone(), orphan.version)
        .await
        .inspect_err(|err| {
            warn!(%session_id, question_index = index, error = %err, "failed to refresh adopted phase row")
        })?;

    info!(%session_id, question_index = index, "question activated from orphaned phase row");
    Ok((session, refreshed))
}

/// Move the session pointer onto `index`, guarded by the version the context read.
async fn point_at(context: &SessionContext, index: u32) -> Result<SessionEntity, ServiceError> {
    let session = SessionEntity {
        status: SessionStatus::Playing,
        current_question_index: index as i32,
        version: context.session.version + 1,
        ..context.session.clone()
    };
    context
        .store
        .update_session(session.clone(), context.session.version)
        .await?;
    Ok(session)
}

async fn finish(
    context: &SessionContext,
    reason: FinishReason,
) -> Result<SessionEntity, ServiceError> {
    let session = SessionEntity {
        status: SessionStatus::Finished,
        ended_at: Some(SystemTime::now()),
        version: context.session.version + 1,
        ..context.session.clone()
    };
    context
        .store
        .update_session(session.clone(), context.session.version)
        .await?;

    info!(session_id = %session.id, ?reason, "session finished");
    Ok(session)
}

/// Project the rows written by a transition.
pub(crate) fn transition_response(
    session: &SessionEntity,
    phase: Option<&QuestionPhaseEntity>,
    question_count: usize,
) -> TransitionResponse {
    TransitionResponse {
        session: SessionSummary::from_entity(session, question_count),
        phase: phase.map(|phase| PhaseSummary::from_entity(phase, SystemTime::now())),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::session_store::{SessionStore, memory::MemorySessionStore},
        dto::{
            game::{ChoiceInput, CreateGameRequest, QuestionInput},
            player::JoinRequest,
        },
        services::{authoring_service, phase_service, roster_service},
        state::AppState,
    };

    const HOST: &str = "host-1";

    /// A session of three questions with one player, playing question 0.
    async fn playing() -> (SharedState, Arc<MemorySessionStore>, Uuid) {
        let store = Arc::new(MemorySessionStore::new());
        let state =
            AppState::with_store(AppConfig::default(), store.clone() as Arc<dyn SessionStore>)
                .await;
        let request = CreateGameRequest {
            title: "Rivers".into(),
            questions: (0..3)
                .map(|index| QuestionInput {
                    prompt: format!("Question {index}"),
                    choices: vec![
                        ChoiceInput {
                            text: "Yes".into(),
                            is_correct: true,
                        },
                        ChoiceInput {
                            text: "No".into(),
                            is_correct: false,
                        },
                    ],
                })
                .collect(),
        };
        let game = authoring_service::create_game(&state, HOST, request)
            .await
            .expect("game");
        let session = create_session(
            &state,
            HOST,
            CreateSessionRequest {
                game_id: game.id,
                timer_seconds: Some(30),
                speed_bonus: Some(false),
            },
        )
        .await
        .expect("session");
        roster_service::join(
            &state,
            session.id,
            JoinRequest {
                name: "Ada".into(),
                color: None,
            },
        )
        .await
        .expect("join");
        start(&state, HOST, session.id).await.expect("start");
        (state, store, session.id)
    }

    async fn phase_row(
        store: &MemorySessionStore,
        session_id: Uuid,
        index: u32,
    ) -> QuestionPhaseEntity {
        store
            .find_phase(session_id, index)
            .await
            .expect("read")
            .expect("phase row")
    }

    #[tokio::test]
    async fn stale_activation_leaves_a_revealed_question_alone() {
        let (state, store, session_id) = playing().await;
        let stale = SessionContext::load_for_host(&state, session_id, HOST)
            .await
            .expect("context");
        let stale_plan = stale.plan(SessionEvent::Advance).expect("plan");

        advance(&state, HOST, session_id).await.expect("advance");
        phase_service::lock(&state, HOST, session_id)
            .await
            .expect("lock");
        let revealed = phase_row(&store, session_id, 1).await;
        assert!(revealed.locked && revealed.show_results);

        let err = activate_question(&stale, &stale_plan, 1)
            .await
            .expect_err("stale activation");
        assert!(matches!(err, ServiceError::Rejected(_)), "{err:?}");

        assert_eq!(phase_row(&store, session_id, 1).await, revealed);
        let session = load_session(&stale.store, session_id).await.expect("session");
        assert_eq!(session.current_question_index, 1);
    }

    #[tokio::test]
    async fn stale_activation_does_not_restart_an_open_question() {
        let (state, store, session_id) = playing().await;
        let stale = SessionContext::load_for_host(&state, session_id, HOST)
            .await
            .expect("context");
        let stale_plan = stale.plan(SessionEvent::Advance).expect("plan");

        advance(&state, HOST, session_id).await.expect("advance");
        let open = phase_row(&store, session_id, 1).await;

        activate_question(&stale, &stale_plan, 1)
            .await
            .expect_err("stale activation");
        assert_eq!(phase_row(&store, session_id, 1).await, open);
    }

    #[tokio::test]
    async fn orphaned_row_is_adopted_on_advance() {
        let (state, store, session_id) = playing().await;
        let context = SessionContext::load_for_host(&state, session_id, HOST)
            .await
            .expect("context");
        let question_id = context.game.question(1).expect("question").id;
        let orphan = QuestionPhaseEntity::activate(
            session_id,
            1,
            question_id,
            context.session.timer_ms(),
            SystemTime::UNIX_EPOCH,
        );
        store.insert_phase(orphan).await.expect("orphan");

        let response = advance(&state, HOST, session_id).await.expect("advance");
        assert_eq!(response.session.current_question_index, 1);

        let adopted = phase_row(&store, session_id, 1).await;
        assert_eq!(adopted.version, 2);
        assert!(!adopted.locked);
        assert!(adopted.started_at > SystemTime::UNIX_EPOCH);
    }
}
