use std::sync::Arc;

use uuid::Uuid;

use crate::{
    dao::{
        models::{GameEntity, PlayerEntity, QuestionPhaseEntity, SessionEntity},
        session_store::SessionStore,
    },
    error::ServiceError,
    state::{
        SharedState,
        state_machine::{Plan, SessionEvent, SessionStateMachine},
    },
};

/// Rows a session operation works from, read fresh from the store.
pub struct SessionContext {
    pub store: Arc<dyn SessionStore>,
    pub session: SessionEntity,
    pub game: GameEntity,
    /// Phase row of the current question, if the session points at one.
    pub phase: Option<QuestionPhaseEntity>,
}

impl SessionContext {
    /// Load the session, its game and its current phase row.
    pub async fn load(state: &SharedState, session_id: Uuid) -> Result<Self, ServiceError> {
        let store = state.require_session_store().await?;
        let session = load_session(&store, session_id).await?;
        let game = load_game(&store, session.game_id).await?;
        let phase = current_phase(&store, &session).await?;
        Ok(Self {
            store,
            session,
            game,
            phase,
        })
    }

    /// Load the context and check that `host_id` owns the session.
    pub async fn load_for_host(
        state: &SharedState,
        session_id: Uuid,
        host_id: &str,
    ) -> Result<Self, ServiceError> {
        let context = Self::load(state, session_id).await?;
        ensure_host(&context.session, host_id)?;
        Ok(context)
    }

    /// Rebuild the transition table from the loaded rows.
    pub fn machine(&self) -> Result<SessionStateMachine, ServiceError> {
        Ok(SessionStateMachine::from_rows(
            &self.session,
            self.phase.as_ref(),
            self.game.question_count(),
        )?)
    }

    /// Validate `event` against the loaded rows.
    pub fn plan(&self, event: SessionEvent) -> Result<Plan, ServiceError> {
        Ok(self.machine()?.plan(event)?)
    }

    /// Phase row of the current question, failing when there is none.
    pub fn require_phase(&self) -> Result<&QuestionPhaseEntity, ServiceError> {
        self.phase.as_ref().ok_or_else(|| {
            ServiceError::InvalidState(format!(
                "session `{}` has no active question",
                self.session.id
            ))
        })
    }
}

/// Fetch a session or fail with [`ServiceError::NotFound`].
pub async fn load_session(
    store: &Arc<dyn SessionStore>,
    session_id: Uuid,
) -> Result<SessionEntity, ServiceError> {
    store
        .find_session(session_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}` not found")))
}

/// Fetch a game or fail with [`ServiceError::NotFound`].
pub async fn load_game(
    store: &Arc<dyn SessionStore>,
    game_id: Uuid,
) -> Result<GameEntity, ServiceError> {
    store
        .find_game(game_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("game `{game_id}` not found")))
}

/// Phase row the session currently points at.
pub async fn current_phase(
    store: &Arc<dyn SessionStore>,
    session: &SessionEntity,
) -> Result<Option<QuestionPhaseEntity>, ServiceError> {
    match session.current_index() {
        Some(index) => Ok(store.find_phase(session.id, index as u32).await?),
        None => Ok(None),
    }
}

/// Reject callers that do not own the session.
pub fn ensure_host(session: &SessionEntity, host_id: &str) -> Result<(), ServiceError> {
    if session.host_id == host_id {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized(
            "session is owned by another host".into(),
        ))
    }
}

/// Fetch a player of `session_id` and check the presented token.
///
/// Removed players still authenticate; callers decide what a removed player may do.
pub async fn authenticate_player(
    store: &Arc<dyn SessionStore>,
    session_id: Uuid,
    player_id: Uuid,
    token: &str,
) -> Result<PlayerEntity, ServiceError> {
    let player = store
        .find_player(player_id)
        .await?
        .filter(|player| player.session_id == session_id)
        .ok_or_else(|| ServiceError::NotFound(format!("player `{player_id}` not found")))?;

    if player.token != token {
        return Err(ServiceError::Unauthorized("invalid player token".into()));
    }
    Ok(player)
}
