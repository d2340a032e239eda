//! Authoring seed: stores the immutable question sets sessions are played from.

use std::time::SystemTime;

use tracing::info;
use uuid::Uuid;

use crate::{
    dao::models::GameEntity,
    dto::game::{CreateGameRequest, GameSummary},
    error::ServiceError,
    services::context::load_game,
    state::SharedState,
};

/// Persist a new question set owned by `host_id`.
pub async fn create_game(
    state: &SharedState,
    host_id: &str,
    request: CreateGameRequest,
) -> Result<GameSummary, ServiceError> {
    let store = state.require_session_store().await?;
    let (title, questions) = request.into_parts();

    let game = GameEntity {
        id: Uuid::new_v4(),
        host_id: host_id.to_string(),
        title,
        questions,
        created_at: SystemTime::now(),
    };
    store.save_game(game.clone()).await?;
    info!(game_id = %game.id, questions = game.question_count(), "game authored");

    Ok(game.into())
}

/// Fetch a question set, correct answers included, for its owner.
pub async fn get_game(
    state: &SharedState,
    host_id: &str,
    game_id: Uuid,
) -> Result<GameSummary, ServiceError> {
    let store = state.require_session_store().await?;
    let game = load_game(&store, game_id).await?;
    if game.host_id != host_id {
        return Err(ServiceError::Unauthorized("game is owned by another host".into()));
    }
    Ok(game.into())
}
