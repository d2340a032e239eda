use std::time::SystemTime;

use futures::future::try_join_all;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::models::{PlayerEntity, SessionStatus},
    dto::player::{JoinRequest, JoinResponse, PlayerSummary, StandingDto},
    error::ServiceError,
    services::context::{ensure_host, load_session},
    state::{
        SharedState,
        roster::{active_players, leaderboard as rank_players, resolve_display_name},
        scoring::aggregate_score,
    },
};

/// Add a participant to a session that is still in the lobby.
pub async fn join(
    state: &SharedState,
    session_id: Uuid,
    request: JoinRequest,
) -> Result<JoinResponse, ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_session(&store, session_id).await?;
    if session.status != SessionStatus::Lobby {
        return Err(ServiceError::InvalidState(format!(
            "session `{session_id}` is not accepting players ({})",
            session.status.as_str()
        )));
    }

    let requested = request.name.trim();
    let max_length = state.config().max_name_length;
    if requested.chars().count() > max_length {
        return Err(ServiceError::InvalidInput(format!(
            "name must be at most {max_length} characters"
        )));
    }

    let roster = active_players(store.list_players(session_id).await?);
    let name = resolve_display_name(
        requested,
        roster.iter().map(|player| player.name.as_str()),
        max_length,
    );
    let color = match request.color {
        Some(color) => color.to_ascii_lowercase(),
        None => state
            .config()
            .first_unused_color(roster.iter().map(|player| player.color.as_str())),
    };

    let player = PlayerEntity {
        id: Uuid::new_v4(),
        session_id,
        name,
        color,
        score: 0,
        removed: false,
        joined_at: SystemTime::now(),
        token: Uuid::new_v4().simple().to_string(),
        version: 1,
    };
    store.insert_player(player.clone()).await?;
    info!(%session_id, player_id = %player.id, name = %player.name, "player joined");

    Ok(JoinResponse {
        player: PlayerSummary::from(&player),
        token: player.token,
    })
}

/// Mark a player as removed. Terminal; repeating it is a no-op.
pub async fn remove(
    state: &SharedState,
    host_id: &str,
    session_id: Uuid,
    player_id: Uuid,
) -> Result<(), ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_session(&store, session_id).await?;
    ensure_host(&session, host_id)?;

    let player = store
        .find_player(player_id)
        .await?
        .filter(|player| player.session_id == session_id)
        .ok_or_else(|| ServiceError::NotFound(format!("player `{player_id}` not found")))?;
    if player.removed {
        debug!(%session_id, %player_id, "player already removed");
        return Ok(());
    }

    let expected = player.version;
    let removed = PlayerEntity {
        removed: true,
        version: expected + 1,
        ..player
    };
    store.update_player(removed, expected).await?;
    info!(%session_id, %player_id, "player removed");
    Ok(())
}

/// Non-removed players in join order.
pub async fn list_players(
    state: &SharedState,
    session_id: Uuid,
) -> Result<Vec<PlayerSummary>, ServiceError> {
    let store = state.require_session_store().await?;
    load_session(&store, session_id).await?;
    let players = active_players(store.list_players(session_id).await?);
    Ok(players.iter().map(PlayerSummary::from).collect())
}

/// Ranking of non-removed players, with scores summed from the answer log.
pub async fn leaderboard(
    state: &SharedState,
    session_id: Uuid,
) -> Result<Vec<StandingDto>, ServiceError> {
    let store = state.require_session_store().await?;
    load_session(&store, session_id).await?;
    let players = active_players(store.list_players(session_id).await?);

    let scores = try_join_all(
        players
            .iter()
            .map(|player| store.list_player_answers(session_id, player.id)),
    )
    .await?;

    let scored = players
        .into_iter()
        .zip(scores)
        .map(|(player, answers)| PlayerEntity {
            score: aggregate_score(&answers),
            ..player
        });

    Ok(rank_players(scored).into_iter().map(StandingDto::from).collect())
}
