use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::{
        player::{AnswerRequest, AnswerView, JoinRequest, JoinResponse, PlayerSummary, StandingDto},
        session::JoinableSession,
        sync::{SyncQuery, SyncSnapshot},
    },
    error::AppError,
    routes::{HOST_ID_HEADER, PLAYER_TOKEN_HEADER, header_value},
    services::{answer_service, roster_service, session_service, sync_service},
    state::SharedState,
};

/// Endpoints used by players and displays, plus the shared snapshot read.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sessions/code/{code}", get(resolve_code))
        .route(
            "/sessions/{id}/players",
            post(join_session).get(list_players),
        )
        .route("/sessions/{id}/answers", post(submit_answer))
        .route("/sessions/{id}/leaderboard", get(leaderboard))
        .route("/sessions/{id}/snapshot", get(snapshot))
}

#[utoipa::path(
    get,
    path = "/sessions/code/{code}",
    tag = "players",
    params(("code" = String, Path, description = "Join code, case-insensitive")),
    responses(
        (status = 200, description = "Active session owning the code", body = JoinableSession),
        (status = 404, description = "No active session uses this code")
    )
)]
/// Resolve a join code to the active session using it.
pub async fn resolve_code(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<JoinableSession>, AppError> {
    Ok(Json(session_service::resolve_code(&state, &code).await?))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/players",
    tag = "players",
    params(("id" = Uuid, Path, description = "Identifier of the session")),
    request_body = JoinRequest,
    responses(
        (status = 200, description = "Player joined; keep the token", body = JoinResponse),
        (status = 409, description = "Session is no longer in its lobby")
    )
)]
/// Join a session lobby.
pub async fn join_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<JoinRequest>>,
) -> Result<Json<JoinResponse>, AppError> {
    Ok(Json(roster_service::join(&state, id, payload).await?))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/players",
    tag = "players",
    params(("id" = Uuid, Path, description = "Identifier of the session")),
    responses((status = 200, description = "Roster in join order", body = [PlayerSummary]))
)]
/// List the roster of a session, removed players included.
pub async fn list_players(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<PlayerSummary>>, AppError> {
    Ok(Json(roster_service::list_players(&state, id).await?))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/answers",
    tag = "players",
    params(("X-Player-Token" = String, Header, description = "Token returned when joining"),
    ("id" = Uuid, Path, description = "Identifier of the session")),
    request_body = AnswerRequest,
    responses(
        (status = 200, description = "Answer recorded", body = AnswerView),
        (status = 401, description = "Missing or invalid player token"),
        (status = 409, description = "Question closed or already answered")
    )
)]
/// Submit the caller's single answer to the current question.
pub async fn submit_answer(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<AnswerRequest>,
) -> Result<Json<AnswerView>, AppError> {
    let token = header_value(&headers, PLAYER_TOKEN_HEADER).ok_or_else(|| {
        AppError::Unauthorized("missing player token header `X-Player-Token`".into())
    })?;
    Ok(Json(answer_service::submit(&state, id, &token, payload).await?))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/leaderboard",
    tag = "players",
    params(("id" = Uuid, Path, description = "Identifier of the session")),
    responses((status = 200, description = "Standings recomputed from the answer log", body = [StandingDto]))
)]
/// Rank the active players of a session.
pub async fn leaderboard(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<StandingDto>>, AppError> {
    Ok(Json(roster_service::leaderboard(&state, id).await?))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/snapshot",
    tag = "sync",
    params(("id" = Uuid, Path, description = "Identifier of the session"), SyncQuery),
    responses(
        (status = 200, description = "Role-filtered resync payload", body = SyncSnapshot),
        (status = 401, description = "Caller may not take the requested role")
    )
)]
/// Read the full role-filtered view of a session.
pub async fn snapshot(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Query(query): Query<SyncQuery>,
) -> Result<Json<SyncSnapshot>, AppError> {
    let host_id = header_value(&headers, HOST_ID_HEADER);
    Ok(Json(
        sync_service::snapshot(&state, id, query, host_id.as_deref()).await?,
    ))
}
