use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::{
        game::{CreateGameRequest, GameSummary},
        session::{CreateSessionRequest, SessionSummary, TransitionResponse},
    },
    error::AppError,
    routes::{HOST_ID_HEADER, header_value},
    services::{authoring_service, phase_service, roster_service, session_service},
    state::SharedState,
};

/// Authenticated host identity, attached to the request by [`require_host_id`].
#[derive(Debug, Clone)]
pub struct HostId(pub String);

/// Host-only endpoints: authoring, session lifecycle and question phase control.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/games", post(create_game))
        .route("/games/{id}", get(get_game))
        .route("/sessions", post(create_session))
        .route("/sessions/{id}/start", post(start_session))
        .route("/sessions/{id}/pause", post(pause_question))
        .route("/sessions/{id}/resume", post(resume_question))
        .route("/sessions/{id}/lock", post(lock_question))
        .route("/sessions/{id}/leaderboard", post(reveal_leaderboard))
        .route("/sessions/{id}/advance", post(advance_session))
        .route("/sessions/{id}/end", post(end_session))
        .route(
            "/sessions/{id}/players/{player_id}",
            delete(remove_player),
        )
        .route_layer(middleware::from_fn(require_host_id))
}

/// Author a question set.
#[utoipa::path(
    post,
    path = "/games",
    tag = "host",
    params(("X-Host-Id" = String, Header, description = "Identifier of the authenticated host")),
    request_body = CreateGameRequest,
    responses(
        (status = 200, description = "Game created", body = GameSummary),
        (status = 400, description = "Invalid question set")
    )
)]
pub async fn create_game(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Valid(Json(payload)): Valid<Json<CreateGameRequest>>,
) -> Result<Json<GameSummary>, AppError> {
    Ok(Json(
        authoring_service::create_game(&state, &host_id, payload).await?,
    ))
}

/// Retrieve an authored question set, correct answers included.
#[utoipa::path(
    get,
    path = "/games/{id}",
    tag = "host",
    params(("X-Host-Id" = String, Header, description = "Identifier of the authenticated host"),
    ("id" = Uuid, Path, description = "Identifier of the game")),
    responses((status = 200, description = "Game", body = GameSummary))
)]
pub async fn get_game(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Path(id): Path<Uuid>,
) -> Result<Json<GameSummary>, AppError> {
    Ok(Json(authoring_service::get_game(&state, &host_id, id).await?))
}

/// Open a lobby for an authored game and allocate its join code.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "host",
    params(("X-Host-Id" = String, Header, description = "Identifier of the authenticated host")),
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = SessionSummary),
        (status = 409, description = "Join code collided with an active session")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<Json<SessionSummary>, AppError> {
    Ok(Json(
        session_service::create_session(&state, &host_id, payload).await?,
    ))
}

/// Leave the lobby and activate the first question.
#[utoipa::path(
    post,
    path = "/sessions/{id}/start",
    tag = "host",
    params(("X-Host-Id" = String, Header, description = "Identifier of the authenticated host"),
    ("id" = Uuid, Path, description = "Identifier of the session")),
    responses(
        (status = 200, description = "Session started", body = TransitionResponse),
        (status = 409, description = "Transition not legal from the current phase")
    )
)]
pub async fn start_session(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, AppError> {
    Ok(Json(session_service::start(&state, &host_id, id).await?))
}

/// Freeze the timer of the active question.
#[utoipa::path(
    post,
    path = "/sessions/{id}/pause",
    tag = "host",
    params(("X-Host-Id" = String, Header, description = "Identifier of the authenticated host"),
    ("id" = Uuid, Path, description = "Identifier of the session")),
    responses((status = 200, description = "Question paused", body = TransitionResponse))
)]
pub async fn pause_question(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, AppError> {
    Ok(Json(phase_service::pause(&state, &host_id, id).await?))
}

/// Restart the timer of a paused question.
#[utoipa::path(
    post,
    path = "/sessions/{id}/resume",
    tag = "host",
    params(("X-Host-Id" = String, Header, description = "Identifier of the authenticated host"),
    ("id" = Uuid, Path, description = "Identifier of the session")),
    responses((status = 200, description = "Question resumed", body = TransitionResponse))
)]
pub async fn resume_question(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, AppError> {
    Ok(Json(phase_service::resume(&state, &host_id, id).await?))
}

/// Lock the current question and reveal its results.
#[utoipa::path(
    post,
    path = "/sessions/{id}/lock",
    tag = "host",
    params(("X-Host-Id" = String, Header, description = "Identifier of the authenticated host"),
    ("id" = Uuid, Path, description = "Identifier of the session")),
    responses((status = 200, description = "Question locked and revealed", body = TransitionResponse))
)]
pub async fn lock_question(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, AppError> {
    Ok(Json(phase_service::lock(&state, &host_id, id).await?))
}

/// Reveal the leaderboard after the results.
#[utoipa::path(
    post,
    path = "/sessions/{id}/leaderboard",
    tag = "host",
    params(("X-Host-Id" = String, Header, description = "Identifier of the authenticated host"),
    ("id" = Uuid, Path, description = "Identifier of the session")),
    responses((status = 200, description = "Leaderboard revealed", body = TransitionResponse))
)]
pub async fn reveal_leaderboard(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, AppError> {
    Ok(Json(
        phase_service::reveal_leaderboard(&state, &host_id, id).await?,
    ))
}

/// Activate the next question, or finish once none remain.
#[utoipa::path(
    post,
    path = "/sessions/{id}/advance",
    tag = "host",
    params(("X-Host-Id" = String, Header, description = "Identifier of the authenticated host"),
    ("id" = Uuid, Path, description = "Identifier of the session")),
    responses((status = 200, description = "Session advanced", body = TransitionResponse))
)]
pub async fn advance_session(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, AppError> {
    Ok(Json(session_service::advance(&state, &host_id, id).await?))
}

/// Finish the session immediately.
#[utoipa::path(
    post,
    path = "/sessions/{id}/end",
    tag = "host",
    params(("X-Host-Id" = String, Header, description = "Identifier of the authenticated host"),
    ("id" = Uuid, Path, description = "Identifier of the session")),
    responses((status = 200, description = "Session finished", body = TransitionResponse))
)]
pub async fn end_session(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, AppError> {
    Ok(Json(session_service::end_now(&state, &host_id, id).await?))
}

/// Remove a player from the session.
#[utoipa::path(
    delete,
    path = "/sessions/{id}/players/{player_id}",
    tag = "host",
    params(("X-Host-Id" = String, Header, description = "Identifier of the authenticated host"),
    ("id" = Uuid, Path, description = "Identifier of the session"),
    ("player_id" = Uuid, Path, description = "Identifier of the player to remove")),
    responses((status = 204, description = "Player removed"))
)]
pub async fn remove_player(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Path((id, player_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    roster_service::remove(&state, &host_id, id, player_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn require_host_id(mut req: Request<Body>, next: Next) -> Result<Response, AppError> {
    let host_id = header_value(req.headers(), HOST_ID_HEADER).ok_or_else(|| {
        AppError::Unauthorized("missing host identity header `X-Host-Id`".into())
    })?;
    req.extensions_mut().insert(HostId(host_id));
    Ok(next.run(req).await)
}
