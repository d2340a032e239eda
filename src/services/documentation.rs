use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Live Quiz Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::host::create_game,
        crate::routes::host::get_game,
        crate::routes::host::create_session,
        crate::routes::host::start_session,
        crate::routes::host::pause_question,
        crate::routes::host::resume_question,
        crate::routes::host::lock_question,
        crate::routes::host::reveal_leaderboard,
        crate::routes::host::advance_session,
        crate::routes::host::end_session,
        crate::routes::host::remove_player,
        crate::routes::player::resolve_code,
        crate::routes::player::join_session,
        crate::routes::player::list_players,
        crate::routes::player::submit_answer,
        crate::routes::player::leaderboard,
        crate::routes::player::snapshot,
        crate::routes::sse::session_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::game::CreateGameRequest,
            crate::dto::game::QuestionInput,
            crate::dto::game::ChoiceInput,
            crate::dto::game::GameSummary,
            crate::dto::game::QuestionSummary,
            crate::dto::game::ChoiceSummary,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::SessionStatusDto,
            crate::dto::session::SessionSummary,
            crate::dto::session::JoinableSession,
            crate::dto::session::TransitionResponse,
            crate::dto::phase::VisibleSessionPhase,
            crate::dto::phase::HostAction,
            crate::dto::phase::PhaseSummary,
            crate::dto::player::JoinRequest,
            crate::dto::player::JoinResponse,
            crate::dto::player::PlayerSummary,
            crate::dto::player::AnswerRequest,
            crate::dto::player::AnswerView,
            crate::dto::player::StandingDto,
            crate::dto::sync::RoleParam,
            crate::dto::sync::ChoiceView,
            crate::dto::sync::ChoiceTally,
            crate::dto::sync::QuestionView,
            crate::dto::sync::SyncSnapshot,
            crate::dto::sse::PhaseEvent,
            crate::dto::sse::AnswerRecordedEvent,
            crate::dto::sse::LeaderboardEvent,
            crate::dto::sse::PlayerRemovedEvent,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "host", description = "Authoring and session control, authenticated by `X-Host-Id`"),
        (name = "players", description = "Join codes, lobby, answers and standings"),
        (name = "sync", description = "Snapshots and server-sent event streams"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_session_routes() {
        let doc = ApiDoc::openapi();
        for path in [
            "/sessions",
            "/sessions/{id}/answers",
            "/sessions/{id}/leaderboard",
            "/sse/sessions/{id}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
