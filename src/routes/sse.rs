use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use uuid::Uuid;

use crate::{
    dto::sync::SyncQuery,
    error::AppError,
    routes::{HOST_ID_HEADER, header_value},
    services::sse_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sse/sessions/{id}",
    tag = "sync",
    params(("id" = Uuid, Path, description = "Identifier of the session"), SyncQuery),
    responses(
        (status = 200, description = "Role-filtered session event stream", content_type = "text/event-stream", body = String),
        (status = 401, description = "Caller may not take the requested role")
    )
)]
/// Stream the events of one session, filtered for the caller's role.
pub async fn session_stream(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Query(query): Query<SyncQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let host_id = header_value(&headers, HOST_ID_HEADER);
    Ok(sse_service::session_stream(&state, id, query, host_id.as_deref()).await?)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/sessions/{id}", get(session_stream))
}
