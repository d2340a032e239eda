use axum::{Router, http::HeaderMap};

use crate::state::SharedState;

pub mod docs;
pub mod health;
pub mod host;
pub mod player;
pub mod sse;

/// Header carrying the host identity supplied by the identity collaborator.
pub const HOST_ID_HEADER: &str = "x-host-id";
/// Header carrying the private token issued to a player on join.
pub const PLAYER_TOKEN_HEADER: &str = "x-player-token";

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(sse::router())
        .merge(player::router())
        .merge(host::router())
        .merge(docs::router());

    api_router.with_state(state)
}

/// Trimmed, non-empty value of header `name`.
fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}
