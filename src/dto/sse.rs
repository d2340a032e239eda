use serde::Serialize;
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::{
    phase::PhaseSummary,
    player::{AnswerView, StandingDto},
    sync::QuestionView,
};

/// Event names emitted on the session stream.
pub mod names {
    pub const SNAPSHOT: &str = "sync.snapshot";
    pub const SESSION_UPDATED: &str = "session.updated";
    pub const PLAYER_JOINED: &str = "player.joined";
    pub const PLAYER_UPDATED: &str = "player.updated";
    pub const PLAYER_REMOVED: &str = "player.removed";
    pub const PHASE_ACTIVATED: &str = "phase.activated";
    pub const PHASE_UPDATED: &str = "phase.updated";
    pub const ANSWER_RECORDED: &str = "answer.recorded";
    pub const LEADERBOARD: &str = "leaderboard";
}

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Emitted when a question is activated or its phase flags change.
pub struct PhaseEvent {
    pub phase: PhaseSummary,
    pub question: Option<QuestionView>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
/// Emitted when an answer to the current question is stored.
pub struct AnswerRecordedEvent {
    pub question_id: Uuid,
    pub answered_count: usize,
    /// Present for the host and for the answering player only.
    pub answer: Option<AnswerView>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Emitted when the leaderboard is revealed.
pub struct LeaderboardEvent {
    pub standings: Vec<StandingDto>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Emitted when the host removes a player. Terminal for that player's own stream.
pub struct PlayerRemovedEvent {
    pub player_id: Uuid,
}
