use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{SessionEntity, SessionStatus},
    dto::{format_system_time, phase::PhaseSummary},
};

/// Payload used to open a new session of an authored game.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateSessionRequest {
    pub game_id: Uuid,
    /// Seconds allotted per question. Defaults to the configured timer.
    #[serde(default)]
    #[validate(range(min = 1))]
    pub timer_seconds: Option<u32>,
    /// Whether earlier correct answers earn extra points. Defaults to true.
    #[serde(default)]
    pub speed_bonus: Option<bool>,
}

/// Lifecycle status exposed to clients.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatusDto {
    Lobby,
    Playing,
    Finished,
}

impl From<SessionStatus> for SessionStatusDto {
    fn from(value: SessionStatus) -> Self {
        match value {
            SessionStatus::Lobby => SessionStatusDto::Lobby,
            SessionStatus::Playing => SessionStatusDto::Playing,
            SessionStatus::Finished => SessionStatusDto::Finished,
        }
    }
}

/// Public projection of a session row.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: Uuid,
    pub game_id: Uuid,
    pub code: String,
    pub status: SessionStatusDto,
    /// -1 while in the lobby.
    pub current_question_index: i32,
    pub question_count: usize,
    pub timer_seconds: u32,
    pub speed_bonus: bool,
    pub created_at: String,
    pub ended_at: Option<String>,
}

impl SessionSummary {
    /// Project a session row of a game holding `question_count` questions.
    pub fn from_entity(session: &SessionEntity, question_count: usize) -> Self {
        Self {
            id: session.id,
            game_id: session.game_id,
            code: session.code.clone(),
            status: session.status.into(),
            current_question_index: session.current_question_index,
            question_count,
            timer_seconds: session.timer_seconds,
            speed_bonus: session.speed_bonus,
            created_at: format_system_time(session.created_at),
            ended_at: session.ended_at.map(format_system_time),
        }
    }
}

/// Session resolved from a join code, with what a joining player needs to know.
#[derive(Debug, Serialize, ToSchema)]
pub struct JoinableSession {
    pub session_id: Uuid,
    pub code: String,
    pub title: String,
    pub status: SessionStatusDto,
    /// Joins are only accepted while in the lobby.
    pub accepting_players: bool,
    pub player_count: usize,
}

/// Result of a host transition.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
pub struct TransitionResponse {
    pub session: SessionSummary,
    /// Current question phase; absent in the lobby and once finished.
    pub phase: Option<PhaseSummary>,
}
