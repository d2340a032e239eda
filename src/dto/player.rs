use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{AnswerEntity, PlayerEntity},
    dto::{
        format_system_time,
        validation::{validate_avatar_color, validate_display_name},
    },
    state::roster::Standing,
};

/// Payload sent by a participant joining a session.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinRequest {
    #[validate(custom(function = "validate_display_name"))]
    pub name: String,
    /// Optional `#RRGGBB` color. If omitted, the backend picks the first unused palette color.
    #[serde(default)]
    #[validate(custom(function = "validate_avatar_color"))]
    pub color: Option<String>,
}

/// Public projection of a player. Never carries the player token.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct PlayerSummary {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub score: i64,
    pub joined_at: String,
}

impl From<&PlayerEntity> for PlayerSummary {
    fn from(player: &PlayerEntity) -> Self {
        Self {
            id: player.id,
            name: player.name.clone(),
            color: player.color.clone(),
            score: player.score,
            joined_at: format_system_time(player.joined_at),
        }
    }
}

/// Response to a successful join.
#[derive(Debug, Serialize, ToSchema)]
pub struct JoinResponse {
    pub player: PlayerSummary,
    /// Private credential to present as `x-player-token` when answering.
    pub token: String,
}

/// Answer submission.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AnswerRequest {
    pub player_id: Uuid,
    pub question_id: Uuid,
    pub choice_id: Uuid,
}

/// Stored answer, with correctness withheld until the results are revealed.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct AnswerView {
    pub id: Uuid,
    pub player_id: Uuid,
    pub question_id: Uuid,
    pub choice_id: Uuid,
    pub elapsed_ms: u64,
    pub submitted_at: String,
    pub is_correct: Option<bool>,
    pub points_awarded: Option<i64>,
}

impl AnswerView {
    /// Project an answer, exposing its outcome only when `reveal` is set.
    pub fn from_entity(answer: &AnswerEntity, reveal: bool) -> Self {
        Self {
            id: answer.id,
            player_id: answer.player_id,
            question_id: answer.question_id,
            choice_id: answer.choice_id,
            elapsed_ms: answer.elapsed_ms,
            submitted_at: format_system_time(answer.submitted_at),
            is_correct: reveal.then_some(answer.is_correct),
            points_awarded: reveal.then_some(answer.points_awarded),
        }
    }
}

/// One leaderboard row.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct StandingDto {
    pub rank: u32,
    pub player_id: Uuid,
    pub name: String,
    pub color: String,
    pub score: i64,
}

impl From<Standing> for StandingDto {
    fn from(value: Standing) -> Self {
        Self {
            rank: value.rank,
            player_id: value.player_id,
            name: value.name,
            color: value.color,
            score: value.score,
        }
    }
}
