use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::dao::models::{
    AnswerEntity, ChoiceEntity, GameEntity, PlayerEntity, QuestionEntity, QuestionPhaseEntity,
    SessionEntity, SessionStatus,
};

pub const GAMES: &str = "games";
pub const SESSIONS: &str = "sessions";
pub const PLAYERS: &str = "players";
pub const PHASES: &str = "question_phases";
pub const ANSWERS: &str = "answers";

pub fn doc_id(id: impl ToString) -> Document {
    doc! {"_id": id.to_string()}
}

/// Phase rows are keyed by (session, index) so a second activation collides on `_id`.
pub fn phase_key(session_id: Uuid, question_index: u32) -> String {
    format!("{session_id}:{question_index:05}")
}

fn parse_id(collection: &'static str, raw: &str) -> MongoResult<Uuid> {
    Uuid::parse_str(raw).map_err(|source| MongoDaoError::CorruptDocument { collection, source })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGameDocument {
    #[serde(rename = "_id")]
    id: String,
    host_id: String,
    title: String,
    questions: Vec<MongoQuestion>,
    created_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoQuestion {
    id: String,
    prompt: String,
    choices: Vec<MongoChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoChoice {
    id: String,
    text: String,
    is_correct: bool,
}

impl From<GameEntity> for MongoGameDocument {
    fn from(value: GameEntity) -> Self {
        Self {
            id: value.id.to_string(),
            host_id: value.host_id,
            title: value.title,
            questions: value
                .questions
                .into_iter()
                .map(|question| MongoQuestion {
                    id: question.id.to_string(),
                    prompt: question.prompt,
                    choices: question
                        .choices
                        .into_iter()
                        .map(|choice| MongoChoice {
                            id: choice.id.to_string(),
                            text: choice.text,
                            is_correct: choice.is_correct,
                        })
                        .collect(),
                })
                .collect(),
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoGameDocument> for GameEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoGameDocument) -> MongoResult<Self> {
        let questions = value
            .questions
            .into_iter()
            .map(|question| {
                let choices = question
                    .choices
                    .into_iter()
                    .map(|choice| {
                        Ok(ChoiceEntity {
                            id: parse_id(GAMES, &choice.id)?,
                            text: choice.text,
                            is_correct: choice.is_correct,
                        })
                    })
                    .collect::<MongoResult<Vec<_>>>()?;
                Ok(QuestionEntity {
                    id: parse_id(GAMES, &question.id)?,
                    prompt: question.prompt,
                    choices,
                })
            })
            .collect::<MongoResult<Vec<_>>>()?;

        Ok(Self {
            id: parse_id(GAMES, &value.id)?,
            host_id: value.host_id,
            title: value.title,
            questions,
            created_at: value.created_at.to_system_time(),
        })
    }
}

/// Session row. `active_code` mirrors `code` while the session is not finished and is
/// the only field covered by the partial unique index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    session_id: String,
    host_id: String,
    game_id: String,
    code: String,
    active_code: Option<String>,
    status: SessionStatus,
    current_question_index: i32,
    timer_seconds: i64,
    speed_bonus: bool,
    created_at: DateTime,
    ended_at: Option<DateTime>,
    version: i64,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            session_id: value.id.to_string(),
            host_id: value.host_id,
            game_id: value.game_id.to_string(),
            active_code: value.status.is_active().then(|| value.code.clone()),
            code: value.code,
            status: value.status,
            current_question_index: value.current_question_index,
            timer_seconds: i64::from(value.timer_seconds),
            speed_bonus: value.speed_bonus,
            created_at: DateTime::from_system_time(value.created_at),
            ended_at: value.ended_at.map(DateTime::from_system_time),
            version: value.version as i64,
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(SESSIONS, &value.id)?,
            host_id: value.host_id,
            game_id: parse_id(SESSIONS, &value.game_id)?,
            code: value.code,
            status: value.status,
            current_question_index: value.current_question_index,
            timer_seconds: value.timer_seconds.clamp(0, i64::from(u32::MAX)) as u32,
            speed_bonus: value.speed_bonus,
            created_at: value.created_at.to_system_time(),
            ended_at: value.ended_at.map(DateTime::to_system_time),
            version: value.version.max(0) as u64,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPlayerDocument {
    #[serde(rename = "_id")]
    id: String,
    session_id: String,
    name: String,
    color: String,
    score: i64,
    removed: bool,
    joined_at: DateTime,
    token: String,
    version: i64,
}

impl From<PlayerEntity> for MongoPlayerDocument {
    fn from(value: PlayerEntity) -> Self {
        Self {
            id: value.id.to_string(),
            session_id: value.session_id.to_string(),
            name: value.name,
            color: value.color,
            score: value.score,
            removed: value.removed,
            joined_at: DateTime::from_system_time(value.joined_at),
            token: value.token,
            version: value.version as i64,
        }
    }
}

impl TryFrom<MongoPlayerDocument> for PlayerEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoPlayerDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(PLAYERS, &value.id)?,
            session_id: parse_id(PLAYERS, &value.session_id)?,
            name: value.name,
            color: value.color,
            score: value.score,
            removed: value.removed,
            joined_at: value.joined_at.to_system_time(),
            token: value.token,
            version: value.version.max(0) as u64,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPhaseDocument {
    #[serde(rename = "_id")]
    id: String,
    session_id: String,
    question_index: i64,
    question_id: String,
    started_at: DateTime,
    ends_at: Option<DateTime>,
    paused: bool,
    paused_remaining_ms: Option<i64>,
    locked: bool,
    show_results: bool,
    show_leaderboard: bool,
    version: i64,
}

impl From<QuestionPhaseEntity> for MongoPhaseDocument {
    fn from(value: QuestionPhaseEntity) -> Self {
        Self {
            id: phase_key(value.session_id, value.question_index),
            session_id: value.session_id.to_string(),
            question_index: i64::from(value.question_index),
            question_id: value.question_id.to_string(),
            started_at: DateTime::from_system_time(value.started_at),
            ends_at: value.ends_at.map(DateTime::from_system_time),
            paused: value.paused,
            paused_remaining_ms: value.paused_remaining_ms.map(|ms| ms as i64),
            locked: value.locked,
            show_results: value.show_results,
            show_leaderboard: value.show_leaderboard,
            version: value.version as i64,
        }
    }
}

impl TryFrom<MongoPhaseDocument> for QuestionPhaseEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoPhaseDocument) -> MongoResult<Self> {
        Ok(Self {
            session_id: parse_id(PHASES, &value.session_id)?,
            question_index: value.question_index.clamp(0, i64::from(u32::MAX)) as u32,
            question_id: parse_id(PHASES, &value.question_id)?,
            started_at: value.started_at.to_system_time(),
            ends_at: value.ends_at.map(DateTime::to_system_time),
            paused: value.paused,
            paused_remaining_ms: value.paused_remaining_ms.map(|ms| ms.max(0) as u64),
            locked: value.locked,
            show_results: value.show_results,
            show_leaderboard: value.show_leaderboard,
            version: value.version.max(0) as u64,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAnswerDocument {
    #[serde(rename = "_id")]
    id: String,
    session_id: String,
    player_id: String,
    question_id: String,
    choice_id: String,
    is_correct: bool,
    elapsed_ms: i64,
    points_awarded: i64,
    submitted_at: DateTime,
}

impl From<AnswerEntity> for MongoAnswerDocument {
    fn from(value: AnswerEntity) -> Self {
        Self {
            id: value.id.to_string(),
            session_id: value.session_id.to_string(),
            player_id: value.player_id.to_string(),
            question_id: value.question_id.to_string(),
            choice_id: value.choice_id.to_string(),
            is_correct: value.is_correct,
            elapsed_ms: value.elapsed_ms as i64,
            points_awarded: value.points_awarded,
            submitted_at: DateTime::from_system_time(value.submitted_at),
        }
    }
}

impl TryFrom<MongoAnswerDocument> for AnswerEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoAnswerDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(ANSWERS, &value.id)?,
            session_id: parse_id(ANSWERS, &value.session_id)?,
            player_id: parse_id(ANSWERS, &value.player_id)?,
            question_id: parse_id(ANSWERS, &value.question_id)?,
            choice_id: parse_id(ANSWERS, &value.choice_id)?,
            is_correct: value.is_correct,
            elapsed_ms: value.elapsed_ms.max(0) as u64,
            points_awarded: value.points_awarded,
            submitted_at: value.submitted_at.to_system_time(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use super::*;

    #[test]
    fn finished_session_releases_active_code() {
        let session = SessionEntity {
            id: Uuid::new_v4(),
            host_id: "host".into(),
            game_id: Uuid::new_v4(),
            code: "ABCDEF".into(),
            status: SessionStatus::Finished,
            current_question_index: 2,
            timer_seconds: 20,
            speed_bonus: true,
            created_at: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            ended_at: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_100)),
            version: 4,
        };
        let document = MongoSessionDocument::from(session.clone());
        assert_eq!(document.active_code, None);
        assert_eq!(document.session_id, document.id);

        let restored = SessionEntity::try_from(document).expect("valid document");
        assert_eq!(restored, session);
    }

    #[test]
    fn phase_key_orders_by_index() {
        let session_id = Uuid::nil();
        assert!(phase_key(session_id, 2) < phase_key(session_id, 10));
    }
}
