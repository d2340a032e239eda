use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Sentinel stored in `current_question_index` while a session sits in the lobby.
pub const NO_QUESTION: i32 = -1;

/// Authored question set supplied by the authoring collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameEntity {
    /// Stable identifier for the game.
    pub id: Uuid,
    /// Identifier of the host that owns the game.
    pub host_id: String,
    /// Human readable title.
    pub title: String,
    /// Ordered questions; the position in this list is the question index.
    pub questions: Vec<QuestionEntity>,
    /// Creation timestamp.
    pub created_at: SystemTime,
}

impl GameEntity {
    /// Number of questions a session of this game will ask.
    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    /// Question at `index`, if any.
    pub fn question(&self, index: usize) -> Option<&QuestionEntity> {
        self.questions.get(index)
    }
}

/// Immutable question prompt with its answer choices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    /// Opaque identifier of the question.
    pub id: Uuid,
    /// Prompt text shown to every role.
    pub prompt: String,
    /// Answer choices, exactly one of them marked correct.
    pub choices: Vec<ChoiceEntity>,
}

impl QuestionEntity {
    /// Look up a choice by identifier.
    pub fn choice(&self, id: Uuid) -> Option<&ChoiceEntity> {
        self.choices.iter().find(|choice| choice.id == id)
    }

    /// Identifier of the correct choice.
    pub fn correct_choice_id(&self) -> Option<Uuid> {
        self.choices
            .iter()
            .find(|choice| choice.is_correct)
            .map(|choice| choice.id)
    }
}

/// One answer option of a question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChoiceEntity {
    /// Opaque identifier of the choice.
    pub id: Uuid,
    /// Choice label.
    pub text: String,
    /// Whether picking this choice is correct.
    pub is_correct: bool,
}

/// Lifecycle status of a session. Transitions are monotone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepting joins, no question active.
    Lobby,
    /// Exactly one question is current.
    Playing,
    /// Terminal.
    Finished,
}

impl SessionStatus {
    /// Whether the session still holds its join code.
    pub fn is_active(self) -> bool {
        !matches!(self, SessionStatus::Finished)
    }

    /// Stable storage label.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Lobby => "lobby",
            SessionStatus::Playing => "playing",
            SessionStatus::Finished => "finished",
        }
    }
}

/// One live run of an authored game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Primary key of the session.
    pub id: Uuid,
    /// Host that created and drives the session.
    pub host_id: String,
    /// Authored game played in this session.
    pub game_id: Uuid,
    /// Join code typed by players.
    pub code: String,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Index of the current question, [`NO_QUESTION`] while in the lobby.
    pub current_question_index: i32,
    /// Seconds allotted to each question.
    pub timer_seconds: u32,
    /// Whether correct answers earn a speed bonus.
    pub speed_bonus: bool,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Set once the session is finished.
    pub ended_at: Option<SystemTime>,
    /// Row version used for compare-and-swap updates.
    pub version: u64,
}

impl SessionEntity {
    /// Current question index as `usize`, `None` while in the lobby.
    pub fn current_index(&self) -> Option<usize> {
        usize::try_from(self.current_question_index).ok()
    }

    /// Question timer expressed in milliseconds.
    pub fn timer_ms(&self) -> u64 {
        u64::from(self.timer_seconds) * 1000
    }
}

/// One participant of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Primary key of the player.
    pub id: Uuid,
    /// Session the player joined.
    pub session_id: Uuid,
    /// Display name, unique case-insensitively among non-removed players.
    pub name: String,
    /// Avatar color as `#RRGGBB`.
    pub color: String,
    /// Sum of `points_awarded` over the player's answers.
    pub score: i64,
    /// Set by the host; terminal.
    pub removed: bool,
    /// Join timestamp.
    pub joined_at: SystemTime,
    /// Secret proving ownership of this identity when answering.
    pub token: String,
    /// Row version used for compare-and-swap updates.
    pub version: u64,
}

/// Per-question phase row, one per (session, question index).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionPhaseEntity {
    /// Session the phase belongs to.
    pub session_id: Uuid,
    /// Index of the question within the game.
    pub question_index: u32,
    /// Question asked in this phase.
    pub question_id: Uuid,
    /// Absolute start time; shifted on resume so elapsed time excludes pauses.
    pub started_at: SystemTime,
    /// Absolute scheduled end, cleared while paused.
    pub ends_at: Option<SystemTime>,
    /// Whether the timer is paused.
    pub paused: bool,
    /// Remaining time snapshot, set only while paused.
    pub paused_remaining_ms: Option<u64>,
    /// No further answers accepted. Monotone.
    pub locked: bool,
    /// Correct answer and results visible. Monotone.
    pub show_results: bool,
    /// Leaderboard visible; implies `show_results`.
    pub show_leaderboard: bool,
    /// Row version used for compare-and-swap updates.
    pub version: u64,
}

/// One player's response to one question. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerEntity {
    /// Primary key of the answer.
    pub id: Uuid,
    /// Session the answer belongs to.
    pub session_id: Uuid,
    /// Player who answered.
    pub player_id: Uuid,
    /// Question answered.
    pub question_id: Uuid,
    /// Choice selected.
    pub choice_id: Uuid,
    /// Correctness derived from the choice at submission time.
    pub is_correct: bool,
    /// Milliseconds since the question's recorded start.
    pub elapsed_ms: u64,
    /// Points awarded for this answer.
    pub points_awarded: i64,
    /// Submission timestamp.
    pub submitted_at: SystemTime,
}
