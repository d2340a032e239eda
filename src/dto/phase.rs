use serde::Serialize;
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::QuestionPhaseEntity,
    state::{
        phase::epoch_millis,
        state_machine::{QuestionPhase, SessionEvent, SessionPhase, question_phase_of},
    },
};
use std::time::SystemTime;

/// Session phase exposed to clients (REST/SSE).
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleSessionPhase {
    /// Players are joining.
    Lobby,
    /// A question is accepting answers.
    Active,
    /// The question timer is frozen.
    Paused,
    /// The question is locked and the correct choice revealed.
    Results,
    /// The leaderboard is shown after the results.
    Leaderboard,
    /// The session is over.
    Finished,
}

impl From<QuestionPhase> for VisibleSessionPhase {
    fn from(value: QuestionPhase) -> Self {
        match value {
            QuestionPhase::Active => VisibleSessionPhase::Active,
            QuestionPhase::Paused => VisibleSessionPhase::Paused,
            QuestionPhase::ResultsShown => VisibleSessionPhase::Results,
            QuestionPhase::LeaderboardShown => VisibleSessionPhase::Leaderboard,
        }
    }
}

impl From<SessionPhase> for VisibleSessionPhase {
    fn from(value: SessionPhase) -> Self {
        match value {
            SessionPhase::Lobby => VisibleSessionPhase::Lobby,
            SessionPhase::Playing { question, .. } => question.into(),
            SessionPhase::Finished => VisibleSessionPhase::Finished,
        }
    }
}

/// Host transition exposed to control surfaces.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HostAction {
    Start,
    Pause,
    Resume,
    Lock,
    Leaderboard,
    Advance,
    End,
}

impl From<SessionEvent> for HostAction {
    fn from(value: SessionEvent) -> Self {
        match value {
            SessionEvent::Start => HostAction::Start,
            SessionEvent::Pause => HostAction::Pause,
            SessionEvent::Resume => HostAction::Resume,
            SessionEvent::LockAndReveal(_) => HostAction::Lock,
            SessionEvent::RevealLeaderboard => HostAction::Leaderboard,
            SessionEvent::Advance => HostAction::Advance,
            SessionEvent::EndNow => HostAction::End,
        }
    }
}

/// Timing and visibility flags of the current question.
///
/// Timestamps are epoch milliseconds; `remaining_ms` is computed by the server at send
/// time, and clients should keep recomputing it from `ends_at_ms` rather than counting down.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct PhaseSummary {
    pub question_index: u32,
    pub question_id: Uuid,
    pub phase: VisibleSessionPhase,
    pub started_at_ms: u64,
    /// Absent while paused.
    pub ends_at_ms: Option<u64>,
    pub paused: bool,
    /// Present only while paused.
    pub paused_remaining_ms: Option<u64>,
    pub remaining_ms: u64,
    pub locked: bool,
    pub show_results: bool,
    pub show_leaderboard: bool,
}

impl PhaseSummary {
    /// Project a phase row, computing the remaining time at `now`.
    pub fn from_entity(row: &QuestionPhaseEntity, now: SystemTime) -> Self {
        Self {
            question_index: row.question_index,
            question_id: row.question_id,
            phase: question_phase_of(row).into(),
            started_at_ms: epoch_millis(row.started_at),
            ends_at_ms: row.ends_at.map(epoch_millis),
            paused: row.paused,
            paused_remaining_ms: row.paused_remaining_ms,
            remaining_ms: row.remaining_ms(now),
            locked: row.locked,
            show_results: row.show_results,
            show_leaderboard: row.show_leaderboard,
        }
    }
}
