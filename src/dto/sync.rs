use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    dao::models::{AnswerEntity, QuestionEntity, QuestionPhaseEntity, SessionStatus},
    dto::{
        phase::{HostAction, PhaseSummary},
        player::{AnswerView, PlayerSummary, StandingDto},
        session::SessionSummary,
    },
    state::{
        phase::epoch_millis,
        roster::leaderboard,
        views::{Role, SessionSnapshot, SessionSubscriber},
    },
};

/// Connection role requested by a client.
#[derive(Debug, Deserialize, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoleParam {
    Host,
    Display,
    Player,
}

impl From<Role> for RoleParam {
    fn from(value: Role) -> Self {
        match value {
            Role::Host => RoleParam::Host,
            Role::Display => RoleParam::Display,
            Role::Player(_) => RoleParam::Player,
        }
    }
}

/// Query accepted by the snapshot and SSE endpoints.
#[derive(Debug, Deserialize, IntoParams)]
pub struct SyncQuery {
    /// `host`, `display` or `player`.
    pub role: RoleParam,
    /// Required for the player role.
    pub player_id: Option<Uuid>,
    /// Player token, required for the player role.
    pub token: Option<String>,
}

/// A choice as shown while the question is open.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct ChoiceView {
    pub id: Uuid,
    pub text: String,
}

/// Number of answers that picked one choice.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct ChoiceTally {
    pub choice_id: Uuid,
    pub count: usize,
}

/// The current question. The correct choice and tallies appear once results are shown.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct QuestionView {
    pub id: Uuid,
    pub index: u32,
    pub prompt: String,
    pub choices: Vec<ChoiceView>,
    pub correct_choice_id: Option<Uuid>,
    pub tallies: Option<Vec<ChoiceTally>>,
}

impl QuestionView {
    /// Project `question` under the visibility flags of `phase`.
    pub fn build(
        question: &QuestionEntity,
        phase: &QuestionPhaseEntity,
        answers: &[AnswerEntity],
    ) -> Self {
        let reveal = phase.show_results;
        let tallies = reveal.then(|| {
            question
                .choices
                .iter()
                .map(|choice| ChoiceTally {
                    choice_id: choice.id,
                    count: answers
                        .iter()
                        .filter(|answer| answer.choice_id == choice.id)
                        .count(),
                })
                .collect()
        });

        Self {
            id: question.id,
            index: phase.question_index,
            prompt: question.prompt.clone(),
            choices: question
                .choices
                .iter()
                .map(|choice| ChoiceView {
                    id: choice.id,
                    text: choice.text.clone(),
                })
                .collect(),
            correct_choice_id: reveal.then(|| question.correct_choice_id()).flatten(),
            tallies,
        }
    }
}

/// Full resync payload. Sent as the first SSE event and served by the snapshot endpoint.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
pub struct SyncSnapshot {
    pub role: RoleParam,
    /// Server clock at build time, so clients can estimate their skew.
    pub server_time_ms: u64,
    pub session: SessionSummary,
    /// Non-removed players in join order.
    pub players: Vec<PlayerSummary>,
    pub phase: Option<PhaseSummary>,
    pub question: Option<QuestionView>,
    pub answered_count: usize,
    /// Host only: every answer to the current question.
    pub answers: Option<Vec<AnswerView>>,
    /// Player only: the connected player's row.
    pub me: Option<PlayerSummary>,
    /// Player only: true once the host removed the player.
    pub removed: Option<bool>,
    /// Player only: the player's answer to the current question.
    pub own_answer: Option<AnswerView>,
    /// Present once the leaderboard is revealed or the session is over.
    pub leaderboard: Option<Vec<StandingDto>>,
    /// Host only: transitions legal right now.
    pub available_actions: Option<Vec<HostAction>>,
}

impl SyncSnapshot {
    /// Build the payload for `subscriber`, which must already be resynced on `snapshot`.
    pub fn build(
        snapshot: &SessionSnapshot,
        subscriber: &dyn SessionSubscriber,
        now: SystemTime,
    ) -> Self {
        let role = subscriber.role();
        let phase = snapshot.phase.as_ref();
        let reveal = phase.is_some_and(|phase| phase.show_results);

        let show_leaderboard = phase.is_some_and(|phase| phase.show_leaderboard)
            || snapshot.session.status == SessionStatus::Finished;

        let (answers, me, removed, own_answer) = match role {
            Role::Host => (
                Some(
                    snapshot
                        .answers
                        .iter()
                        .map(|answer| AnswerView::from_entity(answer, true))
                        .collect(),
                ),
                None,
                None,
                None,
            ),
            Role::Display => (None, None, None, None),
            Role::Player(player_id) => {
                let row = snapshot.players.iter().find(|player| player.id == player_id);
                (
                    None,
                    row.filter(|player| !player.removed).map(PlayerSummary::from),
                    Some(row.is_none_or(|player| player.removed)),
                    snapshot
                        .answers
                        .iter()
                        .find(|answer| answer.player_id == player_id)
                        .map(|answer| AnswerView::from_entity(answer, reveal)),
                )
            }
        };

        Self {
            role: role.into(),
            server_time_ms: epoch_millis(now),
            session: SessionSummary::from_entity(&snapshot.session, snapshot.question_count),
            players: subscriber.view().roster().map(PlayerSummary::from).collect(),
            phase: phase.map(|phase| PhaseSummary::from_entity(phase, now)),
            question: snapshot
                .question
                .as_ref()
                .zip(phase)
                .map(|(question, phase)| QuestionView::build(question, phase, &snapshot.answers)),
            answered_count: subscriber.view().answered_count(),
            answers,
            me,
            removed,
            own_answer,
            leaderboard: show_leaderboard.then(|| {
                leaderboard(snapshot.players.iter().cloned())
                    .into_iter()
                    .map(StandingDto::from)
                    .collect()
            }),
            available_actions: subscriber.as_host().map(|host| {
                host.available_actions()
                    .into_iter()
                    .map(HostAction::from)
                    .collect()
            }),
        }
    }
}
