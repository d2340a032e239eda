//! Role-specific reconstruction of session state from the change feed.
//!
//! Host, display and player connections each hold one subscriber. A subscriber starts
//! from a full [`SessionSnapshot`] and folds every subsequent [`ChangeEvent`] into its
//! view, tolerating out-of-order or duplicated rows by comparing row versions.

use std::{collections::HashSet, time::SystemTime};

use indexmap::IndexMap;
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            AnswerEntity, PlayerEntity, QuestionEntity, QuestionPhaseEntity, SessionEntity,
            SessionStatus,
        },
        session_store::{ChangeEvent, ChangeRow},
    },
    state::{
        roster::{Standing, leaderboard},
        state_machine::{SessionEvent, SessionStateMachine},
    },
};

/// Full resync payload read directly from the store.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Session row.
    pub session: SessionEntity,
    /// Players of the session in join order, removed ones included.
    pub players: Vec<PlayerEntity>,
    /// Phase row of the current question, if one is active.
    pub phase: Option<QuestionPhaseEntity>,
    /// Current question content.
    pub question: Option<QuestionEntity>,
    /// Answers already recorded for the current question.
    pub answers: Vec<AnswerEntity>,
    /// Number of questions in the game.
    pub question_count: usize,
}

/// Connection role on the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The session owner; may issue phase transitions.
    Host,
    /// Shared big screen; read-only.
    Display,
    /// A single participant.
    Player(Uuid),
}

/// How much of a change a subscriber should pass on to its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Forward the row as is.
    Full,
    /// Forward only the fact that an answer arrived, with the running count.
    CountOnly,
    /// Do not forward.
    Skip,
}

/// Result of folding one change into a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewUpdate {
    /// Delivery decision for the client.
    pub delivery: Delivery,
    /// True once the subscriber reached a terminal view and should disconnect.
    pub terminal: bool,
}

impl ViewUpdate {
    const SKIP: ViewUpdate = ViewUpdate {
        delivery: Delivery::Skip,
        terminal: false,
    };

    fn deliver(delivery: Delivery) -> Self {
        Self {
            delivery,
            terminal: false,
        }
    }
}

/// Shared capability of every role: receive change events and reconstruct a view.
pub trait SessionSubscriber: Send + Sync {
    /// Role of this subscriber.
    fn role(&self) -> Role;
    /// Replace the view with a freshly read snapshot.
    fn resync(&mut self, snapshot: SessionSnapshot);
    /// Fold one change event into the view.
    fn apply(&mut self, change: &ChangeEvent) -> ViewUpdate;
    /// Reconstructed view.
    fn view(&self) -> &SessionView;
    /// Host-only transition capability; `None` for every other role.
    fn as_host(&self) -> Option<&HostView> {
        None
    }
}

/// State every role reconstructs from the feed.
#[derive(Debug, Clone, Default)]
pub struct SessionView {
    session: Option<SessionEntity>,
    roster: IndexMap<Uuid, PlayerEntity>,
    phase: Option<QuestionPhaseEntity>,
    answered: HashSet<Uuid>,
    question_count: usize,
}

impl SessionView {
    fn reset(&mut self, snapshot: &SessionSnapshot) {
        self.session = Some(snapshot.session.clone());
        self.roster = snapshot
            .players
            .iter()
            .filter(|player| !player.removed)
            .map(|player| (player.id, player.clone()))
            .collect();
        self.phase = snapshot.phase.clone();
        self.answered = snapshot
            .answers
            .iter()
            .map(|answer| answer.player_id)
            .collect();
        self.question_count = snapshot.question_count;
    }

    /// Session row, once synced.
    pub fn session(&self) -> Option<&SessionEntity> {
        self.session.as_ref()
    }

    /// Current session status, once synced.
    pub fn status(&self) -> Option<SessionStatus> {
        self.session.as_ref().map(|session| session.status)
    }

    /// Non-removed players in join order.
    pub fn roster(&self) -> impl Iterator<Item = &PlayerEntity> {
        self.roster.values()
    }

    /// Phase row of the current question.
    pub fn phase(&self) -> Option<&QuestionPhaseEntity> {
        self.phase.as_ref()
    }

    /// Players that answered the current question.
    pub fn answered_count(&self) -> usize {
        self.answered.len()
    }

    /// Remaining answer time recomputed from the stored timestamps.
    pub fn remaining_ms(&self, now: SystemTime) -> u64 {
        self.phase
            .as_ref()
            .map(|phase| phase.remaining_ms(now))
            .unwrap_or_default()
    }

    /// Leaderboard derived from the roster scores.
    pub fn leaderboard(&self) -> Vec<Standing> {
        leaderboard(self.roster.values().cloned())
    }

    fn apply_session(&mut self, row: &SessionEntity) -> bool {
        match &self.session {
            Some(current) if current.version > row.version => false,
            _ => {
                self.session = Some(row.clone());
                true
            }
        }
    }

    fn apply_player(&mut self, row: &PlayerEntity) -> bool {
        if row.removed {
            return self.roster.shift_remove(&row.id).is_some();
        }
        match self.roster.get(&row.id) {
            Some(current) if current.version > row.version => false,
            _ => {
                self.roster.insert(row.id, row.clone());
                true
            }
        }
    }

    fn apply_phase(&mut self, row: &QuestionPhaseEntity) -> bool {
        let replace = match &self.phase {
            None => true,
            Some(current) if row.question_index > current.question_index => {
                self.answered.clear();
                true
            }
            Some(current) => {
                row.question_index == current.question_index && row.version > current.version
            }
        };
        if replace {
            self.phase = Some(row.clone());
        }
        replace
    }

    fn apply_answer(&mut self, row: &AnswerEntity) -> bool {
        let current = self
            .phase
            .as_ref()
            .is_some_and(|phase| phase.question_id == row.question_id);
        current && self.answered.insert(row.player_id)
    }

    /// Fold a change into the shared view, returning whether anything changed.
    fn fold(&mut self, change: &ChangeEvent) -> bool {
        match &change.row {
            ChangeRow::Session(row) => self.apply_session(row),
            ChangeRow::Player(row) => self.apply_player(row),
            ChangeRow::Phase(row) => self.apply_phase(row),
            ChangeRow::Answer(row) => self.apply_answer(row),
        }
    }
}

/// View of the session owner.
#[derive(Debug, Clone, Default)]
pub struct HostView {
    view: SessionView,
}

impl HostView {
    /// Create an unsynced host view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transitions the host may issue right now, derived from the synced rows.
    pub fn available_actions(&self) -> Vec<SessionEvent> {
        let Some(session) = self.view.session.as_ref() else {
            return Vec::new();
        };
        SessionStateMachine::from_rows(session, self.view.phase.as_ref(), self.view.question_count)
            .map(|machine| machine.available_events())
            .unwrap_or_default()
    }
}

impl SessionSubscriber for HostView {
    fn role(&self) -> Role {
        Role::Host
    }

    fn resync(&mut self, snapshot: SessionSnapshot) {
        self.view.reset(&snapshot);
    }

    fn apply(&mut self, change: &ChangeEvent) -> ViewUpdate {
        self.view.fold(change);
        ViewUpdate::deliver(Delivery::Full)
    }

    fn view(&self) -> &SessionView {
        &self.view
    }

    fn as_host(&self) -> Option<&HostView> {
        Some(self)
    }
}

/// View of the shared big screen.
#[derive(Debug, Clone, Default)]
pub struct DisplayView {
    view: SessionView,
}

impl DisplayView {
    /// Create an unsynced display view.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionSubscriber for DisplayView {
    fn role(&self) -> Role {
        Role::Display
    }

    fn resync(&mut self, snapshot: SessionSnapshot) {
        self.view.reset(&snapshot);
    }

    fn apply(&mut self, change: &ChangeEvent) -> ViewUpdate {
        let changed = self.view.fold(change);
        match &change.row {
            ChangeRow::Answer(_) if changed => ViewUpdate::deliver(Delivery::CountOnly),
            ChangeRow::Answer(_) => ViewUpdate::SKIP,
            _ => ViewUpdate::deliver(Delivery::Full),
        }
    }

    fn view(&self) -> &SessionView {
        &self.view
    }
}

/// Whether a player is still participating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    /// Participating.
    Active,
    /// Removed by the host; terminal.
    Removed,
}

/// View of one participant.
#[derive(Debug, Clone)]
pub struct PlayerView {
    player_id: Uuid,
    status: PlayerStatus,
    own_answer: Option<AnswerEntity>,
    view: SessionView,
}

impl PlayerView {
    /// Create an unsynced view for `player_id`.
    pub fn new(player_id: Uuid) -> Self {
        Self {
            player_id,
            status: PlayerStatus::Active,
            own_answer: None,
            view: SessionView::default(),
        }
    }

    /// Whether the player is still participating.
    pub fn status(&self) -> PlayerStatus {
        self.status
    }

    /// The player's answer to the current question, if any.
    pub fn own_answer(&self) -> Option<&AnswerEntity> {
        self.own_answer.as_ref()
    }

    /// The player's own row.
    pub fn me(&self) -> Option<&PlayerEntity> {
        self.view.roster.get(&self.player_id)
    }
}

impl SessionSubscriber for PlayerView {
    fn role(&self) -> Role {
        Role::Player(self.player_id)
    }

    fn resync(&mut self, snapshot: SessionSnapshot) {
        let removed = snapshot
            .players
            .iter()
            .any(|player| player.id == self.player_id && player.removed);
        self.status = if removed {
            PlayerStatus::Removed
        } else {
            PlayerStatus::Active
        };
        self.own_answer = snapshot
            .answers
            .iter()
            .find(|answer| answer.player_id == self.player_id)
            .cloned();
        self.view.reset(&snapshot);
    }

    fn apply(&mut self, change: &ChangeEvent) -> ViewUpdate {
        if self.status == PlayerStatus::Removed {
            return ViewUpdate {
                delivery: Delivery::Skip,
                terminal: true,
            };
        }

        let previous_index = self.view.phase.as_ref().map(|p| p.question_index);
        let changed = self.view.fold(change);

        match &change.row {
            ChangeRow::Player(row) if row.id == self.player_id && row.removed => {
                self.status = PlayerStatus::Removed;
                ViewUpdate {
                    delivery: Delivery::Full,
                    terminal: true,
                }
            }
            ChangeRow::Phase(row) => {
                if changed && previous_index != Some(row.question_index) {
                    self.own_answer = None;
                }
                ViewUpdate::deliver(Delivery::Full)
            }
            ChangeRow::Answer(row) if row.player_id == self.player_id => {
                if changed {
                    self.own_answer = Some(row.clone());
                }
                ViewUpdate::deliver(Delivery::Full)
            }
            ChangeRow::Answer(_) if changed => ViewUpdate::deliver(Delivery::CountOnly),
            ChangeRow::Answer(_) => ViewUpdate::SKIP,
            _ => ViewUpdate::deliver(Delivery::Full),
        }
    }

    fn view(&self) -> &SessionView {
        &self.view
    }
}

/// Build the subscriber matching `role`.
pub fn subscriber_for(role: Role) -> Box<dyn SessionSubscriber> {
    match role {
        Role::Host => Box::new(HostView::new()),
        Role::Display => Box::new(DisplayView::new()),
        Role::Player(player_id) => Box::new(PlayerView::new(player_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{ChoiceEntity, NO_QUESTION};
    use crate::state::state_machine::LockReason;
    use std::time::{Duration, UNIX_EPOCH};

    fn t(ms: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000) + Duration::from_millis(ms)
    }

    fn session(status: SessionStatus, index: i32, version: u64) -> SessionEntity {
        SessionEntity {
            id: Uuid::nil(),
            host_id: "host".into(),
            game_id: Uuid::nil(),
            code: "AB23CD".into(),
            status,
            current_question_index: index,
            timer_seconds: 30,
            speed_bonus: true,
            created_at: t(0),
            ended_at: None,
            version,
        }
    }

    fn player(name: &str) -> PlayerEntity {
        PlayerEntity {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            name: name.into(),
            color: "#ff0000".into(),
            score: 0,
            removed: false,
            joined_at: t(0),
            token: "secret".into(),
            version: 1,
        }
    }

    fn question() -> QuestionEntity {
        QuestionEntity {
            id: Uuid::new_v4(),
            prompt: "2 + 2?".into(),
            choices: vec![
                ChoiceEntity {
                    id: Uuid::new_v4(),
                    text: "4".into(),
                    is_correct: true,
                },
                ChoiceEntity {
                    id: Uuid::new_v4(),
                    text: "5".into(),
                    is_correct: false,
                },
            ],
        }
    }

    fn answer(player_id: Uuid, question_id: Uuid) -> AnswerEntity {
        AnswerEntity {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            player_id,
            question_id,
            choice_id: Uuid::new_v4(),
            is_correct: true,
            elapsed_ms: 100,
            points_awarded: 1498,
            submitted_at: t(100),
        }
    }

    fn playing_snapshot(players: Vec<PlayerEntity>, q: &QuestionEntity) -> SessionSnapshot {
        SessionSnapshot {
            session: session(SessionStatus::Playing, 0, 2),
            players,
            phase: Some(QuestionPhaseEntity::activate(Uuid::nil(), 0, q.id, 30_000, t(0))),
            question: Some(q.clone()),
            answers: Vec::new(),
            question_count: 2,
        }
    }

    fn change(row: ChangeRow) -> ChangeEvent {
        ChangeEvent::update(Uuid::nil(), row)
    }

    #[test]
    fn removed_player_reaches_terminal_view() {
        let me = player("me");
        let other = player("other");
        let q = question();
        let mut view = PlayerView::new(me.id);
        view.resync(playing_snapshot(vec![me.clone(), other.clone()], &q));

        let other_removed = PlayerEntity {
            removed: true,
            version: 2,
            ..other
        };
        let update = view.apply(&change(ChangeRow::Player(other_removed)));
        assert!(!update.terminal);
        assert_eq!(view.view().roster().count(), 1);

        let me_removed = PlayerEntity {
            removed: true,
            version: 2,
            ..me
        };
        let update = view.apply(&change(ChangeRow::Player(me_removed)));
        assert!(update.terminal);
        assert_eq!(view.status(), PlayerStatus::Removed);

        let after = view.apply(&change(ChangeRow::Session(session(
            SessionStatus::Finished,
            0,
            3,
        ))));
        assert!(after.terminal);
        assert_eq!(after.delivery, Delivery::Skip);
    }

    #[test]
    fn resync_of_removed_player_is_terminal() {
        let me = PlayerEntity {
            removed: true,
            ..player("me")
        };
        let q = question();
        let mut view = PlayerView::new(me.id);
        view.resync(playing_snapshot(vec![me], &q));
        assert_eq!(view.status(), PlayerStatus::Removed);
        assert!(view.me().is_none());
    }

    #[test]
    fn stale_rows_do_not_regress_the_view() {
        let q = question();
        let mut view = DisplayView::new();
        view.resync(playing_snapshot(vec![], &q));

        let phase = view.view().phase().cloned().unwrap();
        let locked = phase.locked_and_revealed();
        view.apply(&change(ChangeRow::Phase(locked.clone())));
        view.apply(&change(ChangeRow::Phase(phase.paused_at(t(1_000)))));
        assert_eq!(view.view().phase(), Some(&locked));

        view.apply(&change(ChangeRow::Session(session(SessionStatus::Playing, 0, 1))));
        assert_eq!(view.view().session().map(|s| s.version), Some(2));
    }

    #[test]
    fn display_counts_answers_without_detail() {
        let q = question();
        let alice = player("alice");
        let mut view = DisplayView::new();
        view.resync(playing_snapshot(vec![alice.clone()], &q));

        let first = view.apply(&change(ChangeRow::Answer(answer(alice.id, q.id))));
        assert_eq!(first.delivery, Delivery::CountOnly);
        let duplicate = view.apply(&change(ChangeRow::Answer(answer(alice.id, q.id))));
        assert_eq!(duplicate.delivery, Delivery::Skip);
        assert_eq!(view.view().answered_count(), 1);
    }

    #[test]
    fn player_sees_own_answer_and_resets_on_next_question() {
        let q = question();
        let me = player("me");
        let mut view = PlayerView::new(me.id);
        view.resync(playing_snapshot(vec![me.clone()], &q));

        let mine = answer(me.id, q.id);
        let update = view.apply(&change(ChangeRow::Answer(mine.clone())));
        assert_eq!(update.delivery, Delivery::Full);
        assert_eq!(view.own_answer(), Some(&mine));

        let next = QuestionPhaseEntity::activate(Uuid::nil(), 1, Uuid::new_v4(), 30_000, t(40_000));
        view.apply(&ChangeEvent::insert(Uuid::nil(), ChangeRow::Phase(next)));
        assert!(view.own_answer().is_none());
        assert_eq!(view.view().answered_count(), 0);
    }

    #[test]
    fn only_host_carries_transition_capability() {
        let q = question();
        let mut host = HostView::new();
        host.resync(playing_snapshot(vec![player("p")], &q));
        let display = DisplayView::new();

        assert!(display.as_host().is_none());
        let actions = host.as_host().map(HostView::available_actions).unwrap();
        assert!(actions.contains(&SessionEvent::Pause));
        assert!(actions.contains(&SessionEvent::LockAndReveal(LockReason::Host)));
        assert!(!actions.contains(&SessionEvent::Start));
    }

    #[test]
    fn remaining_time_comes_from_stored_timestamps() {
        let q = question();
        let mut lobby = HostView::new();
        lobby.resync(SessionSnapshot {
            session: session(SessionStatus::Lobby, NO_QUESTION, 1),
            players: vec![],
            phase: None,
            question: None,
            answers: vec![],
            question_count: 1,
        });
        assert_eq!(lobby.view().remaining_ms(t(0)), 0);
        assert_eq!(lobby.available_actions(), vec![SessionEvent::Start]);

        let mut view = HostView::new();
        view.resync(playing_snapshot(vec![], &q));
        assert_eq!(view.view().remaining_ms(t(10_000)), 20_000);
    }
}
