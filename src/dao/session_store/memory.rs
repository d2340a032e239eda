//! In-process [`SessionStore`] backed by concurrent maps, used for local runs and tests.
//!
//! Constraints are enforced with secondary indexes guarded by the map entry locks, and
//! every accepted write is published on a broadcast channel while the row lock is held
//! so subscribers observe per-row ordering.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream, wrappers::errors::BroadcastStreamRecvError};
use uuid::Uuid;

use super::{ChangeEvent, ChangeRow, ChangeStream, SessionStore};
use crate::dao::{
    models::{
        AnswerEntity, GameEntity, PlayerEntity, QuestionPhaseEntity, SessionEntity, SessionStatus,
    },
    storage::{Constraint, StorageError, StorageResult},
};

const DEFAULT_FEED_CAPACITY: usize = 1024;

type AnswerKey = (Uuid, Uuid, Uuid);

#[derive(Clone)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    games: DashMap<Uuid, GameEntity>,
    sessions: DashMap<Uuid, SessionEntity>,
    active_codes: DashMap<String, Uuid>,
    players: DashMap<Uuid, PlayerEntity>,
    session_players: DashMap<Uuid, Vec<Uuid>>,
    phases: DashMap<(Uuid, u32), QuestionPhaseEntity>,
    answers: DashMap<AnswerKey, AnswerEntity>,
    feed: broadcast::Sender<ChangeEvent>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store whose change feed buffers `capacity` events per subscriber.
    pub fn with_feed_capacity(capacity: usize) -> Self {
        let (feed, _rx) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(MemoryInner {
                games: DashMap::new(),
                sessions: DashMap::new(),
                active_codes: DashMap::new(),
                players: DashMap::new(),
                session_players: DashMap::new(),
                phases: DashMap::new(),
                answers: DashMap::new(),
                feed,
            }),
        }
    }
}

impl MemoryInner {
    fn publish(&self, event: ChangeEvent) {
        let _ = self.feed.send(event);
    }

    fn insert_session(&self, session: SessionEntity) -> StorageResult<()> {
        if session.status.is_active() {
            match self.active_codes.entry(session.code.clone()) {
                Entry::Occupied(mut occupied) => {
                    let holder_active = self
                        .sessions
                        .get(occupied.get())
                        .map(|held| held.status.is_active())
                        .unwrap_or(false);
                    if holder_active {
                        return Err(StorageError::conflict(Constraint::ActiveSessionCode));
                    }
                    occupied.insert(session.id);
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(session.id);
                }
            }
        }

        match self.sessions.entry(session.id) {
            Entry::Occupied(_) => Err(StorageError::conflict(Constraint::RowVersion)),
            Entry::Vacant(vacant) => {
                let id = session.id;
                let row = vacant.insert(session);
                self.publish(ChangeEvent::insert(id, ChangeRow::Session(row.clone())));
                Ok(())
            }
        }
    }

    fn update_session(&self, session: SessionEntity, expected_version: u64) -> StorageResult<()> {
        let session_id = session.id;
        let released_code = {
            let mut current = self
                .sessions
                .get_mut(&session.id)
                .ok_or_else(|| StorageError::conflict(Constraint::MissingRow))?;
            if current.version != expected_version {
                return Err(StorageError::conflict(Constraint::RowVersion));
            }
            let released = (current.status.is_active() && !session.status.is_active())
                .then(|| current.code.clone());
            *current = session;
            self.publish(ChangeEvent::update(
                current.id,
                ChangeRow::Session(current.clone()),
            ));
            released
        };

        if let Some(code) = released_code {
            self.active_codes
                .remove_if(&code, |_, holder| *holder == session_id);
        }
        Ok(())
    }

    fn insert_player(&self, player: PlayerEntity) -> StorageResult<()> {
        match self.players.entry(player.id) {
            Entry::Occupied(_) => Err(StorageError::conflict(Constraint::RowVersion)),
            Entry::Vacant(vacant) => {
                self.session_players
                    .entry(player.session_id)
                    .or_default()
                    .push(player.id);
                let row = vacant.insert(player);
                self.publish(ChangeEvent::insert(
                    row.session_id,
                    ChangeRow::Player(row.clone()),
                ));
                Ok(())
            }
        }
    }

    fn update_player(&self, player: PlayerEntity, expected_version: u64) -> StorageResult<()> {
        let mut current = self
            .players
            .get_mut(&player.id)
            .ok_or_else(|| StorageError::conflict(Constraint::MissingRow))?;
        if current.version != expected_version {
            return Err(StorageError::conflict(Constraint::RowVersion));
        }
        *current = player;
        self.publish(ChangeEvent::update(
            current.session_id,
            ChangeRow::Player(current.clone()),
        ));
        Ok(())
    }

    fn set_player_score(&self, player_id: Uuid, score: i64) -> StorageResult<()> {
        let mut current = self
            .players
            .get_mut(&player_id)
            .ok_or_else(|| StorageError::conflict(Constraint::MissingRow))?;
        current.score = score;
        self.publish(ChangeEvent::update(
            current.session_id,
            ChangeRow::Player(current.clone()),
        ));
        Ok(())
    }

    fn insert_phase(&self, phase: QuestionPhaseEntity) -> StorageResult<()> {
        match self.phases.entry((phase.session_id, phase.question_index)) {
            Entry::Occupied(_) => Err(StorageError::conflict(Constraint::QuestionPhaseIndex)),
            Entry::Vacant(vacant) => {
                let row = vacant.insert(phase);
                self.publish(ChangeEvent::insert(
                    row.session_id,
                    ChangeRow::Phase(row.clone()),
                ));
                Ok(())
            }
        }
    }

    fn update_phase(&self, phase: QuestionPhaseEntity, expected_version: u64) -> StorageResult<()> {
        let mut current = self
            .phases
            .get_mut(&(phase.session_id, phase.question_index))
            .ok_or_else(|| StorageError::conflict(Constraint::MissingRow))?;
        if current.version != expected_version {
            return Err(StorageError::conflict(Constraint::RowVersion));
        }
        *current = phase;
        self.publish(ChangeEvent::update(
            current.session_id,
            ChangeRow::Phase(current.clone()),
        ));
        Ok(())
    }

    fn insert_answer(&self, answer: AnswerEntity) -> StorageResult<()> {
        let key = (answer.session_id, answer.player_id, answer.question_id);
        match self.answers.entry(key) {
            Entry::Occupied(_) => Err(StorageError::conflict(Constraint::SingleAnswer)),
            Entry::Vacant(vacant) => {
                let row = vacant.insert(answer);
                self.publish(ChangeEvent::insert(
                    row.session_id,
                    ChangeRow::Answer(row.clone()),
                ));
                Ok(())
            }
        }
    }

    fn list_players(&self, session_id: Uuid) -> Vec<PlayerEntity> {
        let ids = self
            .session_players
            .get(&session_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.players.get(id).map(|player| player.clone()))
            .collect()
    }

    fn answers_matching(&self, predicate: impl Fn(&AnswerEntity) -> bool) -> Vec<AnswerEntity> {
        let mut answers: Vec<AnswerEntity> = self
            .answers
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        answers.sort_by_key(|answer| answer.submitted_at);
        answers
    }
}

fn ready<T: Send + 'static>(value: StorageResult<T>) -> BoxFuture<'static, StorageResult<T>> {
    Box::pin(futures::future::ready(value))
}

impl SessionStore for MemorySessionStore {
    fn save_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.games.insert(game.id, game);
        ready(Ok(()))
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        ready(Ok(self.inner.games.get(&id).map(|game| game.clone())))
    }

    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        ready(self.inner.insert_session(session))
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        ready(Ok(self.inner.sessions.get(&id).map(|s| s.clone())))
    }

    fn find_active_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let session = self
            .inner
            .active_codes
            .get(&code)
            .and_then(|holder| self.inner.sessions.get(holder.value()).map(|s| s.clone()))
            .filter(|session| session.status.is_active());
        ready(Ok(session))
    }

    fn update_session(
        &self,
        session: SessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        ready(self.inner.update_session(session, expected_version))
    }

    fn list_sessions_with_status(
        &self,
        status: SessionStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let sessions = self
            .inner
            .sessions
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.value().clone())
            .collect();
        ready(Ok(sessions))
    }

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        ready(self.inner.insert_player(player))
    }

    fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        ready(Ok(self.inner.players.get(&id).map(|p| p.clone())))
    }

    fn list_players(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        ready(Ok(self.inner.list_players(session_id)))
    }

    fn update_player(
        &self,
        player: PlayerEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        ready(self.inner.update_player(player, expected_version))
    }

    fn set_player_score(
        &self,
        player_id: Uuid,
        score: i64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        ready(self.inner.set_player_score(player_id, score))
    }

    fn insert_phase(&self, phase: QuestionPhaseEntity) -> BoxFuture<'static, StorageResult<()>> {
        ready(self.inner.insert_phase(phase))
    }

    fn find_phase(
        &self,
        session_id: Uuid,
        question_index: u32,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionPhaseEntity>>> {
        let phase = self
            .inner
            .phases
            .get(&(session_id, question_index))
            .map(|p| p.clone());
        ready(Ok(phase))
    }

    fn update_phase(
        &self,
        phase: QuestionPhaseEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        ready(self.inner.update_phase(phase, expected_version))
    }

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        ready(self.inner.insert_answer(answer))
    }

    fn list_player_answers(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        ready(Ok(self.inner.answers_matching(|answer| {
            answer.session_id == session_id && answer.player_id == player_id
        })))
    }

    fn list_question_answers(
        &self,
        session_id: Uuid,
        question_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        ready(Ok(self.inner.answers_matching(|answer| {
            answer.session_id == session_id && answer.question_id == question_id
        })))
    }

    fn subscribe(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<ChangeStream>> {
        let stream = BroadcastStream::new(self.inner.feed.subscribe()).filter_map(move |item| {
            match item {
                Ok(event) if event.session_id == session_id => Some(Ok(event)),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    Some(Err(StorageError::FeedLagged { skipped }))
                }
            }
        });
        let stream: ChangeStream = Box::pin(stream);
        ready(Ok(stream))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        ready(Ok(()))
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use futures::StreamExt;

    use super::*;
    use crate::dao::{
        models::NO_QUESTION,
        session_store::ChangeOp,
    };

    fn session(code: &str) -> SessionEntity {
        SessionEntity {
            id: Uuid::new_v4(),
            host_id: "host".into(),
            game_id: Uuid::new_v4(),
            code: code.into(),
            status: SessionStatus::Lobby,
            current_question_index: NO_QUESTION,
            timer_seconds: 20,
            speed_bonus: false,
            created_at: SystemTime::now(),
            ended_at: None,
            version: 0,
        }
    }

    fn answer(session_id: Uuid, player_id: Uuid, question_id: Uuid) -> AnswerEntity {
        AnswerEntity {
            id: Uuid::new_v4(),
            session_id,
            player_id,
            question_id,
            choice_id: Uuid::new_v4(),
            is_correct: true,
            elapsed_ms: 1_000,
            points_awarded: 1_000,
            submitted_at: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn active_code_is_exclusive_until_finished() {
        let store = MemorySessionStore::new();
        let first = session("ABCDEF");
        store.insert_session(first.clone()).await.expect("first insert");

        let err = store
            .insert_session(session("ABCDEF"))
            .await
            .expect_err("code collision");
        assert_eq!(err.constraint(), Some(Constraint::ActiveSessionCode));

        let mut finished = first.clone();
        finished.status = SessionStatus::Finished;
        finished.version = 1;
        store
            .update_session(finished, 0)
            .await
            .expect("finish session");
        assert!(
            store
                .find_active_session_by_code("ABCDEF".into())
                .await
                .expect("lookup")
                .is_none()
        );

        let reuse = session("ABCDEF");
        store.insert_session(reuse.clone()).await.expect("code reused");
        let found = store
            .find_active_session_by_code("ABCDEF".into())
            .await
            .expect("lookup");
        assert_eq!(found.map(|s| s.id), Some(reuse.id));
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let store = MemorySessionStore::new();
        let row = session("QWERTY");
        store.insert_session(row.clone()).await.expect("insert");

        let mut next = row.clone();
        next.version = 1;
        store.update_session(next.clone(), 0).await.expect("cas");

        let err = store
            .update_session(next, 0)
            .await
            .expect_err("stale version");
        assert_eq!(err.constraint(), Some(Constraint::RowVersion));
    }

    #[tokio::test]
    async fn second_answer_hits_single_answer_constraint() {
        let store = MemorySessionStore::new();
        let (session_id, player_id, question_id) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        store
            .insert_answer(answer(session_id, player_id, question_id))
            .await
            .expect("first answer");

        let err = store
            .insert_answer(answer(session_id, player_id, question_id))
            .await
            .expect_err("duplicate");
        assert_eq!(err.constraint(), Some(Constraint::SingleAnswer));
        assert_eq!(
            store
                .list_player_answers(session_id, player_id)
                .await
                .expect("list")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn feed_only_carries_the_subscribed_session() {
        let store = MemorySessionStore::new();
        let watched = session("AAAAAA");
        let other = session("BBBBBB");
        let mut feed = store.subscribe(watched.id).await.expect("subscribe");

        store.insert_session(other).await.expect("other");
        store.insert_session(watched.clone()).await.expect("watched");

        let event = feed.next().await.expect("event").expect("no lag");
        assert_eq!(event.session_id, watched.id);
        assert_eq!(event.op, ChangeOp::Insert);
        assert_eq!(event.row, ChangeRow::Session(watched));
    }

    #[tokio::test]
    async fn slow_subscriber_sees_lag() {
        let store = MemorySessionStore::with_feed_capacity(1);
        let row = session("CCCCCC");
        let mut feed = store.subscribe(row.id).await.expect("subscribe");
        store.insert_session(row.clone()).await.expect("insert");
        let mut next = row.clone();
        next.version = 1;
        store.update_session(next, 0).await.expect("update");

        match feed.next().await {
            Some(Err(StorageError::FeedLagged { skipped })) => assert_eq!(skipped, 1),
            other => panic!("expected lag, got {other:?}"),
        }
    }
}
