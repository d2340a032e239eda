#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::{future::BoxFuture, stream::BoxStream};
use serde::Serialize;
use uuid::Uuid;

use crate::dao::models::{
    AnswerEntity, GameEntity, PlayerEntity, QuestionPhaseEntity, SessionEntity, SessionStatus,
};
use crate::dao::storage::StorageResult;

/// Live feed of [`ChangeEvent`]s for one session.
pub type ChangeStream = BoxStream<'static, StorageResult<ChangeEvent>>;

/// Kind of row-level write carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    /// The row was created.
    Insert,
    /// The row was modified.
    Update,
}

/// Row payload carried by a [`ChangeEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeRow {
    /// Session row.
    Session(SessionEntity),
    /// Player row.
    Player(PlayerEntity),
    /// Question phase row.
    Phase(QuestionPhaseEntity),
    /// Answer row.
    Answer(AnswerEntity),
}

/// Row-level write notification scoped to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Session the written row belongs to.
    pub session_id: Uuid,
    /// Whether the row was inserted or updated.
    pub op: ChangeOp,
    /// The row as written.
    pub row: ChangeRow,
}

impl ChangeEvent {
    /// Build an insert notification.
    pub fn insert(session_id: Uuid, row: ChangeRow) -> Self {
        Self {
            session_id,
            op: ChangeOp::Insert,
            row,
        }
    }

    /// Build an update notification.
    pub fn update(session_id: Uuid, row: ChangeRow) -> Self {
        Self {
            session_id,
            op: ChangeOp::Update,
            row,
        }
    }
}

/// Durable entity store that doubles as the synchronization transport.
///
/// Uniqueness constraints and row-version mismatches surface as
/// [`StorageError::Conflict`](crate::dao::storage::StorageError::Conflict); every
/// successful write is observable through [`SessionStore::subscribe`].
pub trait SessionStore: Send + Sync {
    fn save_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>>;

    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    fn find_active_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    fn update_session(
        &self,
        session: SessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn list_sessions_with_status(
        &self,
        status: SessionStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>>;

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>>;
    /// Every player of the session in join order, removed ones included.
    fn list_players(&self, session_id: Uuid)
    -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>>;
    fn update_player(
        &self,
        player: PlayerEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Overwrite only the score column, leaving other columns and the version untouched.
    fn set_player_score(&self, player_id: Uuid, score: i64)
    -> BoxFuture<'static, StorageResult<()>>;

    fn insert_phase(&self, phase: QuestionPhaseEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_phase(
        &self,
        session_id: Uuid,
        question_index: u32,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionPhaseEntity>>>;
    fn update_phase(
        &self,
        phase: QuestionPhaseEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<()>>;

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn list_player_answers(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>>;
    fn list_question_answers(
        &self,
        session_id: Uuid,
        question_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>>;

    /// Open the feed of writes scoped to `session_id`.
    ///
    /// The future resolves once the feed is live; every write committed after that point
    /// is delivered. The feed does not replay history: late subscribers resync through
    /// direct reads.
    fn subscribe(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<ChangeStream>>;

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
