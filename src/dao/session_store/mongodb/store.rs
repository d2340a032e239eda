use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, future::BoxFuture, stream};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{Document, doc},
    change_stream::event::OperationType,
    options::{FullDocumentType, IndexOptions},
};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        ANSWERS, GAMES, MongoAnswerDocument, MongoGameDocument, MongoPhaseDocument,
        MongoPlayerDocument, MongoSessionDocument, PHASES, PLAYERS, SESSIONS, doc_id, phase_key,
    },
};
use crate::dao::{
    models::{
        AnswerEntity, GameEntity, PlayerEntity, QuestionPhaseEntity, SessionEntity, SessionStatus,
    },
    session_store::{ChangeEvent, ChangeOp, ChangeRow, ChangeStream, SessionStore},
    storage::{Constraint, StorageResult},
};

/// [`SessionStore`] backed by MongoDB.
///
/// Uniqueness rules are unique indexes and the change feed is a set of change streams,
/// so the deployment must run as a replica set.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        // Only unfinished sessions carry `active_code`; finished ones free their code.
        let active_code = IndexModel::builder()
            .keys(doc! {"active_code": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_active_code_idx".to_owned()))
                    .unique(Some(true))
                    .partial_filter_expression(Some(doc! {"active_code": {"$type": "string"}}))
                    .build(),
            )
            .build();
        create_index(&database, SESSIONS, "active_code", active_code).await?;

        let status = IndexModel::builder()
            .keys(doc! {"status": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_status_idx".to_owned()))
                    .build(),
            )
            .build();
        create_index(&database, SESSIONS, "status", status).await?;

        let roster = IndexModel::builder()
            .keys(doc! {"session_id": 1, "joined_at": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("player_session_idx".to_owned()))
                    .build(),
            )
            .build();
        create_index(&database, PLAYERS, "session_id,joined_at", roster).await?;

        let single_answer = IndexModel::builder()
            .keys(doc! {"session_id": 1, "player_id": 1, "question_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("answer_single_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        create_index(&database, ANSWERS, "session_id,player_id,question_id", single_answer)
            .await?;

        let tallies = IndexModel::builder()
            .keys(doc! {"session_id": 1, "question_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("answer_question_idx".to_owned()))
                    .build(),
            )
            .build();
        create_index(&database, ANSWERS, "session_id,question_id", tallies).await?;

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn collection<D>(&self, name: &str) -> Collection<D>
    where
        D: Send + Sync,
    {
        self.database().await.collection::<D>(name)
    }

    async fn insert<D>(
        &self,
        name: &'static str,
        constraint: Constraint,
        document: D,
    ) -> MongoResult<()>
    where
        D: Serialize + Send + Sync,
    {
        self.collection::<D>(name)
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::write(name, constraint, source))?;
        Ok(())
    }

    /// Replace the document only if it still carries `expected_version`.
    async fn replace_versioned<D>(
        &self,
        name: &'static str,
        id: String,
        expected_version: u64,
        document: D,
    ) -> MongoResult<()>
    where
        D: Serialize + Send + Sync,
    {
        let collection = self.collection::<D>(name).await;
        let result = collection
            .replace_one(
                doc! {"_id": id.as_str(), "version": expected_version as i64},
                &document,
            )
            .await
            .map_err(|source| MongoDaoError::write(name, Constraint::RowVersion, source))?;
        if result.matched_count > 0 {
            return Ok(());
        }

        let exists = collection
            .count_documents(doc_id(&id))
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: name,
                source,
            })?
            > 0;
        Err(MongoDaoError::Rejected {
            collection: name,
            constraint: if exists {
                Constraint::RowVersion
            } else {
                Constraint::MissingRow
            },
        })
    }

    async fn find_one<D>(&self, name: &'static str, filter: Document) -> MongoResult<Option<D>>
    where
        D: DeserializeOwned + Send + Sync,
    {
        self.collection::<D>(name)
            .await
            .find_one(filter)
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: name,
                source,
            })
    }

    async fn find_many<D>(
        &self,
        name: &'static str,
        filter: Document,
        sort: Document,
    ) -> MongoResult<Vec<D>>
    where
        D: DeserializeOwned + Send + Sync,
    {
        self.collection::<D>(name)
            .await
            .find(filter)
            .sort(sort)
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: name,
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: name,
                source,
            })
    }

    async fn find_game(&self, id: Uuid) -> MongoResult<Option<GameEntity>> {
        self.find_one::<MongoGameDocument>(GAMES, doc_id(id))
            .await?
            .map(GameEntity::try_from)
            .transpose()
    }

    async fn save_game(&self, game: GameEntity) -> MongoResult<()> {
        let id = game.id;
        let document = MongoGameDocument::from(game);
        self.collection::<MongoGameDocument>(GAMES)
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: GAMES,
                source,
            })?;
        Ok(())
    }

    async fn find_session(&self, filter: Document) -> MongoResult<Option<SessionEntity>> {
        self.find_one::<MongoSessionDocument>(SESSIONS, filter)
            .await?
            .map(SessionEntity::try_from)
            .transpose()
    }

    async fn list_sessions(&self, status: SessionStatus) -> MongoResult<Vec<SessionEntity>> {
        self.find_many::<MongoSessionDocument>(
            SESSIONS,
            doc! {"status": status.as_str()},
            doc! {"created_at": 1},
        )
        .await?
        .into_iter()
        .map(SessionEntity::try_from)
        .collect()
    }

    async fn find_player(&self, id: Uuid) -> MongoResult<Option<PlayerEntity>> {
        self.find_one::<MongoPlayerDocument>(PLAYERS, doc_id(id))
            .await?
            .map(PlayerEntity::try_from)
            .transpose()
    }

    async fn list_players(&self, session_id: Uuid) -> MongoResult<Vec<PlayerEntity>> {
        self.find_many::<MongoPlayerDocument>(
            PLAYERS,
            doc! {"session_id": session_id.to_string()},
            doc! {"joined_at": 1, "_id": 1},
        )
        .await?
        .into_iter()
        .map(PlayerEntity::try_from)
        .collect()
    }

    async fn set_player_score(&self, player_id: Uuid, score: i64) -> MongoResult<()> {
        let result = self
            .collection::<MongoPlayerDocument>(PLAYERS)
            .await
            .update_one(doc_id(player_id), doc! {"$set": {"score": score}})
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: PLAYERS,
                source,
            })?;
        if result.matched_count == 0 {
            return Err(MongoDaoError::Rejected {
                collection: PLAYERS,
                constraint: Constraint::MissingRow,
            });
        }
        Ok(())
    }

    async fn find_phase(
        &self,
        session_id: Uuid,
        question_index: u32,
    ) -> MongoResult<Option<QuestionPhaseEntity>> {
        self.find_one::<MongoPhaseDocument>(PHASES, doc_id(phase_key(session_id, question_index)))
            .await?
            .map(QuestionPhaseEntity::try_from)
            .transpose()
    }

    async fn list_answers(&self, filter: Document) -> MongoResult<Vec<AnswerEntity>> {
        self.find_many::<MongoAnswerDocument>(ANSWERS, filter, doc! {"submitted_at": 1})
            .await?
            .into_iter()
            .map(AnswerEntity::try_from)
            .collect()
    }

    /// Open one collection's change stream, restricted to documents of `session_id`.
    async fn watch<D, F>(
        &self,
        name: &'static str,
        session_id: Uuid,
        into_row: F,
    ) -> MongoResult<ChangeStream>
    where
        D: DeserializeOwned + Unpin + Send + Sync + 'static,
        F: Fn(D) -> MongoResult<ChangeRow> + Send + 'static,
    {
        let mut changes = self
            .collection::<D>(name)
            .await
            .watch()
            .pipeline([doc! {"$match": {"fullDocument.session_id": session_id.to_string()}}])
            .full_document(FullDocumentType::UpdateLookup)
            .await
            .map_err(|source| MongoDaoError::Watch {
                collection: name,
                source,
            })?;
        debug!(%session_id, collection = name, "change stream opened");

        Ok(Box::pin(async_stream::stream! {
            while let Some(event) = changes.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(source) => {
                        yield Err(MongoDaoError::Watch { collection: name, source }.into());
                        return;
                    }
                };
                let op = match event.operation_type {
                    OperationType::Insert => ChangeOp::Insert,
                    OperationType::Update | OperationType::Replace => ChangeOp::Update,
                    _ => continue,
                };
                let Some(document) = event.full_document else {
                    continue;
                };
                match into_row(document) {
                    Ok(row) => yield Ok(ChangeEvent { session_id, op, row }),
                    Err(err) => {
                        yield Err(err.into());
                        return;
                    }
                }
            }
        }))
    }
}

async fn create_index(
    database: &Database,
    collection: &'static str,
    index: &'static str,
    model: IndexModel,
) -> MongoResult<()> {
    database
        .collection::<Document>(collection)
        .create_index(model)
        .await
        .map_err(|source| MongoDaoError::EnsureIndex {
            collection,
            index,
            source,
        })?;
    Ok(())
}

impl SessionStore for MongoSessionStore {
    fn save_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_game(game).await.map_err(Into::into) })
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_game(id).await.map_err(Into::into) })
    }

    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .insert(
                    SESSIONS,
                    Constraint::ActiveSessionCode,
                    MongoSessionDocument::from(session),
                )
                .await
                .map_err(Into::into)
        })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session(doc_id(id)).await.map_err(Into::into) })
    }

    fn find_active_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_session(doc! {"active_code": code})
                .await
                .map_err(Into::into)
        })
    }

    fn update_session(
        &self,
        session: SessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .replace_versioned(
                    SESSIONS,
                    session.id.to_string(),
                    expected_version,
                    MongoSessionDocument::from(session),
                )
                .await
                .map_err(Into::into)
        })
    }

    fn list_sessions_with_status(
        &self,
        status: SessionStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_sessions(status).await.map_err(Into::into) })
    }

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .insert(
                    PLAYERS,
                    Constraint::RowVersion,
                    MongoPlayerDocument::from(player),
                )
                .await
                .map_err(Into::into)
        })
    }

    fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_player(id).await.map_err(Into::into) })
    }

    fn list_players(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_players(session_id).await.map_err(Into::into) })
    }

    fn update_player(
        &self,
        player: PlayerEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .replace_versioned(
                    PLAYERS,
                    player.id.to_string(),
                    expected_version,
                    MongoPlayerDocument::from(player),
                )
                .await
                .map_err(Into::into)
        })
    }

    fn set_player_score(
        &self,
        player_id: Uuid,
        score: i64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .set_player_score(player_id, score)
                .await
                .map_err(Into::into)
        })
    }

    fn insert_phase(&self, phase: QuestionPhaseEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .insert(
                    PHASES,
                    Constraint::QuestionPhaseIndex,
                    MongoPhaseDocument::from(phase),
                )
                .await
                .map_err(Into::into)
        })
    }

    fn find_phase(
        &self,
        session_id: Uuid,
        question_index: u32,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionPhaseEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_phase(session_id, question_index)
                .await
                .map_err(Into::into)
        })
    }

    fn update_phase(
        &self,
        phase: QuestionPhaseEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .replace_versioned(
                    PHASES,
                    phase_key(phase.session_id, phase.question_index),
                    expected_version,
                    MongoPhaseDocument::from(phase),
                )
                .await
                .map_err(Into::into)
        })
    }

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .insert(
                    ANSWERS,
                    Constraint::SingleAnswer,
                    MongoAnswerDocument::from(answer),
                )
                .await
                .map_err(Into::into)
        })
    }

    fn list_player_answers(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .list_answers(doc! {
                    "session_id": session_id.to_string(),
                    "player_id": player_id.to_string(),
                })
                .await
                .map_err(Into::into)
        })
    }

    fn list_question_answers(
        &self,
        session_id: Uuid,
        question_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .list_answers(doc! {
                    "session_id": session_id.to_string(),
                    "question_id": question_id.to_string(),
                })
                .await
                .map_err(Into::into)
        })
    }

    fn subscribe(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<ChangeStream>> {
        let store = self.clone();
        Box::pin(async move {
            let feeds = vec![
                store
                    .watch::<MongoSessionDocument, _>(SESSIONS, session_id, |document| {
                        Ok(ChangeRow::Session(document.try_into()?))
                    })
                    .await?,
                store
                    .watch::<MongoPlayerDocument, _>(PLAYERS, session_id, |document| {
                        Ok(ChangeRow::Player(document.try_into()?))
                    })
                    .await?,
                store
                    .watch::<MongoPhaseDocument, _>(PHASES, session_id, |document| {
                        Ok(ChangeRow::Phase(document.try_into()?))
                    })
                    .await?,
                store
                    .watch::<MongoAnswerDocument, _>(ANSWERS, session_id, |document| {
                        Ok(ChangeRow::Answer(document.try_into()?))
                    })
                    .await?,
            ];
            Ok(stream::select_all(feeds).boxed())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
