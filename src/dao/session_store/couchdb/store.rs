use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dao::{
    models::{
        AnswerEntity, GameEntity, PlayerEntity, QuestionPhaseEntity, SessionEntity, SessionStatus,
    },
    session_store::{ChangeEvent, ChangeStream, SessionStore},
    storage::{Constraint, StorageResult},
};
use crate::state::phase::epoch_millis;

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, ChangesResponse, CodeReservation, CouchDocument, DatabaseInfo, DocType,
        END_SUFFIX, FindResponse, SESSION_PREFIX, VersionOnly, answer_doc_id, answer_prefix,
        change_row, code_doc_id, game_doc_id, phase_doc_id, player_doc_id, player_prefix,
        seq_param, session_doc_id, session_selector,
    },
};

const FIND_LIMIT: usize = 10_000;
const SCORE_RETRIES: usize = 5;

/// [`SessionStore`] backed by CouchDB.
///
/// Every uniqueness rule is a deterministic document id, so a second writer gets a 409
/// from CouchDB itself.
#[derive(Clone)]
pub struct CouchSessionStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    changes_timeout: Duration,
}

impl CouchSessionStore {
    /// Establish a connection to CouchDB and ensure the database and indexes exist.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .credentials
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
            changes_timeout: config.changes_timeout,
        };

        store.ensure_database().await?;
        store.ensure_indexes().await?;
        Ok(store)
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth {
            Some((ref user, ref pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.database_url(), path);
        self.authorize(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(CouchDaoError::database(&database, "query"))?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(CouchDaoError::database(&database, "create"))?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn ensure_indexes(&self) -> CouchResult<()> {
        const INDEX: &str = "_index";
        let indexes = [
            ("session-status", json!(["doc_type", "status"])),
            ("player-id", json!(["doc_type", "id"])),
            ("answer-player", json!(["doc_type", "session_id", "player_id"])),
        ];
        for (name, fields) in indexes {
            let response = self
                .request(Method::POST, INDEX)
                .json(&json!({"index": {"fields": fields}, "name": name, "type": "json"}))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: INDEX.to_string(),
                    source,
                })?;
            if !response.status().is_success() {
                return Err(CouchDaoError::RequestStatus {
                    path: INDEX.to_string(),
                    status: response.status(),
                });
            }
        }
        Ok(())
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// PUT a document; a revision conflict is reported as a violation of `constraint`.
    async fn put_document<T>(
        &self,
        doc_id: &str,
        document: &T,
        constraint: Constraint,
    ) -> CouchResult<()>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Err(CouchDaoError::Rejected {
                path: doc_id.to_string(),
                constraint,
            }),
            status if status.is_success() => Ok(()),
            status => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status,
            }),
        }
    }

    async fn delete_document(&self, doc_id: &str, rev: &str) -> CouchResult<()> {
        let response = self
            .request(Method::DELETE, doc_id)
            .query(&[("rev", rev)])
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            status if status.is_success() || status == StatusCode::NOT_FOUND => Ok(()),
            StatusCode::CONFLICT => Err(CouchDaoError::Rejected {
                path: doc_id.to_string(),
                constraint: Constraint::RowVersion,
            }),
            status => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status,
            }),
        }
    }

    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        payload
            .rows
            .into_iter()
            .filter_map(|row| row.doc)
            .map(|doc| {
                from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: ALL_DOCS.to_string(),
                    source,
                })
            })
            .collect()
    }

    async fn find_documents<T>(&self, selector: Value, limit: usize) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const FIND: &str = "_find";
        let response = self
            .request(Method::POST, FIND)
            .json(&json!({"selector": selector, "limit": limit}))
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: FIND.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: FIND.to_string(),
                status: response.status(),
            });
        }

        let payload = response
            .json::<FindResponse>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: FIND.to_string(),
                source,
            })?;

        payload
            .docs
            .into_iter()
            .map(|doc| {
                from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: FIND.to_string(),
                    source,
                })
            })
            .collect()
    }

    /// Overwrite a versioned row only if it still carries `expected_version`.
    async fn replace_versioned<T>(
        &self,
        doc_id: String,
        doc_type: DocType,
        expected_version: u64,
        body: T,
    ) -> CouchResult<()>
    where
        T: Serialize,
    {
        let current = self
            .get_document::<CouchDocument<VersionOnly>>(&doc_id)
            .await?
            .ok_or_else(|| CouchDaoError::Rejected {
                path: doc_id.clone(),
                constraint: Constraint::MissingRow,
            })?;
        if current.body.version != expected_version {
            return Err(CouchDaoError::Rejected {
                path: doc_id,
                constraint: Constraint::RowVersion,
            });
        }

        let mut document = CouchDocument::new(doc_id.clone(), doc_type, body);
        document.rev = current.rev;
        self.put_document(&doc_id, &document, Constraint::RowVersion)
            .await
    }

    async fn insert_session(&self, session: SessionEntity) -> CouchResult<()> {
        let code_id = code_doc_id(&session.code);
        if session.status.is_active() {
            self.reserve_code(&code_id, session.id).await?;
        }

        let doc_id = session_doc_id(session.id);
        let document = CouchDocument::new(doc_id.clone(), DocType::Session, session);
        let result = self
            .put_document(&doc_id, &document, Constraint::RowVersion)
            .await;
        if result.is_err() {
            self.release_code(&code_id, document.body.id).await;
        }
        result
    }

    /// Claim `code_id` for `session_id`, taking over reservations left by finished sessions.
    async fn reserve_code(&self, code_id: &str, session_id: Uuid) -> CouchResult<()> {
        let mut reservation = CouchDocument::new(
            code_id.to_string(),
            DocType::Code,
            CodeReservation {
                session_id,
                reserved_at_ms: epoch_millis(SystemTime::now()),
            },
        );
        match self
            .put_document(code_id, &reservation, Constraint::ActiveSessionCode)
            .await
        {
            Err(CouchDaoError::Rejected { .. }) => {}
            other => return other,
        }

        let Some(existing) = self
            .get_document::<CouchDocument<CodeReservation>>(code_id)
            .await?
        else {
            return Err(CouchDaoError::Rejected {
                path: code_id.to_string(),
                constraint: Constraint::ActiveSessionCode,
            });
        };
        let holder = self
            .get_document::<CouchDocument<SessionEntity>>(&session_doc_id(existing.body.session_id))
            .await?;
        let now_ms = epoch_millis(SystemTime::now());
        if !existing
            .body
            .is_stale(holder.as_ref().map(|holder| &holder.body), now_ms)
        {
            return Err(CouchDaoError::Rejected {
                path: code_id.to_string(),
                constraint: Constraint::ActiveSessionCode,
            });
        }

        debug!(code = code_id, "taking over stale code reservation");
        reservation.rev = existing.rev;
        self.put_document(code_id, &reservation, Constraint::ActiveSessionCode)
            .await
    }

    /// Drop the reservation of `code_id` if `session_id` still holds it.
    async fn release_code(&self, code_id: &str, session_id: Uuid) {
        let existing = match self
            .get_document::<CouchDocument<CodeReservation>>(code_id)
            .await
        {
            Ok(Some(existing)) if existing.body.session_id == session_id => existing,
            Ok(_) => return,
            Err(err) => {
                warn!(code = code_id, error = %err, "failed to read code reservation");
                return;
            }
        };
        let Some(rev) = existing.rev else {
            return;
        };
        if let Err(err) = self.delete_document(code_id, &rev).await {
            // A leftover reservation is taken over by the next session drawing the code.
            warn!(code = code_id, error = %err, "failed to release code reservation");
        }
    }

    async fn find_session(&self, id: Uuid) -> CouchResult<Option<SessionEntity>> {
        Ok(self
            .get_document::<CouchDocument<SessionEntity>>(&session_doc_id(id))
            .await?
            .map(|doc| doc.body))
    }

    async fn find_active_session_by_code(&self, code: &str) -> CouchResult<Option<SessionEntity>> {
        let Some(reservation) = self
            .get_document::<CouchDocument<CodeReservation>>(&code_doc_id(code))
            .await?
        else {
            return Ok(None);
        };
        Ok(self
            .find_session(reservation.body.session_id)
            .await?
            .filter(|session| session.status.is_active() && session.code == code))
    }

    async fn update_session(&self, session: SessionEntity, expected_version: u64) -> CouchResult<()> {
        let finished = !session.status.is_active();
        let code_id = code_doc_id(&session.code);
        let session_id = session.id;
        self.replace_versioned(
            session_doc_id(session_id),
            DocType::Session,
            expected_version,
            session,
        )
        .await?;
        if finished {
            self.release_code(&code_id, session_id).await;
        }
        Ok(())
    }

    async fn list_sessions_with_status(
        &self,
        status: SessionStatus,
    ) -> CouchResult<Vec<SessionEntity>> {
        let documents = self
            .find_documents::<CouchDocument<SessionEntity>>(
                json!({"doc_type": "session", "status": status.as_str()}),
                FIND_LIMIT,
            )
            .await?;
        Ok(documents
            .into_iter()
            .filter(|doc| doc.id.starts_with(SESSION_PREFIX))
            .map(|doc| doc.body)
            .collect())
    }

    async fn find_player_document(
        &self,
        player_id: Uuid,
    ) -> CouchResult<Option<CouchDocument<PlayerEntity>>> {
        Ok(self
            .find_documents::<CouchDocument<PlayerEntity>>(
                json!({"doc_type": "player", "id": player_id}),
                1,
            )
            .await?
            .into_iter()
            .next())
    }

    async fn list_players(&self, session_id: Uuid) -> CouchResult<Vec<PlayerEntity>> {
        let mut players: Vec<PlayerEntity> = self
            .list_documents::<CouchDocument<PlayerEntity>>(&player_prefix(session_id))
            .await?
            .into_iter()
            .map(|doc| doc.body)
            .collect();
        players.sort_by_key(|player| player.joined_at);
        Ok(players)
    }

    /// Score writes bypass the row version, so retry on revision conflicts.
    async fn set_player_score(&self, player_id: Uuid, score: i64) -> CouchResult<()> {
        let mut attempt = 0;
        loop {
            let mut document =
                self.find_player_document(player_id)
                    .await?
                    .ok_or_else(|| CouchDaoError::Rejected {
                        path: player_id.to_string(),
                        constraint: Constraint::MissingRow,
                    })?;
            document.body.score = score;
            let doc_id = document.id.clone();
            match self
                .put_document(&doc_id, &document, Constraint::RowVersion)
                .await
            {
                Err(CouchDaoError::Rejected { .. }) if attempt + 1 < SCORE_RETRIES => {
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn list_answers_by_prefix(&self, prefix: &str) -> CouchResult<Vec<AnswerEntity>> {
        let mut answers: Vec<AnswerEntity> = self
            .list_documents::<CouchDocument<AnswerEntity>>(prefix)
            .await?
            .into_iter()
            .map(|doc| doc.body)
            .collect();
        answers.sort_by_key(|answer| answer.submitted_at);
        Ok(answers)
    }

    async fn list_player_answers(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> CouchResult<Vec<AnswerEntity>> {
        let mut answers: Vec<AnswerEntity> = self
            .find_documents::<CouchDocument<AnswerEntity>>(
                json!({"doc_type": "answer", "session_id": session_id, "player_id": player_id}),
                FIND_LIMIT,
            )
            .await?
            .into_iter()
            .map(|doc| doc.body)
            .collect();
        answers.sort_by_key(|answer| answer.submitted_at);
        Ok(answers)
    }

    async fn update_seq(&self) -> CouchResult<Value> {
        let database = self.database.to_string();
        let response = self
            .authorize(self.client.get(self.database_url()))
            .send()
            .await
            .map_err(CouchDaoError::database(&database, "read update_seq"))?;
        if !response.status().is_success() {
            return Err(CouchDaoError::DatabaseStatus {
                database,
                status: response.status(),
            });
        }
        let info = response
            .json::<DatabaseInfo>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: database,
                source,
            })?;
        Ok(info.update_seq)
    }

    /// One long-poll round of `_changes` restricted to `session_id`.
    async fn poll_changes(&self, session_id: Uuid, since: &Value) -> CouchResult<ChangesResponse> {
        const CHANGES: &str = "_changes";
        let query = [
            ("feed", "longpoll".to_string()),
            ("since", seq_param(since)),
            ("include_docs", "true".to_string()),
            ("filter", "_selector".to_string()),
            ("timeout", self.changes_timeout.as_millis().to_string()),
        ];
        let response = self
            .request(Method::POST, CHANGES)
            .query(&query)
            .json(&session_selector(session_id))
            .timeout(self.changes_timeout * 2)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: CHANGES.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: CHANGES.to_string(),
                status: response.status(),
            });
        }
        response
            .json::<ChangesResponse>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: CHANGES.to_string(),
                source,
            })
    }

    fn changes(&self, session_id: Uuid, since: Value) -> ChangeStream {
        let store = self.clone();
        Box::pin(async_stream::stream! {
            let mut since = since;
            loop {
                let batch = match store.poll_changes(session_id, &since).await {
                    Ok(batch) => batch,
                    Err(err) => {
                        yield Err(err.into());
                        return;
                    }
                };
                for change in batch.results {
                    if change.deleted {
                        continue;
                    }
                    let op = change.op();
                    let Some(doc) = change.doc else {
                        continue;
                    };
                    match change_row(doc) {
                        Ok(Some(row)) => yield Ok(ChangeEvent { session_id, op, row }),
                        Ok(None) => {}
                        Err(source) => {
                            yield Err(CouchDaoError::DeserializeValue {
                                path: "_changes".to_string(),
                                source,
                            }
                            .into());
                            return;
                        }
                    }
                }
                since = batch.last_seq;
            }
        })
    }
}

impl SessionStore for CouchSessionStore {
    fn save_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = game_doc_id(game.id);
            let mut doc = CouchDocument::new(doc_id.clone(), DocType::Game, game);
            if let Some(existing) = store
                .get_document::<CouchDocument<GameEntity>>(&doc_id)
                .await?
            {
                doc.rev = existing.rev;
            }
            store
                .put_document(&doc_id, &doc, Constraint::RowVersion)
                .await
                .map_err(Into::into)
        })
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let maybe_doc = store
                .get_document::<CouchDocument<GameEntity>>(&game_doc_id(id))
                .await?;
            Ok(maybe_doc.map(|doc| doc.body))
        })
    }

    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session(session).await.map_err(Into::into) })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session(id).await.map_err(Into::into) })
    }

    fn find_active_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_active_session_by_code(&code)
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
                .update_session(session, expected_version)
                .await
                .map_err(Into::into)
        })
    }

    fn list_sessions_with_status(
        &self,
        status: SessionStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .list_sessions_with_status(status)
                .await
                .map_err(Into::into)
        })
    }

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = player_doc_id(player.session_id, player.id);
            let doc = CouchDocument::new(doc_id.clone(), DocType::Player, player);
            store
                .put_document(&doc_id, &doc, Constraint::RowVersion)
                .await
                .map_err(Into::into)
        })
    }

    fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .find_player_document(id)
                .await?
                .map(|document| document.body))
        })
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
                    player_doc_id(player.session_id, player.id),
                    DocType::Player,
                    expected_version,
                    player,
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
            let doc_id = phase_doc_id(phase.session_id, phase.question_index);
            let doc = CouchDocument::new(doc_id.clone(), DocType::Phase, phase);
            store
                .put_document(&doc_id, &doc, Constraint::QuestionPhaseIndex)
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
            Ok(store
                .get_document::<CouchDocument<QuestionPhaseEntity>>(&phase_doc_id(
                    session_id,
                    question_index,
                ))
                .await?
                .map(|doc| doc.body))
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
                    phase_doc_id(phase.session_id, phase.question_index),
                    DocType::Phase,
                    expected_version,
                    phase,
                )
                .await
                .map_err(Into::into)
        })
    }

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = answer_doc_id(answer.session_id, answer.question_id, answer.player_id);
            let doc = CouchDocument::new(doc_id.clone(), DocType::Answer, answer);
            store
                .put_document(&doc_id, &doc, Constraint::SingleAnswer)
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
                .list_player_answers(session_id, player_id)
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
                .list_answers_by_prefix(&answer_prefix(session_id, question_id))
                .await
                .map_err(Into::into)
        })
    }

    fn subscribe(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<ChangeStream>> {
        let store = self.clone();
        Box::pin(async move {
            // Start from the current sequence so the feed covers every later write.
            let since = store.update_seq().await?;
            debug!(%session_id, since = %seq_param(&since), "changes feed opened");
            Ok(store.changes(session_id, since))
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .authorize(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
