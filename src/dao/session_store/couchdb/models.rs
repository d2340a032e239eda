use serde::{Deserialize, Serialize};
use serde_json::{Value, from_value, json};
use uuid::Uuid;

use crate::dao::{
    models::{AnswerEntity, PlayerEntity, QuestionPhaseEntity, SessionEntity},
    session_store::{ChangeOp, ChangeRow},
};

pub const SESSION_PREFIX: &str = "session::";
pub const END_SUFFIX: &str = "\u{ffff}";

/// Discriminator stored on every document so the change feed can be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Game,
    Session,
    Code,
    Player,
    Phase,
    Answer,
}

/// Envelope shared by every document: CouchDB metadata plus the flattened row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchDocument<T> {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub doc_type: DocType,
    #[serde(flatten)]
    pub body: T,
}

impl<T> CouchDocument<T> {
    pub fn new(id: String, doc_type: DocType, body: T) -> Self {
        Self {
            id,
            rev: None,
            doc_type,
            body,
        }
    }
}

/// Window after which a reservation whose session document never appeared may be reclaimed.
pub const RESERVATION_INSERT_WINDOW_MS: u64 = 60_000;

/// Reservation of a join code by an unfinished session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeReservation {
    pub session_id: Uuid,
    /// Epoch milliseconds of the claim.
    #[serde(default)]
    pub reserved_at_ms: u64,
}

impl CodeReservation {
    /// Whether a new session may take this reservation over.
    ///
    /// The holder's session document is written after the reservation, so a missing
    /// holder only frees the code once the insert window has passed.
    pub fn is_stale(&self, holder: Option<&SessionEntity>, now_ms: u64) -> bool {
        match holder {
            Some(holder) => !holder.status.is_active(),
            None => now_ms.saturating_sub(self.reserved_at_ms) > RESERVATION_INSERT_WINDOW_MS,
        }
    }
}

/// Just enough of a versioned row to check a compare-and-swap.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionOnly {
    pub version: u64,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct FindResponse {
    pub docs: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseInfo {
    pub update_seq: Value,
}

#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    pub results: Vec<ChangeResult>,
    pub last_seq: Value,
}

#[derive(Debug, Deserialize)]
pub struct ChangeResult {
    #[serde(default)]
    pub deleted: bool,
    pub changes: Vec<ChangeRevision>,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRevision {
    pub rev: String,
}

impl ChangeResult {
    /// First revisions are inserts, everything after is an update.
    pub fn op(&self) -> ChangeOp {
        match self.changes.first() {
            Some(change) if change.rev.starts_with("1-") => ChangeOp::Insert,
            _ => ChangeOp::Update,
        }
    }
}

/// Decode a changed document into a row, skipping documents that are not session rows.
pub fn change_row(doc: Value) -> Result<Option<ChangeRow>, serde_json::Error> {
    let Some(doc_type) = doc.get("doc_type").cloned() else {
        return Ok(None);
    };
    let row = match from_value::<DocType>(doc_type)? {
        DocType::Session => ChangeRow::Session(from_value::<CouchDocument<SessionEntity>>(doc)?.body),
        DocType::Player => ChangeRow::Player(from_value::<CouchDocument<PlayerEntity>>(doc)?.body),
        DocType::Phase => {
            ChangeRow::Phase(from_value::<CouchDocument<QuestionPhaseEntity>>(doc)?.body)
        }
        DocType::Answer => ChangeRow::Answer(from_value::<CouchDocument<AnswerEntity>>(doc)?.body),
        DocType::Game | DocType::Code => return Ok(None),
    };
    Ok(Some(row))
}

/// `_changes` selector matching every row of one session.
pub fn session_selector(session_id: Uuid) -> Value {
    json!({
        "selector": {
            "$or": [
                {"session_id": session_id},
                {"doc_type": "session", "id": session_id},
            ]
        }
    })
}

/// Sequence token as expected by the `since` query parameter.
pub fn seq_param(seq: &Value) -> String {
    match seq {
        Value::String(seq) => seq.clone(),
        other => other.to_string(),
    }
}

pub fn game_doc_id(id: Uuid) -> String {
    format!("game::{id}")
}

pub fn session_doc_id(id: Uuid) -> String {
    format!("{SESSION_PREFIX}{id}")
}

pub fn code_doc_id(code: &str) -> String {
    format!("code::{code}")
}

pub fn player_prefix(session_id: Uuid) -> String {
    format!("player::{session_id}::")
}

pub fn player_doc_id(session_id: Uuid, player_id: Uuid) -> String {
    format!("{}{player_id}", player_prefix(session_id))
}

pub fn phase_doc_id(session_id: Uuid, question_index: u32) -> String {
    format!("phase::{session_id}::{question_index:05}")
}

pub fn answer_prefix(session_id: Uuid, question_id: Uuid) -> String {
    format!("answer::{session_id}::{question_id}::")
}

pub fn answer_doc_id(session_id: Uuid, question_id: Uuid, player_id: Uuid) -> String {
    format!("{}{player_id}", answer_prefix(session_id, question_id))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;
    use crate::dao::models::SessionStatus;

    fn session() -> SessionEntity {
        SessionEntity {
            id: Uuid::new_v4(),
            host_id: "host-1".into(),
            game_id: Uuid::new_v4(),
            code: "K7M2QX".into(),
            status: SessionStatus::Lobby,
            current_question_index: -1,
            timer_seconds: 20,
            speed_bonus: false,
            created_at: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            ended_at: None,
            version: 0,
        }
    }

    #[test]
    fn session_document_decodes_from_change() {
        let session = session();
        let document = CouchDocument::new(session_doc_id(session.id), DocType::Session, session.clone());
        let value = serde_json::to_value(&document).expect("serialize");
        assert_eq!(value["_id"], json!(format!("session::{}", session.id)));
        assert!(value.get("_rev").is_none());

        let row = change_row(value).expect("decode");
        assert_eq!(row, Some(ChangeRow::Session(session)));
    }

    #[test]
    fn code_reservations_are_not_rows() {
        let document = CouchDocument::new(
            code_doc_id("K7M2QX"),
            DocType::Code,
            CodeReservation {
                session_id: Uuid::new_v4(),
                reserved_at_ms: 0,
            },
        );
        let value = serde_json::to_value(&document).expect("serialize");
        assert_eq!(change_row(value).expect("decode"), None);
    }

    #[test]
    fn first_revision_is_an_insert() {
        let change: ChangeResult = serde_json::from_value(json!({
            "seq": "1-abc",
            "id": "player::x::y",
            "changes": [{"rev": "1-967a00dff5e02add41819138abb3284d"}]
        }))
        .expect("change");
        assert_eq!(change.op(), ChangeOp::Insert);

        let change: ChangeResult = serde_json::from_value(json!({
            "changes": [{"rev": "3-01"}]
        }))
        .expect("change");
        assert_eq!(change.op(), ChangeOp::Update);
    }

    #[test]
    fn reservation_waits_for_its_session_document() {
        let reservation = CodeReservation {
            session_id: Uuid::new_v4(),
            reserved_at_ms: 1_000_000,
        };
        assert!(!reservation.is_stale(None, 1_000_500));
        assert!(reservation.is_stale(None, 1_000_000 + RESERVATION_INSERT_WINDOW_MS + 1));
    }

    #[test]
    fn reservation_follows_its_holder_status() {
        let reservation = CodeReservation {
            session_id: Uuid::new_v4(),
            reserved_at_ms: 0,
        };
        let mut holder = session();
        assert!(!reservation.is_stale(Some(&holder), u64::MAX));
        holder.status = SessionStatus::Finished;
        assert!(reservation.is_stale(Some(&holder), 0));
    }

    #[test]
    fn phase_ids_sort_by_index() {
        let session_id = Uuid::new_v4();
        assert!(phase_doc_id(session_id, 9) < phase_doc_id(session_id, 10));
    }
}
