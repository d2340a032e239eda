//! Failures of the CouchDB session store.

use reqwest::StatusCode;
use thiserror::Error;

use crate::dao::storage::Constraint;

pub type CouchResult<T> = Result<T, CouchDaoError>;

#[derive(Debug, Error)]
pub enum CouchDaoError {
    #[error("missing CouchDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to build CouchDB client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// Reading, creating or polling the database itself failed.
    #[error("CouchDB database `{database}` unreachable ({action})")]
    Database {
        database: String,
        action: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("CouchDB answered {status} for database `{database}`")]
    DatabaseStatus {
        database: String,
        status: StatusCode,
    },
    #[error("failed to send CouchDB request to `{path}`")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("CouchDB answered {status} for `{path}`")]
    RequestStatus { path: String, status: StatusCode },
    #[error("failed to decode CouchDB response for `{path}`")]
    DecodeResponse {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// A stored document no longer matches the session row layout.
    #[error("document `{path}` is not a valid session row")]
    DeserializeValue {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// A 409 on a deterministic id: another writer already holds the slot.
    #[error("write to `{path}` rejected: {constraint}")]
    Rejected {
        path: String,
        constraint: Constraint,
    },
}

impl CouchDaoError {
    pub(super) fn database(
        database: &str,
        action: &'static str,
    ) -> impl FnOnce(reqwest::Error) -> Self {
        let database = database.to_string();
        move |source| Self::Database {
            database,
            action,
            source,
        }
    }
}
