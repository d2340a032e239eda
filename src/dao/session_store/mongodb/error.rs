use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;

use crate::dao::storage::Constraint;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Server error code reported when a unique index rejects a write.
const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB deployment has no replica set; session change streams are unavailable")]
    ChangeStreamsUnsupported,
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("write to `{collection}` rejected: {constraint}")]
    Rejected {
        collection: &'static str,
        constraint: Constraint,
    },
    #[error("failed to write to `{collection}`")]
    Write {
        collection: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to read from `{collection}`")]
    Read {
        collection: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to watch `{collection}`")]
    Watch {
        collection: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("document in `{collection}` holds an invalid identifier")]
    CorruptDocument {
        collection: &'static str,
        #[source]
        source: uuid::Error,
    },
}

impl MongoDaoError {
    /// Classify a failed write, mapping unique index violations to `constraint`.
    pub fn write(collection: &'static str, constraint: Constraint, source: MongoError) -> Self {
        if is_duplicate_key(&source) {
            MongoDaoError::Rejected {
                collection,
                constraint,
            }
        } else {
            MongoDaoError::Write { collection, source }
        }
    }

    /// Constraint behind a rejected write.
    pub fn constraint(&self) -> Option<Constraint> {
        match self {
            MongoDaoError::Rejected { constraint, .. } => Some(*constraint),
            _ => None,
        }
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}
