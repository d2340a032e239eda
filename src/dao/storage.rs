use std::{error::Error, fmt};
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Store-level constraint whose violation rejects a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// Join code already held by a non-finished session.
    ActiveSessionCode,
    /// A phase row already exists for this (session, question index).
    QuestionPhaseIndex,
    /// The player already answered this question.
    SingleAnswer,
    /// The row changed since it was read.
    RowVersion,
    /// The row to update does not exist.
    MissingRow,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Constraint::ActiveSessionCode => "join code already in use by an active session",
            Constraint::QuestionPhaseIndex => "question already activated in this session",
            Constraint::SingleAnswer => "answer already submitted for this question",
            Constraint::RowVersion => "row was modified concurrently",
            Constraint::MissingRow => "row does not exist",
        };
        f.write_str(label)
    }
}

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("constraint violated: {constraint}")]
    Conflict { constraint: Constraint },
    #[error("change feed lagged behind and dropped {skipped} event(s)")]
    FeedLagged { skipped: u64 },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a constraint violation.
    pub fn conflict(constraint: Constraint) -> Self {
        StorageError::Conflict { constraint }
    }

    /// Constraint violated by the write, if this is a rejection rather than a failure.
    pub fn constraint(&self) -> Option<Constraint> {
        match self {
            StorageError::Conflict { constraint } => Some(*constraint),
            _ => None,
        }
    }
}
