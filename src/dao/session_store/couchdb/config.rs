use std::time::Duration;

use super::error::{CouchDaoError, CouchResult};

const DEFAULT_DB: &str = "live_quiz";
const DEFAULT_CHANGES_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the session documents live and how long a `_changes` long-poll may hang.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    pub base_url: String,
    pub database: String,
    pub credentials: Option<(String, String)>,
    /// Server-side long-poll window; the HTTP request itself may take twice as long.
    pub changes_timeout: Duration,
}

impl CouchConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            database: DEFAULT_DB.to_string(),
            credentials: None,
            changes_timeout: DEFAULT_CHANGES_TIMEOUT,
        }
    }

    /// Read `COUCH_BASE_URL` (required), `COUCH_DB`, `COUCH_USERNAME`/`COUCH_PASSWORD`
    /// and `COUCH_CHANGES_TIMEOUT_MS`.
    pub fn from_env() -> CouchResult<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CouchResult<Self> {
        let base_url = lookup("COUCH_BASE_URL").ok_or(CouchDaoError::MissingEnvVar {
            var: "COUCH_BASE_URL",
        })?;

        let mut config = Self::new(base_url);
        if let Some(database) = lookup("COUCH_DB").filter(|db| !db.is_empty()) {
            config.database = database;
        }
        config.credentials = lookup("COUCH_USERNAME").zip(lookup("COUCH_PASSWORD"));
        if let Some(ms) = lookup("COUCH_CHANGES_TIMEOUT_MS").and_then(|ms| ms.parse().ok()) {
            config.changes_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }
}
