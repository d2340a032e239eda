use mongodb::options::ClientOptions;

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_DB: &str = "live_quiz";
const APP_NAME: &str = "live-quiz-back";

/// Parsed connection options plus the database holding the session collections.
#[derive(Clone)]
pub struct MongoConfig {
    pub options: ClientOptions,
    pub database_name: String,
}

impl MongoConfig {
    /// Parse `uri`, tagging connections with the service name unless the URI sets one.
    pub async fn from_uri(uri: &str, database_name: Option<&str>) -> MongoResult<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|source| MongoDaoError::InvalidUri {
                uri: uri.to_owned(),
                source,
            })?;
        options.app_name.get_or_insert_with(|| APP_NAME.to_string());

        Ok(Self {
            options,
            database_name: database_name
                .filter(|name| !name.is_empty())
                .unwrap_or(DEFAULT_DB)
                .to_owned(),
        })
    }

    /// Read `MONGO_URI` (required) and `MONGO_DB` (optional).
    pub async fn from_env() -> MongoResult<Self> {
        let uri = std::env::var("MONGO_URI")
            .map_err(|_| MongoDaoError::MissingEnvVar { var: "MONGO_URI" })?;
        let database_name = std::env::var("MONGO_DB").ok();
        Self::from_uri(&uri, database_name.as_deref()).await
    }
}
