use std::time::Duration;

use mongodb::{
    Client, Database,
    bson::{Document, doc},
    options::ClientOptions,
};
use tokio::time::sleep;
use tracing::{info, warn};

use super::error::{MongoDaoError, MongoResult};

const PING_ATTEMPTS: u32 = 10;
const FIRST_RETRY: Duration = Duration::from_millis(250);
const LAST_RETRY: Duration = Duration::from_secs(5);

/// Build a client for `database_name`, wait until it answers, and check the deployment
/// can serve change streams.
pub async fn establish_connection(
    options: &ClientOptions,
    database_name: &str,
) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    let hello = wait_for_hello(&database).await?;
    if !supports_change_streams(&hello) {
        return Err(MongoDaoError::ChangeStreamsUnsupported);
    }
    Ok((client, database))
}

async fn wait_for_hello(database: &Database) -> MongoResult<Document> {
    let mut delay = FIRST_RETRY;
    let mut attempts = 0;
    loop {
        match database.run_command(doc! { "hello": 1 }).await {
            Ok(reply) => {
                if attempts > 0 {
                    info!(attempts, "connected to MongoDB after retry");
                }
                return Ok(reply);
            }
            Err(err) => {
                attempts += 1;
                if attempts >= PING_ATTEMPTS {
                    return Err(MongoDaoError::InitialPing {
                        attempts,
                        source: err,
                    });
                }
                warn!(attempts, error = %err, "MongoDB unreachable; retrying");
                sleep(delay).await;
                delay = (delay * 2).min(LAST_RETRY);
            }
        }
    }
}

/// Change streams need a replica set member or a mongos router; standalone servers
/// reject `watch`.
fn supports_change_streams(hello: &Document) -> bool {
    hello.get_str("setName").is_ok() || hello.get_str("msg").is_ok_and(|msg| msg == "isdbgrid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standalone_servers_cannot_feed_sessions() {
        assert!(!supports_change_streams(&doc! { "isWritablePrimary": true }));
    }

    #[test]
    fn replica_sets_and_routers_can() {
        assert!(supports_change_streams(&doc! { "setName": "rs0" }));
        assert!(supports_change_streams(&doc! { "msg": "isdbgrid" }));
    }
}
