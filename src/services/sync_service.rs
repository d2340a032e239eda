//! Resync reads and the per-session change pump.
//!
//! Clients never rely on the feed alone: every connection starts from a snapshot read
//! straight from the store, and any interruption of the feed forces a fresh one.

use std::{sync::Arc, time::Duration, time::SystemTime};

use futures::StreamExt;
use tokio::{sync::broadcast, time::sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{models::GameEntity, session_store::SessionStore, storage::StorageError},
    dto::sync::{RoleParam, SyncQuery, SyncSnapshot},
    error::ServiceError,
    services::context::{
        authenticate_player, current_phase, ensure_host, load_game, load_session,
    },
    state::{
        FeedMessage, SessionFeed, SharedState,
        views::{Role, SessionSnapshot, SessionSubscriber, subscriber_for},
    },
};

const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(250);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Read everything a subscriber needs to rebuild its view of `session_id`.
pub async fn load_snapshot(
    store: &Arc<dyn SessionStore>,
    session_id: Uuid,
) -> Result<(SessionSnapshot, GameEntity), ServiceError> {
    let session = load_session(store, session_id).await?;
    let game = load_game(store, session.game_id).await?;
    let players = store.list_players(session_id).await?;
    let phase = current_phase(store, &session).await?;

    let question = phase
        .as_ref()
        .and_then(|phase| game.question(phase.question_index as usize))
        .cloned();
    let answers = match &phase {
        Some(phase) => {
            store
                .list_question_answers(session_id, phase.question_id)
                .await?
        }
        None => Vec::new(),
    };

    let snapshot = SessionSnapshot {
        session,
        players,
        phase,
        question,
        answers,
        question_count: game.question_count(),
    };
    Ok((snapshot, game))
}

/// Check the caller may take `query.role` on `session_id`.
pub async fn authorize_role(
    store: &Arc<dyn SessionStore>,
    session_id: Uuid,
    query: &SyncQuery,
    host_id: Option<&str>,
) -> Result<Role, ServiceError> {
    match query.role {
        RoleParam::Host => {
            let host_id = host_id.ok_or_else(|| {
                ServiceError::Unauthorized("missing host identity header `x-host-id`".into())
            })?;
            let session = load_session(store, session_id).await?;
            ensure_host(&session, host_id)?;
            Ok(Role::Host)
        }
        RoleParam::Display => {
            load_session(store, session_id).await?;
            Ok(Role::Display)
        }
        RoleParam::Player => {
            let (Some(player_id), Some(token)) = (query.player_id, query.token.as_deref()) else {
                return Err(ServiceError::Unauthorized(
                    "player role requires `player_id` and `token`".into(),
                ));
            };
            authenticate_player(store, session_id, player_id, token).await?;
            Ok(Role::Player(player_id))
        }
    }
}

/// Serve the resync payload over plain HTTP.
pub async fn snapshot(
    state: &SharedState,
    session_id: Uuid,
    query: SyncQuery,
    host_id: Option<&str>,
) -> Result<SyncSnapshot, ServiceError> {
    let store = state.require_session_store().await?;
    let role = authorize_role(&store, session_id, &query, host_id).await?;
    let (snapshot, _) = load_snapshot(&store, session_id).await?;

    let mut subscriber = subscriber_for(role);
    subscriber.resync(snapshot.clone());
    Ok(SyncSnapshot::build(&snapshot, &*subscriber, SystemTime::now()))
}

/// Read a snapshot and resync `subscriber` on it.
pub async fn resync(
    store: &Arc<dyn SessionStore>,
    session_id: Uuid,
    subscriber: &mut dyn SessionSubscriber,
) -> Result<SyncSnapshot, ServiceError> {
    let (snapshot, _) = load_snapshot(store, session_id).await?;
    subscriber.resync(snapshot.clone());
    Ok(SyncSnapshot::build(&snapshot, subscriber, SystemTime::now()))
}

/// Join the fan-out of `session_id`, starting its pump if this is the first subscriber.
pub fn subscribe(state: &SharedState, session_id: Uuid) -> broadcast::Receiver<FeedMessage> {
    let (receiver, created) = state.feeds().subscribe(session_id);
    if let Some(feed) = created {
        tokio::spawn(run_pump(state.clone(), session_id, feed));
    }
    receiver
}

/// Forward store changes of one session to its fan-out until nobody listens.
///
/// Every (re)subscription to the store is followed by a [`FeedMessage::Resync`]: writes
/// landing before the store feed went live are only visible through a fresh read.
async fn run_pump(state: SharedState, session_id: Uuid, feed: Arc<SessionFeed>) {
    info!(%session_id, "session feed started");
    let mut delay = INITIAL_RETRY_DELAY;

    loop {
        if is_idle(&state, session_id, &feed) {
            break;
        }

        let store = match state.require_session_store().await {
            Ok(store) => store,
            Err(_) => {
                sleep(delay).await;
                delay = (delay * 2).min(MAX_RETRY_DELAY);
                continue;
            }
        };

        let mut changes = match store.subscribe(session_id).await {
            Ok(changes) => changes,
            Err(err) => {
                warn!(%session_id, error = %err, "failed to open store feed; retrying");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_RETRY_DELAY);
                continue;
            }
        };
        feed.broadcast(FeedMessage::Resync);
        let mut idle_check = tokio::time::interval(IDLE_CHECK_INTERVAL);
        idle_check.tick().await;

        loop {
            tokio::select! {
                item = changes.next() => match item {
                    Some(Ok(change)) => {
                        delay = INITIAL_RETRY_DELAY;
                        feed.broadcast(FeedMessage::Change(change));
                    }
                    Some(Err(StorageError::FeedLagged { skipped })) => {
                        debug!(%session_id, skipped, "store feed lagged; forcing resync");
                        feed.broadcast(FeedMessage::Resync);
                    }
                    Some(Err(err)) => {
                        warn!(%session_id, error = %err, "store feed failed; reconnecting");
                        break;
                    }
                    None => {
                        debug!(%session_id, "store feed ended; reconnecting");
                        break;
                    }
                },
                _ = idle_check.tick() => {
                    if is_idle(&state, session_id, &feed) {
                        info!(%session_id, "session feed stopped");
                        return;
                    }
                }
            }
        }

        sleep(delay).await;
        delay = (delay * 2).min(MAX_RETRY_DELAY);
    }
    info!(%session_id, "session feed stopped");
}

/// Whether the pump of `feed` should stop: nobody listens or the feed was replaced.
fn is_idle(state: &SharedState, session_id: Uuid, feed: &Arc<SessionFeed>) -> bool {
    if feed.subscriber_count() > 0 {
        return false;
    }
    state.feeds().release_if_idle(session_id);
    match state.feeds().get(session_id) {
        Some(current) => !Arc::ptr_eq(&current, feed) && feed.subscriber_count() == 0,
        None => true,
    }
}
