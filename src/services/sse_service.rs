use std::{convert::Infallible, sync::Arc, time::Duration, time::SystemTime};

use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{GameEntity, SessionStatus},
        session_store::{ChangeEvent, ChangeOp, ChangeRow, SessionStore},
    },
    dto::{
        phase::PhaseSummary,
        player::{AnswerView, PlayerSummary, StandingDto},
        session::SessionSummary,
        sse::{
            AnswerRecordedEvent, LeaderboardEvent, PhaseEvent, PlayerRemovedEvent, ServerEvent,
            names,
        },
        sync::{QuestionView, SyncQuery},
    },
    error::ServiceError,
    services::{context::load_game, sync_service},
    state::{
        FeedMessage, SharedState,
        views::{Delivery, Role, SessionSubscriber, ViewUpdate, subscriber_for},
    },
};

/// Authorize the caller, then stream role-filtered session events.
///
/// The first event is always a `sync.snapshot`. Lag on the fan-out or a resync marker
/// from the pump triggers another one.
pub async fn session_stream(
    state: &SharedState,
    session_id: Uuid,
    query: SyncQuery,
    host_id: Option<&str>,
) -> Result<Sse<KeepAliveStream<ReceiverStream<Result<Event, Infallible>>>>, ServiceError> {
    let store = state.require_session_store().await?;
    let role = sync_service::authorize_role(&store, session_id, &query, host_id).await?;
    let session = store
        .find_session(session_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}` not found")))?;
    let game = load_game(&store, session.game_id).await?;

    // Subscribe before the first snapshot read so no write falls between the two.
    let receiver = sync_service::subscribe(state, session_id);
    info!(%session_id, ?role, "session stream connected");

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(16);
    tokio::spawn(forward(
        store,
        session_id,
        game,
        subscriber_for(role),
        receiver,
        tx,
    ));

    let stream = ReceiverStream::new(rx);
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

/// Forwarder task: folds fan-out messages into the subscriber and pushes the resulting
/// events into the response channel until the client disconnects or the view ends.
async fn forward(
    store: Arc<dyn SessionStore>,
    session_id: Uuid,
    game: GameEntity,
    mut subscriber: Box<dyn SessionSubscriber>,
    mut receiver: tokio::sync::broadcast::Receiver<FeedMessage>,
    tx: mpsc::Sender<Result<Event, Infallible>>,
) {
    let role = subscriber.role();
    let mut open = send_snapshot(&store, session_id, subscriber.as_mut(), &tx).await;

    while open {
        tokio::select! {
            _ = tx.closed() => break,
            message = receiver.recv() => match message {
                Ok(FeedMessage::Change(change)) => {
                    let update = subscriber.apply(&change);
                    let events =
                        render_change(&store, &game, subscriber.as_ref(), &change, update).await;
                    for event in events {
                        if !send(&tx, event).await {
                            open = false;
                            break;
                        }
                    }
                    if update.terminal {
                        info!(%session_id, ?role, "session stream reached terminal view");
                        break;
                    }
                }
                Ok(FeedMessage::Resync) => {
                    open = send_snapshot(&store, session_id, subscriber.as_mut(), &tx).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(%session_id, skipped, "session stream lagged; resyncing");
                    open = send_snapshot(&store, session_id, subscriber.as_mut(), &tx).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    info!(%session_id, ?role, "session stream disconnected");
}

/// Resync the subscriber and emit the snapshot. Returns false once the stream should end.
async fn send_snapshot(
    store: &Arc<dyn SessionStore>,
    session_id: Uuid,
    subscriber: &mut dyn SessionSubscriber,
    tx: &mpsc::Sender<Result<Event, Infallible>>,
) -> bool {
    let snapshot = match sync_service::resync(store, session_id, subscriber).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(%session_id, error = %err, "failed to read session snapshot");
            return !tx.is_closed();
        }
    };

    let removed = snapshot.removed == Some(true);
    if !send_json(tx, names::SNAPSHOT, &snapshot).await {
        return false;
    }
    if let (true, Role::Player(player_id)) = (removed, subscriber.role()) {
        send_json(tx, names::PLAYER_REMOVED, &PlayerRemovedEvent { player_id }).await;
        return false;
    }
    true
}

/// Translate one folded change into the events its role should see.
async fn render_change(
    store: &Arc<dyn SessionStore>,
    game: &GameEntity,
    subscriber: &dyn SessionSubscriber,
    change: &ChangeEvent,
    update: ViewUpdate,
) -> Vec<ServerEvent> {
    if update.delivery == Delivery::Skip {
        return Vec::new();
    }
    let view = subscriber.view();
    let now = SystemTime::now();
    let mut events = Vec::new();

    match &change.row {
        ChangeRow::Session(session) => {
            push(
                &mut events,
                names::SESSION_UPDATED,
                &SessionSummary::from_entity(session, game.question_count()),
            );
            if session.status == SessionStatus::Finished {
                push_leaderboard(&mut events, subscriber);
            }
        }
        ChangeRow::Player(player) if player.removed => push(
            &mut events,
            names::PLAYER_REMOVED,
            &PlayerRemovedEvent {
                player_id: player.id,
            },
        ),
        ChangeRow::Player(player) => {
            let name = match change.op {
                ChangeOp::Insert => names::PLAYER_JOINED,
                ChangeOp::Update => names::PLAYER_UPDATED,
            };
            push(&mut events, name, &PlayerSummary::from(player));
        }
        ChangeRow::Phase(phase) => {
            let answers = if phase.show_results {
                store
                    .list_question_answers(phase.session_id, phase.question_id)
                    .await
                    .unwrap_or_else(|err| {
                        warn!(session_id = %phase.session_id, error = %err, "failed to read answer tallies");
                        Vec::new()
                    })
            } else {
                Vec::new()
            };
            let question = game
                .question(phase.question_index as usize)
                .map(|question| QuestionView::build(question, phase, &answers));
            let name = match change.op {
                ChangeOp::Insert => names::PHASE_ACTIVATED,
                ChangeOp::Update => names::PHASE_UPDATED,
            };
            push(
                &mut events,
                name,
                &PhaseEvent {
                    phase: PhaseSummary::from_entity(phase, now),
                    question,
                },
            );
            if phase.show_leaderboard {
                push_leaderboard(&mut events, subscriber);
            }
        }
        ChangeRow::Answer(answer) => {
            let detail = match (update.delivery, subscriber.role()) {
                (Delivery::Full, Role::Host) => Some(AnswerView::from_entity(answer, true)),
                (Delivery::Full, Role::Player(player_id)) if player_id == answer.player_id => {
                    Some(AnswerView::from_entity(answer, false))
                }
                _ => None,
            };
            push(
                &mut events,
                names::ANSWER_RECORDED,
                &AnswerRecordedEvent {
                    question_id: answer.question_id,
                    answered_count: view.answered_count(),
                    answer: detail,
                },
            );
        }
    }
    events
}

fn push_leaderboard(events: &mut Vec<ServerEvent>, subscriber: &dyn SessionSubscriber) {
    let standings = subscriber
        .view()
        .leaderboard()
        .into_iter()
        .map(StandingDto::from)
        .collect();
    push(events, names::LEADERBOARD, &LeaderboardEvent { standings });
}

fn push<T: serde::Serialize>(events: &mut Vec<ServerEvent>, name: &str, payload: &T) {
    match ServerEvent::json(Some(name.to_string()), payload) {
        Ok(event) => events.push(event),
        Err(err) => warn!(event = name, error = %err, "failed to serialise SSE payload"),
    }
}

async fn send_json<T: serde::Serialize>(
    tx: &mpsc::Sender<Result<Event, Infallible>>,
    name: &str,
    payload: &T,
) -> bool {
    match ServerEvent::json(Some(name.to_string()), payload) {
        Ok(event) => send(tx, event).await,
        Err(err) => {
            warn!(event = name, error = %err, "failed to serialise SSE payload");
            true
        }
    }
}

async fn send(tx: &mpsc::Sender<Result<Event, Infallible>>, payload: ServerEvent) -> bool {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    tx.send(Ok(event)).await.is_ok()
}
