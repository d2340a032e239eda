use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dao::session_store::ChangeEvent;

/// Message fanned out to every subscriber of one session.
#[derive(Debug, Clone)]
pub enum FeedMessage {
    /// A row was written.
    Change(ChangeEvent),
    /// The upstream feed was interrupted; subscribers must re-read a snapshot.
    Resync,
}

/// Broadcast channel shared by the subscribers of one session.
pub struct SessionFeed {
    sender: broadcast::Sender<FeedMessage>,
}

impl SessionFeed {
    fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent messages.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedMessage> {
        self.sender.subscribe()
    }

    /// Send a message to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, message: FeedMessage) {
        let _ = self.sender.send(message);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Registry of per-session feeds that currently have subscribers.
pub struct FeedHub {
    capacity: usize,
    feeds: DashMap<Uuid, Arc<SessionFeed>>,
}

impl FeedHub {
    /// Create an empty registry whose feeds buffer `capacity` messages each.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            feeds: DashMap::new(),
        }
    }

    /// Subscribe to `session_id`, creating its feed when absent.
    ///
    /// The feed is returned alongside the receiver only when it was just created, in which
    /// case the caller owns starting the pump that fills it.
    pub fn subscribe(
        &self,
        session_id: Uuid,
    ) -> (broadcast::Receiver<FeedMessage>, Option<Arc<SessionFeed>>) {
        let mut created = None;
        let entry = self.feeds.entry(session_id).or_insert_with(|| {
            let feed = Arc::new(SessionFeed::new(self.capacity));
            created = Some(feed.clone());
            feed
        });
        let receiver = entry.subscribe();
        (receiver, created)
    }

    /// Drop the feed of `session_id` if nobody listens anymore.
    ///
    /// Runs under the registry shard lock, so it cannot race a concurrent [`Self::subscribe`].
    pub fn release_if_idle(&self, session_id: Uuid) -> bool {
        self.feeds
            .remove_if(&session_id, |_, feed| feed.subscriber_count() == 0)
            .is_some()
    }

    /// Feed of `session_id`, if one is running.
    pub fn get(&self, session_id: Uuid) -> Option<Arc<SessionFeed>> {
        self.feeds.get(&session_id).map(|feed| feed.clone())
    }

    /// Number of sessions with a running feed.
    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    /// Whether no session has a running feed.
    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_first_subscriber_starts_the_feed() {
        let hub = FeedHub::new(4);
        let session_id = Uuid::new_v4();

        let (_first, created) = hub.subscribe(session_id);
        assert!(created.is_some());
        let (_second, created) = hub.subscribe(session_id);
        assert!(created.is_none());
        assert_eq!(hub.get(session_id).map(|feed| feed.subscriber_count()), Some(2));
    }

    #[test]
    fn feed_is_released_once_idle() {
        let hub = FeedHub::new(4);
        let session_id = Uuid::new_v4();

        let (receiver, _) = hub.subscribe(session_id);
        assert!(!hub.release_if_idle(session_id));
        drop(receiver);
        assert!(hub.release_if_idle(session_id));
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn messages_reach_every_subscriber() {
        let hub = FeedHub::new(4);
        let session_id = Uuid::new_v4();
        let (mut a, feed) = hub.subscribe(session_id);
        let (mut b, _) = hub.subscribe(session_id);

        feed.unwrap().broadcast(FeedMessage::Resync);
        assert!(matches!(a.recv().await, Ok(FeedMessage::Resync)));
        assert!(matches!(b.recv().await, Ok(FeedMessage::Resync)));
    }
}
