mod feed;
pub mod join_code;
pub mod phase;
pub mod roster;
pub mod scoring;
pub mod state_machine;
pub mod transitions;
pub mod views;

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::{
    sync::{RwLock, watch},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{config::AppConfig, dao::session_store::SessionStore, error::ServiceError};

pub use self::feed::{FeedHub, FeedMessage, SessionFeed};

pub type SharedState = Arc<AppState>;

/// Central application state: the store handle and per-process task registries.
///
/// Nothing in here is authoritative game state. Sessions live in the store; the feed
/// and timer registries only track background tasks serving them.
pub struct AppState {
    session_store: RwLock<Option<Arc<dyn SessionStore>>>,
    degraded: watch::Sender<bool>,
    config: Arc<AppConfig>,
    feeds: FeedHub,
    timers: DashMap<Uuid, JoinHandle<()>>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let feeds = FeedHub::new(config.feed_capacity);
        Arc::new(Self {
            session_store: RwLock::new(None),
            degraded: degraded_tx,
            config: Arc::new(config),
            feeds,
            timers: DashMap::new(),
        })
    }

    /// Build a state with `store` already installed.
    pub async fn with_store(config: AppConfig, store: Arc<dyn SessionStore>) -> SharedState {
        let state = Self::new(config);
        state.set_session_store(store).await;
        state
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.session_store.read().await;
        guard.as_ref().cloned()
    }

    /// Obtain the session store or fail with [`ServiceError::Degraded`].
    pub async fn require_session_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        self.session_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new session store implementation and leave degraded mode.
    pub async fn set_session_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.session_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current session store and enter degraded mode.
    pub async fn clear_session_store(&self) {
        {
            let mut guard = self.session_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Upper bound on the durable writes of a single transition.
    pub fn transition_timeout(&self) -> Option<Duration> {
        self.config.transition_timeout
    }

    /// Registry of per-session change fan-outs.
    pub fn feeds(&self) -> &FeedHub {
        &self.feeds
    }

    /// Registry of armed expiry watchers keyed by session.
    pub fn timers(&self) -> &DashMap<Uuid, JoinHandle<()>> {
        &self.timers
    }
}
