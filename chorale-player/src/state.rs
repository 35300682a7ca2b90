//! Shared service state
//!
//! Holds the event bus every SSE client subscribes to and the single
//! playback session. Navigating to another song replaces the session
//! wholesale: the old one is torn down before the new one starts loading.
//! Loading happens outside the state lock, so reads and a close never wait
//! on the network; a close during loading cancels the load.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chorale_common::events::{ChoraleEvent, EventBus};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::playback::SessionDriver;

/// Events buffered per SSE subscriber before the slowest ones lag
const EVENT_CAPACITY: usize = 256;

enum SessionSlot {
    Idle,
    /// A session for `song_id` is loading; `cancel` abandons it
    Loading {
        id: u64,
        song_id: Uuid,
        cancel: CancellationToken,
    },
    Active(Arc<SessionDriver>),
}

impl SessionSlot {
    fn song_id(&self) -> Option<Uuid> {
        match self {
            SessionSlot::Idle => None,
            SessionSlot::Loading { song_id, .. } => Some(*song_id),
            SessionSlot::Active(driver) => Some(driver.song_id()),
        }
    }
}

/// Shared state accessible by all handlers
pub struct SharedState {
    /// Event broadcaster for SSE events
    pub events: EventBus,

    /// Current session, loading or active
    session: RwLock<SessionSlot>,

    /// Held for a whole open so two opens never load at once
    opening: Mutex<()>,

    next_open: AtomicU64,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            events: EventBus::new(EVENT_CAPACITY),
            session: RwLock::new(SessionSlot::Idle),
            opening: Mutex::new(()),
            next_open: AtomicU64::new(1),
        }
    }

    /// Broadcast an event to all SSE listeners
    pub fn broadcast_event(&self, event: ChoraleEvent) {
        self.events.emit_lossy(event);
    }

    /// Subscribe to event stream for SSE
    pub fn subscribe_events(&self) -> broadcast::Receiver<ChoraleEvent> {
        self.events.subscribe()
    }

    /// Active session; `NoSession` while idle or still loading
    pub async fn active_session(&self) -> Result<Arc<SessionDriver>> {
        match &*self.session.read().await {
            SessionSlot::Active(driver) => Ok(Arc::clone(driver)),
            _ => Err(Error::NoSession),
        }
    }

    /// True while a session is loading
    pub async fn is_loading(&self) -> bool {
        matches!(&*self.session.read().await, SessionSlot::Loading { .. })
    }

    /// Tear down the current session, then install the one `open` builds
    ///
    /// `open` receives a token that is cancelled when a close or a newer
    /// open supersedes this one; the result is then discarded and the
    /// call fails with `Cancelled`. When `open` fails no session is active.
    pub async fn replace_session<F, Fut>(&self, song_id: Uuid, open: F) -> Result<Arc<SessionDriver>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<Arc<SessionDriver>>>,
    {
        let id = self.next_open.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let previous = self.swap(SessionSlot::Loading {
            id,
            song_id,
            cancel: cancel.clone(),
        })
        .await;
        retire(previous).await;

        // A superseded open finishes its cleanup before this one loads
        let _opening = self.opening.lock().await;
        let result = if cancel.is_cancelled() {
            Err(Error::Cancelled(song_id.to_string()))
        } else {
            open(cancel.clone()).await
        };

        let mut slot = self.session.write().await;
        let current = matches!(&*slot, SessionSlot::Loading { id: slot_id, .. } if *slot_id == id);
        match result {
            Ok(driver) if current => {
                *slot = SessionSlot::Active(Arc::clone(&driver));
                Ok(driver)
            }
            Ok(driver) => {
                drop(slot);
                info!("Discarding superseded session for song {}", song_id);
                driver.close().await;
                Err(Error::Cancelled(song_id.to_string()))
            }
            Err(e) => {
                if current {
                    *slot = SessionSlot::Idle;
                }
                Err(e)
            }
        }
    }

    /// Tear down the session, or cancel its loading; false when idle
    pub async fn close_session(&self) -> bool {
        let previous = self.swap(SessionSlot::Idle).await;
        retire(previous).await
    }

    /// Close the session only when it plays (or loads) `song_id`
    pub async fn close_session_for(&self, song_id: Uuid) -> bool {
        let previous = {
            let mut slot = self.session.write().await;
            if slot.song_id() != Some(song_id) {
                return false;
            }
            std::mem::replace(&mut *slot, SessionSlot::Idle)
        };
        retire(previous).await
    }

    async fn swap(&self, next: SessionSlot) -> SessionSlot {
        std::mem::replace(&mut *self.session.write().await, next)
    }
}

/// Close an active session or cancel a loading one; false for idle
async fn retire(slot: SessionSlot) -> bool {
    match slot {
        SessionSlot::Idle => false,
        SessionSlot::Loading { song_id, cancel, .. } => {
            info!("Cancelling session load for song {}", song_id);
            cancel.cancel();
            true
        }
        SessionSlot::Active(driver) => {
            info!("Closing session for song {}", driver.song_id());
            driver.close().await;
            true
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
