//! Room Session
//!
//! The owner of everything that runs for one open room.
//!
//! ```text
//!                 ┌──────────────── RoomSession ────────────────┐
//!   open() ──────►│ HistoryLoader ──BaseSet──┐                  │
//!                 │ LiveSubscription ─Observed┼─► Reconciler ───┼──► messages()
//!   send() ──────►│ OutboundSend ──LocalEcho─┘                  │
//!                 │ status relay ───────────────────────────────┼──► status()
//!                 └─────────────────────────────────────────────┘
//! ```
//!
//! History loading and the live subscription start together. Closing the
//! session stops both, releases the channel handle and freezes the view.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core_sync::errors::{SendFailure, SyncError, SyncResult};
use crate::core_sync::history::HistoryLoader;
use crate::core_sync::outbound::OutboundSendCoordinator;
use crate::core_sync::profiles::ProfileResolver;
use crate::core_sync::reconciler::{MessageView, Reconciler};
use crate::core_sync::subscription::{DegradedSignal, LiveSubscription, LiveSubscriptionManager, SubscriptionState};
use crate::core_sync::traits::{LiveChannel, MessageStore, ProfileLookup};
use crate::core_sync::types::{Message, Room, RoomId, UserId};

/// External collaborators a room session talks to
#[derive(Clone)]
pub struct RoomServices {
    pub store: Arc<dyn MessageStore>,
    pub profiles: Arc<dyn ProfileLookup>,
    pub channel: Arc<dyn LiveChannel>,
}

impl RoomServices {
    pub fn new(
        store: Arc<dyn MessageStore>,
        profiles: Arc<dyn ProfileLookup>,
        channel: Arc<dyn LiveChannel>,
    ) -> Self {
        Self {
            store,
            profiles,
            channel,
        }
    }
}

/// Progress of the initial history load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Ready,
    Failed(String),
}

/// Combined status of a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStatus {
    pub load: LoadState,
    pub live: SubscriptionState,
}

impl Default for RoomStatus {
    fn default() -> Self {
        Self {
            load: LoadState::Loading,
            live: SubscriptionState::Idle,
        }
    }
}

/// One open room
pub struct RoomSession {
    room_id: RoomId,
    room: Option<Room>,
    reconciler: Arc<Reconciler>,
    history: Arc<HistoryLoader>,
    outbound: OutboundSendCoordinator,
    live: LiveSubscription,
    status_tx: Arc<watch::Sender<RoomStatus>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RoomSession {
    /// Open a room: start the history load and the live subscription
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(room_id: RoomId, services: RoomServices, config: &Config) -> Self {
        info!(room_id = %room_id, "Opening room");

        let reconciler = Arc::new(Reconciler::new(room_id.clone()));
        let profiles = Arc::new(ProfileResolver::new(services.profiles.clone(), &config.profiles));
        let history = Arc::new(HistoryLoader::new(
            services.store.clone(),
            profiles.clone(),
            config.history.clone(),
        ));
        let outbound = OutboundSendCoordinator::new(
            services.store.clone(),
            profiles.clone(),
            reconciler.clone(),
            config.outbound.clone(),
        );

        let (status_tx, _) = watch::channel(RoomStatus::default());
        let status_tx = Arc::new(status_tx);

        let load_task = tokio::spawn(initial_load(
            room_id.clone(),
            history.clone(),
            reconciler.clone(),
            status_tx.clone(),
        ));

        let live = LiveSubscriptionManager::new(
            room_id.clone(),
            services.channel.clone(),
            profiles,
            reconciler.clone(),
            config.live.clone(),
        )
        .with_catch_up(history.clone())
        .spawn();

        let relay_task = tokio::spawn(relay_live_state(live.watch(), status_tx.clone()));

        Self {
            room_id,
            room: None,
            reconciler,
            history,
            outbound,
            live,
            status_tx,
            tasks: Mutex::new(vec![load_task, relay_task]),
            closed: AtomicBool::new(false),
        }
    }

    /// Open a room whose participant set is known; sends from others are rejected
    pub fn open_room(room: &Room, services: RoomServices, config: &Config) -> Self {
        let mut session = Self::open(room.id.clone(), services, config);
        session.room = Some(room.clone());
        session
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Reactive view of the room's messages
    pub fn messages(&self) -> watch::Receiver<MessageView> {
        self.reconciler.subscribe()
    }

    pub fn snapshot(&self) -> MessageView {
        self.reconciler.snapshot()
    }

    pub fn status(&self) -> watch::Receiver<RoomStatus> {
        self.status_tx.subscribe()
    }

    pub fn load_state(&self) -> LoadState {
        self.status_tx.borrow().load.clone()
    }

    pub fn live_state(&self) -> SubscriptionState {
        self.live.state()
    }

    /// Resolves with the degraded signal if the live subscription gives up
    ///
    /// Returns `None` if the session closed first, or if another caller
    /// already took the signal.
    pub async fn degraded(&self) -> Option<DegradedSignal> {
        let rx = self.live.take_degraded()?;
        rx.await.ok()
    }

    /// Send a message as `sender`
    pub async fn send(&self, sender: &UserId, text: &str) -> Result<Message, SendFailure> {
        if self.is_closed() {
            return Err(SendFailure::new(text, SyncError::RoomClosed(self.room_id.to_string())));
        }
        if let Some(room) = &self.room {
            if !room.is_participant(sender) {
                warn!(room_id = %self.room_id, sender = %sender, "Send from non-participant");
                return Err(SendFailure::new(
                    text,
                    SyncError::SendRejected(format!("{sender} is not a participant")),
                ));
            }
        }
        self.outbound.send(&self.room_id, sender, text).await
    }

    /// Reload history and merge it into the view
    ///
    /// # Returns
    /// Number of messages that were not already present
    pub async fn refresh(&self) -> SyncResult<usize> {
        if self.is_closed() {
            return Err(SyncError::RoomClosed(self.room_id.to_string()));
        }

        let messages = self.history.load(&self.room_id).await?;
        let outcome = self.reconciler.base_set(messages);
        self.status_tx.send_modify(|status| status.load = LoadState::Ready);

        debug!(room_id = %self.room_id, inserted = outcome.inserted, "Room refreshed");
        Ok(outcome.inserted)
    }

    /// Stop live updates and freeze the view. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }

        self.live.close().await;
        self.reconciler.close();
        self.status_tx.send_modify(|status| status.live = SubscriptionState::Closed);

        info!(room_id = %self.room_id, messages = self.reconciler.len(), "Room closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

async fn initial_load(
    room_id: RoomId,
    history: Arc<HistoryLoader>,
    reconciler: Arc<Reconciler>,
    status_tx: Arc<watch::Sender<RoomStatus>>,
) {
    match history.load(&room_id).await {
        Ok(messages) => {
            reconciler.base_set(messages);
            status_tx.send_modify(|status| status.load = LoadState::Ready);
        }
        Err(e) => {
            warn!(room_id = %room_id, error = %e, "Initial history load failed");
            status_tx.send_modify(|status| status.load = LoadState::Failed(e.to_string()));
        }
    }
}

async fn relay_live_state(
    mut live_rx: watch::Receiver<SubscriptionState>,
    status_tx: Arc<watch::Sender<RoomStatus>>,
) {
    loop {
        let state = live_rx.borrow_and_update().clone();
        status_tx.send_if_modified(|status| {
            if status.live == state {
                return false;
            }
            status.live = state;
            true
        });
        if live_rx.changed().await.is_err() {
            return;
        }
    }
}
