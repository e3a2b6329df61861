//! Live Subscription Manager
//!
//! One task per open room owns the channel handle and the retry counter and
//! drives this state machine:
//!
//! ```text
//!            open
//!   Idle ──────────► Connecting ──ack──► Subscribed
//!                      ▲    │                 │
//!              backoff │    │ error/timeout   │ closed/error/stream end
//!                      │    ▼                 │
//!                      └─ Failed ◄────────────┘
//!                           │
//!                           │ max_attempts consecutive failures
//!                           │ (a stream that held for stable_after resets the count)
//!                           ▼
//!                         GaveUp   (one DegradedSignal)
//!
//!   any state ──close()──► Closed
//! ```
//!
//! While `Subscribed`, insert records for the room are enriched and handed to
//! the reconciler as `Observed`. Everything else on the stream is ignored.

use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::LiveConfig;
use crate::core_sync::backoff::BackoffPolicy;
use crate::core_sync::history::HistoryLoader;
use crate::core_sync::profiles::ProfileResolver;
use crate::core_sync::reconciler::Reconciler;
use crate::core_sync::traits::{
    ChangeOp, ChangeRecord, ChannelEvent, ChannelHandle, ChannelStatus, ChannelSubscription, LiveChannel,
};
use crate::core_sync::types::{Message, RoomId};
use crate::metrics::{record_counter, LIVE_EVENTS, LIVE_GAVE_UP, LIVE_IGNORED, LIVE_RECONNECTS};
use crate::shutdown::{ShutdownCoordinator, ShutdownListener};

/// State of the live subscription for one room
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    /// `attempt` is 1-based within the current run of failures
    Connecting { attempt: u32 },
    Subscribed,
    Failed { attempt: u32, reason: String },
    /// Retries exhausted; the room works without live updates
    GaveUp { attempts: u32 },
    Closed,
}

impl SubscriptionState {
    /// `GaveUp` and `Closed` never change again on their own
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionState::GaveUp { .. } | SubscriptionState::Closed)
    }

    pub fn is_live(&self) -> bool {
        matches!(self, SubscriptionState::Subscribed)
    }
}

/// Emitted once when a room's subscription gives up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradedSignal {
    pub room_id: RoomId,
    pub attempts: u32,
    pub last_error: String,
}

enum ConnectOutcome {
    Connected {
        subscription: ChannelSubscription,
        buffered: Vec<ChangeRecord>,
    },
    Failed {
        reason: String,
        handle: Option<ChannelHandle>,
    },
    Shutdown(Option<ChannelHandle>),
}

enum StreamEnd {
    Failed(String),
    Shutdown,
}

/// Configures and starts the live subscription task for a room
pub struct LiveSubscriptionManager {
    room_id: RoomId,
    channel: Arc<dyn LiveChannel>,
    profiles: Arc<ProfileResolver>,
    reconciler: Arc<Reconciler>,
    config: LiveConfig,
    catch_up: Option<Arc<HistoryLoader>>,
}

impl LiveSubscriptionManager {
    pub fn new(
        room_id: RoomId,
        channel: Arc<dyn LiveChannel>,
        profiles: Arc<ProfileResolver>,
        reconciler: Arc<Reconciler>,
        config: LiveConfig,
    ) -> Self {
        Self {
            room_id,
            channel,
            profiles,
            reconciler,
            config,
            catch_up: None,
        }
    }

    /// Reload history through `loader` after each reconnect
    ///
    /// Only used when `live.resync_on_reconnect` is set.
    pub fn with_catch_up(mut self, loader: Arc<HistoryLoader>) -> Self {
        self.catch_up = Some(loader);
        self
    }

    /// Spawn the subscription task
    pub fn spawn(self) -> LiveSubscription {
        let (state_tx, _) = watch::channel(SubscriptionState::Idle);
        let state_tx = Arc::new(state_tx);
        let (degraded_tx, degraded_rx) = oneshot::channel();
        let shutdown = ShutdownCoordinator::new(format!("live:{}", self.room_id));
        let room_id = self.room_id.clone();

        let task = tokio::spawn(self.run(state_tx.clone(), degraded_tx, shutdown.listener()));

        LiveSubscription {
            room_id,
            state_tx,
            degraded_rx: Mutex::new(Some(degraded_rx)),
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    async fn run(
        self,
        state_tx: Arc<watch::Sender<SubscriptionState>>,
        degraded_tx: oneshot::Sender<DegradedSignal>,
        mut shutdown: ShutdownListener,
    ) {
        let backoff = BackoffPolicy::new(self.config.base_backoff, self.config.max_backoff);
        let max_attempts = self.config.max_attempts.max(1);
        let mut failures = 0u32;
        let mut recovering = false;

        loop {
            state_tx.send_replace(SubscriptionState::Connecting { attempt: failures + 1 });

            let reason = match self.connect(&mut shutdown).await {
                ConnectOutcome::Shutdown(handle) => {
                    self.release(handle).await;
                    break;
                }
                ConnectOutcome::Failed { reason, handle } => {
                    self.release(handle).await;
                    reason
                }
                ConnectOutcome::Connected {
                    mut subscription,
                    buffered,
                } => {
                    let subscribed_at = tokio::time::Instant::now();
                    state_tx.send_replace(SubscriptionState::Subscribed);
                    info!(room_id = %self.room_id, handle = %subscription.handle, "Live subscription active");

                    let catch_up = if recovering { self.spawn_catch_up() } else { None };

                    let end = self.stream(&mut subscription, buffered, &mut shutdown).await;

                    if let Some(task) = catch_up {
                        task.abort();
                    }
                    self.release(Some(subscription.handle)).await;

                    if subscribed_at.elapsed() >= self.config.stable_after {
                        failures = 0;
                    }

                    match end {
                        StreamEnd::Shutdown => break,
                        StreamEnd::Failed(reason) => reason,
                    }
                }
            };

            failures += 1;
            recovering = true;
            warn!(
                room_id = %self.room_id,
                attempt = failures,
                max_attempts,
                reason = %reason,
                "Live subscription failed"
            );
            state_tx.send_replace(SubscriptionState::Failed {
                attempt: failures,
                reason: reason.clone(),
            });

            if failures >= max_attempts {
                error!(room_id = %self.room_id, attempts = failures, "Live subscription gave up");
                record_counter(LIVE_GAVE_UP, 1);
                state_tx.send_replace(SubscriptionState::GaveUp { attempts: failures });
                let _ = degraded_tx.send(DegradedSignal {
                    room_id: self.room_id.clone(),
                    attempts: failures,
                    last_error: reason,
                });
                return;
            }

            let delay = backoff.delay_for(failures);
            debug!(room_id = %self.room_id, delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");
            record_counter(LIVE_RECONNECTS, 1);

            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        state_tx.send_replace(SubscriptionState::Closed);
        debug!(room_id = %self.room_id, "Live subscription task finished");
    }

    /// Subscribe and wait for the acknowledgement, both within `connect_timeout`
    async fn connect(&self, shutdown: &mut ShutdownListener) -> ConnectOutcome {
        let deadline = tokio::time::Instant::now() + self.config.connect_timeout;

        let mut subscription = tokio::select! {
            _ = shutdown.wait() => return ConnectOutcome::Shutdown(None),
            result = tokio::time::timeout_at(deadline, self.channel.subscribe(&self.room_id)) => match result {
                Ok(Ok(subscription)) => subscription,
                Ok(Err(e)) => return ConnectOutcome::Failed { reason: e.to_string(), handle: None },
                Err(_) => {
                    return ConnectOutcome::Failed {
                        reason: "subscribe call timed out".to_string(),
                        handle: None,
                    }
                }
            },
        };

        // Inserts may race ahead of the ack; keep them for after the transition
        let mut buffered = Vec::new();

        loop {
            let event = tokio::select! {
                _ = shutdown.wait() => return ConnectOutcome::Shutdown(Some(subscription.handle)),
                _ = tokio::time::sleep_until(deadline) => {
                    return ConnectOutcome::Failed {
                        reason: "acknowledgement timed out".to_string(),
                        handle: Some(subscription.handle),
                    }
                }
                event = subscription.events.recv() => event,
            };

            let reason = match event {
                Some(ChannelEvent::Status(ChannelStatus::Subscribed)) => {
                    return ConnectOutcome::Connected { subscription, buffered };
                }
                Some(ChannelEvent::Change(change)) => {
                    buffered.push(change);
                    continue;
                }
                Some(ChannelEvent::Status(ChannelStatus::Closed)) => "channel closed before acknowledgement".to_string(),
                Some(ChannelEvent::Status(ChannelStatus::Error(e))) => format!("channel error: {e}"),
                None => "event stream ended before acknowledgement".to_string(),
            };

            return ConnectOutcome::Failed {
                reason,
                handle: Some(subscription.handle),
            };
        }
    }

    async fn stream(
        &self,
        subscription: &mut ChannelSubscription,
        buffered: Vec<ChangeRecord>,
        shutdown: &mut ShutdownListener,
    ) -> StreamEnd {
        for change in buffered {
            tokio::select! {
                _ = shutdown.wait() => return StreamEnd::Shutdown,
                _ = self.handle_change(change) => {}
            }
        }

        loop {
            let event = tokio::select! {
                _ = shutdown.wait() => return StreamEnd::Shutdown,
                event = subscription.events.recv() => event,
            };

            match event {
                Some(ChannelEvent::Change(change)) => {
                    tokio::select! {
                        _ = shutdown.wait() => return StreamEnd::Shutdown,
                        _ = self.handle_change(change) => {}
                    }
                }
                Some(ChannelEvent::Status(ChannelStatus::Subscribed)) => {
                    trace!(room_id = %self.room_id, "Duplicate acknowledgement");
                }
                Some(ChannelEvent::Status(ChannelStatus::Closed)) => {
                    return StreamEnd::Failed("channel closed".to_string());
                }
                Some(ChannelEvent::Status(ChannelStatus::Error(e))) => {
                    return StreamEnd::Failed(format!("channel error: {e}"));
                }
                None => return StreamEnd::Failed("event stream ended".to_string()),
            }
        }
    }

    async fn handle_change(&self, change: ChangeRecord) {
        if change.op != ChangeOp::Insert {
            trace!(room_id = %self.room_id, op = ?change.op, "Ignoring non-insert change");
            record_counter(LIVE_IGNORED, 1);
            return;
        }
        if change.row.room_id != self.room_id {
            debug!(room_id = %self.room_id, other_room = %change.row.room_id, "Ignoring change for another room");
            record_counter(LIVE_IGNORED, 1);
            return;
        }

        let profile = self.profiles.resolve_one(&change.row.sender_id).await;
        let message = Message::from_row(change.row, profile);
        record_counter(LIVE_EVENTS, 1);
        self.reconciler.observed(message);
    }

    fn spawn_catch_up(&self) -> Option<JoinHandle<()>> {
        if !self.config.resync_on_reconnect {
            return None;
        }
        let loader = self.catch_up.clone()?;
        let reconciler = self.reconciler.clone();
        let room_id = self.room_id.clone();

        Some(tokio::spawn(async move {
            match loader.load(&room_id).await {
                Ok(messages) => {
                    let outcome = reconciler.base_set(messages);
                    info!(room_id = %room_id, recovered = outcome.inserted, "Caught up after reconnect");
                }
                Err(e) => warn!(room_id = %room_id, error = %e, "Catch-up after reconnect failed"),
            }
        }))
    }

    async fn release(&self, handle: Option<ChannelHandle>) {
        let Some(handle) = handle else { return };
        if let Err(e) = self.channel.unsubscribe(&handle).await {
            warn!(room_id = %self.room_id, handle = %handle, error = %e, "Unsubscribe failed");
        }
    }
}

/// Handle to a running live subscription
pub struct LiveSubscription {
    room_id: RoomId,
    state_tx: Arc<watch::Sender<SubscriptionState>>,
    degraded_rx: Mutex<Option<oneshot::Receiver<DegradedSignal>>>,
    shutdown: ShutdownCoordinator,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveSubscription {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Current state
    pub fn state(&self) -> SubscriptionState {
        self.state_tx.borrow().clone()
    }

    /// Receiver that observes every published state
    pub fn watch(&self) -> watch::Receiver<SubscriptionState> {
        self.state_tx.subscribe()
    }

    /// Take the degraded-mode receiver. Only the first caller gets it.
    pub fn take_degraded(&self) -> Option<oneshot::Receiver<DegradedSignal>> {
        self.degraded_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Stop the task, release the channel handle and move to `Closed`
    pub async fn close(&self) {
        self.shutdown.trigger();

        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(room_id = %self.room_id, error = %e, "Live subscription task ended abnormally");
            }
        }

        self.state_tx.send_replace(SubscriptionState::Closed);
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SubscriptionState::Closed
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}
