//! In-memory LiveChannel
//!
//! Fan-out of inserted rows to per-room subscribers over bounded mpsc
//! streams. Knobs simulate the failure modes of a hosted push channel:
//! refused subscribe calls, error acknowledgements, missing
//! acknowledgements, explicit closure, error reports, flapping
//! connections and silent disconnects.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core_sync::errors::{SyncError, SyncResult};
use crate::core_sync::traits::{
    ChangeRecord, ChannelEvent, ChannelHandle, ChannelStatus, ChannelSubscription, LiveChannel,
};
use crate::core_sync::types::{MessageRow, RoomId};

/// Per-subscriber buffer; a full buffer drops the event like a lossy push
const SUBSCRIBER_BUFFER: usize = 256;

struct Subscriber {
    room_id: RoomId,
    tx: mpsc::Sender<ChannelEvent>,
}

#[derive(Default)]
struct ChannelState {
    subscribers: HashMap<ChannelHandle, Subscriber>,
    fail_subscribes: u32,
    reject_subscribes: u32,
    silence_acks: bool,
    flap_subscribes: u32,
    subscribe_calls: usize,
    unsubscribed: Vec<ChannelHandle>,
}

/// Push channel shared between an in-memory store and its subscribers
#[derive(Clone, Default)]
pub struct InMemoryLiveChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl InMemoryLiveChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an insert to every subscriber of the row's room
    pub fn publish(&self, row: MessageRow) {
        self.publish_change(ChangeRecord::insert(row));
    }

    /// Deliver an arbitrary change record
    pub fn publish_change(&self, change: ChangeRecord) {
        let mut state = self.lock();
        let room_id = change.row.room_id.clone();

        state.subscribers.retain(|handle, sub| {
            if sub.room_id != room_id {
                return true;
            }
            match sub.tx.try_send(ChannelEvent::Change(change.clone())) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(handle = %handle, room_id = %room_id, "Subscriber buffer full, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Make the next `n` subscribe calls fail outright
    pub fn fail_next_subscribes(&self, n: u32) {
        self.lock().fail_subscribes = n;
    }

    /// Make the next `n` subscriptions report an error status instead of acking
    pub fn reject_next_subscribes(&self, n: u32) {
        self.lock().reject_subscribes = n;
    }

    /// Stop acknowledging new subscriptions
    pub fn silence_acks(&self, silent: bool) {
        self.lock().silence_acks = silent;
    }

    /// Acknowledge the next `n` subscriptions, then end their streams at once
    pub fn flap_next_subscribes(&self, n: u32) {
        self.lock().flap_subscribes = n;
    }

    /// Drop every stream without a status, like a lost connection
    pub fn disconnect_all(&self) {
        let dropped = {
            let mut state = self.lock();
            let count = state.subscribers.len();
            state.subscribers.clear();
            count
        };
        debug!(dropped, "Disconnected all subscribers");
    }

    /// Report `Closed` to every subscriber of a room and drop them
    pub fn close_room(&self, room_id: &RoomId) {
        self.end_room(room_id, ChannelStatus::Closed);
    }

    /// Report `Error(reason)` to every subscriber of a room and drop them
    pub fn fail_room(&self, room_id: &RoomId, reason: &str) {
        self.end_room(room_id, ChannelStatus::Error(reason.to_string()));
    }

    fn end_room(&self, room_id: &RoomId, status: ChannelStatus) {
        let mut state = self.lock();
        state.subscribers.retain(|_, sub| {
            if &sub.room_id != room_id {
                return true;
            }
            let _ = sub.tx.try_send(ChannelEvent::Status(status.clone()));
            false
        });
    }

    pub fn subscriber_count(&self, room_id: &RoomId) -> usize {
        self.lock()
            .subscribers
            .values()
            .filter(|sub| &sub.room_id == room_id)
            .count()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.lock().subscribe_calls
    }

    /// Handles released through `unsubscribe`
    pub fn unsubscribed(&self) -> Vec<ChannelHandle> {
        self.lock().unsubscribed.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl LiveChannel for InMemoryLiveChannel {
    async fn subscribe(&self, room_id: &RoomId) -> SyncResult<ChannelSubscription> {
        let mut state = self.lock();
        state.subscribe_calls += 1;

        if state.fail_subscribes > 0 {
            state.fail_subscribes -= 1;
            return Err(SyncError::ChannelDisconnected("injected subscribe failure".to_string()));
        }

        let handle = ChannelHandle::generate();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        if state.reject_subscribes > 0 {
            state.reject_subscribes -= 1;
            let _ = tx.try_send(ChannelEvent::Status(ChannelStatus::Error(
                "subscription rejected".to_string(),
            )));
            return Ok(ChannelSubscription { handle, events: rx });
        }

        if state.flap_subscribes > 0 {
            state.flap_subscribes -= 1;
            let _ = tx.try_send(ChannelEvent::Status(ChannelStatus::Subscribed));
            // Sender dropped here: the stream ends right after the ack
            return Ok(ChannelSubscription { handle, events: rx });
        }

        if !state.silence_acks {
            let _ = tx.try_send(ChannelEvent::Status(ChannelStatus::Subscribed));
        }

        debug!(room_id = %room_id, handle = %handle, "Subscriber registered");
        state.subscribers.insert(
            handle.clone(),
            Subscriber {
                room_id: room_id.clone(),
                tx,
            },
        );

        Ok(ChannelSubscription { handle, events: rx })
    }

    async fn unsubscribe(&self, handle: &ChannelHandle) -> SyncResult<()> {
        let mut state = self.lock();
        state.subscribers.remove(handle);
        state.unsubscribed.push(handle.clone());
        Ok(())
    }
}
