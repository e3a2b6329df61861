//! In-memory MessageStore
//!
//! Keeps rows in insertion order per process. Optionally attached to an
//! [`InMemoryLiveChannel`] so every insert is pushed to subscribers, like a
//! hosted backend with change notifications enabled.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use super::memory_channel::InMemoryLiveChannel;
use crate::core_sync::errors::{SyncError, SyncResult};
use crate::core_sync::traits::MessageStore;
use crate::core_sync::types::{MessageId, MessageRow, NewMessage, RoomId, Timestamp, UserId};

#[derive(Default)]
struct StoreState {
    rows: Vec<MessageRow>,
    last_created_at: u64,
    fail_lists: u32,
    fail_inserts: u32,
    list_calls: usize,
    insert_calls: usize,
    list_delay: Option<Duration>,
    insert_delay: Option<Duration>,
}

/// Message store backed by a vector, with fault injection knobs
#[derive(Clone, Default)]
pub struct InMemoryMessageStore {
    state: Arc<Mutex<StoreState>>,
    channel: Option<InMemoryLiveChannel>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish every inserted row on `channel`
    pub fn with_channel(mut self, channel: InMemoryLiveChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Add a row directly, bypassing insert and the channel
    pub fn seed(&self, row: MessageRow) {
        let mut state = self.lock();
        state.last_created_at = state.last_created_at.max(row.created_at.as_millis());
        state.rows.push(row);
    }

    /// Add a row without publishing it, as if the push was lost
    pub fn insert_silently(&self, room_id: &RoomId, sender_id: &str, content: &str) -> MessageRow {
        let mut state = self.lock();
        let row = Self::next_row(
            &mut state,
            NewMessage {
                room_id: room_id.clone(),
                sender_id: UserId::new(sender_id),
                content: content.to_string(),
            },
        );
        state.rows.push(row.clone());
        row
    }

    pub fn rows(&self) -> Vec<MessageRow> {
        self.lock().rows.clone()
    }

    /// Fail the next `n` history fetches
    pub fn fail_next_lists(&self, n: u32) {
        self.lock().fail_lists = n;
    }

    /// Fail the next `n` inserts
    pub fn fail_next_inserts(&self, n: u32) {
        self.lock().fail_inserts = n;
    }

    pub fn set_list_delay(&self, delay: Duration) {
        self.lock().list_delay = Some(delay);
    }

    pub fn set_insert_delay(&self, delay: Duration) {
        self.lock().insert_delay = Some(delay);
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    pub fn insert_calls(&self) -> usize {
        self.lock().insert_calls
    }

    fn next_row(state: &mut StoreState, message: NewMessage) -> MessageRow {
        // Strictly increasing so rows inserted within one millisecond still order
        let created_at = Timestamp::now().as_millis().max(state.last_created_at + 1);
        state.last_created_at = created_at;

        MessageRow {
            id: MessageId::generate(),
            room_id: message.room_id,
            sender_id: message.sender_id,
            content: message.content,
            created_at: Timestamp::from_millis(created_at),
            expires_at: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, message: NewMessage) -> SyncResult<MessageRow> {
        let delay = {
            let mut state = self.lock();
            state.insert_calls += 1;
            state.insert_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let row = {
            let mut state = self.lock();
            if state.fail_inserts > 0 {
                state.fail_inserts -= 1;
                return Err(SyncError::StoreUnavailable("injected insert failure".to_string()));
            }
            let row = Self::next_row(&mut state, message);
            state.rows.push(row.clone());
            row
        };

        debug!(room_id = %row.room_id, message_id = %row.id, "Row inserted");

        if let Some(channel) = &self.channel {
            channel.publish(row.clone());
        }

        Ok(row)
    }

    async fn list_by_room(&self, room_id: &RoomId) -> SyncResult<Vec<MessageRow>> {
        let delay = {
            let mut state = self.lock();
            state.list_calls += 1;
            state.list_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if state.fail_lists > 0 {
            state.fail_lists -= 1;
            return Err(SyncError::StoreUnavailable("injected list failure".to_string()));
        }

        let mut rows: Vec<MessageRow> = state
            .rows
            .iter()
            .filter(|row| &row.room_id == room_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.created_at);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_message(room: &str, content: &str) -> NewMessage {
        NewMessage {
            room_id: RoomId::new(room),
            sender_id: UserId::new("alice"),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_timestamps() {
        let store = InMemoryMessageStore::new();
        let a = store.insert(new_message("r", "a")).await.unwrap();
        let b = store.insert(new_message("r", "b")).await.unwrap();

        assert_ne!(a.id, b.id);
        assert!(b.created_at > a.created_at);
    }

    #[tokio::test]
    async fn test_list_filters_by_room() {
        let store = InMemoryMessageStore::new();
        store.insert(new_message("r1", "a")).await.unwrap();
        store.insert(new_message("r2", "b")).await.unwrap();

        let rows = store.list_by_room(&RoomId::new("r1")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "a");
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = InMemoryMessageStore::new();
        store.fail_next_inserts(1);

        assert!(store.insert(new_message("r", "a")).await.is_err());
        assert!(store.insert(new_message("r", "a")).await.is_ok());
        assert_eq!(store.insert_calls(), 2);
        assert_eq!(store.rows().len(), 1);
    }
}
