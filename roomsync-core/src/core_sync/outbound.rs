//! Outbound Send Coordinator
//!
//! Validates and persists a composed message, then echoes the stored row
//! into the local view without waiting for the live channel. The live copy
//! that arrives later carries the same id and is absorbed by the reconciler.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::OutboundConfig;
use crate::core_sync::errors::{SendFailure, SyncError};
use crate::core_sync::profiles::ProfileResolver;
use crate::core_sync::reconciler::Reconciler;
use crate::core_sync::traits::MessageStore;
use crate::core_sync::types::{Message, NewMessage, RoomId, UserId};
use crate::metrics::{record_counter, OUTBOUND_FAILED, OUTBOUND_SENT};

/// Sends messages for one room
pub struct OutboundSendCoordinator {
    store: Arc<dyn MessageStore>,
    profiles: Arc<ProfileResolver>,
    reconciler: Arc<Reconciler>,
    config: OutboundConfig,
}

impl OutboundSendCoordinator {
    pub fn new(
        store: Arc<dyn MessageStore>,
        profiles: Arc<ProfileResolver>,
        reconciler: Arc<Reconciler>,
        config: OutboundConfig,
    ) -> Self {
        Self {
            store,
            profiles,
            reconciler,
            config,
        }
    }

    /// Persist a message and echo it locally
    ///
    /// # Arguments
    /// * `room_id` - Target room
    /// * `sender_id` - Authenticated sender
    /// * `text` - Text as composed; trimmed before storing
    ///
    /// # Returns
    /// The stored, enriched message. On failure the untouched `text` comes
    /// back in [`SendFailure::draft`].
    pub async fn send(&self, room_id: &RoomId, sender_id: &UserId, text: &str) -> Result<Message, SendFailure> {
        let fail = |error: SyncError| {
            record_counter(OUTBOUND_FAILED, 1);
            SendFailure::new(text, error)
        };

        let content = text.trim();
        if content.is_empty() {
            return Err(fail(SyncError::SendRejected("message is empty".to_string())));
        }
        if sender_id.is_empty() {
            return Err(fail(SyncError::SendRejected("sender is missing".to_string())));
        }
        if self.reconciler.is_closed() {
            return Err(fail(SyncError::RoomClosed(room_id.to_string())));
        }

        let new_message = NewMessage {
            room_id: room_id.clone(),
            sender_id: sender_id.clone(),
            content: content.to_string(),
        };

        let row = match tokio::time::timeout(self.config.insert_timeout, self.store.insert(new_message)).await {
            Ok(Ok(row)) => row,
            Ok(Err(e)) => {
                warn!(room_id = %room_id, sender = %sender_id, error = %e, "Send failed");
                let error = match e {
                    SyncError::StoreUnavailable(_) => e,
                    other => SyncError::StoreUnavailable(other.to_string()),
                };
                return Err(fail(error));
            }
            Err(_) => {
                warn!(room_id = %room_id, sender = %sender_id, "Send timed out");
                return Err(fail(SyncError::StoreUnavailable(format!(
                    "insert exceeded {:?}",
                    self.config.insert_timeout
                ))));
            }
        };

        let profile = self.profiles.resolve_one(sender_id).await;
        let message = Message::from_row(row, profile);

        self.reconciler.local_echo(message.clone());
        record_counter(OUTBOUND_SENT, 1);
        info!(room_id = %room_id, message_id = %message.id, "Message sent");

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfilesConfig;
    use crate::core_sync::adapters::{InMemoryMessageStore, InMemoryProfiles};
    use crate::test_utils::profile;
    use std::time::Duration;

    const ROOM: &str = "room-1";

    fn coordinator(store: &InMemoryMessageStore, reconciler: &Arc<Reconciler>) -> OutboundSendCoordinator {
        let profiles = InMemoryProfiles::new();
        profiles.put(profile("alice", "Alice"));
        let resolver = Arc::new(ProfileResolver::new(Arc::new(profiles), &ProfilesConfig::default()));
        OutboundSendCoordinator::new(
            Arc::new(store.clone()),
            resolver,
            reconciler.clone(),
            OutboundConfig {
                insert_timeout: Duration::from_millis(100),
            },
        )
    }

    #[tokio::test]
    async fn test_send_trims_and_echoes() {
        let store = InMemoryMessageStore::new();
        let reconciler = Arc::new(Reconciler::new(RoomId::new(ROOM)));
        let outbound = coordinator(&store, &reconciler);

        let message = outbound
            .send(&RoomId::new(ROOM), &UserId::new("alice"), "  hello  ")
            .await
            .unwrap();

        assert_eq!(message.content, "hello");
        assert_eq!(message.sender.display_name, "Alice");
        assert_eq!(store.rows()[0].content, "hello");
        assert!(reconciler.contains(&message.id));

        // Live copy of the same row is absorbed
        let outcome = reconciler.observed(message.clone());
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(reconciler.len(), 1);
    }

    #[tokio::test]
    async fn test_whitespace_is_rejected_without_echo() {
        let store = InMemoryMessageStore::new();
        let reconciler = Arc::new(Reconciler::new(RoomId::new(ROOM)));
        let outbound = coordinator(&store, &reconciler);

        for text in ["", "   ", "\n\t "] {
            let failure = outbound
                .send(&RoomId::new(ROOM), &UserId::new("alice"), text)
                .await
                .unwrap_err();
            assert!(matches!(failure.error, SyncError::SendRejected(_)));
            assert_eq!(failure.draft, text);
        }

        assert_eq!(store.insert_calls(), 0);
        assert!(reconciler.is_empty());
    }

    #[tokio::test]
    async fn test_missing_sender_is_rejected() {
        let store = InMemoryMessageStore::new();
        let reconciler = Arc::new(Reconciler::new(RoomId::new(ROOM)));
        let outbound = coordinator(&store, &reconciler);

        let failure = outbound
            .send(&RoomId::new(ROOM), &UserId::new(""), "hi")
            .await
            .unwrap_err();
        assert!(matches!(failure.error, SyncError::SendRejected(_)));
        assert_eq!(store.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_returns_draft() {
        let store = InMemoryMessageStore::new();
        store.fail_next_inserts(1);
        let reconciler = Arc::new(Reconciler::new(RoomId::new(ROOM)));
        let outbound = coordinator(&store, &reconciler);

        let failure = outbound
            .send(&RoomId::new(ROOM), &UserId::new("alice"), " keep me ")
            .await
            .unwrap_err();
        assert!(matches!(failure.error, SyncError::StoreUnavailable(_)));
        assert_eq!(failure.into_draft(), " keep me ");
        assert!(reconciler.is_empty());
        // Not retried automatically
        assert_eq!(store.insert_calls(), 1);
    }

    #[tokio::test]
    async fn test_slow_insert_times_out() {
        let store = InMemoryMessageStore::new();
        store.set_insert_delay(Duration::from_millis(500));
        let reconciler = Arc::new(Reconciler::new(RoomId::new(ROOM)));
        let outbound = coordinator(&store, &reconciler);

        let failure = outbound
            .send(&RoomId::new(ROOM), &UserId::new("alice"), "hi")
            .await
            .unwrap_err();
        assert!(matches!(failure.error, SyncError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_closed_room_rejects_send() {
        let store = InMemoryMessageStore::new();
        let reconciler = Arc::new(Reconciler::new(RoomId::new(ROOM)));
        let outbound = coordinator(&store, &reconciler);
        reconciler.close();

        let failure = outbound
            .send(&RoomId::new(ROOM), &UserId::new("alice"), "hi")
            .await
            .unwrap_err();
        assert!(matches!(failure.error, SyncError::RoomClosed(_)));
        assert_eq!(store.insert_calls(), 0);
    }
}
