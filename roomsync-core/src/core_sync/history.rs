//! History Loader
//!
//! One-shot snapshot of a room: fetch every stored row in creation order,
//! enrich the distinct senders with a single batched lookup, and hand the
//! result to the reconciler as its base set.
//!
//! Fetches are bounded by `history.fetch_timeout` and retried with backoff
//! up to `history.fetch_retries` extra times. Enrichment failures never fail
//! the load.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::HistoryConfig;
use crate::core_sync::backoff::BackoffPolicy;
use crate::core_sync::errors::{SyncError, SyncResult};
use crate::core_sync::profiles::ProfileResolver;
use crate::core_sync::traits::MessageStore;
use crate::core_sync::types::{Message, MessageRow, RoomId};
use crate::metrics::{Timer, HISTORY_LOAD_DURATION};

/// Loads the current message history of a room
pub struct HistoryLoader {
    store: Arc<dyn MessageStore>,
    profiles: Arc<ProfileResolver>,
    config: HistoryConfig,
    backoff: BackoffPolicy,
}

impl HistoryLoader {
    pub fn new(store: Arc<dyn MessageStore>, profiles: Arc<ProfileResolver>, config: HistoryConfig) -> Self {
        let backoff = BackoffPolicy::new(
            config.retry_backoff,
            config.retry_backoff.saturating_mul(1u32 << config.fetch_retries.min(8)),
        );
        Self {
            store,
            profiles,
            config,
            backoff,
        }
    }

    /// Load and enrich all messages of a room
    ///
    /// # Returns
    /// Messages ordered by creation timestamp ascending, or
    /// `SyncError::StoreUnavailable` once every fetch attempt has failed
    pub async fn load(&self, room_id: &RoomId) -> SyncResult<Vec<Message>> {
        let timer = Timer::new(HISTORY_LOAD_DURATION);

        let mut rows = self.fetch_rows(room_id).await?;

        let foreign = rows.iter().filter(|row| &row.room_id != room_id).count();
        if foreign > 0 {
            warn!(room_id = %room_id, foreign, "Store returned rows for another room, dropping them");
            rows.retain(|row| &row.room_id == room_id);
        }

        // Stable, so equal timestamps keep the store's order
        rows.sort_by_key(|row| row.created_at);

        let messages = self.profiles.enrich_rows(rows).await;
        timer.stop();

        info!(room_id = %room_id, count = messages.len(), "History loaded");
        Ok(messages)
    }

    async fn fetch_rows(&self, room_id: &RoomId) -> SyncResult<Vec<MessageRow>> {
        let attempts = self.config.fetch_retries.saturating_add(1);
        let mut last_error = SyncError::StoreUnavailable("no fetch attempted".to_string());

        for attempt in 1..=attempts {
            debug!(room_id = %room_id, attempt, "Fetching room history");

            match tokio::time::timeout(self.config.fetch_timeout, self.store.list_by_room(room_id)).await {
                Ok(Ok(rows)) => return Ok(rows),
                Ok(Err(e)) => {
                    warn!(room_id = %room_id, attempt, error = %e, "History fetch failed");
                    last_error = e;
                }
                Err(_) => {
                    warn!(room_id = %room_id, attempt, "History fetch timed out");
                    last_error = SyncError::Timeout(format!(
                        "history fetch exceeded {:?}",
                        self.config.fetch_timeout
                    ));
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.backoff.delay_for(attempt)).await;
            }
        }

        Err(match last_error {
            SyncError::StoreUnavailable(msg) => SyncError::StoreUnavailable(msg),
            other => SyncError::StoreUnavailable(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfilesConfig;
    use crate::core_sync::adapters::{InMemoryMessageStore, InMemoryProfiles};
    use crate::test_utils::{message_row, profile};
    use std::time::Duration;

    fn fast_config() -> HistoryConfig {
        HistoryConfig {
            fetch_timeout: Duration::from_millis(100),
            fetch_retries: 2,
            retry_backoff: Duration::from_millis(5),
        }
    }

    fn loader(store: &InMemoryMessageStore, profiles: &InMemoryProfiles) -> HistoryLoader {
        let resolver = Arc::new(ProfileResolver::new(
            Arc::new(profiles.clone()),
            &ProfilesConfig::default(),
        ));
        HistoryLoader::new(Arc::new(store.clone()), resolver, fast_config())
    }

    #[tokio::test]
    async fn test_empty_room() {
        let store = InMemoryMessageStore::new();
        let profiles = InMemoryProfiles::new();

        let messages = loader(&store, &profiles).load(&RoomId::new("empty")).await.unwrap();
        assert!(messages.is_empty());
        assert_eq!(profiles.lookup_calls(), 0);
    }

    #[tokio::test]
    async fn test_loads_in_creation_order_with_one_lookup() {
        let store = InMemoryMessageStore::new();
        store.seed(message_row("m3", "r", "alice", "third", 30));
        store.seed(message_row("m1", "r", "alice", "first", 10));
        store.seed(message_row("m2", "r", "bob", "second", 20));
        store.seed(message_row("x1", "other", "bob", "elsewhere", 15));

        let profiles = InMemoryProfiles::new();
        profiles.put(profile("alice", "Alice"));
        profiles.put(profile("bob", "Bob"));

        let messages = loader(&store, &profiles).load(&RoomId::new("r")).await.unwrap();

        let ids: Vec<_> = messages.iter().map(|m| m.id.0.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert_eq!(messages[1].sender.display_name, "Bob");
        assert_eq!(profiles.lookup_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_sender_gets_placeholder() {
        let store = InMemoryMessageStore::new();
        store.seed(message_row("m1", "r", "alice", "a", 1));
        store.seed(message_row("m2", "r", "bob", "b", 2));
        store.seed(message_row("m3", "r", "carol", "c", 3));

        let profiles = InMemoryProfiles::new();
        profiles.put(profile("alice", "Alice"));
        profiles.put(profile("bob", "Bob"));
        profiles.put(profile("carol", "Carol"));
        profiles.fail_for(crate::core_sync::types::UserId::new("carol"));

        let messages = loader(&store, &profiles).load(&RoomId::new("r")).await.unwrap();

        assert_eq!(messages[0].sender.display_name, "Alice");
        assert_eq!(messages[1].sender.display_name, "Bob");
        assert_eq!(messages[2].sender.display_name, "");
        assert!(messages[2].sender.avatar_url.is_none());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = InMemoryMessageStore::new();
        store.seed(message_row("m1", "r", "alice", "a", 1));
        store.fail_next_lists(2);

        let messages = loader(&store, &InMemoryProfiles::new())
            .load(&RoomId::new("r"))
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(store.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_persistent_failure_is_store_unavailable() {
        let store = InMemoryMessageStore::new();
        store.fail_next_lists(10);

        let err = loader(&store, &InMemoryProfiles::new())
            .load(&RoomId::new("r"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::StoreUnavailable(_)));
        assert_eq!(store.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_huge_retry_budget_still_fetches() {
        let store = InMemoryMessageStore::new();
        store.seed(message_row("m1", "r", "alice", "a", 1));
        store.fail_next_lists(1);

        let resolver = Arc::new(ProfileResolver::new(
            Arc::new(InMemoryProfiles::new()),
            &ProfilesConfig::default(),
        ));
        let config = HistoryConfig {
            fetch_retries: u32::MAX,
            ..fast_config()
        };
        let messages = HistoryLoader::new(Arc::new(store.clone()), resolver, config)
            .load(&RoomId::new("r"))
            .await
            .unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(store.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_slow_fetch_counts_as_failure() {
        let store = InMemoryMessageStore::new();
        store.set_list_delay(Duration::from_millis(500));

        let err = loader(&store, &InMemoryProfiles::new())
            .load(&RoomId::new("r"))
            .await
            .unwrap_err();
        match err {
            SyncError::StoreUnavailable(msg) => assert!(msg.contains("Timed out")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
