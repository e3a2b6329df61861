//! Message Store Trait
//!
//! Interface to the append-only message log.

use async_trait::async_trait;

use crate::core_sync::errors::SyncResult;
use crate::core_sync::types::{MessageRow, NewMessage, RoomId};

/// Append-only, queryable log of messages keyed by room
///
/// Implementations should map transport and backend failures to
/// `SyncError::StoreUnavailable`.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert one message
    ///
    /// # Returns
    /// The stored row with its server-assigned id and creation timestamp
    async fn insert(&self, message: NewMessage) -> SyncResult<MessageRow>;

    /// All rows for a room, ordered by `created_at` ascending
    async fn list_by_room(&self, room_id: &RoomId) -> SyncResult<Vec<MessageRow>>;
}
