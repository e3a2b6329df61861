//! Live Event Channel Trait
//!
//! Defines the client-side contract for the per-room push channel.
//!
//! Inserts and status changes arrive on a single ordered stream of
//! [`ChannelEvent`]s, so one task can own the handle and drive the
//! subscription state machine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

use crate::core_sync::errors::SyncResult;
use crate::core_sync::types::{MessageRow, RoomId};

/// Opaque handle for an active channel subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelHandle(pub String);

impl ChannelHandle {
    pub fn generate() -> Self {
        ChannelHandle(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row operation type reported by the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// One change pushed by the channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub op: ChangeOp,
    pub row: MessageRow,
}

impl ChangeRecord {
    pub fn insert(row: MessageRow) -> Self {
        Self { op: ChangeOp::Insert, row }
    }
}

/// Channel status values relevant to the synchronizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    Closed,
    Error(String),
}

/// Item delivered on a subscription stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Status(ChannelStatus),
    Change(ChangeRecord),
}

/// A subscription in progress: the handle plus its event stream
///
/// The stream ending without a `Closed` status is a silent closure.
#[derive(Debug)]
pub struct ChannelSubscription {
    pub handle: ChannelHandle,
    pub events: mpsc::Receiver<ChannelEvent>,
}

/// Per-room publish/subscribe transport for inserted message rows
///
/// Delivery is at-least-once with no ordering guarantee relative to the
/// history fetch.
#[async_trait]
pub trait LiveChannel: Send + Sync {
    /// Start a subscription for a room
    ///
    /// Returning `Ok` does not mean the channel is live; the stream reports
    /// `ChannelStatus::Subscribed` once the backend acknowledges.
    async fn subscribe(&self, room_id: &RoomId) -> SyncResult<ChannelSubscription>;

    /// Release a subscription handle
    async fn unsubscribe(&self, handle: &ChannelHandle) -> SyncResult<()>;
}
