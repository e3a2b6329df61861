//! Error types for the room synchronizer

use thiserror::Error;

/// Result type for synchronizer operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while synchronizing a room
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Message store could not be reached or refused the operation
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Send input was invalid (empty content, missing sender, not a participant)
    #[error("Send rejected: {0}")]
    SendRejected(String),

    /// Profile lookup failed; callers degrade to a placeholder profile
    #[error("Profile unavailable: {0}")]
    ProfileUnavailable(String),

    /// Live event channel failed or closed
    #[error("Channel disconnected: {0}")]
    ChannelDisconnected(String),

    /// Operation exceeded its bounded wait
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Operation attempted on a closed room session
    #[error("Room closed: {0}")]
    RoomClosed(String),
}

/// A failed send. Carries the composed text so the caller can offer a retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Send failed: {error}")]
pub struct SendFailure {
    /// The text exactly as the user composed it
    pub draft: String,
    #[source]
    pub error: SyncError,
}

impl SendFailure {
    pub fn new(draft: impl Into<String>, error: SyncError) -> Self {
        Self {
            draft: draft.into(),
            error,
        }
    }

    /// Recover the composed text
    pub fn into_draft(self) -> String {
        self.draft
    }
}
