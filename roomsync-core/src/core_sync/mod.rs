//! Realtime room synchronization
//!
//! Keeps a client's view of a chat room consistent with the server while
//! three sources feed it concurrently.
//!
//! ```text
//!                         ┌────────────────────┐
//!   MessageStore ────────►│   HistoryLoader    │──BaseSet────┐
//!        ▲                └────────────────────┘             │
//!        │ insert         ┌────────────────────┐             ▼
//!        │                │ LiveSubscription   │──Observed──► Reconciler ──► MessageView
//!   LiveChannel ─────────►│ (state machine)    │             ▲
//!        │                └────────────────────┘             │
//!        │                ┌────────────────────┐             │
//!        └────────────────│ OutboundSend       │──LocalEcho──┘
//!                         └────────────────────┘
//!              ProfileResolver enriches every row on the way in
//! ```
//!
//! [`RoomSession`] wires the pieces together for one open room.
//! Collaborator traits live in [`traits`]; in-memory implementations in
//! [`adapters`].

pub mod adapters;
pub mod backoff;
pub mod errors;
pub mod history;
pub mod outbound;
pub mod profiles;
pub mod reconciler;
pub mod room;
pub mod subscription;
pub mod traits;
pub mod types;

#[cfg(test)]
mod tests;

pub use backoff::BackoffPolicy;
pub use errors::{SendFailure, SyncError, SyncResult};
pub use history::HistoryLoader;
pub use outbound::OutboundSendCoordinator;
pub use profiles::ProfileResolver;
pub use reconciler::{ApplyOutcome, MessageView, Reconciler, ReconcilerInput};
pub use room::{LoadState, RoomServices, RoomSession, RoomStatus};
pub use subscription::{DegradedSignal, LiveSubscription, LiveSubscriptionManager, SubscriptionState};
pub use traits::{
    ChangeOp, ChangeRecord, ChannelEvent, ChannelHandle, ChannelStatus, ChannelSubscription, LiveChannel,
    MessageStore, ProfileLookup,
};
pub use types::{Message, MessageId, MessageRow, NewMessage, Profile, Room, RoomId, Timestamp, UserId};
