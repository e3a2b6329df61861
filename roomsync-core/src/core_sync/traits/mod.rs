//! Collaborator Trait Boundaries
//!
//! The synchronizer never talks to a backend directly. These traits are the
//! seams between the core and the three external collaborators:
//! - Message store (append-only log keyed by room)
//! - Profile lookup (user id to display profile)
//! - Live event channel (per-room push of inserted rows)
//!
//! Production code wraps the hosted backend; tests and the demo CLI use the
//! in-memory implementations in [`crate::core_sync::adapters`].

pub mod channel;
pub mod profiles;
pub mod store;

pub use channel::{ChangeOp, ChangeRecord, ChannelEvent, ChannelHandle, ChannelStatus, ChannelSubscription, LiveChannel};
pub use profiles::ProfileLookup;
pub use store::MessageStore;
