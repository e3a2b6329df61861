//! roomsync-core: realtime room message synchronization
//!
//! See [`core_sync`] for the synchronizer itself. The remaining modules are
//! the ambient pieces it runs on: configuration, logging, metrics and
//! per-room shutdown.

pub mod config;
pub mod core_sync;
pub mod logging;
pub mod metrics;
pub mod shutdown;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::Config;
pub use core_sync::{
    DegradedSignal, LoadState, Message, MessageView, RoomId, RoomServices, RoomSession, RoomStatus, SendFailure,
    SubscriptionState, SyncError, SyncResult, UserId,
};
pub use logging::{init_logging, LogLevel};
