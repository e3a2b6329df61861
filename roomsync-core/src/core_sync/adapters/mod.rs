//! In-memory collaborators
//!
//! Process-local implementations of the store, channel and profile traits.
//! They back the unit and integration tests and the `roomsync demo` command.
//!
//! ```text
//!   InMemoryMessageStore ──insert──► InMemoryLiveChannel ──► subscribers
//! ```

pub mod memory_channel;
pub mod memory_profiles;
pub mod memory_store;

pub use memory_channel::InMemoryLiveChannel;
pub use memory_profiles::InMemoryProfiles;
pub use memory_store::InMemoryMessageStore;
