//! Shared backend for the scenario tests

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, HistoryConfig, LiveConfig};
use crate::core_sync::adapters::{InMemoryLiveChannel, InMemoryMessageStore, InMemoryProfiles};
use crate::core_sync::room::{LoadState, RoomServices, RoomSession};
use crate::core_sync::types::RoomId;
use crate::test_utils::{profile, with_timeout};

/// One hosted backend shared by every client in a scenario
#[derive(Clone)]
pub struct Backend {
    pub store: InMemoryMessageStore,
    pub channel: InMemoryLiveChannel,
    pub profiles: InMemoryProfiles,
}

impl Backend {
    pub fn new() -> Self {
        let channel = InMemoryLiveChannel::new();
        let profiles = InMemoryProfiles::new();
        for (id, name) in [("alice", "Alice"), ("bob", "Bob"), ("charlie", "Charlie")] {
            profiles.put(profile(id, name));
        }
        Self {
            store: InMemoryMessageStore::new().with_channel(channel.clone()),
            channel,
            profiles,
        }
    }

    pub fn services(&self) -> RoomServices {
        RoomServices::new(
            Arc::new(self.store.clone()),
            Arc::new(self.profiles.clone()),
            Arc::new(self.channel.clone()),
        )
    }

    /// Open `room` as a new client and wait until it is loaded and live
    pub async fn join(&self, room: &str) -> RoomSession {
        let session = RoomSession::open(RoomId::new(room), self.services(), &fast_config());
        let mut status = session.status();
        with_timeout(status.wait_for(|s| s.load == LoadState::Ready && s.live.is_live()))
            .await
            .expect("client should become ready")
            .expect("status sender alive");
        session
    }
}

pub fn fast_config() -> Config {
    Config {
        history: HistoryConfig {
            fetch_timeout: Duration::from_millis(200),
            fetch_retries: 1,
            retry_backoff: Duration::from_millis(5),
        },
        live: LiveConfig {
            connect_timeout: Duration::from_millis(100),
            base_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            ..LiveConfig::default()
        },
        ..Config::default()
    }
}
