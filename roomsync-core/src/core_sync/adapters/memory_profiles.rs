//! In-memory ProfileLookup

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::core_sync::errors::{SyncError, SyncResult};
use crate::core_sync::traits::ProfileLookup;
use crate::core_sync::types::{Profile, UserId};

#[derive(Default)]
struct ProfilesState {
    profiles: HashMap<UserId, Profile>,
    failing: HashSet<UserId>,
    unavailable: bool,
    delay: Option<Duration>,
    calls: usize,
}

/// Profile directory held in memory
#[derive(Clone, Default)]
pub struct InMemoryProfiles {
    state: Arc<Mutex<ProfilesState>>,
}

impl InMemoryProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, profile: Profile) {
        self.lock().profiles.insert(profile.user_id.clone(), profile);
    }

    /// Leave `user_id` out of every result, as a per-row lookup failure
    pub fn fail_for(&self, user_id: UserId) {
        self.lock().failing.insert(user_id);
    }

    /// Fail whole lookup calls
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    pub fn lookup_calls(&self) -> usize {
        self.lock().calls
    }

    fn lock(&self) -> MutexGuard<'_, ProfilesState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ProfileLookup for InMemoryProfiles {
    async fn get_profiles(&self, user_ids: &HashSet<UserId>) -> SyncResult<HashMap<UserId, Profile>> {
        let delay = {
            let mut state = self.lock();
            state.calls += 1;
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.lock();
        if state.unavailable {
            return Err(SyncError::ProfileUnavailable("profile service unavailable".to_string()));
        }

        Ok(user_ids
            .iter()
            .filter(|id| !state.failing.contains(*id))
            .filter_map(|id| state.profiles.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }
}
