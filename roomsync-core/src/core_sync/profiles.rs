//! Profile Resolver - sender enrichment that never fails
//!
//! Wraps a [`ProfileLookup`] with a bounded wait, an LRU cache of resolved
//! profiles and placeholder substitution. Used by the history loader, the
//! live subscription and the outbound coordinator of a room.

use hashlink::LruCache;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ProfilesConfig;
use crate::core_sync::traits::ProfileLookup;
use crate::core_sync::types::{Message, MessageRow, Profile, UserId};
use crate::metrics::{record_counter, PROFILE_PLACEHOLDERS};

/// Batched, cached profile enrichment
pub struct ProfileResolver {
    lookup: Arc<dyn ProfileLookup>,
    cache: Mutex<LruCache<UserId, Profile>>,
    timeout: Duration,
}

impl ProfileResolver {
    pub fn new(lookup: Arc<dyn ProfileLookup>, config: &ProfilesConfig) -> Self {
        Self {
            lookup,
            cache: Mutex::new(LruCache::new(config.cache_capacity.max(1))),
            timeout: config.lookup_timeout,
        }
    }

    /// Resolve profiles for a set of users
    ///
    /// Always returns an entry for every requested id. Users whose lookup
    /// failed or returned nothing get [`Profile::placeholder`].
    pub async fn resolve(&self, user_ids: &HashSet<UserId>) -> HashMap<UserId, Profile> {
        let mut resolved = HashMap::with_capacity(user_ids.len());
        let mut missing = HashSet::new();

        {
            let mut cache = self.lock_cache();
            for id in user_ids {
                match cache.get(id) {
                    Some(profile) => {
                        resolved.insert(id.clone(), profile.clone());
                    }
                    None => {
                        missing.insert(id.clone());
                    }
                }
            }
        }

        if missing.is_empty() {
            return resolved;
        }

        debug!(
            requested = user_ids.len(),
            missing = missing.len(),
            "Looking up sender profiles"
        );

        let fetched = match tokio::time::timeout(self.timeout, self.lookup.get_profiles(&missing)).await {
            Ok(Ok(profiles)) => profiles,
            Ok(Err(e)) => {
                warn!(error = %e, users = missing.len(), "Profile lookup failed, using placeholders");
                HashMap::new()
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    users = missing.len(),
                    "Profile lookup timed out, using placeholders"
                );
                HashMap::new()
            }
        };

        let mut placeholders = 0u64;
        let mut cache = self.lock_cache();
        for id in missing {
            match fetched.get(&id) {
                Some(profile) => {
                    let mut profile = profile.clone();
                    profile.user_id = id.clone();
                    cache.insert(id.clone(), profile.clone());
                    resolved.insert(id, profile);
                }
                None => {
                    placeholders += 1;
                    resolved.insert(id.clone(), Profile::placeholder(id));
                }
            }
        }

        if placeholders > 0 {
            record_counter(PROFILE_PLACEHOLDERS, placeholders);
        }

        resolved
    }

    /// Resolve a single user's profile
    pub async fn resolve_one(&self, user_id: &UserId) -> Profile {
        let ids = HashSet::from([user_id.clone()]);
        self.resolve(&ids)
            .await
            .remove(user_id)
            .unwrap_or_else(|| Profile::placeholder(user_id.clone()))
    }

    /// Enrich a batch of rows with one lookup for their distinct senders
    pub async fn enrich_rows(&self, rows: Vec<MessageRow>) -> Vec<Message> {
        let senders: HashSet<UserId> = rows.iter().map(|row| row.sender_id.clone()).collect();
        let profiles = self.resolve(&senders).await;

        rows.into_iter()
            .map(|row| {
                let profile = profiles
                    .get(&row.sender_id)
                    .cloned()
                    .unwrap_or_else(|| Profile::placeholder(row.sender_id.clone()));
                Message::from_row(row, profile)
            })
            .collect()
    }

    /// Number of cached profiles
    pub fn cached(&self) -> usize {
        self.lock_cache().len()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, LruCache<UserId, Profile>> {
        // A poisoned cache only holds plain data; keep using it.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
