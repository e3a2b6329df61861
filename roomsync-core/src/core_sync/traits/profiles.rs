//! Profile Lookup Trait

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use crate::core_sync::errors::SyncResult;
use crate::core_sync::types::{Profile, UserId};

/// Maps user ids to display profiles
///
/// Ids missing from the returned map have no profile. A whole-call error
/// should be `SyncError::ProfileUnavailable`; callers never treat it as fatal.
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn get_profiles(&self, user_ids: &HashSet<UserId>) -> SyncResult<HashMap<UserId, Profile>>;
}
