/*
    types.rs - Common types for the room synchronizer

    Defines:
    - Timestamps
    - IDs for rooms, messages, users
    - Raw message rows, enriched messages, profiles
    - Room metadata
*/

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unix timestamp in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a timestamp representing the current time
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Timestamp(millis)
    }

    /// Create a timestamp from milliseconds since epoch
    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    /// Get milliseconds since epoch
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a room
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        RoomId(id.into())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a message, assigned by the message store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        MessageId(id.into())
    }

    pub fn generate() -> Self {
        MessageId(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User identifier (issued by the authentication provider)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display profile for a message sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl Profile {
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            avatar_url: None,
        }
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }

    /// Profile used when the lookup failed or returned nothing.
    /// Empty name, no avatar.
    pub fn placeholder(user_id: UserId) -> Self {
        Self {
            user_id,
            display_name: String::new(),
            avatar_url: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.display_name.is_empty() && self.avatar_url.is_none()
    }
}

/// Raw message row as stored by the backend and carried by live events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: Timestamp,
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
}

/// Insert payload for the message store; id and timestamp are server-assigned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
}

/// A message enriched with its sender's profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender: Profile,
    pub content: String,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
}

impl Message {
    /// Attach a profile to a raw row.
    ///
    /// The profile's user id is forced to the row's sender so a mismatched
    /// lookup result can never re-attribute a message.
    pub fn from_row(row: MessageRow, mut sender: Profile) -> Self {
        sender.user_id = row.sender_id;
        Self {
            id: row.id,
            room_id: row.room_id,
            sender,
            content: row.content,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }

    pub fn sender_id(&self) -> &UserId {
        &self.sender.user_id
    }

    /// Expiry is advisory only; nothing in the synchronizer drops expired messages.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        matches!(self.expires_at, Some(expires_at) if now >= expires_at)
    }
}

/// Room metadata, owned by the membership component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub creator: UserId,
    pub created_at: Timestamp,
    pub participants: HashSet<UserId>,
}

impl Room {
    pub fn new(id: RoomId, name: impl Into<String>, creator: UserId) -> Self {
        let mut participants = HashSet::new();
        participants.insert(creator.clone());
        Self {
            id,
            name: name.into(),
            creator,
            created_at: Timestamp::now(),
            participants,
        }
    }

    pub fn with_participant(mut self, user: UserId) -> Self {
        self.participants.insert(user);
        self
    }

    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }
}
