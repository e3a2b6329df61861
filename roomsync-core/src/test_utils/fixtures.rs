//! Test fixtures for rows, messages and profiles

use crate::core_sync::types::{Message, MessageId, MessageRow, Profile, RoomId, Timestamp, UserId};

/// Raw row with a fixed creation time in milliseconds
pub fn message_row(id: &str, room: &str, sender: &str, content: &str, created_at: u64) -> MessageRow {
    MessageRow {
        id: MessageId::new(id),
        room_id: RoomId::new(room),
        sender_id: UserId::new(sender),
        content: content.to_string(),
        created_at: Timestamp::from_millis(created_at),
        expires_at: None,
    }
}

/// Profile with a display name and a predictable avatar URL
pub fn profile(user: &str, name: &str) -> Profile {
    Profile::new(UserId::new(user), name).with_avatar(format!("https://avatars.test/{user}.png"))
}

/// Enriched message whose sender profile is named after the user id
pub fn message(id: &str, room: &str, sender: &str, content: &str, created_at: u64) -> Message {
    Message::from_row(message_row(id, room, sender, content, created_at), profile(sender, sender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_are_consistent() {
        let msg = message("m1", "r", "alice", "hi", 7);
        assert_eq!(msg.sender_id(), &UserId::new("alice"));
        assert_eq!(msg.created_at, Timestamp(7));
        assert!(!msg.sender.is_placeholder());
    }
}
