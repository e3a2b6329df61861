/// E2E test: two clients chatting in one room
///
/// Scenario:
/// 1. The room already holds two messages
/// 2. Alice and Bob open the room
/// 3. Both send; each sees their own message immediately and the other's via the channel
/// 4. Both views converge to the same ordered sequence with no duplicates
use std::collections::HashSet;

use super::helpers::Backend;
use crate::core_sync::types::UserId;
use crate::test_utils::{eventually, message_row};

const ROOM: &str = "general";

#[tokio::test]
async fn test_two_clients_converge() -> anyhow::Result<()> {
    let backend = Backend::new();
    backend.store.seed(message_row("h1", ROOM, "charlie", "welcome", 1));
    backend.store.seed(message_row("h2", ROOM, "alice", "hi all", 2));

    let alice = backend.join(ROOM).await;
    let bob = backend.join(ROOM).await;
    assert_eq!(alice.snapshot().len(), 2);
    assert_eq!(bob.snapshot().len(), 2);

    let from_alice = alice.send(&UserId::new("alice"), "hello bob").await?;
    let from_bob = bob.send(&UserId::new("bob"), "  hey alice  ").await?;
    assert_eq!(from_bob.content, "hey alice");

    // Local echo is immediate
    assert!(alice.snapshot().iter().any(|m| m.id == from_alice.id));
    assert!(bob.snapshot().iter().any(|m| m.id == from_bob.id));

    let (a, b) = (alice.messages(), bob.messages());
    eventually(move || a.borrow().len() == 4 && b.borrow().len() == 4).await;

    let alice_ids = alice.snapshot().ids();
    let bob_ids = bob.snapshot().ids();
    assert_eq!(alice_ids, bob_ids);
    assert_eq!(alice_ids.iter().collect::<HashSet<_>>().len(), 4);

    let view = bob.snapshot();
    assert!(view.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    let alice_msg = view.iter().find(|m| m.id == from_alice.id).expect("alice's message");
    assert_eq!(alice_msg.sender.display_name, "Alice");

    alice.close().await;
    bob.close().await;
    Ok(())
}

#[tokio::test]
async fn test_rooms_are_isolated() -> anyhow::Result<()> {
    let backend = Backend::new();
    let general = backend.join(ROOM).await;
    let random = backend.join("random").await;

    general.send(&UserId::new("alice"), "only in general").await?;
    random.send(&UserId::new("bob"), "only in random").await?;

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert_eq!(general.snapshot().len(), 1);
    assert_eq!(random.snapshot().len(), 1);
    assert_eq!(general.snapshot()[0].content, "only in general");

    general.close().await;
    random.close().await;
    Ok(())
}
