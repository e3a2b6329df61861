//! Message Reconciler
//!
//! Owns the authoritative message set of one open room and merges the three
//! sources that feed it:
//!
//! ```text
//!   HistoryLoader ──BaseSet────┐
//!   LiveSubscription ─Observed─┼──► Reconciler ──watch──► MessageView
//!   OutboundSend ──LocalEcho───┘
//! ```
//!
//! Every input is an insert-if-absent keyed by message id. The view is kept
//! sorted by `created_at`, ties broken by first-insertion order, and is
//! republished as a fresh immutable snapshot once per applied input. Readers
//! never see a partially applied batch.

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::core_sync::types::{Message, MessageId, RoomId};
use crate::metrics::{record_counter, RECONCILER_DUPLICATES, RECONCILER_INSERTED};

/// One input to the reconciler
#[derive(Debug, Clone)]
pub enum ReconcilerInput {
    /// Full history snapshot from the history loader
    BaseSet(Vec<Message>),
    /// Message pushed by the live channel
    Observed(Message),
    /// Message this client just persisted
    LocalEcho(Message),
}

impl ReconcilerInput {
    fn source(&self) -> &'static str {
        match self {
            ReconcilerInput::BaseSet(_) => "base_set",
            ReconcilerInput::Observed(_) => "observed",
            ReconcilerInput::LocalEcho(_) => "local_echo",
        }
    }
}

/// What one input did to the view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub inserted: usize,
    pub duplicates: usize,
    /// Messages for another room, or inputs dropped after close
    pub ignored: usize,
}

impl ApplyOutcome {
    pub fn changed(&self) -> bool {
        self.inserted > 0
    }
}

/// Immutable, ordered snapshot of a room's messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageView(Arc<Vec<Message>>);

impl MessageView {
    pub fn ids(&self) -> Vec<MessageId> {
        self.0.iter().map(|m| m.id.clone()).collect()
    }

    /// Earliest messages whose cumulative content length fits `max_chars`
    pub fn within_char_budget(&self, max_chars: usize) -> &[Message] {
        let mut used = 0usize;
        let mut end = 0;
        for message in self.0.iter() {
            used += message.content.chars().count();
            if used > max_chars {
                break;
            }
            end += 1;
        }
        &self.0[..end]
    }
}

impl Deref for MessageView {
    type Target = [Message];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

struct Entry {
    seq: u64,
    message: Message,
}

#[derive(Default)]
struct ReconcilerState {
    ids: HashSet<MessageId>,
    entries: Vec<Entry>,
    next_seq: u64,
    closed: bool,
}

impl ReconcilerState {
    /// Insert keeping (created_at, seq) order. Returns false on duplicate id.
    fn insert(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        // The new seq is the largest so far, so it goes after every equal timestamp
        let created_at = message.created_at;
        let pos = self
            .entries
            .partition_point(|e| e.message.created_at <= created_at);
        debug_assert!(self.entries[..pos].iter().all(|e| e.seq < seq));
        self.entries.insert(pos, Entry { seq, message });
        true
    }

    fn view(&self) -> MessageView {
        MessageView(Arc::new(
            self.entries.iter().map(|e| e.message.clone()).collect(),
        ))
    }
}

/// Keyed, ordered message set for one room
pub struct Reconciler {
    room_id: RoomId,
    state: Mutex<ReconcilerState>,
    view_tx: watch::Sender<MessageView>,
}

impl Reconciler {
    pub fn new(room_id: RoomId) -> Self {
        let (view_tx, _rx) = watch::channel(MessageView::default());
        Self {
            room_id,
            state: Mutex::new(ReconcilerState::default()),
            view_tx,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Apply one input atomically and publish the resulting view
    pub fn apply(&self, input: ReconcilerInput) -> ApplyOutcome {
        let source = input.source();
        let messages = match input {
            ReconcilerInput::BaseSet(messages) => messages,
            ReconcilerInput::Observed(message) | ReconcilerInput::LocalEcho(message) => {
                vec![message]
            }
        };

        let mut outcome = ApplyOutcome::default();
        let mut state = self.lock_state();

        if state.closed {
            trace!(room_id = %self.room_id, source, "Reconciler closed, dropping input");
            outcome.ignored = messages.len();
            return outcome;
        }

        for message in messages {
            if message.room_id != self.room_id {
                warn!(
                    room_id = %self.room_id,
                    other_room = %message.room_id,
                    message_id = %message.id,
                    "Ignoring message for another room"
                );
                outcome.ignored += 1;
            } else if state.insert(message) {
                outcome.inserted += 1;
            } else {
                outcome.duplicates += 1;
            }
        }

        if outcome.changed() {
            // Published while the lock is held so snapshots follow apply order
            self.view_tx.send_replace(state.view());
        }
        drop(state);

        if outcome.inserted > 0 {
            record_counter(RECONCILER_INSERTED, outcome.inserted as u64);
        }
        if outcome.duplicates > 0 {
            record_counter(RECONCILER_DUPLICATES, outcome.duplicates as u64);
        }

        debug!(
            room_id = %self.room_id,
            source,
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            ignored = outcome.ignored,
            "Reconciler input applied"
        );

        outcome
    }

    pub fn base_set(&self, messages: Vec<Message>) -> ApplyOutcome {
        self.apply(ReconcilerInput::BaseSet(messages))
    }

    pub fn observed(&self, message: Message) -> ApplyOutcome {
        self.apply(ReconcilerInput::Observed(message))
    }

    pub fn local_echo(&self, message: Message) -> ApplyOutcome {
        self.apply(ReconcilerInput::LocalEcho(message))
    }

    /// Subscribe to view updates. The receiver starts at the current view.
    pub fn subscribe(&self) -> watch::Receiver<MessageView> {
        self.view_tx.subscribe()
    }

    /// Current view
    pub fn snapshot(&self) -> MessageView {
        self.view_tx.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.lock_state().ids.contains(id)
    }

    /// Stop accepting input. The last view stays readable.
    pub fn close(&self) {
        let mut state = self.lock_state();
        if !state.closed {
            state.closed = true;
            debug!(room_id = %self.room_id, messages = state.entries.len(), "Reconciler closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    fn lock_state(&self) -> MutexGuard<'_, ReconcilerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::message;
    use proptest::prelude::*;

    const ROOM: &str = "room-1";

    fn ids(view: &MessageView) -> Vec<String> {
        view.iter().map(|m| m.id.0.clone()).collect()
    }

    #[test]
    fn test_empty_reconciler() {
        let reconciler = Reconciler::new(RoomId::new(ROOM));
        assert!(reconciler.is_empty());
        assert!(reconciler.snapshot().is_empty());

        let outcome = reconciler.base_set(Vec::new());
        assert!(!outcome.changed());
        assert!(reconciler.snapshot().is_empty());
    }

    #[test]
    fn test_base_set_then_observed() {
        let reconciler = Reconciler::new(RoomId::new(ROOM));
        reconciler.base_set(vec![message("m1", ROOM, "alice", "a", 10), message("m2", ROOM, "bob", "b", 20)]);

        let outcome = reconciler.observed(message("m3", ROOM, "alice", "c", 15));
        assert_eq!(outcome.inserted, 1);
        assert_eq!(ids(&reconciler.snapshot()), vec!["m1", "m3", "m2"]);
    }

    #[test]
    fn test_local_echo_then_observed_is_noop() {
        let reconciler = Reconciler::new(RoomId::new(ROOM));
        let mut rx = reconciler.subscribe();
        rx.borrow_and_update();

        reconciler.local_echo(message("m1", ROOM, "alice", "hi", 10));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        let outcome = reconciler.observed(message("m1", ROOM, "alice", "hi", 10));
        assert_eq!(outcome, ApplyOutcome { inserted: 0, duplicates: 1, ignored: 0 });
        assert!(!rx.has_changed().unwrap());
        assert_eq!(reconciler.len(), 1);
    }

    #[test]
    fn test_late_base_set_merges() {
        let reconciler = Reconciler::new(RoomId::new(ROOM));
        reconciler.observed(message("m3", ROOM, "alice", "live", 30));

        let outcome = reconciler.base_set(vec![
            message("m1", ROOM, "alice", "a", 10),
            message("m3", ROOM, "alice", "live", 30),
        ]);
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(ids(&reconciler.snapshot()), vec!["m1", "m3"]);
    }

    #[test]
    fn test_ties_keep_first_insertion_order() {
        let reconciler = Reconciler::new(RoomId::new(ROOM));
        reconciler.observed(message("b", ROOM, "bob", "second", 10));
        reconciler.observed(message("a", ROOM, "alice", "first", 10));
        reconciler.observed(message("c", ROOM, "carol", "early", 5));

        assert_eq!(ids(&reconciler.snapshot()), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_same_sender_interleaving() {
        // A@t1, B@t2, A@t3 in every arrival order
        let inputs = [
            message("a1", ROOM, "alice", "1", 1),
            message("b2", ROOM, "bob", "2", 2),
            message("a3", ROOM, "alice", "3", 3),
        ];
        let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

        for order in orders {
            let reconciler = Reconciler::new(RoomId::new(ROOM));
            for i in order {
                reconciler.observed(inputs[i].clone());
            }
            assert_eq!(ids(&reconciler.snapshot()), vec!["a1", "b2", "a3"], "order {order:?}");
        }
    }

    #[test]
    fn test_foreign_room_ignored() {
        let reconciler = Reconciler::new(RoomId::new(ROOM));
        let outcome = reconciler.observed(message("x", "elsewhere", "alice", "hi", 1));
        assert_eq!(outcome.ignored, 1);
        assert!(reconciler.is_empty());
    }

    #[test]
    fn test_closed_drops_input() {
        let reconciler = Reconciler::new(RoomId::new(ROOM));
        reconciler.observed(message("m1", ROOM, "alice", "hi", 1));
        reconciler.close();
        reconciler.close();

        let outcome = reconciler.observed(message("m2", ROOM, "alice", "late", 2));
        assert_eq!(outcome.ignored, 1);
        assert!(reconciler.is_closed());
        assert_eq!(ids(&reconciler.snapshot()), vec!["m1"]);
        assert!(!reconciler.contains(&MessageId::new("m2")));
    }

    #[test]
    fn test_within_char_budget() {
        let reconciler = Reconciler::new(RoomId::new(ROOM));
        reconciler.base_set(vec![
            message("m1", ROOM, "alice", "hello", 1),
            message("m2", ROOM, "bob", "wörld", 2),
            message("m3", ROOM, "alice", "again", 3),
        ]);
        let view = reconciler.snapshot();

        assert_eq!(view.within_char_budget(0).len(), 0);
        assert_eq!(view.within_char_budget(10).len(), 2);
        assert_eq!(view.within_char_budget(14).len(), 2);
        assert_eq!(view.within_char_budget(100).len(), 3);
    }

    #[tokio::test]
    async fn test_subscriber_sees_each_batch_whole() {
        let reconciler = Arc::new(Reconciler::new(RoomId::new(ROOM)));
        let mut rx = reconciler.subscribe();

        let batch: Vec<_> = (0..50)
            .map(|i| message(&format!("m{i}"), ROOM, "alice", "x", i))
            .collect();
        reconciler.base_set(batch);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 50);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Base(Vec<(u8, u8)>),
        Observed(u8, u8),
        Echo(u8, u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        // (id, timestamp) pairs from small domains to force duplicates and ties
        let pair = (0u8..20, 0u8..8);
        prop_oneof![
            prop::collection::vec(pair.clone(), 0..10).prop_map(Op::Base),
            pair.clone().prop_map(|(id, ts)| Op::Observed(id, ts)),
            pair.prop_map(|(id, ts)| Op::Echo(id, ts)),
        ]
    }

    fn to_message(id: u8, ts: u8) -> Message {
        message(&format!("m{id}"), ROOM, "alice", "x", ts as u64)
    }

    proptest! {
        #[test]
        fn prop_unique_and_sorted(ops in prop::collection::vec(op_strategy(), 0..40)) {
            let reconciler = Reconciler::new(RoomId::new(ROOM));
            let mut expected_ids = HashSet::new();

            for op in ops {
                match op {
                    Op::Base(pairs) => {
                        expected_ids.extend(pairs.iter().map(|(id, _)| *id));
                        reconciler.base_set(pairs.into_iter().map(|(id, ts)| to_message(id, ts)).collect());
                    }
                    Op::Observed(id, ts) => {
                        expected_ids.insert(id);
                        reconciler.observed(to_message(id, ts));
                    }
                    Op::Echo(id, ts) => {
                        expected_ids.insert(id);
                        reconciler.local_echo(to_message(id, ts));
                    }
                }

                let view = reconciler.snapshot();
                prop_assert!(view.windows(2).all(|w| w[0].created_at <= w[1].created_at));
            }

            let view = reconciler.snapshot();
            let seen: HashSet<_> = view.iter().map(|m| m.id.clone()).collect();
            prop_assert_eq!(seen.len(), view.len());
            prop_assert_eq!(view.len(), expected_ids.len());
        }

        #[test]
        fn prop_first_arrival_wins(ts_first in 0u64..100, ts_second in 0u64..100) {
            let reconciler = Reconciler::new(RoomId::new(ROOM));
            reconciler.local_echo(message("m1", ROOM, "alice", "echo", ts_first));
            reconciler.observed(message("m1", ROOM, "alice", "observed", ts_second));

            let view = reconciler.snapshot();
            prop_assert_eq!(view.len(), 1);
            prop_assert_eq!(&view[0].content, "echo");
        }
    }
}
