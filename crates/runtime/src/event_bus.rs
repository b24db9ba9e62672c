use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared by every bus so events from different buses can be merged back into
/// emission order.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Key returned by [`EventBus::subscribe`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subscription(u64);

/// An event with the global position at which it was emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequenced<E> {
    pub seq: u64,
    pub event: E,
}

/// Deterministic multi-subscriber event queue.
///
/// Every subscriber owns a FIFO queue; `emit` appends a clone of the event to
/// each of them and `drain` hands the queue back in delivery order. Nothing is
/// invoked re-entrantly: subscribers pull their events when they are ready.
#[derive(Debug)]
pub struct EventBus<E> {
    next_id: u64,
    queues: BTreeMap<Subscription, Vec<Sequenced<E>>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            queues: BTreeMap::new(),
        }
    }
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Subscription {
        let sub = Subscription(self.next_id);
        self.next_id += 1;
        self.queues.insert(sub, Vec::new());
        sub
    }

    /// Drops the subscriber and any undelivered events.
    ///
    /// Returns `false` if `sub` was not subscribed.
    pub fn unsubscribe(&mut self, sub: Subscription) -> bool {
        self.queues.remove(&sub).is_some()
    }

    pub fn is_subscribed(&self, sub: Subscription) -> bool {
        self.queues.contains_key(&sub)
    }

    pub fn subscriber_count(&self) -> usize {
        self.queues.len()
    }

    /// Queues `event` for every subscriber. Returns the number of queues reached.
    pub fn emit(&mut self, event: E) -> usize {
        let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);
        for queue in self.queues.values_mut() {
            queue.push(Sequenced {
                seq,
                event: event.clone(),
            });
        }
        self.queues.len()
    }

    pub fn pending(&self, sub: Subscription) -> usize {
        self.queues.get(&sub).map(Vec::len).unwrap_or(0)
    }

    pub fn drain(&mut self, sub: Subscription) -> Vec<E> {
        self.drain_sequenced(sub)
            .into_iter()
            .map(|s| s.event)
            .collect()
    }

    /// Like [`Self::drain`], keeping each event's emission stamp.
    pub fn drain_sequenced(&mut self, sub: Subscription) -> Vec<Sequenced<E>> {
        self.queues
            .get_mut(&sub)
            .map(std::mem::take)
            .unwrap_or_default()
    }
}
