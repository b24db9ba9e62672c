use foundation::time::Time;

/// Deterministic keyed timer queue.
///
/// Key properties:
/// - At most one pending timer per key; scheduling an existing key replaces
///   its payload and keeps the original due time.
/// - Due timers pop in `(due, insertion)` order.
/// - Cancellation does not perturb the order of remaining timers.
///
/// Vec-backed: the queues this serves hold a handful of entries at a time.
#[derive(Debug)]
pub struct TimerQueue<K, T> {
    next_seq: u64,
    timers: Vec<Timer<K, T>>,
}

#[derive(Debug)]
struct Timer<K, T> {
    due: Time,
    seq: u64,
    key: K,
    payload: T,
}

impl<K, T> Default for TimerQueue<K, T> {
    fn default() -> Self {
        Self {
            next_seq: 0,
            timers: Vec::new(),
        }
    }
}

impl<K: PartialEq + Copy, T> TimerQueue<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn contains(&self, key: K) -> bool {
        self.timers.iter().any(|t| t.key == key)
    }

    /// Schedules `payload` for `key` at `due`.
    ///
    /// Returns `true` if a new timer was created, `false` if an existing
    /// timer for `key` had its payload replaced.
    pub fn schedule(&mut self, due: Time, key: K, payload: T) -> bool {
        if let Some(existing) = self.timers.iter_mut().find(|t| t.key == key) {
            existing.payload = payload;
            return false;
        }
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.timers.push(Timer {
            due,
            seq,
            key,
            payload,
        });
        true
    }

    pub fn cancel(&mut self, key: K) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.key != key);
        self.timers.len() != before
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }

    pub fn next_due(&self) -> Option<Time> {
        self.timers
            .iter()
            .map(|t| t.due)
            .min_by(|a, b| a.0.total_cmp(&b.0))
    }

    /// Removes and returns every timer with `due <= now`, oldest first.
    pub fn pop_due(&mut self, now: Time) -> Vec<(K, T)> {
        let (mut due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.timers)
            .into_iter()
            .partition(|t| t.due.0 <= now.0);
        self.timers = pending;
        due.sort_by(|a, b| a.due.0.total_cmp(&b.due.0).then_with(|| a.seq.cmp(&b.seq)));
        due.into_iter().map(|t| (t.key, t.payload)).collect()
    }
}
