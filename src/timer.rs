//! Timer registry: a min-heap of deadlines with generation-tagged
//! cancellation tokens.
//!
//! Storage is slab-style (a `Vec` of reusable slots plus a free list), the
//! same shape mio's old `util/slab.rs` used for its own `Token` bookkeeping,
//! repurposed here so a [`crate::timers_compose::SteadyTimer`] that is reset
//! thousands of times over its lifetime (e.g. a `co_sleep` loop) reuses one
//! slot rather than growing the registry without bound. Heap entries outlive
//! cancellation (lazy deletion): a cancelled or reused slot's generation no
//! longer matches what's in the heap, so [`TimerRegistry::process_expired`]
//! discards stale pops instead of acting on them.
//!
//! Mutated only on the reactor thread: a stop callback that wants to cancel
//! a timer posts the cancellation onto its captured executor rather than
//! calling [`TimerRegistry::cancel`] directly from an arbitrary thread.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::reactor::Completion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken {
    slot: usize,
    generation: u64,
}

enum SlotState {
    Empty,
    Pending {
        deadline: Instant,
        completion: Box<dyn Completion>,
    },
}

struct Slot {
    generation: u64,
    state: SlotState,
}

#[derive(PartialEq, Eq)]
struct HeapKey {
    deadline: Instant,
    seq: u64,
    slot: usize,
    generation: u64,
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}
impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub struct TimerRegistry {
    slots: Vec<Slot>,
    free: Vec<usize>,
    heap: BinaryHeap<Reverse<HeapKey>>,
    next_seq: u64,
}

impl TimerRegistry {
    pub fn new() -> TimerRegistry {
        TimerRegistry::default()
    }

    /// Insert a new pending entry, O(log n). Returns a token that uniquely
    /// identifies this specific registration (not just the slot).
    pub fn add(&mut self, deadline: Instant, completion: Box<dyn Completion>) -> TimerToken {
        let slot_idx = match self.free.pop() {
            Some(idx) => idx,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    state: SlotState::Empty,
                });
                self.slots.len() - 1
            }
        };
        let generation = self.slots[slot_idx].generation;
        self.slots[slot_idx].state = SlotState::Pending {
            deadline,
            completion,
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(HeapKey {
            deadline,
            seq,
            slot: slot_idx,
            generation,
        }));
        TimerToken {
            slot: slot_idx,
            generation,
        }
    }

    /// Cancel a pending entry. Returns the completion for the caller to
    /// `on_abort` on the reactor thread; a stale or already-fired token
    /// returns `None`.
    pub fn cancel(&mut self, token: TimerToken) -> Option<Box<dyn Completion>> {
        let slot = self.slots.get_mut(token.slot)?;
        if slot.generation != token.generation {
            return None;
        }
        match std::mem::replace(&mut slot.state, SlotState::Empty) {
            SlotState::Pending { completion, .. } => {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(token.slot);
                Some(completion)
            }
            SlotState::Empty => None,
        }
    }

    /// Peek the next deadline among still-pending entries, discarding any
    /// stale heap entries found along the way.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.drop_stale_heap_top();
        self.heap.peek().map(|Reverse(k)| k.deadline)
    }

    /// Pop and fire every entry whose deadline is `<= now`. Returns the
    /// number of completions actually invoked (stale/cancelled entries
    /// found along the way are silently discarded and don't count).
    pub fn process_expired(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        loop {
            self.drop_stale_heap_top();
            let Some(Reverse(key)) = self.heap.peek() else {
                break;
            };
            if key.deadline > now {
                break;
            }
            let Reverse(key) = self.heap.pop().unwrap();
            let slot = &mut self.slots[key.slot];
            if slot.generation != key.generation {
                continue;
            }
            match std::mem::replace(&mut slot.state, SlotState::Empty) {
                SlotState::Pending { completion, .. } => {
                    slot.generation = slot.generation.wrapping_add(1);
                    self.free.push(key.slot);
                    completion.on_complete();
                    fired += 1;
                }
                SlotState::Empty => {}
            }
        }
        fired
    }

    pub fn is_empty(&self) -> bool {
        self.slots.len() == self.free.len()
    }

    fn drop_stale_heap_top(&mut self) {
        while let Some(Reverse(key)) = self.heap.peek() {
            let stale = self
                .slots
                .get(key.slot)
                .map(|s| s.generation != key.generation)
                .unwrap_or(true);
            if stale {
                self.heap.pop();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Counter(Arc<AtomicUsize>);
    impl Completion for Counter {
        fn on_complete(self: Box<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn on_abort(self: Box<Self>, _err: Error) {
            self.0.fetch_add(1000, Ordering::SeqCst);
        }
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut reg = TimerRegistry::new();
        let base = Instant::now();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for (i, ms) in [30u64, 10, 20].into_iter().enumerate() {
            let order = order.clone();
            struct Tag(Arc<std::sync::Mutex<Vec<usize>>>, usize);
            impl Completion for Tag {
                fn on_complete(self: Box<Self>) {
                    self.0.lock().unwrap().push(self.1);
                }
                fn on_abort(self: Box<Self>, _err: Error) {}
            }
            reg.add(base + Duration::from_millis(ms), Box::new(Tag(order, i)));
        }

        let fired = reg.process_expired(base + Duration::from_millis(100));
        assert_eq!(fired, 3);
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn cancel_then_reuse_slot_does_not_double_fire() {
        let mut reg = TimerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let base = Instant::now();

        let token = reg.add(base + Duration::from_millis(10), Box::new(Counter(hits.clone())));
        assert!(reg.cancel(token).is_some());
        assert!(reg.cancel(token).is_none(), "stale token must not cancel twice");

        // Re-add should reuse the freed slot with a bumped generation.
        reg.add(base + Duration::from_millis(5), Box::new(Counter(hits.clone())));
        let fired = reg.process_expired(base + Duration::from_millis(50));
        assert_eq!(fired, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
