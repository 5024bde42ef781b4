//! The append-only trace log accumulated between checkpoints.

use std::collections::VecDeque;
use std::sync::Mutex;

use rspace_types::TraceEvent;

/// An append-only sequence of [`TraceEvent`]s, guarded by an atomic-swap
/// primitive (`spec.md` §4.2).
///
/// `prepend` pushes one event to the head in O(1); `take` atomically
/// returns and clears the whole log. `spec.md` §9 suggests an atomic
/// pointer to an immutable linked list (CAS-replace-head / CAS-swap-empty)
/// to avoid per-append allocation; this implementation uses a
/// mutex-guarded `VecDeque` instead, which satisfies the same `prepend`/
/// `take` contract at the cost of a lock per call (see `DESIGN.md`).
pub struct EventLog<C, P, A, K> {
    events: Mutex<VecDeque<TraceEvent<C, P, A, K>>>,
}

impl<C, P, A, K> Default for EventLog<C, P, A, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, P, A, K> EventLog<C, P, A, K> {
    /// Create an empty event log.
    pub fn new() -> Self {
        Self { events: Mutex::new(VecDeque::new()) }
    }

    /// Prepend one event to the log.
    pub fn prepend(&self, event: TraceEvent<C, P, A, K>) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_front(event);
    }

    /// Atomically take every event accumulated so far, leaving the log
    /// empty, and return them in program order (the order their owning
    /// calls committed, oldest first) — the reverse of internal prepend
    /// order, per `spec.md` §5 "Event-log ordering is program order of
    /// commits" and the worked example in `spec.md` §8 S6.
    pub fn take(&self) -> Vec<TraceEvent<C, P, A, K>> {
        let mut guard = self
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let drained: VecDeque<_> = std::mem::take(&mut *guard);
        drained.into_iter().rev().collect()
    }

    /// Number of events currently buffered, mainly for tests and metrics.
    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether the log is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn produce_event(seq: u64) -> TraceEvent<i64, i64, i64, i64> {
        TraceEvent::Produce(rspace_types::ProduceEventRef::new(1, [0u8; 32], [0u8; 32], false, seq))
    }

    #[test]
    fn take_returns_program_order() {
        let log: EventLog<i64, i64, i64, i64> = EventLog::new();
        log.prepend(produce_event(0));
        log.prepend(produce_event(1));
        log.prepend(produce_event(2));

        let events = log.take();
        let seqs: Vec<u64> = events
            .iter()
            .map(|e| match e {
                TraceEvent::Produce(p) => p.seq,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert!(log.is_empty());
    }

    #[test]
    fn take_clears_the_log() {
        let log: EventLog<i64, i64, i64, i64> = EventLog::new();
        log.prepend(produce_event(0));
        assert_eq!(log.len(), 1);
        let _ = log.take();
        assert_eq!(log.len(), 0);
        assert!(log.take().is_empty());
    }
}
