#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **rspace-engine** – Matching engine core for RSpace.
//!
//! `Space<S, C, P, A, K, R, E>` is the public contract: `consume`, `produce`,
//! `checkpoint`. It orchestrates, in order, the [`LockManager`] (per-channel-
//! group / per-channel mutual exclusion), a read-time snapshot of the
//! injected [`Store`](rspace_store_core::Store) driver, the candidate
//! extractor (speculative multi-channel matching with backtracking), and the
//! caller-supplied [`Matcher`] — emitting trace events and honoring
//! persistence flags exactly as `spec.md` §4.6 specifies.
//!
//! This crate is executor-agnostic: every public method is a plain `async
//! fn`, with no dependency on a particular runtime. `rspace-runtime` is
//! where Tokio-specific wiring (a `Scheduler`, backend selection, tracing
//! init) lives.

mod engine;
mod extract;
mod locks;
mod matcher;
mod metrics;

pub use engine::{Space, SpaceConfig, SpaceError};
pub use extract::{build_indexed_data, extract_data_candidates, extract_produce_candidate, ExtractError};
pub use locks::LockManager;
pub use matcher::{EqMatcher, Matcher};
pub use metrics::{InMemoryMetrics, MetricsSink, NoopMetrics};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rspace_store_core::SerdeCodec;
    use rspace_store_memory::MemoryStore;

    use super::*;

    type IntSpace = Space<MemoryStore<i64, i64, i64, i64>, i64, i64, i64, i64, i64, std::convert::Infallible>;

    fn new_space() -> IntSpace {
        Space::new(
            Arc::new(MemoryStore::new()),
            Arc::new(EqMatcher),
            Arc::new(SerdeCodec),
            Arc::new(SerdeCodec),
            Arc::new(SerdeCodec),
            Arc::new(SerdeCodec),
            Arc::new(NoopMetrics),
            SpaceConfig::default(),
        )
    }

    // Produce then consume, single channel.
    #[tokio::test]
    async fn produce_then_consume_matches_on_one_channel() {
        let space = new_space();

        let produced = space.produce(1, 10, false, 0).await.unwrap();
        assert!(produced.is_none());

        let (cont_result, matched) =
            space.consume(vec![1], vec![10], 99, false, 0).await.unwrap().expect("should match");
        assert_eq!(cont_result.continuation, 99);
        assert_eq!(cont_result.sequence_number, 1);
        assert_eq!(cont_result.channels, vec![1]);
        assert_eq!(cont_result.patterns, vec![10]);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].value, 10);
        assert!(!matched[0].persist);
    }

    // Consume then produce, single channel.
    #[tokio::test]
    async fn consume_then_produce_matches_on_one_channel() {
        let space = new_space();

        let consumed = space.consume(vec![1], vec![10], 99, false, 0).await.unwrap();
        assert!(consumed.is_none());

        let (cont_result, matched) = space.produce(1, 10, false, 0).await.unwrap().expect("should match");
        assert_eq!(cont_result.continuation, 99);
        assert_eq!(cont_result.sequence_number, 1);
        assert_eq!(matched[0].value, 10);
    }

    // Two-channel consume, produce on each channel in turn.
    #[tokio::test]
    async fn two_channel_consume_matches_once_both_channels_are_produced() {
        let space = new_space();

        let consumed = space.consume(vec![1, 2], vec![10, 20], 7, false, 0).await.unwrap();
        assert!(consumed.is_none());

        let after_first = space.produce(1, 10, false, 0).await.unwrap();
        assert!(after_first.is_none(), "channel 2 still missing data");

        let (cont_result, matched) = space.produce(2, 20, false, 0).await.unwrap().expect("should match now");
        assert_eq!(cont_result.continuation, 7);
        assert_eq!(cont_result.channels, vec![1, 2]);
        assert_eq!(cont_result.patterns, vec![10, 20]);
        assert_eq!(cont_result.sequence_number, 1);
        assert_eq!(matched.len(), 2);
    }

    // A persistent datum is not removed on match.
    #[tokio::test]
    async fn persistent_datum_survives_match() {
        let space = new_space();
        space.produce(1, 10, true, 0).await.unwrap();

        let (_, matched) = space.consume(vec![1], vec![10], 1, false, 0).await.unwrap().expect("should match");
        assert!(matched[0].persist);
    }

    // A non-matching produce leaves the waiting continuation and the
    // datum both present.
    #[tokio::test]
    async fn no_match_persists_continuation() {
        let space = new_space();
        space.consume(vec![1], vec![10], 1, false, 0).await.unwrap();

        let result = space.produce(1, 11, false, 0).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn invalid_argument_on_empty_channels() {
        let space = new_space();
        let err = space.consume(vec![], vec![], 1, false, 0).await.unwrap_err();
        assert!(matches!(err, SpaceError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn invalid_argument_on_arity_mismatch() {
        let space = new_space();
        let err = space.consume(vec![1, 2], vec![10], 1, false, 0).await.unwrap_err();
        assert!(matches!(err, SpaceError::InvalidArgument(_)));
    }

    // Event log ordering after a two-channel rendezvous.
    #[tokio::test]
    async fn event_log_orders_consume_then_produces_then_comm() {
        let space = new_space();
        space.consume(vec![1, 2], vec![10, 20], 7, false, 0).await.unwrap();
        space.produce(1, 10, false, 0).await.unwrap();
        space.produce(2, 20, false, 0).await.unwrap();

        let (_, events) = space.checkpoint().await.unwrap();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], rspace_store_core::TraceEvent::Consume(_)));
        assert!(matches!(events[1], rspace_store_core::TraceEvent::Produce(_)));
        assert!(matches!(events[2], rspace_store_core::TraceEvent::Produce(_)));
        assert!(matches!(events[3], rspace_store_core::TraceEvent::Comm { .. }));

        // A second checkpoint on an idle engine returns the same root and
        // an empty event list.
        let (root_after, events_after) = space.checkpoint().await.unwrap();
        assert!(events_after.is_empty());
        let (root_again, _) = space.checkpoint().await.unwrap();
        assert_eq!(root_after, root_again);
    }
}
