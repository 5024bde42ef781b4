#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **rspace-store-core** – Core storage abstraction for RSpace.
//!
//! This crate defines the [`Store`] trait — a transactional, keyed multimap
//! with three logical tables (per-channel data, per-channel-group waiting
//! continuations, per-channel join index) — plus the append-only
//! [`EventLog`] that accumulates [`TraceEvent`]s between checkpoints.
//!
//! Storage drivers (in-memory, sled-backed, ...) implement [`Store`] in
//! separate crates that depend on this core abstraction, exactly as
//! `rspace-store-memory` and `rspace-store-sled` do.

mod eventlog;
mod store;

pub use eventlog::EventLog;
pub use store::{Store, StoreError};

pub use rspace_types::{
    CausalDigest, Codec, CodecError, ConsumeEventRef, ContResult, DataCandidate, Datum,
    MatchedValue, Opaque, ProduceCandidate, ProduceEventRef, SequenceNumber, SerdeCodec,
    TraceEvent, WaitingContinuation,
};

/// Convenient prelude for importing the most common types.
pub mod prelude {
    pub use super::{
        CausalDigest, Codec, CodecError, ConsumeEventRef, ContResult, DataCandidate, Datum,
        EventLog, MatchedValue, Opaque, ProduceCandidate, ProduceEventRef, SequenceNumber,
        SerdeCodec, Store, StoreError, TraceEvent, WaitingContinuation,
    };
}
