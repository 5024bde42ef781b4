#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **rspace-types** – Generic data model for the RSpace matching engine.
//!
//! This crate defines the types shared by the store, the candidate extractor,
//! and the engine: [`Datum`], [`WaitingContinuation`], the candidate structs
//! produced during speculative matching, the [`ContResult`] returned to
//! callers, and the [`TraceEvent`] log entries. Everything here is generic
//! over the four opaque types the engine is parameterized over — channel
//! (`C`), pattern (`P`), datum payload (`A`), and continuation (`K`) — plus
//! the matcher's result type `R`. It makes no assumptions about storage,
//! concurrency, or the surface language whose terms flow through it.

use std::fmt::Debug;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

//─────────────────────────────
//  Core type aliases
//─────────────────────────────

/// Content hash identifying a checkpoint root or an event reference.
///
/// The hash algorithm is an implementation choice; BLAKE3 is used throughout
/// this workspace in place of the reference BLAKE2b-256 (see `DESIGN.md`).
pub type CausalDigest = [u8; 32];

/// Monotonic counter attached to every produce/consume call and propagated
/// into the [`ContResult`] returned on a successful match.
pub type SequenceNumber = u64;

/// Convenience bound covering every opaque type the engine indexes by.
///
/// `Codec`'s default implementation ([`SerdeCodec`]) additionally requires
/// `Serialize + for<'de> Deserialize<'de>`; this bound alone is what the
/// store and candidate extractor need to hold values in maps and compare
/// candidates.
pub trait Opaque: Clone + Eq + Hash + Debug + Send + Sync + 'static {}
impl<T> Opaque for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

//─────────────────────────────
//  Hashing
//─────────────────────────────

/// Hash raw bytes into a [`CausalDigest`].
pub fn digest_bytes(bytes: &[u8]) -> CausalDigest {
    *blake3::hash(bytes).as_bytes()
}

/// Errors that can occur while encoding or decoding an opaque value.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization of a caller-supplied value failed.
    #[error("failed to encode value: {0}")]
    EncodeFailed(String),
    /// Deserialization of stored bytes failed.
    #[error("failed to decode value: {0}")]
    DecodeFailed(String),
}

/// Bidirectional encode/decode plus content hashing for one opaque type.
///
/// This is the explicit vtable the engine is constructed with (see
/// `SPEC_FULL.md` §9 "Implicit type-class serializers"). Round-trip MUST be
/// total on values produced by the engine's own callers: `decode(encode(x))
/// == x`.
pub trait Codec<T>: Send + Sync {
    /// Serialize `value` to its wire representation.
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    /// Deserialize a value previously produced by [`Codec::encode`].
    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;
    /// Content hash of `value`. The default derives it from [`Codec::encode`].
    fn digest(&self, value: &T) -> Result<CausalDigest, CodecError> {
        Ok(digest_bytes(&self.encode(value)?))
    }
}

/// Default [`Codec`] for any `Serialize + Deserialize` type, backed by
/// `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerdeCodec;

impl<T> Codec<T> for SerdeCodec
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::EncodeFailed(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::DecodeFailed(e.to_string()))
    }
}

//─────────────────────────────
//  Event references
//─────────────────────────────

/// Provenance reference for one produce call.
///
/// Mirrors `spec.md` §3: "A produce-event reference identifies the
/// originating produce operation (channel, data-hash, persist flag,
/// sequence number)."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProduceEventRef<C, A> {
    /// The channel the data was produced on.
    pub channel: C,
    /// Content hash of `channel`.
    pub channel_digest: CausalDigest,
    /// Content hash of the produced value.
    pub data_digest: CausalDigest,
    /// Whether the produced datum persists across matches.
    pub persist: bool,
    /// Sequence number supplied by the caller of `produce`.
    pub seq: SequenceNumber,
    #[serde(skip)]
    _payload: std::marker::PhantomData<A>,
}

impl<C, A> ProduceEventRef<C, A> {
    /// Build a produce-event reference.
    pub fn new(channel: C, channel_digest: CausalDigest, data_digest: CausalDigest, persist: bool, seq: SequenceNumber) -> Self {
        Self { channel, channel_digest, data_digest, persist, seq, _payload: std::marker::PhantomData }
    }
}

impl<C: PartialEq, A> PartialEq for ProduceEventRef<C, A> {
    fn eq(&self, other: &Self) -> bool {
        self.channel == other.channel
            && self.channel_digest == other.channel_digest
            && self.data_digest == other.data_digest
            && self.persist == other.persist
            && self.seq == other.seq
    }
}

/// Provenance reference for one consume call.
///
/// Mirrors `spec.md` §3: "A consume-event reference identifies the
/// originating consume (channels-hash, patterns-hash, continuation-hash,
/// persist flag, sequence number)."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeEventRef<C, P, K> {
    /// The channel sequence the continuation is waiting on.
    pub channels: Vec<C>,
    /// Content hash of `channels`.
    pub channels_digest: CausalDigest,
    /// Content hash of the pattern list.
    pub patterns_digest: CausalDigest,
    /// Content hash of the continuation.
    pub continuation_digest: CausalDigest,
    /// Whether the waiting continuation persists across matches.
    pub persist: bool,
    /// Sequence number supplied by the caller of `consume`.
    pub seq: SequenceNumber,
    #[serde(skip)]
    _pattern: std::marker::PhantomData<P>,
    #[serde(skip)]
    _cont: std::marker::PhantomData<K>,
}

impl<C, P, K> ConsumeEventRef<C, P, K> {
    /// Build a consume-event reference.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channels: Vec<C>,
        channels_digest: CausalDigest,
        patterns_digest: CausalDigest,
        continuation_digest: CausalDigest,
        persist: bool,
        seq: SequenceNumber,
    ) -> Self {
        Self {
            channels,
            channels_digest,
            patterns_digest,
            continuation_digest,
            persist,
            seq,
            _pattern: std::marker::PhantomData,
            _cont: std::marker::PhantomData,
        }
    }
}

impl<C: PartialEq, P, K> PartialEq for ConsumeEventRef<C, P, K> {
    fn eq(&self, other: &Self) -> bool {
        self.channels == other.channels
            && self.channels_digest == other.channels_digest
            && self.patterns_digest == other.patterns_digest
            && self.continuation_digest == other.continuation_digest
            && self.persist == other.persist
            && self.seq == other.seq
    }
}

//─────────────────────────────
//  Stored entries
//─────────────────────────────

/// A published value plus its persistence flag and provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Datum<C, A> {
    /// The published value.
    pub value: A,
    /// When `true`, a successful match does not remove this datum.
    pub persist: bool,
    /// The produce call that created this datum.
    pub source: ProduceEventRef<C, A>,
}

/// A continuation plus the patterns it is waiting on, pending a match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitingContinuation<C, P, K> {
    /// Patterns awaiting a match, positionally aligned with the channel
    /// sequence this continuation is stored under.
    pub patterns: Vec<P>,
    /// The continuation to return once all patterns match.
    pub continuation: K,
    /// When `true`, a successful match does not remove this continuation.
    pub persist: bool,
    /// The consume call that created this waiting continuation.
    pub source: ConsumeEventRef<C, P, K>,
}

//─────────────────────────────
//  Speculative matching candidates
//─────────────────────────────

/// A tentative match binding produced while scanning one channel's data.
#[derive(Debug, Clone)]
pub struct DataCandidate<C, A, R> {
    /// The channel this candidate's datum was read from.
    pub channel: C,
    /// The datum selected as a candidate match.
    pub datum: Datum<C, A>,
    /// The datum's index within its channel's data list at snapshot time,
    /// or `-1` for a not-yet-committed, in-flight produce (see
    /// `spec.md` §4.5 / §9 "Index `-1`").
    pub index: i64,
    /// The matcher's extracted result for this binding.
    pub result: R,
}

/// A provisional rendezvous found while scanning one channel-group's
/// waiting continuations during `produce`.
#[derive(Debug, Clone)]
pub struct ProduceCandidate<C, P, A, K, R> {
    /// The channel group the matched waiting continuation is stored under.
    pub channels: Vec<C>,
    /// The waiting continuation selected as a match.
    pub waiting: WaitingContinuation<C, P, K>,
    /// The waiting continuation's index within `conts[channels]` at
    /// snapshot time.
    pub cont_index: usize,
    /// One data candidate per channel in `channels`, positionally aligned.
    pub data_candidates: Vec<DataCandidate<C, A, R>>,
}

/// The continuation and its binding, returned to the caller on a successful
/// match.
#[derive(Debug, Clone, PartialEq)]
pub struct ContResult<C, P, K> {
    /// The continuation that was unblocked.
    pub continuation: K,
    /// The persist flag of the waiting continuation that matched.
    pub persist: bool,
    /// The channel sequence the continuation was waiting on.
    pub channels: Vec<C>,
    /// The patterns the continuation was waiting on.
    pub patterns: Vec<P>,
    /// `1 + max(inputs' sequence numbers)`, per `spec.md` §3 invariant 5.
    pub sequence_number: SequenceNumber,
}

/// One matched datum as returned alongside a [`ContResult`].
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedValue<A> {
    /// The matched payload.
    pub value: A,
    /// Whether the matched datum persists (was not removed from the store).
    pub persist: bool,
}

//─────────────────────────────
//  Trace log
//─────────────────────────────

/// One append-only trace log entry.
///
/// Mirrors `spec.md` §3 invariant 4 and §7: every committed rendezvous
/// produces exactly one [`TraceEvent::Comm`], plus the original per-side
/// produce/consume event which is always appended *before* the matching
/// attempt runs (see `spec.md` §7 and §9's open question).
#[derive(Debug, Clone)]
pub enum TraceEvent<C, P, A, K> {
    /// A produce call was initiated.
    Produce(ProduceEventRef<C, A>),
    /// A consume call was initiated.
    Consume(ConsumeEventRef<C, P, K>),
    /// A consume successfully rendezvoused with one or more produces.
    Comm {
        /// The consume event that was satisfied.
        consume: ConsumeEventRef<C, P, K>,
        /// The produce events consumed to satisfy it.
        produces: Vec<ProduceEventRef<C, A>>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Wrapped(i64);

    #[test]
    fn serde_codec_round_trips() {
        let codec = SerdeCodec;
        let value = Wrapped(42);
        let bytes = codec.encode(&value).unwrap();
        let decoded: Wrapped = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn digest_is_deterministic() {
        let codec = SerdeCodec;
        let a = codec.digest(&Wrapped(7)).unwrap();
        let b = codec.digest(&Wrapped(7)).unwrap();
        let c = codec.digest(&Wrapped(8)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn produce_event_ref_equality_ignores_phantom() {
        let a = ProduceEventRef::<i64, i64>::new(1, [0u8; 32], [1u8; 32], false, 0);
        let b = ProduceEventRef::<i64, i64>::new(1, [0u8; 32], [1u8; 32], false, 0);
        assert_eq!(a, b);
    }
}
