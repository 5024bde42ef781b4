//! The public contract: `consume`, `produce`, `checkpoint`. Orchestrates the
//! lock manager, store, candidate extractor and matcher, per `spec.md` §4.6.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use rspace_store_core::{Codec, CodecError, Store, StoreError};
use rspace_types::{
    digest_bytes, CausalDigest, ConsumeEventRef, ContResult, DataCandidate, Datum, MatchedValue,
    Opaque, ProduceCandidate, ProduceEventRef, SequenceNumber, TraceEvent, WaitingContinuation,
};

use crate::extract::{build_indexed_data, extract_data_candidates, extract_produce_candidate, ExtractError};
use crate::locks::LockManager;
use crate::matcher::Matcher;
use crate::metrics::MetricsSink;
use rspace_store_core::EventLog;

/// Errors the engine's public operations can return, per `spec.md` §7.
#[derive(Debug, thiserror::Error)]
pub enum SpaceError<E> {
    /// Empty channel list, or `channels.len() != patterns.len()`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The matcher returned an error for some (pattern, datum) pair.
    /// Anything already committed before the failing attempt remains
    /// committed, per `spec.md` §7.
    #[error("matcher error")]
    Matcher(E),
    /// The store failed; bubbled up without retry, per `spec.md` §7.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
    /// A channel/pattern/datum/continuation failed to encode for digesting.
    #[error("codec failure: {0}")]
    Codec(#[from] CodecError),
}

impl<E> From<ExtractError<E>> for SpaceError<E> {
    fn from(e: ExtractError<E>) -> Self {
        match e {
            ExtractError::Store(e) => SpaceError::Store(e),
            ExtractError::Matcher(e) => SpaceError::Matcher(e),
        }
    }
}

/// Construction-time parameters for a [`Space`].
#[derive(Debug, Clone, Copy)]
pub struct SpaceConfig {
    /// Seed for the deterministic, reproducible shuffling required by
    /// `spec.md` §9 ("seed-controlled randomness so tests are
    /// reproducible").
    pub seed: u64,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self { seed: 0 }
    }
}

fn digest_many<T>(codec: &dyn Codec<T>, items: &[T]) -> Result<CausalDigest, CodecError> {
    let mut buf = Vec::new();
    for item in items {
        let bytes = codec.encode(item)?;
        buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        buf.extend_from_slice(&bytes);
    }
    Ok(digest_bytes(&buf))
}

/// The matching engine: `consume`, `produce`, `checkpoint`, generic over a
/// [`Store`] driver `S`, opaque channel/pattern/datum/continuation types
/// `C`/`P`/`A`/`K`, the matcher's result type `R` and error type `E`.
///
/// Follows a validate, lock, snapshot-read, pure computation,
/// outcome-dependent write, emit, return shape, with two public entry
/// points instead of one dispatch surface.
pub struct Space<S, C, P, A, K, R, E>
where
    S: Store<C, P, A, K>,
    C: Opaque,
    P: Opaque,
    A: Opaque,
    K: Opaque,
{
    store: Arc<S>,
    matcher: Arc<dyn Matcher<P, A, R, E> + Send + Sync>,
    codec_c: Arc<dyn Codec<C>>,
    codec_p: Arc<dyn Codec<P>>,
    codec_a: Arc<dyn Codec<A>>,
    codec_k: Arc<dyn Codec<K>>,
    locks: LockManager,
    event_log: EventLog<C, P, A, K>,
    metrics: Arc<dyn MetricsSink>,
    rng: AsyncMutex<StdRng>,
}

impl<S, C, P, A, K, R, E> Space<S, C, P, A, K, R, E>
where
    S: Store<C, P, A, K>,
    C: Opaque,
    P: Opaque,
    A: Opaque,
    K: Opaque,
    R: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Construct a new engine over `store`, matching with `matcher`, using
    /// the given per-type codecs for event-reference digesting.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        matcher: Arc<dyn Matcher<P, A, R, E> + Send + Sync>,
        codec_c: Arc<dyn Codec<C>>,
        codec_p: Arc<dyn Codec<P>>,
        codec_a: Arc<dyn Codec<A>>,
        codec_k: Arc<dyn Codec<K>>,
        metrics: Arc<dyn MetricsSink>,
        config: SpaceConfig,
    ) -> Self {
        Self {
            store,
            matcher,
            codec_c,
            codec_p,
            codec_a,
            codec_k,
            locks: LockManager::new(),
            event_log: EventLog::new(),
            metrics,
            rng: AsyncMutex::new(StdRng::seed_from_u64(config.seed)),
        }
    }

    /// `spec.md` §4.6 `consume`.
    pub async fn consume(
        &self,
        channels: Vec<C>,
        patterns: Vec<P>,
        continuation: K,
        persist: bool,
        seq: SequenceNumber,
    ) -> Result<Option<(ContResult<C, P, K>, Vec<MatchedValue<A>>)>, SpaceError<E>> {
        if channels.is_empty() {
            return Err(SpaceError::InvalidArgument("channels must not be empty".into()));
        }
        if channels.len() != patterns.len() {
            return Err(SpaceError::InvalidArgument(format!(
                "channels/patterns length mismatch: {} vs {}",
                channels.len(),
                patterns.len()
            )));
        }

        let channels_digest = digest_many(self.codec_c.as_ref(), &channels)?;
        let patterns_digest = digest_many(self.codec_p.as_ref(), &patterns)?;
        let continuation_digest = self.codec_k.digest(&continuation)?;
        let consume_ref =
            ConsumeEventRef::new(channels.clone(), channels_digest, patterns_digest, continuation_digest, persist, seq);

        // Lock every member channel individually, via the same per-channel
        // digest `produce` locks, so a produce on `c` and a consume whose
        // sequence contains `c` serialize against each other (`spec.md`
        // §4.3).
        let channel_digests: Vec<CausalDigest> =
            channels.iter().map(|c| self.codec_c.digest(c)).collect::<Result<_, CodecError>>()?;
        let _guards = self.locks.acquire_many(&channel_digests).await;

        self.event_log.prepend(TraceEvent::Consume(consume_ref.clone()));
        debug!(?channels_digest, "consume: event logged");

        let rtxn = self.store.begin_read().await?;
        let mut indexed_data = {
            let mut rng = self.rng.lock().await;
            build_indexed_data(self.store.as_ref(), &rtxn, &mut rng, &channels).await?
        };

        let pairs: Vec<(C, P)> = channels.iter().cloned().zip(patterns.iter().cloned()).collect();
        let outcome =
            extract_data_candidates(&pairs, &mut indexed_data, self.matcher.as_ref()).map_err(SpaceError::Matcher)?;

        match outcome {
            None => {
                let mut wtxn = self.store.begin_write().await?;
                let wc = WaitingContinuation { patterns, continuation, persist, source: consume_ref };
                match self.persist_waiting_continuation(&mut wtxn, &channels, wc).await {
                    Ok(()) => {
                        self.store.commit(wtxn).await?;
                        Ok(None)
                    }
                    Err(e) => {
                        self.store.abort(wtxn);
                        Err(e.into())
                    }
                }
            }
            Some(candidates) => {
                let sequence_number = next_sequence_number(seq, &candidates);
                let produces: Vec<ProduceEventRef<C, A>> = candidates.iter().map(|c| c.datum.source.clone()).collect();
                self.event_log.prepend(TraceEvent::Comm { consume: consume_ref.clone(), produces });
                self.metrics.incr("comm.consume");

                let matched_values: Vec<MatchedValue<A>> = candidates
                    .iter()
                    .map(|c| MatchedValue { value: c.datum.value.clone(), persist: c.datum.persist })
                    .collect();

                let mut wtxn = self.store.begin_write().await?;
                match remove_matched_data(&self.store, &mut wtxn, &candidates).await {
                    Ok(()) => self.store.commit(wtxn).await?,
                    Err(e) => {
                        self.store.abort(wtxn);
                        return Err(e.into());
                    }
                }

                let cont_result = ContResult { continuation, persist, channels, patterns, sequence_number };
                Ok(Some((cont_result, matched_values)))
            }
        }
    }

    async fn persist_waiting_continuation(
        &self,
        wtxn: &mut S::WriteTxn,
        channels: &[C],
        wc: WaitingContinuation<C, P, K>,
    ) -> Result<(), StoreError> {
        self.store.put_waiting_continuation(wtxn, channels, wc).await?;
        for c in channels {
            self.store.add_join(wtxn, c, channels).await?;
        }
        Ok(())
    }

    /// `spec.md` §4.6 `produce`.
    pub async fn produce(
        &self,
        channel: C,
        data: A,
        persist: bool,
        seq: SequenceNumber,
    ) -> Result<Option<(ContResult<C, P, K>, Vec<MatchedValue<A>>)>, SpaceError<E>> {
        let channel_digest = self.codec_c.digest(&channel)?;
        let data_digest = self.codec_a.digest(&data)?;
        let produce_ref = ProduceEventRef::new(channel.clone(), channel_digest, data_digest, persist, seq);

        let _guard = self.locks.acquire(channel_digest).await;

        let rtxn = self.store.begin_read().await?;
        let grouped_channels = self.store.get_joins(&rtxn, &channel).await?;

        self.event_log.prepend(TraceEvent::Produce(produce_ref.clone()));
        debug!(?channel_digest, "produce: event logged");

        let new_datum = Datum { value: data, persist, source: produce_ref.clone() };

        let outcome = {
            let mut rng = self.rng.lock().await;
            extract_produce_candidate(
                self.store.as_ref(),
                &rtxn,
                &mut rng,
                self.matcher.as_ref(),
                &grouped_channels,
                &channel,
                &new_datum,
            )
            .await?
        };

        match outcome {
            None => {
                let mut wtxn = self.store.begin_write().await?;
                match self.store.put_datum(&mut wtxn, &channel, new_datum).await {
                    Ok(()) => {
                        self.store.commit(wtxn).await?;
                        Ok(None)
                    }
                    Err(e) => {
                        self.store.abort(wtxn);
                        Err(e.into())
                    }
                }
            }
            Some(pc) => self.commit_produce_candidate(pc, produce_ref, seq).await,
        }
    }

    async fn commit_produce_candidate(
        &self,
        pc: ProduceCandidate<C, P, A, K, R>,
        produce_ref: ProduceEventRef<C, A>,
        seq: SequenceNumber,
    ) -> Result<Option<(ContResult<C, P, K>, Vec<MatchedValue<A>>)>, SpaceError<E>> {
        let ProduceCandidate { channels, waiting, cont_index, data_candidates } = pc;

        self.event_log.prepend(TraceEvent::Comm { consume: waiting.source.clone(), produces: vec![produce_ref] });
        self.metrics.incr("comm.produce");

        let max_source_seq = data_candidates.iter().map(|c| c.datum.source.seq).max().unwrap_or(seq);
        let sequence_number = 1 + waiting.source.seq.max(max_source_seq);

        let matched_values: Vec<MatchedValue<A>> = data_candidates
            .iter()
            .map(|c| MatchedValue { value: c.datum.value.clone(), persist: c.datum.persist })
            .collect();

        let mut wtxn = self.store.begin_write().await?;
        let apply = async {
            if !waiting.persist {
                self.store.remove_waiting_continuation(&mut wtxn, &channels, cont_index).await?;
            }
            let mut ordered: Vec<&DataCandidate<C, A, R>> = data_candidates.iter().collect();
            ordered.sort_by(|a, b| b.index.cmp(&a.index));
            for c in ordered {
                if !c.datum.persist && c.index >= 0 {
                    self.store.remove_datum(&mut wtxn, &c.channel, c.index as usize).await?;
                }
                self.store.remove_join(&mut wtxn, &c.channel, &channels).await?;
            }
            Ok::<(), StoreError>(())
        }
        .await;

        match apply {
            Ok(()) => self.store.commit(wtxn).await?,
            Err(e) => {
                self.store.abort(wtxn);
                return Err(e.into());
            }
        }

        let cont_result = ContResult {
            continuation: waiting.continuation,
            persist: waiting.persist,
            channels,
            patterns: waiting.patterns,
            sequence_number,
        };
        Ok(Some((cont_result, matched_values)))
    }

    /// `spec.md` §4.6 `createCheckpoint`. No locks are taken; the caller
    /// must ensure no consume/produce is in flight (or run this under a
    /// global write barrier), per `spec.md` §4.6.
    pub async fn checkpoint(&self) -> Result<(CausalDigest, Vec<TraceEvent<C, P, A, K>>), SpaceError<E>> {
        let root = self.store.create_checkpoint().await?;
        let events = self.event_log.take();
        Ok((root, events))
    }
}

fn next_sequence_number<C, A, R>(seq: SequenceNumber, candidates: &[DataCandidate<C, A, R>]) -> SequenceNumber {
    let max_source_seq = candidates.iter().map(|c| c.datum.source.seq).max().unwrap_or(seq);
    1 + seq.max(max_source_seq)
}

async fn remove_matched_data<S, C, P, A, K, R>(
    store: &S,
    wtxn: &mut S::WriteTxn,
    candidates: &[DataCandidate<C, A, R>],
) -> Result<(), StoreError>
where
    S: Store<C, P, A, K>,
    C: Opaque,
    P: Opaque,
    A: Opaque,
    K: Opaque,
{
    let mut ordered: Vec<&DataCandidate<C, A, R>> = candidates.iter().filter(|c| !c.datum.persist).collect();
    ordered.sort_by(|a, b| b.index.cmp(&a.index));
    for c in ordered {
        store.remove_datum(wtxn, &c.channel, c.index as usize).await?;
    }
    Ok(())
}
