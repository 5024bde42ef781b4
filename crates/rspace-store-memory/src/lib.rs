#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **rspace-store-memory** – In-memory [`Store`] driver for RSpace.
//!
//! This crate provides a fast, non-persistent backend suitable for testing
//! and for deployments where durability is not required. All three logical
//! tables (data, waiting continuations, join index) live in `DashMap`s;
//! writes within one transaction are buffered and applied atomically on
//! commit, and discarded entirely on abort.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use rspace_store_core::{CausalDigest, Store, StoreError};
use rspace_types::{digest_bytes, Datum, Opaque, WaitingContinuation};

/// One buffered mutation, applied to the live tables on commit.
enum WriteOp<C, P, A, K> {
    PutDatum(C, Datum<C, A>),
    RemoveDatum(C, usize),
    PutWaitingContinuation(Vec<C>, WaitingContinuation<C, P, K>),
    RemoveWaitingContinuation(Vec<C>, usize),
    AddJoin(C, Vec<C>),
    RemoveJoin(C, Vec<C>),
}

/// A write transaction: an ordered buffer of mutations not yet visible to
/// any reader.
#[derive(Default)]
pub struct MemoryWriteTxn<C, P, A, K> {
    ops: Vec<WriteOp<C, P, A, K>>,
}

/// A read transaction. Reads are served directly from the live tables;
/// since every consume/produce critical section already holds the engine's
/// channel-group lock, single-channel reads within that section are
/// trivially consistent and no snapshot object is required.
pub struct MemoryReadTxn;

/// An in-memory, non-persistent [`Store`] implementation.
pub struct MemoryStore<C, P, A, K>
where
    C: Opaque,
    P: Opaque,
    A: Opaque,
    K: Opaque,
{
    data: DashMap<C, Vec<Datum<C, A>>>,
    conts: DashMap<Vec<C>, Vec<WaitingContinuation<C, P, K>>>,
    joins: DashMap<C, Vec<Vec<C>>>,
}

impl<C, P, A, K> Default for MemoryStore<C, P, A, K>
where
    C: Opaque,
    P: Opaque,
    A: Opaque,
    K: Opaque,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C, P, A, K> MemoryStore<C, P, A, K>
where
    C: Opaque,
    P: Opaque,
    A: Opaque,
    K: Opaque,
{
    /// Create a new, empty in-memory store.
    pub fn new() -> Self {
        Self { data: DashMap::new(), conts: DashMap::new(), joins: DashMap::new() }
    }

    /// Total number of datums stored across all channels, mainly for tests.
    pub fn datum_count(&self) -> usize {
        self.data.iter().map(|e| e.value().len()).sum()
    }

    /// Total number of waiting continuations stored, mainly for tests.
    pub fn waiting_continuation_count(&self) -> usize {
        self.conts.iter().map(|e| e.value().len()).sum()
    }
}

#[async_trait]
impl<C, P, A, K> Store<C, P, A, K> for MemoryStore<C, P, A, K>
where
    C: Opaque + Serialize,
    P: Opaque + Serialize,
    A: Opaque + Serialize,
    K: Opaque + Serialize,
{
    type ReadTxn = MemoryReadTxn;
    type WriteTxn = MemoryWriteTxn<C, P, A, K>;

    async fn begin_read(&self) -> Result<Self::ReadTxn, StoreError> {
        Ok(MemoryReadTxn)
    }

    async fn begin_write(&self) -> Result<Self::WriteTxn, StoreError> {
        Ok(MemoryWriteTxn::default())
    }

    async fn commit(&self, txn: Self::WriteTxn) -> Result<(), StoreError> {
        for op in txn.ops {
            match op {
                WriteOp::PutDatum(channel, datum) => {
                    self.data.entry(channel).or_default().push(datum);
                }
                WriteOp::RemoveDatum(channel, index) => {
                    let mut entry = self.data.entry(channel).or_default();
                    if index >= entry.len() {
                        return Err(StoreError::IndexOutOfRange { index, len: entry.len() });
                    }
                    entry.remove(index);
                }
                WriteOp::PutWaitingContinuation(channels, wc) => {
                    self.conts.entry(channels).or_default().push(wc);
                }
                WriteOp::RemoveWaitingContinuation(channels, index) => {
                    let mut entry = self.conts.entry(channels).or_default();
                    if index >= entry.len() {
                        return Err(StoreError::IndexOutOfRange { index, len: entry.len() });
                    }
                    entry.remove(index);
                }
                WriteOp::AddJoin(channel, channels) => {
                    let mut entry = self.joins.entry(channel).or_default();
                    if !entry.contains(&channels) {
                        entry.push(channels);
                    }
                }
                WriteOp::RemoveJoin(channel, channels) => {
                    if let Some(mut entry) = self.joins.get_mut(&channel) {
                        entry.retain(|g| g != &channels);
                    }
                }
            }
        }
        debug!("committed write transaction");
        Ok(())
    }

    fn abort(&self, txn: Self::WriteTxn) {
        debug!(discarded = txn.ops.len(), "aborted write transaction");
    }

    async fn get_data(&self, _txn: &Self::ReadTxn, channel: &C) -> Result<Vec<Datum<C, A>>, StoreError> {
        Ok(self.data.get(channel).map(|e| e.clone()).unwrap_or_default())
    }

    async fn put_datum(&self, txn: &mut Self::WriteTxn, channel: &C, datum: Datum<C, A>) -> Result<(), StoreError> {
        txn.ops.push(WriteOp::PutDatum(channel.clone(), datum));
        Ok(())
    }

    async fn remove_datum(&self, txn: &mut Self::WriteTxn, channel: &C, index: usize) -> Result<(), StoreError> {
        txn.ops.push(WriteOp::RemoveDatum(channel.clone(), index));
        Ok(())
    }

    async fn get_waiting_continuations(
        &self,
        _txn: &Self::ReadTxn,
        channels: &[C],
    ) -> Result<Vec<WaitingContinuation<C, P, K>>, StoreError> {
        Ok(self.conts.get(&channels.to_vec()).map(|e| e.clone()).unwrap_or_default())
    }

    async fn put_waiting_continuation(
        &self,
        txn: &mut Self::WriteTxn,
        channels: &[C],
        wc: WaitingContinuation<C, P, K>,
    ) -> Result<(), StoreError> {
        txn.ops.push(WriteOp::PutWaitingContinuation(channels.to_vec(), wc));
        Ok(())
    }

    async fn remove_waiting_continuation(
        &self,
        txn: &mut Self::WriteTxn,
        channels: &[C],
        index: usize,
    ) -> Result<(), StoreError> {
        txn.ops.push(WriteOp::RemoveWaitingContinuation(channels.to_vec(), index));
        Ok(())
    }

    async fn get_joins(&self, _txn: &Self::ReadTxn, channel: &C) -> Result<Vec<Vec<C>>, StoreError> {
        Ok(self.joins.get(channel).map(|e| e.clone()).unwrap_or_default())
    }

    async fn add_join(&self, txn: &mut Self::WriteTxn, channel: &C, channels: &[C]) -> Result<(), StoreError> {
        txn.ops.push(WriteOp::AddJoin(channel.clone(), channels.to_vec()));
        Ok(())
    }

    async fn remove_join(&self, txn: &mut Self::WriteTxn, channel: &C, channels: &[C]) -> Result<(), StoreError> {
        txn.ops.push(WriteOp::RemoveJoin(channel.clone(), channels.to_vec()));
        Ok(())
    }

    async fn create_checkpoint(&self) -> Result<CausalDigest, StoreError> {
        // Fold every table's entries into one deterministic digest: collect
        // JSON-encoded rows, sort them (so insertion order across
        // concurrent DashMap shards never affects the root), then hash the
        // concatenation. Mirrors `rspace-types::digest_bytes`'s use of
        // sorted parent digests for determinism.
        let mut rows: Vec<Vec<u8>> = Vec::new();
        for entry in self.data.iter() {
            let row = serde_json::to_vec(&(entry.key(), entry.value()))
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            rows.push(row);
        }
        for entry in self.conts.iter() {
            let row = serde_json::to_vec(&(entry.key(), entry.value()))
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            rows.push(row);
        }
        for entry in self.joins.iter() {
            let row = serde_json::to_vec(&(entry.key(), entry.value()))
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            rows.push(row);
        }
        rows.sort();
        let mut buf = Vec::new();
        for row in &rows {
            buf.extend_from_slice(row);
        }
        Ok(digest_bytes(&buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rspace_types::ProduceEventRef;

    fn datum(value: i64, persist: bool, seq: u64) -> Datum<i64, i64> {
        Datum { value, persist, source: ProduceEventRef::new(1, [0u8; 32], [0u8; 32], persist, seq) }
    }

    #[tokio::test]
    async fn put_then_get_data() {
        let store: MemoryStore<i64, i64, i64, i64> = MemoryStore::new();
        let mut wtxn = store.begin_write().await.unwrap();
        store.put_datum(&mut wtxn, &1, datum(10, false, 0)).await.unwrap();
        store.commit(wtxn).await.unwrap();

        let rtxn = store.begin_read().await.unwrap();
        let data = store.get_data(&rtxn, &1).await.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].value, 10);
    }

    #[tokio::test]
    async fn abort_discards_buffered_writes() {
        let store: MemoryStore<i64, i64, i64, i64> = MemoryStore::new();
        let mut wtxn = store.begin_write().await.unwrap();
        store.put_datum(&mut wtxn, &1, datum(10, false, 0)).await.unwrap();
        store.abort(wtxn);

        let rtxn = store.begin_read().await.unwrap();
        let data = store.get_data(&rtxn, &1).await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn descending_index_removal_is_stable() {
        let store: MemoryStore<i64, i64, i64, i64> = MemoryStore::new();
        let mut wtxn = store.begin_write().await.unwrap();
        for v in [10, 20, 30] {
            store.put_datum(&mut wtxn, &1, datum(v, false, 0)).await.unwrap();
        }
        store.commit(wtxn).await.unwrap();

        // Remove indices 2 then 0, in descending order, as the engine does.
        let mut wtxn = store.begin_write().await.unwrap();
        store.remove_datum(&mut wtxn, &1, 2).await.unwrap();
        store.remove_datum(&mut wtxn, &1, 0).await.unwrap();
        store.commit(wtxn).await.unwrap();

        let rtxn = store.begin_read().await.unwrap();
        let remaining = store.get_data(&rtxn, &1).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].value, 20);
    }

    #[tokio::test]
    async fn join_add_and_remove() {
        let store: MemoryStore<i64, i64, i64, i64> = MemoryStore::new();
        let mut wtxn = store.begin_write().await.unwrap();
        store.add_join(&mut wtxn, &1, &[1, 2]).await.unwrap();
        store.add_join(&mut wtxn, &2, &[1, 2]).await.unwrap();
        store.commit(wtxn).await.unwrap();

        let rtxn = store.begin_read().await.unwrap();
        assert_eq!(store.get_joins(&rtxn, &1).await.unwrap(), vec![vec![1, 2]]);

        let mut wtxn = store.begin_write().await.unwrap();
        store.remove_join(&mut wtxn, &1, &[1, 2]).await.unwrap();
        store.commit(wtxn).await.unwrap();

        let rtxn = store.begin_read().await.unwrap();
        assert!(store.get_joins(&rtxn, &1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn checkpoint_is_deterministic_and_idempotent() {
        let store: MemoryStore<i64, i64, i64, i64> = MemoryStore::new();
        let root1 = store.create_checkpoint().await.unwrap();
        let root2 = store.create_checkpoint().await.unwrap();
        assert_eq!(root1, root2);

        let mut wtxn = store.begin_write().await.unwrap();
        store.put_datum(&mut wtxn, &1, datum(10, false, 0)).await.unwrap();
        store.commit(wtxn).await.unwrap();

        let root3 = store.create_checkpoint().await.unwrap();
        assert_ne!(root1, root3);
    }
}
