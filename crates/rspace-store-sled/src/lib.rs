#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **rspace-store-sled** – Sled-based persistent [`Store`] driver for RSpace.
//!
//! This crate provides a durable, embedded backend for the matching engine
//! using the `sled` database. The three logical tables (data, waiting
//! continuations, join index) each live in their own `sled::Tree`; a write
//! transaction's buffered mutations are applied to all three trees inside
//! one `sled` multi-tree transaction, so a crash between trees can never
//! leave the store half-updated.

use std::marker::PhantomData;
use std::path::Path;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{Db, Tree};
use tracing::debug;

use rspace_store_core::{CausalDigest, Store, StoreError};
use rspace_types::{digest_bytes, Datum, Opaque, WaitingContinuation};

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    rmp_serde::to_vec_named(value).map_err(|e| StoreError::Backend(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    rmp_serde::from_slice(bytes).map_err(|e| StoreError::Backend(e.to_string()))
}

fn decode_or_default<T: DeserializeOwned + Default>(bytes: Option<sled::IVec>) -> Result<T, StoreError> {
    match bytes {
        Some(ivec) => decode(&ivec),
        None => Ok(T::default()),
    }
}

/// One buffered mutation, applied across all three trees on commit.
enum WriteOp<C, P, A, K> {
    PutDatum(C, Datum<C, A>),
    RemoveDatum(C, usize),
    PutWaitingContinuation(Vec<C>, WaitingContinuation<C, P, K>),
    RemoveWaitingContinuation(Vec<C>, usize),
    AddJoin(C, Vec<C>),
    RemoveJoin(C, Vec<C>),
}

/// A write transaction: an ordered buffer of mutations not yet visible to
/// any reader, applied atomically across all three trees on commit.
#[derive(Default)]
pub struct SledWriteTxn<C, P, A, K> {
    ops: Vec<WriteOp<C, P, A, K>>,
}

/// A read transaction. `sled::Tree` reads already observe the tree's most
/// recently committed state, and every read within one engine critical
/// section is already serialized by the channel-group lock, so no
/// additional snapshot handle is needed here.
pub struct SledReadTxn;

/// A durable, sled-backed [`Store`] implementation.
pub struct SledStore<C, P, A, K> {
    db: Db,
    data_tree: Tree,
    conts_tree: Tree,
    joins_tree: Tree,
    _marker: PhantomData<(C, P, A, K)>,
}

impl<C, P, A, K> SledStore<C, P, A, K> {
    /// Open or create a sled database at `path`.
    pub fn open<PathRef: AsRef<Path>>(path: PathRef) -> anyhow::Result<Self> {
        Self::open_with_config(path, sled::Config::default())
    }

    /// Open a sled database with custom configuration.
    pub fn open_with_config<PathRef: AsRef<Path>>(path: PathRef, config: sled::Config) -> anyhow::Result<Self> {
        let db = config.path(path).open()?;
        Self::from_db(db)
    }

    /// Build a store from an already-open sled database handle.
    pub fn from_db(db: Db) -> anyhow::Result<Self> {
        let data_tree = db.open_tree("rspace_data")?;
        let conts_tree = db.open_tree("rspace_conts")?;
        let joins_tree = db.open_tree("rspace_joins")?;
        Ok(Self { db, data_tree, conts_tree, joins_tree, _marker: PhantomData })
    }

    /// Open a temporary, non-durable database, for tests.
    #[cfg(test)]
    pub fn temporary() -> anyhow::Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    /// Flush all three trees to disk.
    pub async fn flush(&self) -> anyhow::Result<()> {
        self.data_tree.flush_async().await?;
        self.conts_tree.flush_async().await?;
        self.joins_tree.flush_async().await?;
        Ok(())
    }

    /// Total size of the backing database on disk, in bytes.
    pub fn size_on_disk(&self) -> anyhow::Result<u64> {
        Ok(self.db.size_on_disk()?)
    }
}

#[async_trait]
impl<C, P, A, K> Store<C, P, A, K> for SledStore<C, P, A, K>
where
    C: Opaque + Serialize + DeserializeOwned,
    P: Opaque + Serialize + DeserializeOwned,
    A: Opaque + Serialize + DeserializeOwned,
    K: Opaque + Serialize + DeserializeOwned,
{
    type ReadTxn = SledReadTxn;
    type WriteTxn = SledWriteTxn<C, P, A, K>;

    async fn begin_read(&self) -> Result<Self::ReadTxn, StoreError> {
        Ok(SledReadTxn)
    }

    async fn begin_write(&self) -> Result<Self::WriteTxn, StoreError> {
        Ok(SledWriteTxn::default())
    }

    async fn commit(&self, txn: Self::WriteTxn) -> Result<(), StoreError> {
        let trees = (&self.data_tree, &self.conts_tree, &self.joins_tree);
        let result: Result<(), TransactionError<StoreError>> =
            trees.transaction(|(data, conts, joins)| {
                for op in &txn.ops {
                    match op {
                        WriteOp::PutDatum(channel, datum) => {
                            let key = encode(channel).map_err(ConflictableTransactionError::Abort)?;
                            let mut list: Vec<Datum<C, A>> =
                                decode_or_default(data.get(&key)?).map_err(ConflictableTransactionError::Abort)?;
                            list.push(datum.clone());
                            let bytes = encode(&list).map_err(ConflictableTransactionError::Abort)?;
                            data.insert(key, bytes)?;
                        }
                        WriteOp::RemoveDatum(channel, index) => {
                            let key = encode(channel).map_err(ConflictableTransactionError::Abort)?;
                            let mut list: Vec<Datum<C, A>> =
                                decode_or_default(data.get(&key)?).map_err(ConflictableTransactionError::Abort)?;
                            if *index >= list.len() {
                                return Err(ConflictableTransactionError::Abort(StoreError::IndexOutOfRange {
                                    index: *index,
                                    len: list.len(),
                                }));
                            }
                            list.remove(*index);
                            let bytes = encode(&list).map_err(ConflictableTransactionError::Abort)?;
                            data.insert(key, bytes)?;
                        }
                        WriteOp::PutWaitingContinuation(channels, wc) => {
                            let key = encode(channels).map_err(ConflictableTransactionError::Abort)?;
                            let mut list: Vec<WaitingContinuation<C, P, K>> = decode_or_default(conts.get(&key)?)
                                .map_err(ConflictableTransactionError::Abort)?;
                            list.push(wc.clone());
                            let bytes = encode(&list).map_err(ConflictableTransactionError::Abort)?;
                            conts.insert(key, bytes)?;
                        }
                        WriteOp::RemoveWaitingContinuation(channels, index) => {
                            let key = encode(channels).map_err(ConflictableTransactionError::Abort)?;
                            let mut list: Vec<WaitingContinuation<C, P, K>> = decode_or_default(conts.get(&key)?)
                                .map_err(ConflictableTransactionError::Abort)?;
                            if *index >= list.len() {
                                return Err(ConflictableTransactionError::Abort(StoreError::IndexOutOfRange {
                                    index: *index,
                                    len: list.len(),
                                }));
                            }
                            list.remove(*index);
                            let bytes = encode(&list).map_err(ConflictableTransactionError::Abort)?;
                            conts.insert(key, bytes)?;
                        }
                        WriteOp::AddJoin(channel, channels) => {
                            let key = encode(channel).map_err(ConflictableTransactionError::Abort)?;
                            let mut list: Vec<Vec<C>> =
                                decode_or_default(joins.get(&key)?).map_err(ConflictableTransactionError::Abort)?;
                            if !list.contains(channels) {
                                list.push(channels.clone());
                            }
                            let bytes = encode(&list).map_err(ConflictableTransactionError::Abort)?;
                            joins.insert(key, bytes)?;
                        }
                        WriteOp::RemoveJoin(channel, channels) => {
                            let key = encode(channel).map_err(ConflictableTransactionError::Abort)?;
                            let mut list: Vec<Vec<C>> =
                                decode_or_default(joins.get(&key)?).map_err(ConflictableTransactionError::Abort)?;
                            list.retain(|g| g != channels);
                            let bytes = encode(&list).map_err(ConflictableTransactionError::Abort)?;
                            joins.insert(key, bytes)?;
                        }
                    }
                }
                Ok(())
            });

        match result {
            Ok(()) => {
                debug!("committed sled write transaction");
                Ok(())
            }
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(StoreError::Backend(e.to_string())),
        }
    }

    fn abort(&self, txn: Self::WriteTxn) {
        debug!(discarded = txn.ops.len(), "aborted sled write transaction");
    }

    async fn get_data(&self, _txn: &Self::ReadTxn, channel: &C) -> Result<Vec<Datum<C, A>>, StoreError> {
        let key = encode(channel)?;
        decode_or_default(self.data_tree.get(key).map_err(|e| StoreError::Backend(e.to_string()))?)
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
        let key = encode(&channels.to_vec())?;
        decode_or_default(self.conts_tree.get(key).map_err(|e| StoreError::Backend(e.to_string()))?)
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
        let key = encode(channel)?;
        decode_or_default(self.joins_tree.get(key).map_err(|e| StoreError::Backend(e.to_string()))?)
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
        let mut rows: Vec<Vec<u8>> = Vec::new();
        for tree in [&self.data_tree, &self.conts_tree, &self.joins_tree] {
            for entry in tree.iter() {
                let (k, v) = entry.map_err(|e| StoreError::Backend(e.to_string()))?;
                let mut row = Vec::with_capacity(k.len() + v.len());
                row.extend_from_slice(&k);
                row.extend_from_slice(&v);
                rows.push(row);
            }
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
        let store: SledStore<i64, i64, i64, i64> = SledStore::temporary().unwrap();
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
        let store: SledStore<i64, i64, i64, i64> = SledStore::temporary().unwrap();
        let mut wtxn = store.begin_write().await.unwrap();
        store.put_datum(&mut wtxn, &1, datum(10, false, 0)).await.unwrap();
        store.abort(wtxn);

        let rtxn = store.begin_read().await.unwrap();
        let data = store.get_data(&rtxn, &1).await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn remove_out_of_range_aborts_whole_transaction() {
        let store: SledStore<i64, i64, i64, i64> = SledStore::temporary().unwrap();
        let mut wtxn = store.begin_write().await.unwrap();
        store.put_datum(&mut wtxn, &1, datum(10, false, 0)).await.unwrap();
        store.remove_datum(&mut wtxn, &1, 5).await.unwrap();
        let result = store.commit(wtxn).await;
        assert!(matches!(result, Err(StoreError::IndexOutOfRange { index: 5, len: 1 })));

        // The put in the same transaction must not have partially applied.
        let rtxn = store.begin_read().await.unwrap();
        assert!(store.get_data(&rtxn, &1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("rspace.db");

        {
            let store: SledStore<i64, i64, i64, i64> = SledStore::open(&db_path).unwrap();
            let mut wtxn = store.begin_write().await.unwrap();
            store.put_datum(&mut wtxn, &1, datum(99, false, 0)).await.unwrap();
            store.commit(wtxn).await.unwrap();
            store.flush().await.unwrap();
        }

        {
            let store: SledStore<i64, i64, i64, i64> = SledStore::open(&db_path).unwrap();
            let rtxn = store.begin_read().await.unwrap();
            let data = store.get_data(&rtxn, &1).await.unwrap();
            assert_eq!(data.len(), 1);
            assert_eq!(data[0].value, 99);
        }
    }

    #[tokio::test]
    async fn checkpoint_changes_after_write() {
        let store: SledStore<i64, i64, i64, i64> = SledStore::temporary().unwrap();
        let root1 = store.create_checkpoint().await.unwrap();

        let mut wtxn = store.begin_write().await.unwrap();
        store.put_datum(&mut wtxn, &1, datum(10, false, 0)).await.unwrap();
        store.commit(wtxn).await.unwrap();

        let root2 = store.create_checkpoint().await.unwrap();
        assert_ne!(root1, root2);
    }
}
