//! The transactional keyed-multimap contract every storage driver implements.

use async_trait::async_trait;

use rspace_types::{CausalDigest, Datum, Opaque, WaitingContinuation};

/// Errors that can occur during store operations.
///
/// Per `spec.md` §7, `StoreFailure` is bubbled up without retry by the
/// engine; the calling layer may retry the whole produce/consume call.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend's underlying I/O or transaction machinery failed.
    #[error("store backend failure: {0}")]
    Backend(String),
    /// A value could not be encoded/decoded to or from the backend's wire
    /// format.
    #[error("store codec failure: {0}")]
    Codec(#[from] rspace_types::CodecError),
    /// `removeDatum`/`removeWaitingContinuation` was called with an index
    /// that is no longer present (the caller's snapshot was stale).
    #[error("index {index} out of range for key (len {len})")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// The table's length at the time of removal.
        len: usize,
    },
    /// A write transaction was committed or aborted twice, or a write
    /// operation was attempted outside of any transaction.
    #[error("transaction misuse: {0}")]
    TransactionMisuse(String),
}

/// A transactional, content-addressable keyed multimap with three logical
/// tables, per `spec.md` §3/§4.1:
///
/// - `data: C → ordered sequence of Datum<A>`
/// - `conts: [C] → ordered sequence of WaitingContinuation<P, K>`, keyed by
///   the exact channel sequence
/// - `joins: C → set of [C]`
///
/// Reads within one [`Store::ReadTxn`] observe a consistent snapshot; writes
/// buffered into one [`Store::WriteTxn`] are applied atomically on
/// [`Store::commit`], or discarded entirely on [`Store::abort`]. Drivers may
/// be backed by an in-memory map, a memory-mapped B-tree, or a hybrid of the
/// two — the engine relies only on this snapshot-consistency and
/// atomic-commit contract.
#[async_trait]
pub trait Store<C, P, A, K>: Send + Sync
where
    C: Opaque,
    P: Opaque,
    A: Opaque,
    K: Opaque,
{
    /// A read-only transaction handle.
    type ReadTxn: Send;
    /// A write transaction handle, buffering mutations until commit.
    type WriteTxn: Send;

    /// Begin a read transaction observing a consistent snapshot of the
    /// store.
    async fn begin_read(&self) -> Result<Self::ReadTxn, StoreError>;

    /// Begin a write transaction. No mutation is visible to other readers
    /// until [`Store::commit`] is called.
    async fn begin_write(&self) -> Result<Self::WriteTxn, StoreError>;

    /// Atomically apply every mutation buffered in `txn`.
    async fn commit(&self, txn: Self::WriteTxn) -> Result<(), StoreError>;

    /// Discard `txn` without applying any of its buffered mutations. Called
    /// on every error or cancellation exit path so that scoped acquisition
    /// guarantees no partial state is ever observed.
    fn abort(&self, txn: Self::WriteTxn);

    /// Read the data list for `channel`, in insertion order.
    async fn get_data(&self, txn: &Self::ReadTxn, channel: &C) -> Result<Vec<Datum<C, A>>, StoreError>;

    /// Append `datum` to `channel`'s data list.
    async fn put_datum(&self, txn: &mut Self::WriteTxn, channel: &C, datum: Datum<C, A>) -> Result<(), StoreError>;

    /// Remove the element at `index` from `channel`'s data list, shifting
    /// successors down. Callers must remove in descending-index order
    /// within a single critical section (`spec.md` §9).
    async fn remove_datum(&self, txn: &mut Self::WriteTxn, channel: &C, index: usize) -> Result<(), StoreError>;

    /// Read the waiting continuations stored under the exact channel
    /// sequence `channels`, in insertion order.
    async fn get_waiting_continuations(
        &self,
        txn: &Self::ReadTxn,
        channels: &[C],
    ) -> Result<Vec<WaitingContinuation<C, P, K>>, StoreError>;

    /// Append `wc` under the exact channel sequence `channels`.
    async fn put_waiting_continuation(
        &self,
        txn: &mut Self::WriteTxn,
        channels: &[C],
        wc: WaitingContinuation<C, P, K>,
    ) -> Result<(), StoreError>;

    /// Remove the waiting continuation at `index` under `channels`.
    async fn remove_waiting_continuation(
        &self,
        txn: &mut Self::WriteTxn,
        channels: &[C],
        index: usize,
    ) -> Result<(), StoreError>;

    /// Read the set of channel-groups that reference `channel` in their join
    /// index.
    async fn get_joins(&self, txn: &Self::ReadTxn, channel: &C) -> Result<Vec<Vec<C>>, StoreError>;

    /// Record that `channel` participates in channel-group `channels`.
    async fn add_join(&self, txn: &mut Self::WriteTxn, channel: &C, channels: &[C]) -> Result<(), StoreError>;

    /// Remove the `channels` entry from `channel`'s join set.
    async fn remove_join(&self, txn: &mut Self::WriteTxn, channel: &C, channels: &[C]) -> Result<(), StoreError>;

    /// Flush dirty state into a content-addressed root and return it.
    /// Callers must ensure no consume/produce is in flight, per `spec.md`
    /// §4.6.
    async fn create_checkpoint(&self) -> Result<CausalDigest, StoreError>;
}
