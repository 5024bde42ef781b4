#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **rspace-runtime** – Runtime wiring for RSpace.
//!
//! This crate sits above `rspace-engine` and provides everything an
//! application needs to actually run a [`Space`](rspace_engine::Space):
//! storage-backend selection (in-memory vs. sled), a `tracing` init
//! helper, a thin [`Scheduler`] for detached background work, and a
//! pluggable metrics backend. `rspace-engine` itself stays executor-
//! agnostic; this crate is where the Tokio-specific wiring lives, layering
//! a deterministic engine underneath a Tokio-flavored runtime.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use rspace_engine::{InMemoryMetrics, Matcher, MetricsSink, NoopMetrics, Space, SpaceConfig};
use rspace_store_core::{Codec, Opaque};
use rspace_store_memory::MemoryStore;
use rspace_store_sled::SledStore;

/// Errors from runtime configuration and backend construction.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A configuration value was invalid (e.g. an empty path for a
    /// persistent backend).
    #[error("runtime configuration error: {0}")]
    Configuration(String),
    /// The storage backend failed to open.
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Which storage driver to back a [`Space`] with.
///
/// `Store`'s `ReadTxn`/`WriteTxn` associated types mean the two drivers
/// cannot be hidden behind one object-safe trait; backend selection here is
/// therefore a choice of *which constructor to call* (see
/// `build_memory_space`/`build_sled_space`) rather than a single dynamic
/// factory. Recorded in `DESIGN.md`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BackendConfig {
    /// Non-persistent, in-process storage.
    Memory,
    /// Durable, sled-backed storage at the given path.
    Sled {
        /// Database directory path.
        path: PathBuf,
    },
}

/// Which metrics sink to wire up.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub enum MetricsConfig {
    /// Discard every increment.
    #[default]
    Noop,
    /// Keep counters in an in-process table.
    InMemory,
}

/// Top-level construction parameters for a runtime-wired [`Space`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Storage backend selection.
    pub backend: BackendConfig,
    /// Metrics sink selection.
    pub metrics: MetricsConfig,
    /// Seed for the engine's deterministic shuffling.
    pub seed: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { backend: BackendConfig::Memory, metrics: MetricsConfig::Noop, seed: 0 }
    }
}

/// Build the [`MetricsSink`] named by `config`.
pub fn build_metrics(config: MetricsConfig) -> Arc<dyn MetricsSink> {
    match config {
        MetricsConfig::Noop => Arc::new(NoopMetrics),
        MetricsConfig::InMemory => Arc::new(InMemoryMetrics::new()),
    }
}

/// Build a [`Space`] backed by [`MemoryStore`].
#[allow(clippy::too_many_arguments)]
pub fn build_memory_space<C, P, A, K, R, E>(
    matcher: Arc<dyn Matcher<P, A, R, E> + Send + Sync>,
    codec_c: Arc<dyn Codec<C>>,
    codec_p: Arc<dyn Codec<P>>,
    codec_a: Arc<dyn Codec<A>>,
    codec_k: Arc<dyn Codec<K>>,
    metrics: Arc<dyn MetricsSink>,
    config: SpaceConfig,
) -> Space<MemoryStore<C, P, A, K>, C, P, A, K, R, E>
where
    C: Opaque + Serialize,
    P: Opaque + Serialize,
    A: Opaque + Serialize,
    K: Opaque + Serialize,
    R: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    debug!("building in-memory space");
    Space::new(Arc::new(MemoryStore::new()), matcher, codec_c, codec_p, codec_a, codec_k, metrics, config)
}

/// Build a [`Space`] backed by [`SledStore`] at `path`.
#[allow(clippy::too_many_arguments)]
pub fn build_sled_space<C, P, A, K, R, E>(
    path: &std::path::Path,
    matcher: Arc<dyn Matcher<P, A, R, E> + Send + Sync>,
    codec_c: Arc<dyn Codec<C>>,
    codec_p: Arc<dyn Codec<P>>,
    codec_a: Arc<dyn Codec<A>>,
    codec_k: Arc<dyn Codec<K>>,
    metrics: Arc<dyn MetricsSink>,
    config: SpaceConfig,
) -> Result<Space<SledStore<C, P, A, K>, C, P, A, K, R, E>, RuntimeError>
where
    C: Opaque + Serialize + serde::de::DeserializeOwned,
    P: Opaque + Serialize + serde::de::DeserializeOwned,
    A: Opaque + Serialize + serde::de::DeserializeOwned,
    K: Opaque + Serialize + serde::de::DeserializeOwned,
    R: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    debug!(?path, "building sled-backed space");
    let store = SledStore::open(path).map_err(RuntimeError::Backend)?;
    Ok(Space::new(Arc::new(store), matcher, codec_c, codec_p, codec_a, codec_k, metrics, config))
}

/// Detached background work, abstracted so `rspace-engine` never needs to
/// know which executor is in use. `rspace-runtime` is the only crate that
/// commits to Tokio.
pub trait Scheduler: Send + Sync {
    /// Spawn `fut` to run in the background; the caller does not await it.
    fn spawn_detached(&self, fut: Pin<Box<dyn Future<Output = ()> + Send>>);
}

/// A [`Scheduler`] backed by `tokio::spawn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn spawn_detached(&self, fut: Pin<Box<dyn Future<Output = ()> + Send>>) {
        tokio::spawn(fut);
    }
}

/// Initialize `tracing` once for the process, honoring `RUST_LOG`, falling
/// back to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rspace_engine::EqMatcher;
    use rspace_store_core::SerdeCodec;

    #[tokio::test]
    async fn memory_space_roundtrips_a_produce_consume() {
        let space = build_memory_space::<i64, i64, i64, i64, i64, std::convert::Infallible>(
            Arc::new(EqMatcher),
            Arc::new(SerdeCodec),
            Arc::new(SerdeCodec),
            Arc::new(SerdeCodec),
            Arc::new(SerdeCodec),
            build_metrics(MetricsConfig::Noop),
            SpaceConfig::default(),
        );

        space.produce(1, 10, false, 0).await.unwrap();
        let (cont_result, matched) = space.consume(vec![1], vec![10], 99, false, 0).await.unwrap().unwrap();
        assert_eq!(cont_result.continuation, 99);
        assert_eq!(matched[0].value, 10);
    }

    #[tokio::test]
    async fn sled_space_persists_to_a_temporary_directory() {
        let dir = tempfile::tempdir().unwrap();
        let space = build_sled_space::<i64, i64, i64, i64, i64, std::convert::Infallible>(
            dir.path(),
            Arc::new(EqMatcher),
            Arc::new(SerdeCodec),
            Arc::new(SerdeCodec),
            Arc::new(SerdeCodec),
            Arc::new(SerdeCodec),
            build_metrics(MetricsConfig::InMemory),
            SpaceConfig::default(),
        )
        .unwrap();

        space.produce(1, 10, false, 0).await.unwrap();
        let (cont_result, _) = space.consume(vec![1], vec![10], 99, false, 0).await.unwrap().unwrap();
        assert_eq!(cont_result.continuation, 99);
    }

    #[test]
    fn default_config_is_memory_and_noop() {
        let config = RuntimeConfig::default();
        assert!(matches!(config.backend, BackendConfig::Memory));
        assert!(matches!(config.metrics, MetricsConfig::Noop));
    }
}
