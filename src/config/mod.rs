pub mod resolve;

use crate::vector::{BuildParams, ClusterParams, Compression, Metric, SearchParams};
use resolve::{Lookup, ProcessEnv};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_INDEX_PATH: &str = "VIBECHECK_INDEX_PATH";
pub const ENV_CLUSTERS: &str = "VIBECHECK_CLUSTERS";
pub const ENV_MAX_ITERATIONS: &str = "VIBECHECK_MAX_ITERATIONS";
pub const ENV_SEED: &str = "VIBECHECK_SEED";
pub const ENV_METRIC: &str = "VIBECHECK_METRIC";
pub const ENV_COMPRESSION: &str = "VIBECHECK_COMPRESSION";
pub const ENV_NPROBE: &str = "VIBECHECK_NPROBE";
pub const ENV_TOP_K: &str = "VIBECHECK_TOP_K";
pub const ENV_SEARCH_TIMEOUT_MS: &str = "VIBECHECK_SEARCH_TIMEOUT_MS";
pub const ENV_SEARCH_THREADS: &str = "VIBECHECK_SEARCH_THREADS";

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Index file served by the engine and written by `build`.
    pub index_path: Option<PathBuf>,
    pub clusters: usize,
    pub max_iterations: usize,
    pub seed: u64,
    pub metric: Metric,
    pub compression: Compression,
    pub nprobe: usize,
    pub top_k: usize,
    /// Zero disables the search deadline.
    pub search_timeout_ms: u64,
    /// Size of the global rayon pool; zero keeps rayon's default.
    pub search_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        let cluster = ClusterParams::default();
        let search = SearchParams::default();
        Self {
            index_path: None,
            clusters: cluster.clusters,
            max_iterations: cluster.max_iterations,
            seed: cluster.seed,
            metric: Metric::L2,
            compression: Compression::None,
            nprobe: search.num_probes,
            top_k: search.k,
            search_timeout_ms: 0,
            search_threads: 0,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(&ProcessEnv)
    }

    /// Reads every setting from `src`, falling back to defaults for unset or
    /// blank values. Values that are set but unparsable are errors.
    pub fn from_lookup(src: &dyn Lookup) -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            index_path: resolve::resolve_path(src, ENV_INDEX_PATH),
            clusters: resolve::resolve_positive(src, ENV_CLUSTERS, defaults.clusters)?,
            max_iterations: resolve::resolve_positive(
                src,
                ENV_MAX_ITERATIONS,
                defaults.max_iterations,
            )?,
            seed: resolve::resolve_u64(src, ENV_SEED, defaults.seed)?,
            metric: resolve::resolve_metric(src, ENV_METRIC, defaults.metric)?,
            compression: resolve::resolve_compression(
                src,
                ENV_COMPRESSION,
                defaults.compression,
            )?,
            nprobe: resolve::resolve_positive(src, ENV_NPROBE, defaults.nprobe)?,
            top_k: resolve::resolve_usize(src, ENV_TOP_K, defaults.top_k)?,
            search_timeout_ms: resolve::resolve_u64(
                src,
                ENV_SEARCH_TIMEOUT_MS,
                defaults.search_timeout_ms,
            )?,
            search_threads: resolve::resolve_usize(
                src,
                ENV_SEARCH_THREADS,
                defaults.search_threads,
            )?,
        })
    }

    pub fn build_params(&self) -> BuildParams {
        BuildParams {
            clusters: self.clusters,
            max_iterations: self.max_iterations,
            seed: self.seed,
            metric: self.metric,
            compression: self.compression,
        }
    }

    pub fn search_params(&self) -> SearchParams {
        SearchParams {
            k: self.top_k,
            num_probes: self.nprobe,
            timeout: self.search_timeout(),
        }
    }

    pub fn search_timeout(&self) -> Option<Duration> {
        (self.search_timeout_ms > 0).then(|| Duration::from_millis(self.search_timeout_ms))
    }

    /// Sizes the global rayon pool when `search_threads` asks for it. Only the
    /// first call in a process can take effect.
    pub fn init_thread_pool(&self) {
        if self.search_threads == 0 {
            return;
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.search_threads)
            .build_global()
        {
            Ok(()) => tracing::debug!(threads = self.search_threads, "rayon pool sized"),
            Err(err) => tracing::warn!(error = %err, "rayon pool already initialized"),
        }
    }
}
