use crate::config::Config;
use crate::vector::{persist, Index, Neighbor, SearchEngine, SearchOutcome, VectorError};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared serving handle. Clones see the same index slot.
#[derive(Clone)]
pub struct Engine(Arc<Inner>);

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Vector(#[from] VectorError),
    #[error("no index path configured (set VIBECHECK_INDEX_PATH)")]
    NoIndexPath,
    #[error("engine has been shut down")]
    ShutDown,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

struct Inner {
    config: Config,
    current: RwLock<Arc<Index>>,
    closed: AtomicBool,
}

impl Engine {
    /// Loads the index file named by `config.index_path`.
    pub fn open(config: Config) -> EngineResult<Self> {
        let path = config.index_path.clone().ok_or(EngineError::NoIndexPath)?;
        let started = Instant::now();
        let index = persist::load(&path)?;
        tracing::info!(
            path = %path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "engine ready"
        );
        Ok(Self::from_index(config, index))
    }

    pub fn from_index(config: Config, index: Index) -> Self {
        Self(Arc::new(Inner {
            config,
            current: RwLock::new(Arc::new(index)),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.0.config
    }

    /// The index searches started now will see.
    pub fn snapshot(&self) -> Arc<Index> {
        self.0.current.read().clone()
    }

    pub fn searcher(&self) -> SearchEngine {
        SearchEngine::new(self.snapshot())
    }

    /// Searches with the configured `top_k`, probe count and deadline.
    pub fn search(&self, query: &[f32]) -> EngineResult<SearchOutcome> {
        self.ensure_open()?;
        let params = self.0.config.search_params();
        Ok(self.searcher().search_with(query, &params)?)
    }

    pub fn search_with(
        &self,
        query: &[f32],
        k: usize,
        num_probes: usize,
    ) -> EngineResult<Vec<Neighbor>> {
        self.ensure_open()?;
        Ok(self.searcher().search(query, k, num_probes)?)
    }

    /// All queries run against one snapshot, even if a swap lands meanwhile.
    pub fn search_batch(
        &self,
        queries: &[Vec<f32>],
    ) -> EngineResult<Vec<EngineResult<SearchOutcome>>> {
        self.ensure_open()?;
        let params = self.0.config.search_params();
        Ok(self
            .searcher()
            .search_batch(queries, &params)
            .into_iter()
            .map(|res| res.map_err(EngineError::from))
            .collect())
    }

    /// Swaps in a rebuilt index and returns the one it replaced. Searches
    /// already running finish on the old snapshot.
    pub fn replace(&self, index: Index) -> Arc<Index> {
        let next = Arc::new(index);
        let previous = std::mem::replace(&mut *self.0.current.write(), next.clone());
        tracing::info!(
            vectors = next.len(),
            clusters = next.cluster_count(),
            previous_vectors = previous.len(),
            "index swapped"
        );
        previous
    }

    /// Re-reads the configured index file and swaps it in. On failure the
    /// current index keeps serving.
    pub fn reload(&self) -> EngineResult<()> {
        self.ensure_open()?;
        let path = self.index_path()?;
        match persist::load(&path) {
            Ok(index) => {
                self.replace(index);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "reload failed, keeping current index"
                );
                Err(err.into())
            }
        }
    }

    /// Rejects further work. Outstanding snapshots stay valid until dropped.
    pub fn shutdown(&self) {
        if !self.0.closed.swap(true, Ordering::AcqRel) {
            let index = self.snapshot();
            tracing::info!(
                vectors = index.len(),
                handles = Arc::strong_count(&self.0),
                "engine shut down"
            );
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.is_shut_down() {
            return Err(EngineError::ShutDown);
        }
        Ok(())
    }

    fn index_path(&self) -> EngineResult<PathBuf> {
        self.0
            .config
            .index_path
            .clone()
            .ok_or(EngineError::NoIndexPath)
    }
}
