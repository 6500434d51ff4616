use super::cluster::{self, nearest, prepared_rows, Centroids, ClusterParams};
use super::index::{Compression, Index, IndexMeta, InvertedList, Payload, FORMAT_VERSION};
use super::q8::encode_residual;
use super::{Metric, Result, VectorError, VectorStore};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildParams {
    pub clusters: usize,
    pub max_iterations: usize,
    pub seed: u64,
    pub metric: Metric,
    pub compression: Compression,
}

impl Default for BuildParams {
    fn default() -> Self {
        let cluster = ClusterParams::default();
        Self {
            clusters: cluster.clusters,
            max_iterations: cluster.max_iterations,
            seed: cluster.seed,
            metric: Metric::L2,
            compression: Compression::None,
        }
    }
}

impl BuildParams {
    pub fn cluster_params(&self) -> ClusterParams {
        ClusterParams {
            clusters: self.clusters,
            max_iterations: self.max_iterations,
            seed: self.seed,
        }
    }
}

/// Offline producer of [`Index`] values. Building either returns a complete,
/// validated index or an error; nothing partial escapes.
#[derive(Clone, Debug, Default)]
pub struct IndexBuilder {
    params: BuildParams,
}

impl IndexBuilder {
    pub fn new(params: BuildParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &BuildParams {
        &self.params
    }

    pub fn fit(&self, store: &VectorStore) -> Result<Centroids> {
        cluster::fit(store, &self.params.cluster_params(), self.params.metric)
    }

    /// Fit then build in one step.
    pub fn run(&self, store: &VectorStore) -> Result<Index> {
        let started = Instant::now();
        let centroids = self.fit(store)?;
        let index = self.build(store, &centroids)?;
        tracing::info!(
            vectors = index.len(),
            clusters = index.cluster_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index ready"
        );
        Ok(index)
    }

    /// Assigns every row to its nearest centroid (ties to the lowest id) and
    /// freezes the result.
    pub fn build(&self, store: &VectorStore, centroids: &Centroids) -> Result<Index> {
        if store.is_empty() {
            return Err(VectorError::EmptyStore);
        }
        if centroids.is_empty() {
            return Err(VectorError::InvalidParameter(
                "no centroids to build against".to_string(),
            ));
        }
        let dim = store.dimension();
        if centroids.dimension() != dim {
            return Err(VectorError::DimensionMismatch {
                expected: dim,
                actual: centroids.dimension(),
            });
        }
        if store.size() > u32::MAX as usize {
            return Err(VectorError::InvalidParameter(format!(
                "{} vectors exceed the row index range",
                store.size()
            )));
        }
        let metric = self.params.metric;
        if centroids.metric() != metric {
            tracing::warn!(
                fitted = ?centroids.metric(),
                building = ?metric,
                "centroids were fitted under a different metric"
            );
        }
        let centers = centroids.as_slice();
        let rows = prepared_rows(store, metric);
        tracing::debug!(vectors = store.size(), clusters = centers.len(), "assigning rows");

        let assignments: Vec<usize> = rows
            .par_chunks(dim)
            .map(|row| nearest(centers, metric, row))
            .collect();

        let mut lists = vec![InvertedList::default(); centers.len()];
        for (row, &cluster) in assignments.iter().enumerate() {
            lists[cluster].rows.push(row as u32);
        }
        let empty = lists.iter().filter(|l| l.is_empty()).count();
        if empty > 0 {
            tracing::debug!(empty, "clusters without members");
        }

        let payload = match self.params.compression {
            Compression::None => Payload::Flat(rows.into_owned()),
            Compression::ResidualQ8 => Payload::ResidualQ8(
                rows.par_chunks(dim)
                    .zip(assignments.par_iter())
                    .map(|(row, &cluster)| encode_residual(row, &centers[cluster]))
                    .collect(),
            ),
        };

        let meta = IndexMeta {
            version: FORMAT_VERSION,
            dim,
            metric,
            clusters: centers.len(),
            vector_count: store.size(),
            compression: self.params.compression,
        };
        Index::from_parts(
            meta,
            centers.to_vec(),
            lists,
            store.ids().to_vec(),
            payload,
        )
    }
}
