use super::{Metric, Result, VectorError, VectorStore};
use rand::{rngs::StdRng, seq::index, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterParams {
    pub clusters: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            clusters: 256,
            max_iterations: 25,
            seed: 0x5EED,
        }
    }
}

/// Frozen k-means output: `C` centroids of dimension `D`, compared under one
/// metric.
#[derive(Clone, Debug, PartialEq)]
pub struct Centroids {
    dim: usize,
    metric: Metric,
    data: Vec<Vec<f32>>,
    iterations: usize,
    converged: bool,
}

impl Centroids {
    pub fn new(data: Vec<Vec<f32>>, metric: Metric) -> Result<Self> {
        let dim = data.first().map(Vec::len).unwrap_or(0);
        if data.is_empty() || dim == 0 {
            return Err(VectorError::InvalidParameter(
                "at least one non-empty centroid is required".to_string(),
            ));
        }
        if let Some(bad) = data.iter().find(|c| c.len() != dim) {
            return Err(VectorError::DimensionMismatch {
                expected: dim,
                actual: bad.len(),
            });
        }
        Ok(Self {
            dim,
            metric,
            data,
            iterations: 0,
            converged: false,
        })
    }

    pub fn as_slice(&self) -> &[Vec<f32>] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<Vec<f32>> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Refinement rounds run by `fit`; zero for hand-made centroids.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Nearest centroid for an already prepared vector; ties go to the lowest id.
    pub fn assign(&self, vector: &[f32]) -> usize {
        nearest(&self.data, self.metric, vector)
    }
}

pub(crate) fn nearest(centroids: &[Vec<f32>], metric: Metric, vector: &[f32]) -> usize {
    let mut best_idx = 0usize;
    let mut best = f32::INFINITY;
    for (idx, centroid) in centroids.iter().enumerate() {
        let d = metric.distance(centroid, vector);
        // strict `<` keeps the lowest id on ties
        if d < best {
            best = d;
            best_idx = idx;
        }
    }
    best_idx
}

/// Rows of the store in the form the metric compares them.
pub(crate) fn prepared_rows(store: &VectorStore, metric: Metric) -> Cow<'_, [f32]> {
    if !metric.normalizes() {
        return Cow::Borrowed(store.as_flat());
    }
    let mut flat = store.as_flat().to_vec();
    for row in flat.chunks_exact_mut(store.dimension().max(1)) {
        super::simd::l2_normalize(row);
    }
    Cow::Owned(flat)
}

/// Seeded k-means over the store.
///
/// Initial centroids are `C` distinct rows drawn with `StdRng::seed_from_u64(seed)`.
/// Each round assigns every row to its nearest centroid, stops if no
/// assignment moved, then replaces every centroid with the mean of its
/// members. A centroid that received no members keeps its previous value.
/// Assignment runs on the rayon pool; sums are accumulated in row order, so the
/// output does not depend on thread count.
pub fn fit(store: &VectorStore, params: &ClusterParams, metric: Metric) -> Result<Centroids> {
    if store.is_empty() {
        return Err(VectorError::EmptyStore);
    }
    if params.clusters == 0 {
        return Err(VectorError::InvalidParameter(
            "cluster count must be at least 1".to_string(),
        ));
    }
    let n = store.size();
    if params.clusters > n {
        return Err(VectorError::InsufficientData {
            clusters: params.clusters,
            vectors: n,
        });
    }
    let dim = store.dimension();
    let rows = prepared_rows(store, metric);

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut picks = index::sample(&mut rng, n, params.clusters).into_vec();
    picks.sort_unstable();
    let mut centroids: Vec<Vec<f32>> = picks
        .iter()
        .map(|&row| rows[row * dim..(row + 1) * dim].to_vec())
        .collect();

    let mut assignments = vec![usize::MAX; n];
    let mut iterations = 0usize;
    let mut converged = false;
    for round in 0..params.max_iterations.max(1) {
        iterations = round + 1;
        let next: Vec<usize> = rows
            .par_chunks(dim)
            .map(|row| nearest(&centroids, metric, row))
            .collect();
        let moved = next
            .iter()
            .zip(assignments.iter())
            .filter(|(a, b)| a != b)
            .count();
        assignments = next;
        tracing::debug!(round = iterations, moved, "k-means assignment");
        if moved == 0 {
            converged = true;
            break;
        }

        let mut sums = vec![vec![0.0f32; dim]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (row, &cluster) in rows.chunks_exact(dim).zip(assignments.iter()) {
            counts[cluster] += 1;
            for (dst, &src) in sums[cluster].iter_mut().zip(row.iter()) {
                *dst += src;
            }
        }
        for (idx, (mut sum, count)) in sums.into_iter().zip(counts).enumerate() {
            if count == 0 {
                tracing::debug!(cluster = idx, "empty cluster keeps previous centroid");
                continue;
            }
            let inv = 1.0f32 / count as f32;
            for value in sum.iter_mut() {
                *value *= inv;
            }
            if metric.normalizes() {
                super::simd::l2_normalize(&mut sum);
            }
            centroids[idx] = sum;
        }
    }

    tracing::info!(
        clusters = centroids.len(),
        vectors = n,
        dim,
        iterations,
        converged,
        "k-means fit done"
    );
    Ok(Centroids {
        dim,
        metric,
        data: centroids,
        iterations,
        converged,
    })
}
