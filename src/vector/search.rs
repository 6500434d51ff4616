use super::index::{Index, Payload};
use super::q8;
use super::{ExternalId, Result, VectorError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How many rows are scanned between deadline checks.
const DEADLINE_CHECK_EVERY: usize = 1024;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchParams {
    pub k: usize,
    pub num_probes: usize,
    /// Best-effort budget; when it runs out the partial top-k is returned.
    pub timeout: Option<Duration>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            k: 3,
            num_probes: 16,
            timeout: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Neighbor {
    pub id: ExternalId,
    pub row: usize,
    /// Ranking distance under the index metric; lower is closer.
    pub distance: f32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchOutcome {
    pub neighbors: Vec<Neighbor>,
    /// Inverted lists actually scanned.
    pub probed: usize,
    /// Candidate rows scored.
    pub scanned: usize,
    pub timed_out: bool,
}

/// Read-only query side of an [`Index`]. Cheap to clone; every call keeps its
/// working buffers to itself, so one engine may serve any number of threads.
#[derive(Clone, Debug)]
pub struct SearchEngine {
    index: Arc<Index>,
}

impl SearchEngine {
    pub fn new(index: Arc<Index>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }

    /// Top-`k` rows by distance, scanning the `num_probes` closest clusters.
    pub fn search(&self, query: &[f32], k: usize, num_probes: usize) -> Result<Vec<Neighbor>> {
        let params = SearchParams {
            k,
            num_probes,
            timeout: None,
        };
        Ok(self.search_with(query, &params)?.neighbors)
    }

    /// Probes every cluster, which makes the scan exhaustive.
    pub fn search_exact(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.search(query, k, self.index.cluster_count())
    }

    pub fn search_with(&self, query: &[f32], params: &SearchParams) -> Result<SearchOutcome> {
        let index = &*self.index;
        if query.len() != index.dimension() {
            return Err(VectorError::DimensionMismatch {
                expected: index.dimension(),
                actual: query.len(),
            });
        }
        if let Some(pos) = query.iter().position(|x| !x.is_finite()) {
            return Err(VectorError::InvalidVector {
                reason: format!("query component {pos} is not finite"),
            });
        }
        if index.is_empty() {
            return Err(VectorError::EmptyIndex);
        }
        if params.k == 0 {
            return Ok(SearchOutcome::default());
        }
        let deadline = params.timeout.map(|t| Instant::now() + t);
        let metric = index.metric();
        let query = metric.prepare(query);
        let probes = select_probes(index, &query, params.num_probes);

        let mut heap = TopK::new(params.k);
        let mut outcome = SearchOutcome::default();
        let mut scratch = vec![0.0f32; index.dimension()];
        'lists: for &cluster in &probes {
            if expired(deadline) {
                outcome.timed_out = true;
                break;
            }
            outcome.probed += 1;
            for (pos, &row) in index.lists()[cluster].rows.iter().enumerate() {
                if pos > 0 && pos % DEADLINE_CHECK_EVERY == 0 && expired(deadline) {
                    outcome.timed_out = true;
                    break 'lists;
                }
                let row = row as usize;
                let distance = match index.payload() {
                    Payload::Flat(data) => {
                        let dim = index.dimension();
                        metric.distance(&query, &data[row * dim..(row + 1) * dim])
                    }
                    Payload::ResidualQ8(codes) => q8::approx_distance(
                        metric,
                        &query,
                        &index.centroids()[cluster],
                        &codes[row],
                        &mut scratch,
                    ),
                };
                outcome.scanned += 1;
                heap.offer(distance, row);
            }
        }
        if outcome.timed_out {
            tracing::debug!(
                probed = outcome.probed,
                scanned = outcome.scanned,
                "search deadline reached, returning partial results"
            );
        }

        outcome.neighbors = heap
            .into_sorted()
            .into_iter()
            .map(|c| Neighbor {
                id: index.ids()[c.row].clone(),
                row: c.row,
                distance: c.distance,
            })
            .collect();
        Ok(outcome)
    }

    /// Runs independent queries on the rayon pool; results keep query order.
    pub fn search_batch(
        &self,
        queries: &[Vec<f32>],
        params: &SearchParams,
    ) -> Vec<Result<SearchOutcome>> {
        queries
            .par_iter()
            .map(|q| self.search_with(q, params))
            .collect()
    }
}

/// The `num_probes` (clamped to `[1, C]`) centroids closest to `query`,
/// nearest first, ties to the lowest cluster id.
fn select_probes(index: &Index, query: &[f32], num_probes: usize) -> Vec<usize> {
    let metric = index.metric();
    let wanted = num_probes.clamp(1, index.cluster_count());
    let mut scored: Vec<(f32, usize)> = index
        .centroids()
        .iter()
        .enumerate()
        .map(|(idx, centroid)| (metric.distance(query, centroid), idx))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    scored.truncate(wanted);
    scored.into_iter().map(|(_, idx)| idx).collect()
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    distance: f32,
    row: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.row.cmp(&other.row))
    }
}

/// Bounded max-heap holding the `k` smallest candidates seen so far.
struct TopK {
    k: usize,
    heap: BinaryHeap<Candidate>,
}

impl TopK {
    fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.saturating_add(1).min(4096)),
        }
    }

    fn offer(&mut self, distance: f32, row: usize) {
        let candidate = Candidate { distance, row };
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(mut worst) = self.heap.peek_mut() {
            if candidate < *worst {
                *worst = candidate;
            }
        }
    }

    fn into_sorted(self) -> Vec<Candidate> {
        self.heap.into_sorted_vec()
    }
}
