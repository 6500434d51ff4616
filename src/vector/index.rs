use super::q8::QuantizedVec;
use super::{ExternalId, Metric, Result, VectorError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const FORMAT_VERSION: u16 = 1;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// Full-precision rows; exact distances at query time.
    #[default]
    None,
    /// One int8 residual code per row; distances are approximate.
    ResidualQ8,
}

impl Compression {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "none" | "flat" => Some(Compression::None),
            "residual_q8" | "q8" => Some(Compression::ResidualQ8),
            _ => None,
        }
    }

    pub(crate) fn flags(self) -> u16 {
        match self {
            Compression::None => 0,
            Compression::ResidualQ8 => 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IndexMeta {
    pub version: u16,
    pub dim: usize,
    pub metric: Metric,
    pub clusters: usize,
    pub vector_count: usize,
    pub compression: Compression,
}

/// Members of one cluster, ascending by row index.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvertedList {
    pub rows: Vec<u32>,
}

impl InvertedList {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Inverted-list size distribution, as reported by `vibecheck inspect`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ListStats {
    pub min: usize,
    pub max: usize,
    pub mean: f64,
    pub empty: usize,
}

/// Per-row storage behind the inverted lists.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Payload {
    /// Row-major `N * D` values.
    Flat(Vec<f32>),
    /// One residual code per row, relative to the row's centroid.
    ResidualQ8(Vec<QuantizedVec>),
}

impl Payload {
    pub fn compression(&self) -> Compression {
        match self {
            Payload::Flat(_) => Compression::None,
            Payload::ResidualQ8(_) => Compression::ResidualQ8,
        }
    }
}

/// Immutable, queryable IVF index. Every way of producing one (the builder,
/// the loader, serde) goes through [`Index::from_parts`], so every value
/// satisfies the invariants checked there.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "IndexParts")]
pub struct Index {
    pub(crate) meta: IndexMeta,
    pub(crate) centroids: Vec<Vec<f32>>,
    pub(crate) lists: Vec<InvertedList>,
    pub(crate) ids: Vec<ExternalId>,
    pub(crate) payload: Payload,
}

/// Unchecked wire shape of an [`Index`].
#[derive(Deserialize)]
pub(crate) struct IndexParts {
    pub(crate) meta: IndexMeta,
    centroids: Vec<Vec<f32>>,
    lists: Vec<InvertedList>,
    ids: Vec<ExternalId>,
    payload: Payload,
}

impl TryFrom<IndexParts> for Index {
    type Error = VectorError;

    fn try_from(parts: IndexParts) -> Result<Self> {
        Index::from_parts(
            parts.meta,
            parts.centroids,
            parts.lists,
            parts.ids,
            parts.payload,
        )
    }
}

impl Index {
    pub fn from_parts(
        meta: IndexMeta,
        centroids: Vec<Vec<f32>>,
        lists: Vec<InvertedList>,
        ids: Vec<ExternalId>,
        payload: Payload,
    ) -> Result<Self> {
        let index = Self {
            meta,
            centroids,
            lists,
            ids,
            payload,
        };
        index.validate()?;
        Ok(index)
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn dimension(&self) -> usize {
        self.meta.dim
    }

    pub fn metric(&self) -> Metric {
        self.meta.metric
    }

    pub fn cluster_count(&self) -> usize {
        self.meta.clusters
    }

    pub fn len(&self) -> usize {
        self.meta.vector_count
    }

    pub fn is_empty(&self) -> bool {
        self.meta.vector_count == 0
    }

    pub fn compression(&self) -> Compression {
        self.meta.compression
    }

    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }

    pub fn lists(&self) -> &[InvertedList] {
        &self.lists
    }

    pub fn ids(&self) -> &[ExternalId] {
        &self.ids
    }

    pub fn id(&self, row: usize) -> Option<&ExternalId> {
        self.ids.get(row)
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Full-precision row, when the index keeps them.
    pub fn vector(&self, row: usize) -> Option<&[f32]> {
        let Payload::Flat(data) = &self.payload else {
            return None;
        };
        let dim = self.meta.dim;
        data.get(row * dim..(row + 1) * dim)
    }

    /// Size of every inverted list, by cluster id.
    pub fn list_sizes(&self) -> Vec<usize> {
        self.lists.iter().map(InvertedList::len).collect()
    }

    pub fn list_stats(&self) -> ListStats {
        let sizes = self.list_sizes();
        if sizes.is_empty() {
            return ListStats::default();
        }
        ListStats {
            min: sizes.iter().copied().min().unwrap_or(0),
            max: sizes.iter().copied().max().unwrap_or(0),
            mean: sizes.iter().sum::<usize>() as f64 / sizes.len() as f64,
            empty: sizes.iter().filter(|&&n| n == 0).count(),
        }
    }

    /// Checks every structural invariant; failures are `CorruptIndex`.
    pub fn validate(&self) -> Result<()> {
        let meta = &self.meta;
        if meta.version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {}", meta.version)));
        }
        if meta.dim == 0 {
            return Err(corrupt("dimension is zero"));
        }
        if meta.clusters == 0 {
            return Err(corrupt("cluster count is zero"));
        }
        if self.centroids.len() != meta.clusters {
            return Err(corrupt(format!(
                "declared {} clusters, found {} centroids",
                meta.clusters,
                self.centroids.len()
            )));
        }
        if let Some((idx, c)) = self
            .centroids
            .iter()
            .enumerate()
            .find(|(_, c)| c.len() != meta.dim)
        {
            return Err(corrupt(format!(
                "centroid {idx} has length {}, declared dimension {}",
                c.len(),
                meta.dim
            )));
        }
        if self.lists.len() != meta.clusters {
            return Err(corrupt(format!(
                "declared {} clusters, found {} inverted lists",
                meta.clusters,
                self.lists.len()
            )));
        }
        if self.ids.len() != meta.vector_count {
            return Err(corrupt(format!(
                "declared {} vectors, found {} ids",
                meta.vector_count,
                self.ids.len()
            )));
        }
        if self.payload.compression() != meta.compression {
            return Err(corrupt("payload kind disagrees with declared compression"));
        }
        match &self.payload {
            Payload::Flat(data) => {
                if data.len() != meta.vector_count * meta.dim {
                    return Err(corrupt(format!(
                        "flat payload holds {} values, expected {}",
                        data.len(),
                        meta.vector_count * meta.dim
                    )));
                }
            }
            Payload::ResidualQ8(codes) => {
                if codes.len() != meta.vector_count {
                    return Err(corrupt(format!(
                        "{} residual codes for {} vectors",
                        codes.len(),
                        meta.vector_count
                    )));
                }
                if let Some(row) = codes.iter().position(|c| c.dims() != meta.dim) {
                    return Err(corrupt(format!("residual code {row} has wrong width")));
                }
            }
        }

        let mut seen = vec![false; meta.vector_count];
        for (cluster, list) in self.lists.iter().enumerate() {
            for &row in &list.rows {
                let row = row as usize;
                if row >= meta.vector_count {
                    return Err(corrupt(format!(
                        "list {cluster} references row {row} of {}",
                        meta.vector_count
                    )));
                }
                if std::mem::replace(&mut seen[row], true) {
                    return Err(corrupt(format!("row {row} appears in more than one list")));
                }
            }
        }
        if let Some(row) = seen.iter().position(|s| !s) {
            return Err(corrupt(format!("row {row} is in no inverted list")));
        }

        let mut distinct = HashSet::with_capacity(self.ids.len());
        if let Some(id) = self.ids.iter().find(|id| !distinct.insert(*id)) {
            return Err(corrupt(format!("id {id} appears more than once")));
        }
        Ok(())
    }
}

fn corrupt(msg: impl Into<String>) -> VectorError {
    VectorError::CorruptIndex(msg.into())
}
