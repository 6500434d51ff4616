use super::{ExternalId, Result, VectorError};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::BufRead;

/// Raw build-time matrix: row-major `f32` data plus the external id of every
/// row. Row order is the internal row index used by the index, and every
/// external id appears at most once.
#[derive(Clone, Debug, Default)]
pub struct VectorStore {
    dim: Option<usize>,
    data: Vec<f32>,
    ids: Vec<ExternalId>,
    seen: HashSet<ExternalId>,
}

/// One line of a JSONL build input.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonlRecord {
    pub id: ExternalId,
    pub vector: Vec<f32>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixes the dimension up front instead of taking it from the first row.
    pub fn with_dimension(dim: usize) -> Self {
        Self {
            dim: Some(dim),
            ..Self::default()
        }
    }

    /// Appends a row and returns its row index. A rejected row leaves the
    /// store untouched, including a dimension not fixed yet.
    pub fn add(&mut self, vector: &[f32], id: impl Into<ExternalId>) -> Result<usize> {
        let dim = self.dim.unwrap_or(vector.len());
        if vector.len() != dim {
            return Err(VectorError::DimensionMismatch {
                expected: dim,
                actual: vector.len(),
            });
        }
        if dim == 0 {
            return Err(VectorError::InvalidVector {
                reason: "zero-length vector".to_string(),
            });
        }
        if let Some(pos) = vector.iter().position(|x| !x.is_finite()) {
            return Err(VectorError::InvalidVector {
                reason: format!("component {pos} is not finite"),
            });
        }
        let id = id.into();
        if self.seen.contains(&id) {
            return Err(VectorError::DuplicateId(id));
        }
        self.dim = Some(dim);
        let row = self.ids.len();
        self.data.extend_from_slice(vector);
        self.seen.insert(id.clone());
        self.ids.push(id);
        Ok(row)
    }

    pub fn get(&self, row: usize) -> Option<&[f32]> {
        let dim = self.dim?;
        if row >= self.ids.len() {
            return None;
        }
        Some(&self.data[row * dim..(row + 1) * dim])
    }

    pub fn id(&self, row: usize) -> Option<&ExternalId> {
        self.ids.get(row)
    }

    pub fn size(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Zero until a dimension is fixed.
    pub fn dimension(&self) -> usize {
        self.dim.unwrap_or(0)
    }

    pub fn ids(&self) -> &[ExternalId] {
        &self.ids
    }

    /// Row-major backing data, `size() * dimension()` values.
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ExternalId, &[f32])> + '_ {
        let dim = self.dimension().max(1);
        self.ids
            .iter()
            .zip(self.data.chunks_exact(dim))
            .enumerate()
            .map(|(row, (id, vector))| (row, id, vector))
    }

    /// Reads one `{"id": .., "vector": [..]}` object per line; blank lines are
    /// skipped.
    pub fn from_jsonl<R: BufRead>(reader: R) -> anyhow::Result<Self> {
        let mut store = Self::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("read line {}", lineno + 1))?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record: JsonlRecord = serde_json::from_str(trimmed)
                .with_context(|| format!("parse line {}", lineno + 1))?;
            store
                .add(&record.vector, record.id)
                .with_context(|| format!("line {}", lineno + 1))?;
        }
        Ok(store)
    }
}
