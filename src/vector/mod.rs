mod builder;
mod cluster;
mod index;
pub mod persist;
pub mod q8;
mod search;
pub mod simd;
mod store;

pub use builder::{BuildParams, IndexBuilder};
pub use cluster::{fit, Centroids, ClusterParams};
pub use index::{
    Compression, Index, IndexMeta, InvertedList, ListStats, Payload, FORMAT_VERSION,
};
pub use search::{Neighbor, SearchEngine, SearchOutcome, SearchParams};
pub use store::{JsonlRecord, VectorStore};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Squared Euclidean distance.
    #[default]
    L2,
    /// Raw inner product; larger is more similar.
    InnerProduct,
    /// Inner product over L2-normalized vectors.
    Cosine,
}

impl Metric {
    /// Ranking distance between two vectors; lower is always closer.
    ///
    /// For `Cosine` both inputs are expected to be normalized already (see
    /// [`Metric::prepare`]).
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => simd::l2_squared(a, b),
            Metric::InnerProduct => -simd::dot(a, b),
            Metric::Cosine => 1.0 - simd::dot(a, b),
        }
    }

    /// Converts a ranking distance back to the metric's natural score
    /// (distance for `L2`, similarity for the others).
    pub fn score(self, distance: f32) -> f32 {
        match self {
            Metric::L2 => distance,
            Metric::InnerProduct => -distance,
            Metric::Cosine => 1.0 - distance,
        }
    }

    pub fn normalizes(self) -> bool {
        matches!(self, Metric::Cosine)
    }

    /// Returns the vector in the form this metric compares.
    pub fn prepare(self, v: &[f32]) -> Cow<'_, [f32]> {
        if self.normalizes() {
            let mut owned = v.to_vec();
            simd::l2_normalize(&mut owned);
            Cow::Owned(owned)
        } else {
            Cow::Borrowed(v)
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "l2" | "euclidean" => Some(Metric::L2),
            "inner_product" | "ip" | "dot" => Some(Metric::InnerProduct),
            "cosine" => Some(Metric::Cosine),
            _ => None,
        }
    }
}

/// Identifier of the entity (a track) a row stands for.
///
/// Human-readable formats see a bare number or string; binary formats get an
/// explicit tag since they cannot guess the variant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExternalId {
    Int(u64),
    Str(String),
}

#[derive(Serialize)]
enum TaggedIdRef<'a> {
    Int(u64),
    Str(&'a str),
}

#[derive(Deserialize)]
enum TaggedId {
    Int(u64),
    Str(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BareId {
    Int(u64),
    Str(String),
}

impl Serialize for ExternalId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            return match self {
                ExternalId::Int(v) => serializer.serialize_u64(*v),
                ExternalId::Str(s) => serializer.serialize_str(s),
            };
        }
        match self {
            ExternalId::Int(v) => TaggedIdRef::Int(*v),
            ExternalId::Str(s) => TaggedIdRef::Str(s),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ExternalId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            return Ok(match BareId::deserialize(deserializer)? {
                BareId::Int(v) => ExternalId::Int(v),
                BareId::Str(s) => ExternalId::Str(s),
            });
        }
        Ok(match TaggedId::deserialize(deserializer)? {
            TaggedId::Int(v) => ExternalId::Int(v),
            TaggedId::Str(s) => ExternalId::Str(s),
        })
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalId::Int(v) => write!(f, "{v}"),
            ExternalId::Str(s) => f.write_str(s),
        }
    }
}

impl From<u64> for ExternalId {
    fn from(value: u64) -> Self {
        ExternalId::Int(value)
    }
}

impl From<String> for ExternalId {
    fn from(value: String) -> Self {
        ExternalId::Str(value)
    }
}

impl From<&str> for ExternalId {
    fn from(value: &str) -> Self {
        ExternalId::Str(value.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("vector dim mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid vector: {reason}")]
    InvalidVector { reason: String },
    #[error("id already present: {0}")]
    DuplicateId(ExternalId),
    #[error("not enough vectors: {clusters} clusters requested from {vectors} vectors")]
    InsufficientData { clusters: usize, vectors: usize },
    #[error("vector store is empty")]
    EmptyStore,
    #[error("index holds no vectors")]
    EmptyIndex,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("corrupt index: {0}")]
    CorruptIndex(String),
    #[error("index i/o: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = VectorError> = std::result::Result<T, E>;
