//! IVF (inverted file) vector index for semantic song search.
//!
//! Embeddings are loaded into a [`vector::VectorStore`], clustered with seeded
//! k-means, and frozen into an immutable [`vector::Index`] that can be saved to
//! a single checksummed file. Queries probe the clusters whose centroids sit
//! closest to the query and scan only their members.
//!
//! ```no_run
//! use vibecheck::vector::{BuildParams, IndexBuilder, SearchEngine, VectorStore};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut store = VectorStore::new();
//! store.add(&[0.1, 0.9], "track-a")?;
//! store.add(&[0.8, 0.2], "track-b")?;
//! let index = IndexBuilder::new(BuildParams { clusters: 2, ..Default::default() }).run(&store)?;
//! let hits = SearchEngine::new(Arc::new(index)).search(&[0.2, 0.8], 1, 1)?;
//! assert_eq!(hits[0].id.to_string(), "track-a");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod vector;
