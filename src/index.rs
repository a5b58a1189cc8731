//! In-memory vector index with exact cosine search.
//!
//! A [`VectorIndex`] owns every chunk together with its embedding. It is
//! built once per distinct file set by [`crate::ingest::build_index`] and is
//! read-only afterwards; a changed file set produces a fresh index.
//!
//! Search is brute force: every entry is scored with
//! [`cosine_similarity`](crate::embedding::cosine_similarity) and the best `k`
//! are returned. Ties keep insertion order, so results are deterministic.
//!
//! # Persistence
//!
//! [`VectorIndex::save`] writes a JSON document holding the format version,
//! embedding model, dimensionality, session key, build timestamp, and all
//! entries. [`VectorIndex::load`] reads it back without re-embedding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, RetrievedChunk};

/// Version written into saved index files.
pub const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to access index file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid index file {path}: {source}")]
    Format {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported index format version {found} (expected {INDEX_FORMAT_VERSION})")]
    Version { found: u32 },

    #[error("entry {chunk_id} has {actual} dimensions, index declares {expected}")]
    Dimension {
        chunk_id: String,
        expected: usize,
        actual: usize,
    },
}

/// One indexed chunk and its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub vector: Vec<f32>,
    pub chunk: Chunk,
}

/// Metadata describing how an index was built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub format_version: u32,
    pub model: String,
    pub dims: usize,
    pub session_key: String,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    meta: IndexMeta,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Build an index from parallel chunk and vector lists.
    ///
    /// `dims` is taken from the first vector. Callers check that every vector
    /// has the same length before calling this.
    pub fn new(
        model: impl Into<String>,
        session_key: impl Into<String>,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Self {
        let dims = vectors.first().map(Vec::len).unwrap_or(0);
        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { vector, chunk })
            .collect();

        Self {
            meta: IndexMeta {
                format_version: INDEX_FORMAT_VERSION,
                model: model.into(),
                dims,
                session_key: session_key.into(),
                built_at: Utc::now(),
            },
            entries,
        }
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn session_key(&self) -> &str {
        &self.meta.session_key
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Return the `k` entries most similar to `query`, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<RetrievedChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query, &e.vector)))
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, score)| RetrievedChunk {
                chunk: self.entries[i].chunk.clone(),
                score,
            })
            .collect()
    }

    /// Write the index to `path` as JSON.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let io_err = |source| IndexError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let json = serde_json::to_vec(self).map_err(|source| IndexError::Format {
            path: path.display().to_string(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)?;

        tracing::info!(path = %path.display(), entries = self.len(), "saved index");
        Ok(())
    }

    /// Read an index previously written by [`VectorIndex::save`].
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let bytes = std::fs::read(path).map_err(|source| IndexError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let index: VectorIndex =
            serde_json::from_slice(&bytes).map_err(|source| IndexError::Format {
                path: path.display().to_string(),
                source,
            })?;
        index.check()?;

        tracing::info!(
            path = %path.display(),
            entries = index.len(),
            model = %index.meta.model,
            "loaded index"
        );
        Ok(index)
    }

    fn check(&self) -> Result<(), IndexError> {
        if self.meta.format_version != INDEX_FORMAT_VERSION {
            return Err(IndexError::Version {
                found: self.meta.format_version,
            });
        }
        for entry in &self.entries {
            if entry.vector.len() != self.meta.dims {
                return Err(IndexError::Dimension {
                    chunk_id: entry.chunk.id.clone(),
                    expected: self.meta.dims,
                    actual: entry.vector.len(),
                });
            }
        }
        Ok(())
    }
}
