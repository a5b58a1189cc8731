//! Ingestion pipeline orchestration.
//!
//! Coordinates the build flow for one file set: PDF extraction → per-page
//! chunking → batched embedding → [`VectorIndex`]. The whole build either
//! succeeds and returns a new index or fails without side effects; callers
//! keep serving their previous index until they swap in the new one.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use thiserror::Error;
use walkdir::WalkDir;

use crate::chunk::chunk_pages;
use crate::config::Config;
use crate::embedding::{embed_in_batches, Embedder, EmbeddingError};
use crate::extract::{extract_pages, LoadError};
use crate::index::VectorIndex;
use crate::models::Document;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("no text could be extracted from the uploaded documents")]
    Empty,

    #[error("{name}: {reason}")]
    InvalidName { name: String, reason: &'static str },
}

/// Separator between names in a [`SessionKey`]; never valid inside a name.
pub const KEY_SEPARATOR: char = '|';

/// Reject file sets whose names would make an ambiguous [`SessionKey`] or
/// colliding chunk ids.
pub fn check_document_names(files: &[Document]) -> Result<(), IngestError> {
    let mut seen = std::collections::HashSet::new();
    for doc in files {
        let invalid = |reason| IngestError::InvalidName {
            name: doc.name.clone(),
            reason,
        };
        if doc.name.trim().is_empty() {
            return Err(invalid("document name must not be empty"));
        }
        if doc.name.contains(KEY_SEPARATOR) {
            return Err(invalid("document name must not contain '|'"));
        }
        if !seen.insert(doc.name.as_str()) {
            return Err(invalid("duplicate document name"));
        }
    }
    Ok(())
}

/// Identity of a file set: the sorted file names joined by
/// [`KEY_SEPARATOR`].
///
/// Two uploads with the same names in any order have the same key. A key
/// change is what triggers an index rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        names.sort();
        Self(names.join(&KEY_SEPARATOR.to_string()))
    }

    pub fn from_documents(docs: &[Document]) -> Self {
        Self::from_names(docs.iter().map(|d| d.name.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The file names this key was built from.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.split(KEY_SEPARATOR).filter(|n| !n.is_empty())
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Knobs for [`build_index`].
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub batch_size: usize,
    /// Expected embedding width, when the config pins one.
    pub dims: Option<usize>,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_chars: config.chunking.max_chars,
            overlap_chars: config.chunking.overlap_chars,
            batch_size: config.embedding.batch_size,
            dims: config.embedding.dims,
        }
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from_config(&Config::minimal())
    }
}

/// Build a vector index from a set of PDF documents.
///
/// Documents are processed in the order given. Any unreadable document
/// aborts the build with [`IngestError::Load`] naming the file.
pub async fn build_index(
    files: &[Document],
    opts: &IngestOptions,
    embedder: &dyn Embedder,
) -> Result<VectorIndex, IngestError> {
    check_document_names(files)?;
    let key = SessionKey::from_documents(files);
    let mut chunks = Vec::new();

    for doc in files {
        let pages = extract_pages(doc)?;
        let blank = pages.iter().filter(|p| p.text.trim().is_empty()).count();
        if blank > 0 {
            tracing::warn!(file = %doc.name, pages = blank, "pages without extractable text skipped");
        }

        let doc_chunks = chunk_pages(&pages, opts.max_chars, opts.overlap_chars);
        tracing::info!(
            file = %doc.name,
            pages = pages.len(),
            chunks = doc_chunks.len(),
            "extracted document"
        );
        chunks.extend(doc_chunks);
    }

    if chunks.is_empty() {
        return Err(IngestError::Empty);
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_in_batches(embedder, &texts, opts.batch_size, opts.dims).await?;

    let index = VectorIndex::new(embedder.model_name(), key.as_str(), chunks, vectors);
    tracing::info!(
        session_key = %key,
        chunks = index.len(),
        dims = index.meta().dims,
        model = embedder.model_name(),
        "built index"
    );
    Ok(index)
}

/// Read PDF files named on the command line plus every `*.pdf` under `dir`.
///
/// Documents are named by file name, so two files with the same name in
/// different directories are rejected.
pub fn read_documents(files: &[PathBuf], dir: Option<&Path>) -> anyhow::Result<Vec<Document>> {
    let mut paths: Vec<PathBuf> = files.to_vec();

    if let Some(root) = dir {
        let mut found = Vec::new();
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let is_pdf = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
            if is_pdf {
                found.push(entry.into_path());
            }
        }
        found.sort();
        paths.extend(found);
    }

    let mut docs: Vec<Document> = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Not a file path: {}", path.display()))?;
        if docs.iter().any(|d| d.name == name) {
            bail!("Duplicate document name: {}", name);
        }
        let bytes = std::fs::read(&path)
            .with_context(|| format!("Failed to read document: {}", path.display()))?;
        docs.push(Document::new(name, bytes));
    }
    Ok(docs)
}
