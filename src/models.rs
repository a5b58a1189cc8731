//! Core data models used throughout finrag.
//!
//! These types represent the documents, pages, chunks, and conversation
//! turns that flow through the ingestion and question-answering pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An uploaded source file: its name and raw bytes.
///
/// Created on upload and dropped after text extraction. The bytes are never
/// persisted.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Text extracted from one physical page of a [`Document`].
#[derive(Debug, Clone)]
pub struct Page {
    pub document: String,
    /// 1-based page number.
    pub number: usize,
    pub text: String,
}

/// Where a chunk came from. Kept on every chunk so answers can cite it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkSource {
    pub document: String,
    pub page: usize,
}

impl fmt::Display for ChunkSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} p.{}", self.document, self.page)
    }
}

/// A bounded span of page text: the atomic retrieval unit.
///
/// `start` and `end` are char offsets into the page text. `hash` is the
/// SHA-256 of `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source: ChunkSource,
    pub chunk_index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub hash: String,
}

/// A chunk returned by a similarity query, with its cosine score.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One turn of the chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
