//! Tools the agent can call.
//!
//! A [`Tool`] takes one string input and returns one string observation.
//! Three tools are registered for every session:
//!
//! | Name | Module | Purpose |
//! |------|--------|---------|
//! | `Financial_Document_QA` | [`document_qa`] | answer from the uploaded documents |
//! | `Web_Search` | [`web_search`] | live web lookup |
//! | `Code_Exec` | [`code_exec`] | arithmetic and small scripts |
//!
//! Extra tools can be added with [`ToolRegistry::register`]; the agent loop
//! only ever sees names and descriptions.
//!
//! # Usage
//!
//! ```rust
//! use finrag::tools::ToolRegistry;
//!
//! let mut tools = ToolRegistry::new();
//! // tools.register(Box::new(MyTool::new()));
//! assert!(tools.is_empty());
//! ```

pub mod code_exec;
pub mod document_qa;
pub mod web_search;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::index::VectorIndex;
use crate::llm::LanguageModel;

pub use code_exec::CodeExecTool;
pub use document_qa::{DocumentQaTool, RetrievalAnswer, RetrievalQa};
pub use web_search::WebSearchTool;

/// Why a tool call did not produce an observation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} failed: {message}")]
    Execution { tool: String, message: String },

    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("invalid input for {tool}: {message}")]
    InvalidInput { tool: String, message: String },
}

impl ToolError {
    pub fn execution(tool: &str, message: impl Into<String>) -> Self {
        Self::Execution {
            tool: tool.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_input(tool: &str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tool Trait
// ═══════════════════════════════════════════════════════════════════════

/// A capability the agent can invoke by name.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use finrag::tools::{Tool, ToolError};
///
/// pub struct EchoTool;
///
/// #[async_trait]
/// impl Tool for EchoTool {
///     fn name(&self) -> &str { "Echo" }
///     fn description(&self) -> &str { "Repeats its input." }
///
///     async fn invoke(&self, input: &str) -> Result<String, ToolError> {
///         Ok(input.to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses in `Action:` lines.
    fn name(&self) -> &str;

    /// One-line description shown to the model when it picks a tool.
    fn description(&self) -> &str;

    async fn invoke(&self, input: &str) -> Result<String, ToolError>;
}

// ═══════════════════════════════════════════════════════════════════════
// ToolRegistry
// ═══════════════════════════════════════════════════════════════════════

/// Ordered set of tools available to one agent.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty tool registry.
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Create a registry with the three standard tools bound to `index`.
    pub fn standard(
        config: &Config,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
    ) -> anyhow::Result<Self> {
        let qa = RetrievalQa::new(index, embedder, model, &config.retrieval);

        let mut registry = Self::new();
        registry.register(Box::new(DocumentQaTool::new(qa)));
        registry.register(Box::new(WebSearchTool::new(&config.tools.web_search)?));
        registry.register(Box::new(CodeExecTool::new(&config.tools.code_exec)));
        Ok(registry)
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    /// Find a tool by exact name.
    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip one pair of surrounding Markdown code fences (and a language tag).
pub(crate) fn strip_code_fences(input: &str) -> &str {
    let trimmed = input.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.trim_matches('`').trim();
    };
    let body = rest.strip_suffix("```").unwrap_or(rest);
    match body.split_once('\n') {
        Some((tag, code)) if tag.trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
            code.trim()
        }
        _ => body.trim(),
    }
}
