//! Retrieval-QA over the session's vector index.
//!
//! Embeds the question, pulls the top-k chunks, stuffs them verbatim into a
//! fixed prompt and asks the language model for a short answer. The model's
//! text is returned as-is (trimmed); nothing checks that it is grounded in
//! the context beyond what the prompt asks for.

use async_trait::async_trait;
use std::sync::Arc;

use super::{Tool, ToolError};
use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, Embedder};
use crate::index::VectorIndex;
use crate::llm::LanguageModel;
use crate::models::{ChunkSource, RetrievedChunk};

pub const DOCUMENT_QA_TOOL: &str = "Financial_Document_QA";

const DOCUMENT_QA_DESCRIPTION: &str = "Useful for answering questions about financial reports, \
10-K filings, and company documents. Input should be a question about a company's financials.";

/// Render the stuffed retrieval prompt.
pub fn render_qa_prompt(context: &[RetrievedChunk], question: &str) -> String {
    let context = context
        .iter()
        .map(|r| r.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Use the following pieces of context to answer the user's question.\n\
         If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\
         Context: {context}\n\
         Question: {question}\n\
         Only return the helpful answer below and nothing else.\n\
         Helpful answer:"
    )
}

/// The model's answer plus where its context came from.
#[derive(Debug, Clone)]
pub struct RetrievalAnswer {
    pub answer: String,
    /// Provenance of the retrieved chunks, best match first, deduplicated.
    pub sources: Vec<ChunkSource>,
}

impl RetrievalAnswer {
    /// `answer` followed by a `Sources:` line, when there are any.
    pub fn with_citations(&self) -> String {
        if self.sources.is_empty() {
            return self.answer.clone();
        }
        let cites = self
            .sources
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        format!("{}\nSources: {}", self.answer, cites)
    }
}

pub struct RetrievalQa {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn LanguageModel>,
    top_k: usize,
    cite_sources: bool,
}

impl RetrievalQa {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            model,
            top_k: config.top_k,
            cite_sources: config.cite_sources,
        }
    }

    /// Return the `top_k` chunks closest to `question`.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedChunk>, ToolError> {
        let query = embed_query(self.embedder.as_ref(), question)
            .await
            .map_err(|e| ToolError::execution(DOCUMENT_QA_TOOL, e.to_string()))?;
        let hits = self.index.search(&query, self.top_k);

        for hit in &hits {
            tracing::debug!(chunk = %hit.chunk.id, score = hit.score, "retrieved chunk");
        }
        Ok(hits)
    }

    pub async fn answer(&self, question: &str) -> Result<RetrievalAnswer, ToolError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ToolError::invalid_input(DOCUMENT_QA_TOOL, "question is empty"));
        }

        let hits = self.retrieve(question).await?;
        let prompt = render_qa_prompt(&hits, question);
        let answer = self
            .model
            .complete(&prompt, &[])
            .await
            .map_err(|e| ToolError::execution(DOCUMENT_QA_TOOL, e.to_string()))?;

        let mut sources: Vec<ChunkSource> = Vec::new();
        for hit in hits {
            if !sources.contains(&hit.chunk.source) {
                sources.push(hit.chunk.source);
            }
        }

        Ok(RetrievalAnswer {
            answer: answer.trim().to_string(),
            sources,
        })
    }
}

/// [`RetrievalQa`] exposed to the agent as `Financial_Document_QA`.
pub struct DocumentQaTool {
    qa: RetrievalQa,
}

impl DocumentQaTool {
    pub fn new(qa: RetrievalQa) -> Self {
        Self { qa }
    }
}

#[async_trait]
impl Tool for DocumentQaTool {
    fn name(&self) -> &str {
        DOCUMENT_QA_TOOL
    }

    fn description(&self) -> &str {
        DOCUMENT_QA_DESCRIPTION
    }

    async fn invoke(&self, input: &str) -> Result<String, ToolError> {
        let result = self.qa.answer(input).await?;
        if self.qa.cite_sources {
            Ok(result.with_citations())
        } else {
            Ok(result.answer)
        }
    }
}
