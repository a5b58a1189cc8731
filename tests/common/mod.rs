//! Shared fixtures for integration tests: in-memory PDFs and deterministic
//! stand-ins for the embedding and language models.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use finrag::config::Config;
use finrag::embedding::{Embedder, EmbeddingError};
use finrag::llm::{LanguageModel, LlmError};
use finrag::models::Document;
use finrag::session::Backends;
use finrag::tools::document_qa::DOCUMENT_QA_TOOL;

pub const REVENUE_PAGE: &str = "Total revenue in 2023 was $10 million. Revenue grew on subscription sales.";
pub const EXPENSE_PAGE: &str = "Operating expenses in 2023 were $4 million. Headcount stayed flat.";

/// Minimal valid PDF with one page per entry of `pages`.
///
/// Builds body then xref with correct byte offsets so pdf-extract can parse it.
pub fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let page_count = pages.len();
    // 1 catalog, 2 page tree, 3 font, then (page, content) pairs.
    let object_count = 3 + 2 * page_count;
    let mut offsets = Vec::with_capacity(object_count);

    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");

    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");

    let kids = (0..page_count)
        .map(|i| format!("{} 0 R", 4 + 2 * i))
        .collect::<Vec<_>>()
        .join(" ");
    offsets.push(out.len());
    out.extend_from_slice(
        format!("2 0 obj << /Type /Pages /Kids [{kids}] /Count {page_count} >> endobj\n").as_bytes(),
    );

    offsets.push(out.len());
    out.extend_from_slice(
        b"3 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );

    for (i, text) in pages.iter().enumerate() {
        let page_id = 4 + 2 * i;
        let content_id = page_id + 1;

        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{page_id} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
                 /Contents {content_id} 0 R /Resources << /Font << /F1 3 0 R >> >> >> endobj\n"
            )
            .as_bytes(),
        );

        let stream = format!("BT /F1 12 Tf 72 700 Td ({}) Tj ET", escape_pdf_string(text));
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{content_id} 0 obj << /Length {} >> stream\n{stream}\nendstream endobj\n",
                stream.len()
            )
            .as_bytes(),
        );
    }

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", object_count + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            object_count + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

fn escape_pdf_string(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
}

/// The two-page annual report most tests upload.
pub fn annual_report() -> Document {
    Document::new("annual.pdf", pdf_with_pages(&[REVENUE_PAGE, EXPENSE_PAGE]))
}

pub fn quarterly_report() -> Document {
    Document::new(
        "q3.pdf",
        pdf_with_pages(&["Third quarter revenue was $3 million."]),
    )
}

/// Defaults, with web search pointed at a closed port so no test leaves
/// the machine.
pub fn test_config() -> Config {
    let mut config = Config::minimal();
    config.tools.web_search.url = "http://127.0.0.1:1/".to_string();
    config.tools.web_search.timeout_secs = 2;
    config
}

pub fn backends(model: Arc<dyn LanguageModel>) -> Backends {
    Backends {
        embedder: Arc::new(HashingEmbedder::default()),
        model,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Embedding
// ═══════════════════════════════════════════════════════════════════════

/// Bag-of-words embedder: each lowercase word is hashed into one of `dims`
/// buckets. Texts sharing words score high, which is all retrieval tests
/// need.
pub struct HashingEmbedder {
    dims: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dims: 64 }
    }
}

impl HashingEmbedder {
    pub fn with_dims(dims: usize) -> Self {
        Self { dims }
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for word in words(text) {
            v[(fnv1a(&word) % self.dims as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing-test"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// A [`HashingEmbedder`] whose backend refuses any batch mentioning
/// `marker`, so one upload can fail while queries keep working.
pub struct RefusingEmbedder {
    inner: HashingEmbedder,
    marker: String,
}

impl RefusingEmbedder {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            inner: HashingEmbedder::default(),
            marker: marker.into(),
        }
    }
}

#[async_trait]
impl Embedder for RefusingEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.iter().any(|t| t.contains(&self.marker)) {
            return Err(EmbeddingError::Backend {
                provider: "refusing".to_string(),
                message: "503 Service Unavailable".to_string(),
            });
        }
        self.inner.embed(texts).await
    }
}

fn fnv1a(word: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
// Language models
// ═══════════════════════════════════════════════════════════════════════

/// Answer a retrieval prompt with the context sentence sharing the most
/// words with the question.
fn answer_from_context(prompt: &str) -> String {
    let context = between(prompt, "Context: ", "\nQuestion: ").unwrap_or_default();
    let question = between(prompt, "\nQuestion: ", "\n").unwrap_or_default();
    let asked = words(question);

    context
        .split(['.', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .max_by_key(|sentence| {
            words(sentence)
                .iter()
                .filter(|w| asked.contains(w))
                .count()
        })
        .map(|s| format!("{s}."))
        .unwrap_or_else(|| "I don't know.".to_string())
}

fn between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = text.find(start)? + start.len();
    let rest = &text[from..];
    Some(rest.find(end).map_or(rest, |to| &rest[..to]))
}

/// The agent part of the prompt: everything after `Begin!`.
fn agent_turn(prompt: &str) -> &str {
    prompt.rsplit_once("Begin!").map_or(prompt, |(_, tail)| tail)
}

/// Text of the most recent observation in the scratchpad, if any.
pub fn last_observation(prompt: &str) -> Option<String> {
    let turn = agent_turn(prompt);
    let (_, tail) = turn.rsplit_once("\nObservation: ")?;
    Some(
        tail.rsplit_once("\nThought: ")
            .map_or(tail, |(obs, _)| obs)
            .to_string(),
    )
}

/// A model that behaves like a well-prompted assistant: it asks the
/// document tool once, then repeats its observation as the final answer.
#[derive(Default)]
pub struct RoutingModel {
    prompts: Mutex<Vec<String>>,
}

impl RoutingModel {
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for RoutingModel {
    fn model_name(&self) -> &str {
        "routing-test"
    }

    async fn complete(&self, prompt: &str, _stop: &[String]) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        if prompt.ends_with("Helpful answer:") {
            return Ok(answer_from_context(prompt));
        }

        match last_observation(prompt) {
            None => {
                let question = between(agent_turn(prompt), "Question: ", "\n").unwrap_or_default();
                Ok(format!(
                    " I should look this up in the documents.\nAction: {DOCUMENT_QA_TOOL}\nAction Input: {question}"
                ))
            }
            Some(observation) => Ok(format!(
                " I now know the final answer.\nFinal Answer: {observation}"
            )),
        }
    }
}

/// A [`RoutingModel`] that takes `delay` over every agent turn.
pub struct SlowModel {
    inner: RoutingModel,
    delay: Duration,
}

impl SlowModel {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: RoutingModel::default(),
            delay,
        }
    }
}

#[async_trait]
impl LanguageModel for SlowModel {
    fn model_name(&self) -> &str {
        "slow-test"
    }

    async fn complete(&self, prompt: &str, stop: &[String]) -> Result<String, LlmError> {
        if !prompt.ends_with("Helpful answer:") {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.complete(prompt, stop).await
    }
}

/// Replies to agent prompts from a fixed script, in order. Retrieval
/// prompts are answered from context and do not consume the script.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted-test"
    }

    async fn complete(&self, prompt: &str, _stop: &[String]) -> Result<String, LlmError> {
        if prompt.ends_with("Helpful answer:") {
            return Ok(answer_from_context(prompt));
        }
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Response {
                provider: "scripted".to_string(),
                message: "script exhausted".to_string(),
            })
    }
}
