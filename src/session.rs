//! Per-user chat sessions.
//!
//! A [`Session`] owns the vector index for its current file set, the agent
//! built around that index, and the conversation history. Uploading a new
//! file set builds a fresh index in the background of the caller's request
//! and swaps it in atomically; the old index keeps serving until the swap,
//! and stays in place if the build fails.
//!
//! [`SessionManager`] keeps independent sessions keyed by id so concurrent
//! users never see each other's documents or history.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::agent::{AgentAction, AgentOutcome, ReactAgent};
use crate::config::Config;
use crate::embedding::{create_embedder, embed_query, Embedder, EmbeddingError};
use crate::index::VectorIndex;
use crate::ingest::{
    build_index, check_document_names, IngestError, IngestOptions, SessionKey, KEY_SEPARATOR,
};
use crate::llm::{create_model, LanguageModel};
use crate::models::{ChatMessage, Document};
use crate::tools::ToolRegistry;

/// Shown instead of running the agent when no documents are loaded.
pub const UPLOAD_PROMPT: &str = "Please upload your financial documents to begin.";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Setup(#[from] anyhow::Error),
}

/// The external models a session talks to.
#[derive(Clone)]
pub struct Backends {
    pub embedder: Arc<dyn Embedder>,
    pub model: Arc<dyn LanguageModel>,
}

impl Backends {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            embedder: create_embedder(&config.embedding)?,
            model: create_model(&config.llm)?,
        })
    }
}

/// Result of [`Session::set_documents`] or [`Session::load_index`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexStatus {
    /// Same file set as before; nothing was rebuilt.
    Unchanged,
    Rebuilt { chunks: usize },
    Loaded { chunks: usize },
    /// Documents removed; the session is back to its initial state.
    Cleared,
}

impl IndexStatus {
    pub fn label(&self) -> &'static str {
        match self {
            IndexStatus::Unchanged => "unchanged",
            IndexStatus::Rebuilt { .. } => "rebuilt",
            IndexStatus::Loaded { .. } => "loaded",
            IndexStatus::Cleared => "cleared",
        }
    }
}

/// Ordered chat turns. Append-only until cleared.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyOutcome {
    NoDocuments,
    Finished,
    MaxIterationsExceeded,
    Error,
}

/// One assistant turn as shown to the user.
#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
    pub outcome: ReplyOutcome,
    pub steps: Vec<AgentAction>,
}

/// Index, agent, and key for the current file set. Replaced as a unit.
struct ActiveSet {
    key: SessionKey,
    index: Arc<VectorIndex>,
    agent: ReactAgent,
}

pub struct Session {
    config: Arc<Config>,
    backends: Backends,
    active: RwLock<Option<Arc<ActiveSet>>>,
    conversation: Mutex<Conversation>,
}

impl Session {
    pub fn new(config: Arc<Config>, backends: Backends) -> Self {
        Self {
            config,
            backends,
            active: RwLock::new(None),
            conversation: Mutex::new(Conversation::default()),
        }
    }

    /// Replace the session's documents.
    ///
    /// An unchanged file set is a no-op. On failure the previous index and
    /// history are left untouched.
    pub async fn set_documents(&self, files: Vec<Document>) -> Result<IndexStatus, SessionError> {
        if files.is_empty() {
            self.clear().await;
            return Ok(IndexStatus::Cleared);
        }

        check_document_names(&files)?;
        let key = SessionKey::from_documents(&files);
        if self.current_key().await.as_ref() == Some(&key) {
            tracing::debug!(session_key = %key, "file set unchanged, keeping index");
            return Ok(IndexStatus::Unchanged);
        }

        let opts = IngestOptions::from_config(&self.config);
        let index = build_index(&files, &opts, self.backends.embedder.as_ref()).await?;
        let chunks = index.len();
        self.activate(key, index).await?;
        Ok(IndexStatus::Rebuilt { chunks })
    }

    /// Serve a pre-built index instead of building one from uploads.
    ///
    /// The live embedder must produce vectors of the index's width, otherwise
    /// every similarity would score zero.
    pub async fn load_index(&self, index: VectorIndex) -> Result<IndexStatus, SessionError> {
        if index.meta().model != self.backends.embedder.model_name() {
            tracing::warn!(
                index_model = %index.meta().model,
                embedder = self.backends.embedder.model_name(),
                "index was built with a different embedding model"
            );
        }
        if !index.is_empty() {
            let sample = embed_query(self.backends.embedder.as_ref(), "dimension check")
                .await
                .map_err(IngestError::from)?;
            if sample.len() != index.meta().dims {
                return Err(IngestError::Embedding(EmbeddingError::Dimension {
                    expected: index.meta().dims,
                    actual: sample.len(),
                })
                .into());
            }
        }

        let key = SessionKey::from_names(index.session_key().split(KEY_SEPARATOR));
        let chunks = index.len();
        self.activate(key, index).await?;
        Ok(IndexStatus::Loaded { chunks })
    }

    async fn activate(&self, key: SessionKey, index: VectorIndex) -> Result<(), SessionError> {
        let index = Arc::new(index);
        let tools = ToolRegistry::standard(
            &self.config,
            Arc::clone(&index),
            Arc::clone(&self.backends.embedder),
            Arc::clone(&self.backends.model),
        )?;
        let agent = ReactAgent::new(Arc::clone(&self.backends.model), tools, &self.config.agent)?;
        let set = Arc::new(ActiveSet { key, index, agent });

        let mut conversation = self.conversation.lock().await;
        *self.active.write().await = Some(set);
        conversation.clear();
        Ok(())
    }

    /// Answer one question, recording both turns in the history.
    ///
    /// The conversation lock is taken before the active set is read, the same
    /// order [`Session::set_documents`] swaps in, so a turn is always answered
    /// by the documents its history belongs to.
    pub async fn ask(&self, question: &str) -> Reply {
        let mut conversation = self.conversation.lock().await;
        let Some(active) = self.active.read().await.clone() else {
            return Reply {
                text: UPLOAD_PROMPT.to_string(),
                outcome: ReplyOutcome::NoDocuments,
                steps: Vec::new(),
            };
        };

        let history = conversation.messages().to_vec();
        conversation.push(ChatMessage::user(question));

        let reply = match active.agent.run(question, &history).await {
            Ok(outcome) => {
                let outcome_kind = match outcome {
                    AgentOutcome::Finished { .. } => ReplyOutcome::Finished,
                    AgentOutcome::MaxIterationsExceeded { .. } => {
                        ReplyOutcome::MaxIterationsExceeded
                    }
                };
                Reply {
                    text: outcome.reply_text(),
                    outcome: outcome_kind,
                    steps: outcome.steps().to_vec(),
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "agent run failed");
                Reply {
                    text: format!("An error occurred: {e}"),
                    outcome: ReplyOutcome::Error,
                    steps: Vec::new(),
                }
            }
        };

        conversation.push(ChatMessage::assistant(reply.text.clone()));
        reply
    }

    pub async fn history(&self) -> Vec<ChatMessage> {
        self.conversation.lock().await.messages().to_vec()
    }

    /// Drop the index and the conversation.
    pub async fn clear(&self) {
        let mut conversation = self.conversation.lock().await;
        *self.active.write().await = None;
        conversation.clear();
    }

    pub async fn current_key(&self) -> Option<SessionKey> {
        self.active.read().await.as_ref().map(|a| a.key.clone())
    }

    pub async fn index(&self) -> Option<Arc<VectorIndex>> {
        self.active.read().await.as_ref().map(|a| Arc::clone(&a.index))
    }

    /// Names and descriptions of the tools the agent can use, if an index
    /// is loaded.
    pub async fn tool_descriptions(&self) -> Vec<(String, String)> {
        match self.active.read().await.as_ref() {
            Some(active) => active
                .agent
                .tools()
                .tools()
                .iter()
                .map(|t| (t.name().to_string(), t.description().to_string()))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Independent sessions keyed by id.
pub struct SessionManager {
    config: Arc<Config>,
    backends: Backends,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(config: Arc<Config>, backends: Backends) -> Self {
        Self {
            config,
            backends,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session under a fresh random id.
    pub async fn create(&self) -> (String, Arc<Session>) {
        let id = uuid::Uuid::new_v4().to_string();
        let session = self.get_or_create(&id).await;
        (id, session)
    }

    pub async fn get_or_create(&self, id: &str) -> Arc<Session> {
        if let Some(session) = self.sessions.read().await.get(id) {
            return Arc::clone(session);
        }
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(id.to_string()).or_insert_with(|| {
            tracing::info!(session = id, "created session");
            Arc::new(Session::new(Arc::clone(&self.config), self.backends.clone()))
        });
        Arc::clone(session)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledEmbedder;
    use crate::llm::DisabledModel;

    fn backends() -> Backends {
        Backends {
            embedder: Arc::new(DisabledEmbedder),
            model: Arc::new(DisabledModel),
        }
    }

    #[tokio::test]
    async fn ask_without_documents_prompts_for_upload() {
        let session = Session::new(Arc::new(Config::minimal()), backends());
        let reply = session.ask("What was the revenue?").await;
        assert_eq!(reply.text, UPLOAD_PROMPT);
        assert_eq!(reply.outcome, ReplyOutcome::NoDocuments);
        assert!(session.history().await.is_empty());
    }

    #[tokio::test]
    async fn empty_upload_clears() {
        let session = Session::new(Arc::new(Config::minimal()), backends());
        let status = session.set_documents(Vec::new()).await.unwrap();
        assert_eq!(status, IndexStatus::Cleared);
        assert!(session.current_key().await.is_none());
    }

    #[tokio::test]
    async fn failed_build_leaves_session_empty() {
        let session = Session::new(Arc::new(Config::minimal()), backends());
        let err = session
            .set_documents(vec![Document::new("x.pdf", b"not a pdf".to_vec())])
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Ingest(IngestError::Load(_))));
        assert!(session.index().await.is_none());
    }

    #[tokio::test]
    async fn manager_isolates_sessions() {
        let manager = SessionManager::new(Arc::new(Config::minimal()), backends());
        let a = manager.get_or_create("a").await;
        let again = manager.get_or_create("a").await;
        assert!(Arc::ptr_eq(&a, &again));

        let (id, _) = manager.create().await;
        assert_ne!(id, "a");
        assert_eq!(manager.len().await, 2);

        assert!(manager.remove("a").await);
        assert!(!manager.remove("a").await);
        assert!(manager.get("a").await.is_none());
        assert_eq!(manager.len().await, 1);
    }

    #[test]
    fn conversation_is_append_only_until_cleared() {
        let mut c = Conversation::default();
        c.push(ChatMessage::user("q"));
        c.push(ChatMessage::assistant("a"));
        assert_eq!(c.len(), 2);
        assert_eq!(c.messages()[0], ChatMessage::user("q"));
        c.clear();
        assert!(c.is_empty());
    }
}
