//! ReAct agent loop.
//!
//! The agent alternates between asking the language model what to do next
//! and running the tool it picks, feeding each result back as an
//! `Observation:` until the model produces a `Final Answer:`.
//!
//! # Loop
//!
//! ```text
//!   render prompt (tools, history, question, scratchpad)
//!        │
//!        ▼
//!   model.complete(stop = "\nObservation:")
//!        │
//!        ▼
//!   StepParser::parse ──► FinalAnswer ──► Finished
//!        │
//!        ├─► ToolCall ──► registry lookup ──► invoke (timeout) ──► observation
//!        │                      └─ unknown name ──► invalid-tool observation
//!        │
//!        └─► ParseFailure ──► corrective observation
//! ```
//!
//! Tool errors, unknown tools, and malformed output are all recovered
//! inside the loop as observations. Only a failing language model aborts a
//! run. The loop is bounded by `agent.max_iterations` and, optionally, a
//! wall-clock budget; hitting either yields
//! [`AgentOutcome::MaxIterationsExceeded`].

pub mod parser;
pub mod prompt;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::config::AgentConfig;
use crate::llm::{LanguageModel, LlmError};
use crate::models::ChatMessage;
use crate::tools::{ToolError, ToolRegistry};

pub use parser::{AgentStep, ParseError, StepParser};

/// Stop sequence that ends a model turn before it invents an observation.
pub const OBSERVATION_STOP: &str = "\nObservation:";

/// Shown to the user when the loop gives up.
pub const STOPPED_MESSAGE: &str = "Agent stopped due to iteration limit or time limit.";

/// Tool name recorded for scratchpad entries that came from unparsable output.
pub const INVALID_FORMAT: &str = "invalid_format";

/// Observation for a tool name that is not registered.
pub fn invalid_tool_observation(name: &str, available: &[&str]) -> String {
    format!(
        "{} is not a valid tool, try one of [{}].",
        name,
        available.join(", ")
    )
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("language model failed: {0}")]
    Model(#[from] LlmError),
}

/// One completed step of the scratchpad.
#[derive(Debug, Clone, Serialize)]
pub struct AgentAction {
    pub thought: String,
    /// Tool the model called, or [`INVALID_FORMAT`] for a parse failure.
    pub tool: String,
    pub input: String,
    /// Raw model output for this step, replayed verbatim in later prompts.
    pub log: String,
    pub observation: String,
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum AgentOutcome {
    Finished {
        answer: String,
        steps: Vec<AgentAction>,
    },
    MaxIterationsExceeded {
        steps: Vec<AgentAction>,
        /// Last thought or observation, if any step ran.
        partial: Option<String>,
    },
}

impl AgentOutcome {
    pub fn steps(&self) -> &[AgentAction] {
        match self {
            AgentOutcome::Finished { steps, .. } => steps,
            AgentOutcome::MaxIterationsExceeded { steps, .. } => steps,
        }
    }

    /// The text a user sees for this outcome.
    pub fn reply_text(&self) -> String {
        match self {
            AgentOutcome::Finished { answer, .. } => answer.clone(),
            AgentOutcome::MaxIterationsExceeded { partial: None, .. } => {
                STOPPED_MESSAGE.to_string()
            }
            AgentOutcome::MaxIterationsExceeded {
                partial: Some(partial),
                ..
            } => format!("{STOPPED_MESSAGE}\nLast progress: {partial}"),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AgentOutcome::Finished { .. } => "finished",
            AgentOutcome::MaxIterationsExceeded { .. } => "max_iterations_exceeded",
        }
    }
}

pub struct ReactAgent {
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    parser: StepParser,
    max_iterations: usize,
    tool_timeout: Duration,
    max_execution: Option<Duration>,
}

impl ReactAgent {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        tools: ToolRegistry,
        config: &AgentConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            model,
            tools,
            parser: StepParser::new()?,
            max_iterations: config.max_iterations,
            tool_timeout: Duration::from_secs(config.tool_timeout_secs),
            max_execution: config.max_execution_secs.map(Duration::from_secs),
        })
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Answer `question` in the context of `history`.
    pub async fn run(
        &self,
        question: &str,
        history: &[ChatMessage],
    ) -> Result<AgentOutcome, AgentError> {
        let deadline = self.max_execution.map(|d| Instant::now() + d);
        let stop = vec![OBSERVATION_STOP.to_string()];
        let mut steps: Vec<AgentAction> = Vec::new();

        for iteration in 0..self.max_iterations {
            let prompt = prompt::render_react_prompt(&self.tools, history, question, &steps);

            let output = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match tokio::time::timeout(remaining, self.model.complete(&prompt, &stop)).await
                    {
                        Ok(result) => result?,
                        Err(_) => {
                            tracing::warn!(iteration, "agent time budget exhausted");
                            break;
                        }
                    }
                }
                None => self.model.complete(&prompt, &stop).await?,
            };

            match self.parser.parse(&output) {
                AgentStep::FinalAnswer { thought, answer } => {
                    tracing::debug!(iteration, %thought, "final answer");
                    return Ok(AgentOutcome::Finished { answer, steps });
                }
                AgentStep::ToolCall {
                    thought,
                    tool,
                    input,
                } => {
                    tracing::debug!(iteration, %thought, %tool, %input, "tool call");
                    let observation = self.call_tool(&tool, &input).await;
                    tracing::debug!(iteration, %observation, "observation");
                    steps.push(AgentAction {
                        thought,
                        tool,
                        input,
                        log: output,
                        observation,
                    });
                }
                AgentStep::ParseFailure { raw, reason } => {
                    tracing::debug!(iteration, %reason, "unparsable model output");
                    steps.push(AgentAction {
                        thought: String::new(),
                        tool: INVALID_FORMAT.to_string(),
                        input: String::new(),
                        log: raw,
                        observation: corrective_observation(&reason),
                    });
                }
            }
        }

        let partial = steps.last().map(|s| {
            if s.thought.is_empty() {
                s.observation.clone()
            } else {
                s.thought.clone()
            }
        });
        tracing::info!(steps = steps.len(), "agent stopped before a final answer");
        Ok(AgentOutcome::MaxIterationsExceeded { steps, partial })
    }

    async fn call_tool(&self, name: &str, input: &str) -> String {
        let Some(tool) = self.tools.find(name) else {
            tracing::warn!(tool = name, "model requested unknown tool");
            return invalid_tool_observation(name, &self.tools.names());
        };

        let result = match tokio::time::timeout(self.tool_timeout, tool.invoke(input)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool: name.to_string(),
                secs: self.tool_timeout.as_secs(),
            }),
        };

        match result {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "tool call failed");
                format!("Tool error: {e}")
            }
        }
    }
}

fn corrective_observation(reason: &ParseError) -> String {
    format!(
        "{reason}. Reply with a 'Thought:' followed by either an 'Action:' and \
         'Action Input:' pair, or a 'Final Answer:'."
    )
}
