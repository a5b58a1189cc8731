//! Parser for ReAct-formatted model output.
//!
//! A model turn is expected to look like one of:
//!
//! ```text
//!  I should look this up in the filings.
//! Action: Financial_Document_QA
//! Action Input: What was the revenue in 2023?
//! ```
//!
//! ```text
//!  I now know the final answer.
//! Final Answer: Revenue was $10 million.
//! ```
//!
//! Labels are case-insensitive and may carry a step number (`Action 2:`).
//! Output that contains both a complete action and a final answer, an action
//! without an input, or neither, is a [`ParseError`].

use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// What the model asked for this step.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentStep {
    ToolCall {
        thought: String,
        tool: String,
        input: String,
    },
    FinalAnswer {
        thought: String,
        answer: String,
    },
    ParseFailure {
        raw: String,
        reason: ParseError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Invalid Format: Missing 'Action:' after 'Thought:'")]
    MissingAction,

    #[error("Invalid Format: Missing 'Action Input:' after 'Action:'")]
    MissingActionInput,

    #[error("Invalid Format: output contains both an 'Action:' and a 'Final Answer:'")]
    ActionAndFinalAnswer,
}

pub struct StepParser {
    action: Regex,
    action_only: Regex,
    final_answer: Regex,
}

impl StepParser {
    pub fn new() -> Result<Self, regex::Error> {
        let build = |pattern: &str| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .dot_matches_new_line(true)
                .build()
        };

        Ok(Self {
            action: build(r"Action\s*\d*\s*:[\s]*(.*?)[\s]*Action\s*\d*\s*Input\s*\d*\s*:[\s]*(.*)")?,
            action_only: build(r"Action\s*\d*\s*:[\s]*\S")?,
            final_answer: build(r"Final\s+Answer\s*:")?,
        })
    }

    /// Classify one model turn. Never fails; malformed output becomes
    /// [`AgentStep::ParseFailure`].
    pub fn parse(&self, text: &str) -> AgentStep {
        match self.try_parse(text) {
            Ok(step) => step,
            Err(reason) => AgentStep::ParseFailure {
                raw: text.to_string(),
                reason,
            },
        }
    }

    fn try_parse(&self, text: &str) -> Result<AgentStep, ParseError> {
        let final_at = self.final_answer.find_iter(text).last();

        if let Some(caps) = self.action.captures(text) {
            if final_at.is_some() {
                return Err(ParseError::ActionAndFinalAnswer);
            }
            let (Some(whole), Some(tool), Some(input)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                return Err(ParseError::MissingAction);
            };
            let tool = tool.as_str().trim();
            if tool.is_empty() {
                return Err(ParseError::MissingAction);
            }
            return Ok(AgentStep::ToolCall {
                thought: clean_thought(&text[..whole.start()]),
                tool: tool.to_string(),
                input: clean_input(input.as_str()),
            });
        }

        if let Some(m) = final_at {
            return Ok(AgentStep::FinalAnswer {
                thought: clean_thought(&text[..m.start()]),
                answer: text[m.end()..].trim().to_string(),
            });
        }

        if self.action_only.is_match(text) {
            Err(ParseError::MissingActionInput)
        } else {
            Err(ParseError::MissingAction)
        }
    }
}

fn clean_thought(text: &str) -> String {
    let text = text.trim();
    let text = text
        .strip_prefix("Thought:")
        .or_else(|| text.strip_prefix("thought:"))
        .unwrap_or(text);
    text.trim().to_string()
}

/// Trim, cut at a hallucinated observation, and drop one pair of quotes.
fn clean_input(text: &str) -> String {
    let text = match text.find("\nObservation") {
        Some(i) => &text[..i],
        None => text,
    };
    let text = text.trim();
    for quote in ['"', '\'', '`'] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return text[1..text.len() - 1].to_string();
        }
    }
    text.to_string()
}
