//! ReAct prompt rendering.

use crate::models::{ChatMessage, Role};
use crate::tools::ToolRegistry;

use super::AgentAction;

const PREAMBLE: &str = "You are a helpful financial assistant. Your goal is to answer the user's question.";

const FORMAT_INSTRUCTIONS: &str = "\
To answer the question, you MUST use the following format. Do NOT deviate from this format.

Question: The user's question you must answer
Thought: You should always think about what to do.
Action: The action to take, should be one of [{tool_names}]
Action Input: The input to the action
Observation: The result of the action
... (this Thought/Action/Action Input/Observation sequence can repeat N times)
Thought: I now have enough information to answer the user's question.
Final Answer: The final answer to the original user question.

IMPORTANT:
- Only use the tools provided.
- If you have the final answer, provide it IMMEDIATELY after \"Final Answer:\". Do not add any extra conversation.";

/// Render the full prompt for one agent step.
pub fn render_react_prompt(
    tools: &ToolRegistry,
    history: &[ChatMessage],
    question: &str,
    steps: &[AgentAction],
) -> String {
    let tool_list = tools
        .tools()
        .iter()
        .map(|t| format!("{}: {}", t.name(), t.description()))
        .collect::<Vec<_>>()
        .join("\n");
    let tool_names = tools.names().join(", ");

    let mut prompt = String::new();
    prompt.push_str(PREAMBLE);
    prompt.push_str("\n\nYou have access to the following tools:\n");
    prompt.push_str(&tool_list);
    prompt.push_str("\n\n");
    prompt.push_str(&FORMAT_INSTRUCTIONS.replace("{tool_names}", &tool_names));

    if !history.is_empty() {
        prompt.push_str("\n\nPrevious conversation:\n");
        for message in history {
            let speaker = match message.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            prompt.push_str(&format!("{speaker}: {}\n", message.content));
        }
    }

    prompt.push_str("\n\nBegin!\n\nQuestion: ");
    prompt.push_str(question);
    prompt.push_str("\nThought:");
    prompt.push_str(&render_scratchpad(steps));
    prompt
}

/// Replay previous steps so the model continues after the last observation.
pub fn render_scratchpad(steps: &[AgentAction]) -> String {
    let mut pad = String::new();
    for step in steps {
        pad.push_str(&step.log);
        pad.push_str("\nObservation: ");
        pad.push_str(&step.observation);
        pad.push_str("\nThought: ");
    }
    pad
}
