//! Prompt-editing assistant that suggests edits to a flagged agent state.

use crate::{FunctionError, Session};
use async_trait::async_trait;
use loopscope_state::{Message, State, ToolCallRequest, ToolDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub const CANVAS_SYSTEM_PROMPT: &str = "You are an AI assistant specialized in analyzing and debugging LLM agent outputs. Your purpose is to identify issues in agent reasoning and suggest improvements to prevent similar problems.

Input:
<agent-reasoning>
{reasoning}
</agent-reasoning>
<flagged>
{flagged}
</flagged>

Task:

Analyze the root cause of the issue described by the user given the flagged part of the reasoning.
If possible, edit the instructions of the Agent. The goal is to change the instructions (root cause) to avoid the issue in a future run.
Given those modifications, replaying the state should lead to the correct result.
";

pub const UPDATE_SYSTEM_PROMPT: &str = "update_system_prompt";
pub const UPDATE_TOOL_DEFINITION: &str = "update_tool_definition";
const DEFAULT_MAX_TURNS: usize = 16;

/// One observer message to the canvas assistant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanvasRequest {
    pub chat_id: String,
    /// The flagged part of the reasoning.
    #[serde(default)]
    pub context: String,
    pub message: String,
    /// The agent reasoning being debugged, rendered as text.
    #[serde(default)]
    pub state: String,
}

/// Chat-completion backend used by the canvas assistant.
#[async_trait]
pub trait CanvasModel: Send + Sync {
    /// Next assistant message for `state.messages`, offered `state.tools`.
    async fn complete(&self, state: &State) -> Result<Message, FunctionError>;
}

#[derive(Deserialize)]
struct EditArguments {
    old_str: String,
    new_str: String,
}

pub struct CanvasAgent {
    model: Arc<dyn CanvasModel>,
    max_turns: usize,
}

impl CanvasAgent {
    pub fn new(model: Arc<dyn CanvasModel>) -> Self {
        Self {
            model,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    pub fn tool_descriptors() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::with_string_params(
                UPDATE_SYSTEM_PROMPT,
                "Update the system message in the agent reasoning `messages` field.",
                &["old_str", "new_str"],
            ),
            ToolDescriptor::with_string_params(
                UPDATE_TOOL_DEFINITION,
                "Update a tool call definition in the agent reasoning `tools` field. You cannot edit tool names.",
                &["old_str", "new_str"],
            ),
        ]
    }

    pub fn system_prompt(reasoning: &str, flagged: &str) -> String {
        CANVAS_SYSTEM_PROMPT
            .replace("{reasoning}", reasoning)
            .replace("{flagged}", flagged)
    }

    /// Answers one request. Progress and the outcome are pushed to the
    /// session as `canvas_agent_start` / `state_edit` / `canvas_agent_end`;
    /// the chat is kept on the session for follow-ups.
    pub async fn handle(&self, session: &Session, request: CanvasRequest) {
        let chat = match session.take_chat(&request.chat_id) {
            Some(mut chat) => {
                chat.append_message(Message::user(format!(
                    "<revised-reasoning>\n{}\n</revised-reasoning>\n\n{}",
                    request.state, request.message
                )));
                chat
            }
            None => State::with_messages(vec![
                Message::system(Self::system_prompt(&request.state, &request.context)),
                Message::user(request.message.clone()),
            ])
            .tools(Self::tool_descriptors()),
        };

        if let Err(error) = session.canvas_agent_start() {
            tracing::warn!(%error, "failed to push canvas_agent_start");
        }

        let (chat, outcome) = self.run(session, chat).await;
        let last = chat.last_message().cloned();
        session.set_chat(&request.chat_id, chat);

        let pushed = match outcome {
            Ok(()) => session.canvas_agent_end(last.as_ref(), None),
            Err(error) => {
                tracing::error!(chat_id = %request.chat_id, %error, "failed to run canvas agent");
                session.canvas_agent_end::<Value>(None, Some(error.to_string()))
            }
        };
        if let Err(error) = pushed {
            tracing::warn!(%error, "failed to push canvas_agent_end");
        }
    }

    async fn run(&self, session: &Session, mut chat: State) -> (State, Result<(), FunctionError>) {
        for _ in 0..self.max_turns {
            let reply = match self.model.complete(&chat).await {
                Ok(reply) => reply,
                Err(error) => return (chat, Err(error)),
            };
            let tool_calls = reply.tool_call_requests().to_vec();
            chat.append_message(reply);
            if tool_calls.is_empty() {
                return (chat, Ok(()));
            }
            for tool_call in &tool_calls {
                match apply_edit(session, tool_call) {
                    Ok(Some(result)) => {
                        chat.append_message(Message::tool_result(tool_call.id.clone(), result))
                    }
                    Ok(None) => {
                        tracing::debug!(tool = %tool_call.name(), "ignoring unknown canvas tool");
                    }
                    Err(error) => return (chat, Err(error)),
                }
            }
        }
        (
            chat,
            Err(format!("canvas agent did not settle within {} turns", self.max_turns).into()),
        )
    }
}

fn apply_edit(session: &Session, tool_call: &ToolCallRequest) -> Result<Option<&'static str>, FunctionError> {
    let result = match tool_call.name() {
        UPDATE_SYSTEM_PROMPT => "System prompt update suggested!",
        UPDATE_TOOL_DEFINITION => "Tool definition update suggested!",
        _ => return Ok(None),
    };
    let arguments: EditArguments = serde_json::from_str(&tool_call.function.arguments)?;
    if let Err(error) = session.send_state_edit(&arguments.old_str, &arguments.new_str) {
        tracing::warn!(%error, "failed to push state_edit");
    }
    Ok(Some(result))
}
