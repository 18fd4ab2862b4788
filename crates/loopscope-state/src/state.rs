use crate::{Message, StateError, ToolDescriptor, normalize, normalize_value};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type Timestamp = String;

/// Call metadata stamped onto a state by the instrumentation layer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMetadata {
    pub func_name: Option<String>,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub duration_ms: Option<f64>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

/// Versioned conversation state passed into and returned from stateful functions.
///
/// `Clone` is a deep copy and keeps the id; use [`State::regenerate_id`] to
/// fork a new logical state. Fields not modelled here are kept in `extra`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default = "new_state_id")]
    pub id: String,
    #[serde(default)]
    pub metadata: Option<StateMetadata>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Option<Vec<ToolDescriptor>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn new_state_id() -> String {
    Uuid::new_v4().to_string()
}

impl Default for State {
    fn default() -> Self {
        Self {
            id: new_state_id(),
            metadata: None,
            messages: Vec::new(),
            tools: None,
            extra: Map::new(),
        }
    }
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Builds a state from an observer-supplied JSON object. A missing `id`
    /// gets a fresh one.
    pub fn from_value(value: Value) -> Result<Self, StateError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Plain-JSON rendering used on the wire.
    pub fn to_value(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(value) => normalize_value(&value),
            Err(_) => normalize(self),
        }
    }

    pub fn append_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn regenerate_id(&mut self) -> &str {
        self.id = new_state_id();
        &self.id
    }

    pub fn metadata_mut(&mut self) -> &mut StateMetadata {
        self.metadata.get_or_insert_with(StateMetadata::default)
    }

    /// Most recent assistant message that requests tool calls.
    pub fn last_tool_call_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|message| {
            message.role == crate::Role::Assistant && message.has_tool_calls()
        })
    }
}
