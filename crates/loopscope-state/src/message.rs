use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// A tool invocation requested by an assistant message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    #[serde(rename = "type", default = "default_tool_call_type")]
    pub kind: String,
    pub function: FunctionCall,
}

fn default_tool_call_type() -> String {
    "function".to_string()
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: default_tool_call_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Parses the raw JSON argument string. An empty string parses as `{}`.
    pub fn parsed_arguments(&self) -> Result<Value, serde_json::Error> {
        if self.function.arguments.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_str(&self.function.arguments)
    }
}

/// One conversation entry in OpenAI chat format.
///
/// Provider-specific fields that are not modelled here (refusal, audio, ...)
/// are kept in `extra` and written back unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Always written, as `null` when absent, like chat-completion payloads.
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    fn with_role(role: Role, content: Option<Value>) -> Self {
        Self {
            role,
            content,
            name: None,
            tool_calls: None,
            tool_call_id: None,
            extra: Map::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, Some(Value::String(content.into())))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, Some(Value::String(content.into())))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, Some(Value::String(content.into())))
    }

    pub fn assistant_with_tool_calls(
        content: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        let mut message = Self::with_role(Role::Assistant, content.map(Value::String));
        message.tool_calls = Some(tool_calls);
        message
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut message = Self::with_role(Role::Tool, Some(Value::String(content.into())));
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    pub fn tool_call_requests(&self) -> &[ToolCallRequest] {
        self.tool_calls.as_deref().unwrap_or_default()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_call_requests().is_empty()
    }

    /// Text content, when the content is a plain string.
    pub fn text(&self) -> Option<&str> {
        self.content.as_ref().and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_message_null_tool_calls_expected_no_requests() {
        let message: Message = serde_json::from_value(json!({
            "role": "assistant",
            "content": "hi",
            "tool_calls": null,
            "refusal": null
        }))
        .expect("message should deserialize");

        assert!(!message.has_tool_calls());
        assert_eq!(message.text(), Some("hi"));
        assert!(message.extra.contains_key("refusal"));
    }

    #[test]
    fn tool_call_request_openai_shape_expected_fields_preserved() {
        let message: Message = serde_json::from_value(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "tc_1",
                "type": "function",
                "function": {"name": "call_support_agent", "arguments": "{\"query\":\"late order\"}"}
            }]
        }))
        .expect("message should deserialize");

        let calls = message.tool_call_requests();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name(), "call_support_agent");
        assert_eq!(
            calls[0].parsed_arguments().expect("arguments should parse")["query"],
            "late order"
        );

        let encoded = serde_json::to_value(&message).expect("message should serialize");
        assert_eq!(encoded["tool_calls"][0]["type"], "function");
        assert!(encoded.get("tool_call_id").is_none());
    }

    #[test]
    fn null_content_expected_written_back_as_null() {
        let message: Message = serde_json::from_value(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "tc_1",
                "type": "function",
                "function": {"name": "call_support_agent", "arguments": "{}"}
            }]
        }))
        .expect("message should deserialize");

        let encoded = serde_json::to_value(&message).expect("message should serialize");
        assert_eq!(encoded.get("content"), Some(&Value::Null));
        assert!(encoded.get("name").is_none());
    }

    #[test]
    fn tool_result_constructor_expected_tool_role_and_call_id() {
        let message = Message::tool_result("tc_9", "done");
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("tc_9"));
        assert_eq!(message.text(), Some("done"));
    }

    #[test]
    fn empty_arguments_expected_empty_object() {
        let call = ToolCallRequest::new("tc", "noop", "");
        assert_eq!(
            call.parsed_arguments().expect("empty arguments should parse"),
            json!({})
        );
    }
}
