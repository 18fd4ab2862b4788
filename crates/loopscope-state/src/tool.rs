use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A tool the model may call: name, description and JSON-schema parameters.
///
/// Serializes in the OpenAI `{"type":"function","function":{...}}` shape and
/// deserializes from that shape, the flat `{name, description, parameters}`
/// shape, or the Anthropic `input_schema` shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "ToolDescriptorRepr", into = "OpenAiToolSchema")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            parameters,
        }
    }

    /// Builds a descriptor with an object schema where every listed property is
    /// a required string.
    pub fn with_string_params(
        name: impl Into<String>,
        description: impl Into<String>,
        params: &[&str],
    ) -> Self {
        let properties: serde_json::Map<String, Value> = params
            .iter()
            .map(|param| {
                (
                    param.to_string(),
                    json!({"title": title_case(param), "type": "string"}),
                )
            })
            .collect();
        let name = name.into();
        let parameters = json!({
            "title": format!("{name}_params"),
            "type": "object",
            "properties": properties,
            "required": params,
        });
        Self::new(name, description, parameters)
    }

    pub fn openai_schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }

    pub fn anthropic_schema(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.parameters,
        })
    }
}

fn title_case(param: &str) -> String {
    param
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct FlatTool {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, alias = "input_schema")]
    parameters: Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ToolDescriptorRepr {
    Wrapped { function: FlatTool },
    Flat(FlatTool),
}

#[derive(Serialize)]
struct OpenAiToolSchema {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FlatTool,
}

impl From<ToolDescriptorRepr> for ToolDescriptor {
    fn from(repr: ToolDescriptorRepr) -> Self {
        let flat = match repr {
            ToolDescriptorRepr::Wrapped { function } => function,
            ToolDescriptorRepr::Flat(flat) => flat,
        };
        Self {
            name: flat.name,
            description: flat.description,
            parameters: flat.parameters,
        }
    }
}

impl From<ToolDescriptor> for OpenAiToolSchema {
    fn from(tool: ToolDescriptor) -> Self {
        Self {
            kind: "function",
            function: FlatTool {
                name: tool.name,
                description: tool.description,
                parameters: tool.parameters,
            },
        }
    }
}
