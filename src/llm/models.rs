use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool the model may call, described with a JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Provider-assigned call id, echoed back with the function response.
    pub id: Option<String>,
    pub name: String,
    pub args: Value,
}

/// The first part of a model reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelPart {
    Text { text: String },
    FunctionCall(FunctionCall),
    Empty,
}

impl ModelPart {
    pub fn text(text: impl Into<String>) -> Self {
        ModelPart::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ModelPart::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// One entry of a provider-neutral chat transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ChatMessage {
    User { text: String },
    Model { part: ModelPart },
    FunctionResponse {
        call_id: Option<String>,
        name: String,
        response: Value,
    },
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        ChatMessage::User { text: text.into() }
    }
}
