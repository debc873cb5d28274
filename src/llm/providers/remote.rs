use crate::config::LlmConfig;
use crate::llm::models::{ChatMessage, FunctionCall, FunctionDeclaration, ModelPart};
use crate::llm::providers::send_json;
use crate::llm::{ChatBackend, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

const DEFAULT_CALL_ID: &str = "call_0";

/// OpenAI-compatible chat completions endpoint.
pub struct RemoteLlmProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec<'a>>,
    temperature: f32,
}

#[derive(Serialize, Debug, PartialEq)]
struct Message {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct ToolSpec<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a FunctionDeclaration,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct ToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: ToolFunction,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct ToolFunction {
    name: String,
    // JSON-encoded object
    #[serde(default)]
    arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

impl RemoteLlmProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config.api_url.clone().ok_or_else(|| {
            LlmError::ConfigError("API URL is required for remote LLM provider".to_string())
        })?;

        let api_key = config.api_key.clone().ok_or_else(|| {
            LlmError::ConfigError("API key is required for remote LLM provider".to_string())
        })?;

        let client = reqwest::Client::new();

        Ok(Self {
            client,
            api_url,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

fn to_messages(messages: &[ChatMessage]) -> Vec<Message> {
    messages
        .iter()
        .filter_map(|message| match message {
            ChatMessage::User { text } => Some(Message {
                role: "user",
                content: Some(text.clone()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            }),
            ChatMessage::Model { part: ModelPart::Text { text } } => Some(Message {
                role: "assistant",
                content: Some(text.clone()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            }),
            ChatMessage::Model { part: ModelPart::FunctionCall(call) } => Some(Message {
                role: "assistant",
                content: None,
                tool_calls: vec![ToolCall {
                    id: Some(call.id.clone().unwrap_or_else(|| DEFAULT_CALL_ID.to_string())),
                    kind: function_kind(),
                    function: ToolFunction {
                        name: call.name.clone(),
                        arguments: call.args.to_string(),
                    },
                }],
                tool_call_id: None,
            }),
            ChatMessage::Model { part: ModelPart::Empty } => None,
            ChatMessage::FunctionResponse { call_id, response, .. } => Some(Message {
                role: "tool",
                content: Some(response.to_string()),
                tool_calls: Vec::new(),
                tool_call_id: Some(call_id.clone().unwrap_or_else(|| DEFAULT_CALL_ID.to_string())),
            }),
        })
        .collect()
}

fn first_part(response: ChatResponse) -> Result<ModelPart, LlmError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::ResponseError("No choices in response".to_string()))?
        .message;

    if let Some(call) = message.tool_calls.into_iter().next() {
        let args = if call.function.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&call.function.arguments).map_err(|e| {
                LlmError::ResponseError(format!("Invalid tool call arguments: {}", e))
            })?
        };
        return Ok(ModelPart::FunctionCall(FunctionCall {
            id: call.id,
            name: call.function.name,
            args,
        }));
    }

    Ok(match message.content {
        Some(text) if !text.is_empty() => ModelPart::Text { text },
        _ => ModelPart::Empty,
    })
}

#[async_trait]
impl ChatBackend for RemoteLlmProvider {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[FunctionDeclaration],
    ) -> Result<ModelPart, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: to_messages(messages),
            tools: tools
                .iter()
                .map(|function| ToolSpec { kind: "function", function })
                .collect(),
            temperature: self.temperature,
        };

        info!("Sending request to remote LLM with model: {}", self.model);
        debug!("API URL: {}", self.api_url);

        let response: ChatResponse = send_json(
            self.client
                .post(&self.api_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request),
            "Remote LLM",
        )
        .await?;

        first_part(response)
    }
}
