use crate::config::LlmConfig;
use crate::llm::models::{ChatMessage, FunctionCall, FunctionDeclaration, ModelPart};
use crate::llm::providers::send_json;
use crate::llm::{ChatBackend, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

pub struct OllamaProvider {
    client: reqwest::Client,
    api_url: String,
    model: String,
    temperature: f32,
}

#[derive(Serialize, Debug)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize, Debug)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct OllamaMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Serialize, Deserialize, Debug)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Serialize, Deserialize, Debug)]
struct OllamaFunction {
    name: String,
    // Ollama sends arguments as an object, not a string
    #[serde(default)]
    arguments: Value,
}

#[derive(Serialize, Debug)]
struct ToolSpec<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a FunctionDeclaration,
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    message: OllamaMessage,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434/api/chat".to_string());

        let client = reqwest::Client::new();

        Ok(Self {
            client,
            api_url,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

fn to_messages(messages: &[ChatMessage]) -> Vec<OllamaMessage> {
    messages
        .iter()
        .filter_map(|message| match message {
            ChatMessage::User { text } => Some(OllamaMessage {
                role: "user".to_string(),
                content: text.clone(),
                ..Default::default()
            }),
            ChatMessage::Model { part: ModelPart::Text { text } } => Some(OllamaMessage {
                role: "assistant".to_string(),
                content: text.clone(),
                ..Default::default()
            }),
            ChatMessage::Model { part: ModelPart::FunctionCall(call) } => Some(OllamaMessage {
                role: "assistant".to_string(),
                content: String::new(),
                tool_calls: vec![OllamaToolCall {
                    function: OllamaFunction {
                        name: call.name.clone(),
                        arguments: call.args.clone(),
                    },
                }],
            }),
            ChatMessage::Model { part: ModelPart::Empty } => None,
            ChatMessage::FunctionResponse { response, .. } => Some(OllamaMessage {
                role: "tool".to_string(),
                content: response.to_string(),
                ..Default::default()
            }),
        })
        .collect()
}

fn first_part(message: OllamaMessage) -> ModelPart {
    if let Some(call) = message.tool_calls.into_iter().next() {
        return ModelPart::FunctionCall(FunctionCall {
            id: None,
            name: call.function.name,
            args: call.function.arguments,
        });
    }
    if message.content.trim().is_empty() {
        ModelPart::Empty
    } else {
        ModelPart::Text { text: message.content }
    }
}

#[async_trait]
impl ChatBackend for OllamaProvider {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[FunctionDeclaration],
    ) -> Result<ModelPart, LlmError> {
        info!("Sending request to Ollama with model: {}", self.model);
        debug!("API URL: {}", self.api_url);

        let request = OllamaRequest {
            model: &self.model,
            messages: to_messages(messages),
            tools: tools
                .iter()
                .map(|function| ToolSpec { kind: "function", function })
                .collect(),
            stream: false, // Explicitly disable streaming
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let response: OllamaResponse =
            send_json(self.client.post(&self.api_url).json(&request), "Ollama").await?;

        Ok(first_part(response.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_calls_carry_object_arguments() {
        let response: OllamaResponse = serde_json::from_value(json!({
            "model": "llama3.1",
            "message": {"role": "assistant", "content": "", "tool_calls": [
                {"function": {"name": "execute_template_query", "arguments": {"template_name": "t"}}}
            ]},
            "done": true
        }))
        .unwrap();

        match first_part(response.message) {
            ModelPart::FunctionCall(call) => {
                assert_eq!(call.name, "execute_template_query");
                assert_eq!(call.args, json!({"template_name": "t"}));
            }
            other => panic!("unexpected part: {:?}", other),
        }
    }

    #[test]
    fn function_responses_become_tool_messages() {
        let wire = serde_json::to_value(to_messages(&[ChatMessage::FunctionResponse {
            call_id: None,
            name: "execute_template_query".to_string(),
            response: json!({"content": "[1]"}),
        }]))
        .unwrap();
        assert_eq!(wire, json!([{"role": "tool", "content": r#"{"content":"[1]"}"#}]));
    }

    #[test]
    fn blank_content_is_empty() {
        let message = OllamaMessage {
            role: "assistant".to_string(),
            ..Default::default()
        };
        assert_eq!(first_part(message), ModelPart::Empty);
    }
}
