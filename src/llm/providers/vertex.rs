use crate::config::LlmConfig;
use crate::gcp::Credentials;
use crate::llm::models::{ChatMessage, FunctionCall, FunctionDeclaration, ModelPart};
use crate::llm::providers::send_json;
use crate::llm::{ChatBackend, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

/// Gemini models served by Vertex AI `generateContent`.
pub struct VertexProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    credentials: Credentials,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize, Debug)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<WireFunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<WireFunctionResponse>,
}

#[derive(Serialize, Deserialize, Debug)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Serialize, Deserialize, Debug)]
struct WireFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Tool {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Serialize, Debug)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<Content>,
}

impl VertexProvider {
    pub fn new(config: &LlmConfig, project_id: &str, credentials: Credentials) -> Result<Self, LlmError> {
        if project_id.trim().is_empty() {
            return Err(LlmError::ConfigError(
                "A project id is required for the Vertex AI backend".to_string(),
            ));
        }

        let base = config
            .api_url
            .clone()
            .unwrap_or_else(|| default_base_url(&config.location));
        let endpoint = format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            base.trim_end_matches('/'),
            project_id,
            config.location,
            config.model
        );

        let client = reqwest::Client::new();

        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            temperature: config.temperature,
            credentials,
        })
    }
}

fn default_base_url(location: &str) -> String {
    if location == "global" {
        "https://aiplatform.googleapis.com".to_string()
    } else {
        format!("https://{}-aiplatform.googleapis.com", location)
    }
}

fn to_contents(messages: &[ChatMessage]) -> Vec<Content> {
    messages
        .iter()
        .filter_map(|message| match message {
            ChatMessage::User { text } => Some(Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: Some(text.clone()),
                    ..Default::default()
                }],
            }),
            ChatMessage::Model { part } => {
                let part = match part {
                    ModelPart::Text { text } => Part {
                        text: Some(text.clone()),
                        ..Default::default()
                    },
                    ModelPart::FunctionCall(call) => Part {
                        function_call: Some(WireFunctionCall {
                            name: call.name.clone(),
                            args: call.args.clone(),
                        }),
                        ..Default::default()
                    },
                    ModelPart::Empty => return None,
                };
                Some(Content {
                    role: "model".to_string(),
                    parts: vec![part],
                })
            }
            ChatMessage::FunctionResponse { name, response, .. } => Some(Content {
                role: "user".to_string(),
                parts: vec![Part {
                    function_response: Some(WireFunctionResponse {
                        name: name.clone(),
                        response: response.clone(),
                    }),
                    ..Default::default()
                }],
            }),
        })
        .collect()
}

// Vertex schemas spell types in upper case.
fn vertex_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| match (key.as_str(), value) {
                    ("type", Value::String(kind)) => (key.clone(), Value::String(kind.to_uppercase())),
                    _ => (key.clone(), vertex_schema(value)),
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(vertex_schema).collect()),
        other => other.clone(),
    }
}

fn first_part(response: GenerateContentResponse) -> Result<ModelPart, LlmError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::ResponseError("No candidates in response".to_string()))?;

    let part = candidate.content.and_then(|c| c.parts.into_iter().next());
    Ok(match part {
        Some(Part { function_call: Some(call), .. }) => ModelPart::FunctionCall(FunctionCall {
            id: None,
            name: call.name,
            args: call.args,
        }),
        Some(Part { text: Some(text), .. }) => ModelPart::Text { text },
        _ => ModelPart::Empty,
    })
}

#[async_trait]
impl ChatBackend for VertexProvider {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[FunctionDeclaration],
    ) -> Result<ModelPart, LlmError> {
        let request = GenerateContentRequest {
            contents: to_contents(messages),
            tools: if tools.is_empty() {
                Vec::new()
            } else {
                vec![Tool {
                    function_declarations: tools
                        .iter()
                        .map(|tool| FunctionDeclaration {
                            parameters: vertex_schema(&tool.parameters),
                            ..tool.clone()
                        })
                        .collect(),
                }]
            },
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        };

        info!("Sending request to Vertex AI with model: {}", self.model);
        debug!("API URL: {}", self.endpoint);

        let token = self.credentials.bearer_token().await?;
        let response: GenerateContentResponse = send_json(
            self.client.post(&self.endpoint).bearer_auth(token).json(&request),
            "Vertex AI",
        )
        .await?;

        first_part(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transcript_maps_to_gemini_roles() {
        let messages = vec![
            ChatMessage::user("how many users?"),
            ChatMessage::Model {
                part: ModelPart::FunctionCall(FunctionCall {
                    id: None,
                    name: "execute_template_query".to_string(),
                    args: json!({"template_name": "calculate_total_users"}),
                }),
            },
            ChatMessage::FunctionResponse {
                call_id: None,
                name: "execute_template_query".to_string(),
                response: json!({"content": "[]"}),
            },
            ChatMessage::Model { part: ModelPart::Empty },
        ];

        let contents = serde_json::to_value(to_contents(&messages)).unwrap();
        assert_eq!(
            contents,
            json!([
                {"role": "user", "parts": [{"text": "how many users?"}]},
                {"role": "model", "parts": [{"functionCall": {
                    "name": "execute_template_query",
                    "args": {"template_name": "calculate_total_users"}
                }}]},
                {"role": "user", "parts": [{"functionResponse": {
                    "name": "execute_template_query",
                    "response": {"content": "[]"}
                }}]}
            ])
        );
    }

    #[test]
    fn schema_types_are_upper_cased() {
        let schema = json!({
            "type": "object",
            "properties": {"template_name": {"type": "string", "description": "type of thing"}}
        });
        assert_eq!(
            vertex_schema(&schema),
            json!({
                "type": "OBJECT",
                "properties": {"template_name": {"type": "STRING", "description": "type of thing"}}
            })
        );
    }

    #[test]
    fn first_part_prefers_function_calls() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"functionCall": {"name": "execute_template_query", "args": {"template_name": "x"}}}
            ]}}]
        }))
        .unwrap();
        match first_part(response).unwrap() {
            ModelPart::FunctionCall(call) => assert_eq!(call.args["template_name"], "x"),
            other => panic!("unexpected part: {:?}", other),
        }
    }

    #[test]
    fn missing_candidates_is_an_error() {
        let response: GenerateContentResponse = serde_json::from_value(json!({})).unwrap();
        assert!(matches!(first_part(response), Err(LlmError::ResponseError(_))));

        let response: GenerateContentResponse =
            serde_json::from_value(json!({"candidates": [{"finishReason": "SAFETY"}]})).unwrap();
        assert_eq!(first_part(response).unwrap(), ModelPart::Empty);
    }

    #[test]
    fn regional_and_global_hosts() {
        assert_eq!(default_base_url("europe-west4"), "https://europe-west4-aiplatform.googleapis.com");
        assert_eq!(default_base_url("global"), "https://aiplatform.googleapis.com");
    }
}
