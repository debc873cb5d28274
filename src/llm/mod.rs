pub mod chat;
pub mod models;
pub mod providers;

use crate::config::LlmConfig;
use crate::gcp::{Credentials, CredentialsError};
use async_trait::async_trait;
use tracing::info;

pub use chat::ChatSession;
pub use models::{ChatMessage, FunctionCall, FunctionDeclaration, ModelPart};

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    ConnectionError(String),

    #[error("LLM response error: {0}")]
    ResponseError(String),

    #[error("LLM configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    CredentialsError(#[from] CredentialsError),
}

/// A chat model that can answer with text or a function call.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Sends the whole transcript and returns the first part of the reply.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[FunctionDeclaration],
    ) -> Result<ModelPart, LlmError>;
}

pub struct LlmManager {
    backend: Box<dyn ChatBackend + Send + Sync>,
    backend_name: String,
    model: String,
}

impl LlmManager {
    pub fn new(
        config: &LlmConfig,
        project_id: &str,
        credentials: &Credentials,
    ) -> Result<Self, LlmError> {
        let backend: Box<dyn ChatBackend + Send + Sync> = match config.backend.as_str() {
            "vertex" => {
                let credentials = match &config.api_key {
                    Some(token) => Credentials::Static(token.clone()),
                    None => credentials.clone(),
                };
                Box::new(providers::vertex::VertexProvider::new(
                    config,
                    project_id,
                    credentials,
                )?)
            }
            "remote" => Box::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        info!("Using {} backend with model {}", config.backend, config.model);
        Ok(Self {
            backend,
            backend_name: config.backend.clone(),
            model: config.model.clone(),
        })
    }

    /// Wraps an arbitrary backend, e.g. a scripted one in tests.
    pub fn with_backend(backend: Box<dyn ChatBackend + Send + Sync>) -> Self {
        Self {
            backend,
            backend_name: "custom".to_string(),
            model: "custom".to_string(),
        }
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn start_chat(&self, tools: Vec<FunctionDeclaration>) -> ChatSession<'_> {
        ChatSession::new(self.backend.as_ref(), tools)
    }

    pub async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[FunctionDeclaration],
    ) -> Result<ModelPart, LlmError> {
        self.backend.generate(messages, tools).await
    }
}
