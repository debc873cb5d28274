use serde_json::Value;
use tracing::debug;

use crate::llm::models::{ChatMessage, FunctionDeclaration, ModelPart};
use crate::llm::{ChatBackend, LlmError};

/// A multi-turn exchange with one backend and a fixed tool set.
///
/// A failed call leaves the history as it was before the call.
pub struct ChatSession<'a> {
    backend: &'a (dyn ChatBackend + Send + Sync),
    tools: Vec<FunctionDeclaration>,
    history: Vec<ChatMessage>,
}

impl<'a> ChatSession<'a> {
    pub fn new(backend: &'a (dyn ChatBackend + Send + Sync), tools: Vec<FunctionDeclaration>) -> Self {
        Self {
            backend,
            tools,
            history: Vec::new(),
        }
    }

    pub async fn send_message(&mut self, text: &str) -> Result<ModelPart, LlmError> {
        self.send(ChatMessage::user(text)).await
    }

    /// Answers the function call `name` and returns the model's next part.
    pub async fn send_function_response(
        &mut self,
        call_id: Option<String>,
        name: &str,
        response: Value,
    ) -> Result<ModelPart, LlmError> {
        self.send(ChatMessage::FunctionResponse {
            call_id,
            name: name.to_string(),
            response,
        })
        .await
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    async fn send(&mut self, message: ChatMessage) -> Result<ModelPart, LlmError> {
        self.history.push(message);
        debug!(messages = self.history.len(), "Sending chat transcript");

        match self.backend.generate(&self.history, &self.tools).await {
            Ok(part) => {
                self.history.push(ChatMessage::Model { part: part.clone() });
                Ok(part)
            }
            Err(e) => {
                self.history.pop();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct Echo {
        seen: Mutex<Vec<usize>>,
        fail: bool,
    }

    #[async_trait]
    impl ChatBackend for Echo {
        async fn generate(
            &self,
            messages: &[ChatMessage],
            _tools: &[FunctionDeclaration],
        ) -> Result<ModelPart, LlmError> {
            self.seen.lock().unwrap().push(messages.len());
            if self.fail {
                return Err(LlmError::ConnectionError("down".to_string()));
            }
            Ok(ModelPart::text(format!("reply {}", messages.len())))
        }
    }

    #[tokio::test]
    async fn history_carries_across_calls() {
        let backend = Echo { seen: Mutex::new(Vec::new()), fail: false };
        let mut chat = ChatSession::new(&backend, Vec::new());

        chat.send_message("first").await.unwrap();
        let reply = chat
            .send_function_response(
                Some("call_1".to_string()),
                "execute_template_query",
                json!({"content": "[]"}),
            )
            .await
            .unwrap();

        assert_eq!(reply, ModelPart::text("reply 3"));
        assert_eq!(*backend.seen.lock().unwrap(), vec![1, 3]);
        assert_eq!(chat.history().len(), 4);
        assert!(matches!(
            &chat.history()[2],
            ChatMessage::FunctionResponse { call_id: Some(id), .. } if id == "call_1"
        ));
    }

    #[tokio::test]
    async fn failed_call_leaves_history_untouched() {
        let backend = Echo { seen: Mutex::new(Vec::new()), fail: true };
        let mut chat = ChatSession::new(&backend, Vec::new());

        assert!(chat.send_message("hello").await.is_err());
        assert!(chat.history().is_empty());
    }
}
