//! The per-question loop: route with the model, run the chosen template,
//! then let the model summarize the rows.

pub mod action;
pub mod prompt;
pub mod tool;

use chrono::{NaiveDate, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::catalog::TemplateLibrary;
use crate::llm::{LlmError, LlmManager};
use crate::query::{
    render, ConnectionContext, ParameterResolver, QueryError, QueryExecutor, RenderError,
};
use crate::session::{ConversationTurn, Session, TurnDetails};

pub use action::{Action, FALLBACK_ANSWER};
use prompt::{user_message, PromptBuilder};

pub const PREVIEW_ROWS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("Invalid template selected by model: {0}")]
    InvalidTemplate(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("failed to build prompt: {0}")]
    Prompt(#[from] minijinja::Error),

    #[error("failed to encode query results: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssistantReply {
    pub answer: String,
    pub details: Option<TurnDetails>,
}

pub struct Assistant {
    library: Arc<TemplateLibrary>,
    resolver: ParameterResolver,
    llm: Arc<LlmManager>,
    executor: Arc<dyn QueryExecutor>,
    prompt: PromptBuilder,
}

impl Assistant {
    pub fn new(
        library: Arc<TemplateLibrary>,
        connection: ConnectionContext,
        llm: Arc<LlmManager>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Result<Self, TurnError> {
        Ok(Self {
            library,
            resolver: ParameterResolver::new(connection),
            llm,
            executor,
            prompt: PromptBuilder::new()?,
        })
    }

    pub fn library(&self) -> &TemplateLibrary {
        &self.library
    }

    pub fn connection(&self) -> &ConnectionContext {
        self.resolver.context()
    }

    pub fn llm(&self) -> &LlmManager {
        &self.llm
    }

    /// Runs one turn and records both sides of it in `session`.
    ///
    /// Errors never escape: they become the assistant's reply.
    pub async fn run_turn(&self, session: &mut Session, question: &str) -> ConversationTurn {
        session.append_turn(ConversationTurn::user(question));

        let turn = match self.answer(question).await {
            Ok(reply) => ConversationTurn::assistant(reply.answer, reply.details),
            Err(e) => {
                error!(session = %session.id(), "Turn failed: {}", e);
                ConversationTurn::assistant(format!("An error occurred: {}", e), None)
            }
        };

        session.append_turn(turn.clone());
        turn
    }

    pub async fn answer(&self, question: &str) -> Result<AssistantReply, TurnError> {
        self.answer_on(question, Utc::now().date_naive()).await
    }

    /// Answers `question` as if the current UTC date were `today`.
    pub async fn answer_on(&self, question: &str, today: NaiveDate) -> Result<AssistantReply, TurnError> {
        let system_prompt = self.prompt.system_prompt(&self.library, self.connection(), today)?;
        debug!("Routing prompt: {}", system_prompt);

        let mut chat = self.llm.start_chat(vec![tool::execute_template_query()]);
        let part = chat.send_message(&user_message(&system_prompt, question)).await?;

        let (template_name, extracted, call_id) = match Action::from_part(&part) {
            Action::DirectText(text) => {
                info!("Model answered without a query");
                return Ok(AssistantReply { answer: text, details: None });
            }
            Action::RunTemplate { template_name, parameters, call_id } => {
                (template_name, parameters, call_id)
            }
        };

        let template_name = template_name.unwrap_or_else(|| "<missing>".to_string());
        let template = self.library.get(&template_name).ok_or_else(|| {
            warn!(template = %template_name, "Model selected an unknown template");
            TurnError::InvalidTemplate(template_name.clone())
        })?;

        let final_parameters = self.resolver.resolve_on(today, &extracted);
        let rendered = render(template, &final_parameters)?;
        info!(template = %template.name, parameters = ?final_parameters, "Running template");

        let result = self.executor.execute(&rendered).await?;
        let rows_json = result.rows_json()?;
        debug!(rows = result.rows.len(), "Sending query results to the model");

        let summary = chat
            .send_function_response(call_id, tool::TOOL_NAME, json!({ "content": rows_json }))
            .await?;
        let answer = summary
            .as_text()
            .filter(|text| !text.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| LlmError::ResponseError("Model returned no summary text".to_string()))?;

        Ok(AssistantReply {
            answer,
            details: Some(TurnDetails {
                chosen_template: template.name.clone(),
                extracted_parameters: extracted,
                final_parameters: rendered.values.clone(),
                generated_sql: rendered.audit_sql.clone(),
                query_results_preview: result.preview(PREVIEW_ROWS),
            }),
        })
    }
}
