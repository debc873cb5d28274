use serde_json::Value;
use tracing::warn;

use crate::assistant::tool::TOOL_NAME;
use crate::llm::ModelPart;
use crate::query::ModelParameters;

pub const FALLBACK_ANSWER: &str =
    "I couldn't map this to a template. Try rephrasing with a time range.";

/// What the routing reply asks the assistant to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    RunTemplate {
        /// `None` when the model left the name out.
        template_name: Option<String>,
        parameters: ModelParameters,
        call_id: Option<String>,
    },
    DirectText(String),
}

impl Action {
    pub fn from_part(part: &ModelPart) -> Self {
        match part {
            ModelPart::FunctionCall(call) if call.name == TOOL_NAME => Action::RunTemplate {
                template_name: call
                    .args
                    .get("template_name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .filter(|name| !name.is_empty()),
                parameters: call
                    .args
                    .get("parameters")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
                call_id: call.id.clone(),
            },
            ModelPart::FunctionCall(call) => {
                warn!(function = %call.name, "Model called an unknown function");
                Action::DirectText(FALLBACK_ANSWER.to_string())
            }
            ModelPart::Text { text } if !text.trim().is_empty() => Action::DirectText(text.clone()),
            _ => Action::DirectText(FALLBACK_ANSWER.to_string()),
        }
    }
}
