use chrono::NaiveDate;
use minijinja::{context, Environment};
use serde::Serialize;

use crate::assistant::tool::TOOL_NAME;
use crate::catalog::TemplateLibrary;
use crate::query::params::{DATASET_ID, END_DATE, PROJECT_ID, START_DATE};
use crate::query::ConnectionContext;

const SYSTEM_PROMPT: &str = "system_prompt.j2";

// Always supplied by the resolver, so not worth listing per template.
const IMPLICIT_PARAMETERS: [&str; 4] = [PROJECT_ID, DATASET_ID, START_DATE, END_DATE];

#[derive(Serialize)]
struct TemplateEntry<'a> {
    name: &'a str,
    description: &'a str,
    parameters: Vec<String>,
}

/// Renders the routing prompt from `templates/system_prompt.j2`.
pub struct PromptBuilder {
    env: Environment<'static>,
}

impl PromptBuilder {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.add_template(SYSTEM_PROMPT, include_str!("../../templates/system_prompt.j2"))?;
        Ok(Self { env })
    }

    pub fn system_prompt(
        &self,
        library: &TemplateLibrary,
        connection: &ConnectionContext,
        today: NaiveDate,
    ) -> Result<String, minijinja::Error> {
        let templates: Vec<TemplateEntry> = library
            .iter()
            .map(|template| TemplateEntry {
                name: &template.name,
                description: template.description.trim(),
                parameters: template
                    .placeholders()
                    .into_iter()
                    .filter(|p| !IMPLICIT_PARAMETERS.contains(&p.as_str()))
                    .collect(),
            })
            .collect();

        let rendered = self.env.get_template(SYSTEM_PROMPT)?.render(context! {
            tool_name => TOOL_NAME,
            templates => templates,
            today => today.format("%Y-%m-%d").to_string(),
            project_id => &connection.project_id,
            dataset_id => &connection.dataset_id,
        })?;

        Ok(rendered.trim().to_string())
    }
}

/// The single user message sent for routing.
pub fn user_message(system_prompt: &str, question: &str) -> String {
    format!("{}\nUser question: {}", system_prompt, question)
}
