use serde_json::json;

use crate::llm::FunctionDeclaration;

pub const TOOL_NAME: &str = "execute_template_query";

/// The single tool offered to the model during routing.
pub fn execute_template_query() -> FunctionDeclaration {
    FunctionDeclaration {
        name: TOOL_NAME.to_string(),
        description: "Executes a GA4 BigQuery template. Use this to answer user questions about GA4 data."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "template_name": {
                    "type": "string",
                    "description": "One of the available GA4 query template names."
                },
                "parameters": {
                    "type": "object",
                    "description": "Template parameters. Common: start_date/end_date (YYYYMMDD), top_n, and other specific filters like event_name, property_key, or country_name.",
                    "properties": {
                        "start_date": {
                            "type": "string",
                            "description": "YYYYMMDD. Defaults to 8 days ago."
                        },
                        "end_date": {
                            "type": "string",
                            "description": "YYYYMMDD. Defaults to yesterday."
                        },
                        "property_key": {
                            "type": "string",
                            "description": "The key of the user property to analyze (e.g., 'user_tier')."
                        },
                        "event_name": {
                            "type": "string",
                            "description": "The name of the event to analyze (e.g., 'purchase', 'page_view')."
                        },
                        "country_name": {
                            "type": "string",
                            "description": "The full name of a country (e.g., 'United States')."
                        },
                        "campaign_name": {
                            "type": "string",
                            "description": "The name of a marketing campaign."
                        }
                    }
                }
            },
            "required": ["template_name", "parameters"]
        }),
    }
}
