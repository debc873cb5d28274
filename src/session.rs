use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::query::{ModelParameters, ParameterSet, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// What ran behind an assistant answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnDetails {
    pub chosen_template: String,
    pub extracted_parameters: ModelParameters,
    pub final_parameters: ParameterSet,
    pub generated_sql: String,
    pub query_results_preview: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<TurnDetails>,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            details: None,
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, details: Option<TurnDetails>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            details,
            created_at: Utc::now(),
        }
    }
}

/// One user's conversation. Turns are only ever appended.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    authenticated: bool,
    turns: Vec<ConversationTurn>,
}

impl Session {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            authenticated: false,
            turns: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn append_turn(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn last_turn(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn turns_are_appended_in_order() {
        let mut session = Session::new();
        session.append_turn(ConversationTurn::user("how many users?"));
        session.append_turn(ConversationTurn::assistant("About 1,200.", None));

        let roles: Vec<Role> = session.turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(session.last_turn().unwrap().content, "About 1,200.");
    }

    #[test]
    fn details_are_omitted_when_absent() {
        let turn = serde_json::to_value(ConversationTurn::assistant("hi", None)).unwrap();
        assert_eq!(turn["role"], json!("assistant"));
        assert!(turn.get("details").is_none());
    }

    #[test]
    fn sessions_get_distinct_ids() {
        assert_ne!(Session::new().id(), Session::new().id());
    }
}
