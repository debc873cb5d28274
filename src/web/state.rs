use std::sync::Arc;

use crate::assistant::Assistant;
use crate::config::AppConfig;
use crate::session::Session;
use crate::web::auth::AuthGate;
use crate::web::sessions::SessionStore;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub assistant: Arc<Assistant>,
    pub sessions: SessionStore,
    pub auth: Option<AuthGate>,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, assistant: Arc<Assistant>) -> Self {
        let auth = AuthGate::from_config(&config.auth);
        Self {
            config,
            assistant,
            sessions: SessionStore::new(),
            auth,
            startup_time: chrono::Utc::now(),
        }
    }

    pub fn auth_required(&self) -> bool {
        self.auth.is_some()
    }

    /// Whether `session` may use the chat.
    pub fn is_authorized(&self, session: &Session) -> bool {
        !self.auth_required() || session.is_authenticated()
    }
}
