use axum::http::{header, HeaderMap, HeaderValue};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::session::Session;

pub const SESSION_COOKIE: &str = "nl_ga4_session";

/// In-memory sessions keyed by the id in the session cookie.
///
/// Each session sits behind its own lock so its turns run one at a time.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<Session>>>>,
}

pub struct SessionHandle {
    pub id: Uuid,
    pub session: Arc<Mutex<Session>>,
    /// The client has no cookie for this session yet.
    pub is_new: bool,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session named by the request cookie, if it is still known.
    pub async fn find(&self, headers: &HeaderMap) -> Option<SessionHandle> {
        let id = session_id(headers)?;
        let session = self.sessions.read().await.get(&id).cloned()?;
        Some(SessionHandle {
            id,
            session,
            is_new: false,
        })
    }

    pub async fn get_or_create(&self, headers: &HeaderMap) -> SessionHandle {
        if let Some(handle) = self.find(headers).await {
            return handle;
        }

        let session = Session::new();
        let id = session.id();
        let session = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(id, Arc::clone(&session));
        debug!(session = %id, "Created session");

        SessionHandle {
            id,
            session,
            is_new: true,
        }
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

/// Session id from the `Cookie` header.
pub fn session_id(headers: &HeaderMap) -> Option<Uuid> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let trimmed = part.trim();
        if let Some(value) = trimmed.strip_prefix(SESSION_COOKIE).and_then(|v| v.strip_prefix('=')) {
            if let Ok(id) = Uuid::parse_str(value) {
                return Some(id);
            }
        }
    }
    None
}

pub fn session_cookie(id: Uuid) -> HeaderValue {
    let value = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id);
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

pub fn expired_session_cookie() -> HeaderValue {
    HeaderValue::from_static("nl_ga4_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}
