use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use nl_ga4::assistant::Assistant;
use nl_ga4::catalog::TemplateLibrary;
use nl_ga4::config::{
    AppConfig, AuthConfig, CatalogConfig, LlmConfig, WarehouseConfig, WebConfig,
    DEFAULT_BIGQUERY_API_URL,
};
use nl_ga4::llm::{ChatBackend, ChatMessage, FunctionDeclaration, LlmError, LlmManager, ModelPart};
use nl_ga4::query::{ConnectionContext, QueryError, QueryExecutor, QueryResult, RenderedQuery};
use nl_ga4::web::auth::hash_password;
use nl_ga4::web::{router, state::AppState};

struct EchoModel;

#[async_trait]
impl ChatBackend for EchoModel {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        _tools: &[FunctionDeclaration],
    ) -> Result<ModelPart, LlmError> {
        match messages.last() {
            Some(ChatMessage::User { text }) => {
                let question = text.rsplit("User question: ").next().unwrap_or_default();
                Ok(ModelPart::text(format!("You asked: {}", question)))
            }
            _ => Ok(ModelPart::Empty),
        }
    }
}

struct NoWarehouse;

#[async_trait]
impl QueryExecutor for NoWarehouse {
    async fn execute(&self, _query: &RenderedQuery) -> Result<QueryResult, QueryError> {
        Err(QueryError::Connection("not available in tests".to_string()))
    }
}

fn config(auth: AuthConfig) -> AppConfig {
    AppConfig {
        web: WebConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        llm: LlmConfig {
            backend: "vertex".to_string(),
            model: "gemini-2.5-pro".to_string(),
            location: "us-central1".to_string(),
            api_url: None,
            api_key: None,
            temperature: 0.0,
        },
        warehouse: WarehouseConfig {
            project_id: Some("acme-analytics".to_string()),
            dataset_id: "analytics_123456789".to_string(),
            api_url: DEFAULT_BIGQUERY_API_URL.to_string(),
            maximum_bytes_billed: 10_000_000_000,
            location: None,
            access_token: None,
        },
        auth,
        catalog: CatalogConfig::default(),
    }
}

fn app(auth: AuthConfig) -> Router {
    let assistant = Assistant::new(
        Arc::new(TemplateLibrary::embedded().unwrap()),
        ConnectionContext {
            project_id: "acme-analytics".to_string(),
            dataset_id: "analytics_123456789".to_string(),
        },
        Arc::new(LlmManager::with_backend(Box::new(EchoModel))),
        Arc::new(NoWarehouse),
    )
    .unwrap();
    router(Arc::new(AppState::new(config(auth), Arc::new(assistant))))
}

fn gated() -> AuthConfig {
    AuthConfig {
        username: Some("analyst".to_string()),
        password_hash: Some(hash_password("s3cret")),
    }
}

fn post_json(uri: &str, cookie: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, cookie, body)
}

#[tokio::test]
async fn chat_creates_session_and_records_history() {
    let app = app(AuthConfig::default());

    let (status, cookie, turn) =
        send(&app, post_json("/api/chat", None, json!({"question": "hello there"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(turn["role"], "assistant");
    assert_eq!(turn["content"], "You asked: hello there");
    assert!(turn.get("details").is_none());

    let cookie = cookie.expect("session cookie");
    assert!(cookie.starts_with("nl_ga4_session="));

    let (status, again, _) = send(
        &app,
        post_json("/api/chat", Some(&cookie), json!({"question": "second"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(again.is_none());

    let (status, _, history) = send(&app, get("/api/history", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    let contents: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["content"].as_str().unwrap())
        .collect();
    assert_eq!(
        contents,
        vec!["hello there", "You asked: hello there", "second", "You asked: second"]
    );
}

#[tokio::test]
async fn sessions_do_not_share_history() {
    let app = app(AuthConfig::default());

    let (_, first, _) = send(&app, post_json("/api/chat", None, json!({"question": "a"}))).await;
    let (_, second, _) = send(&app, post_json("/api/chat", None, json!({"question": "b"}))).await;
    assert_ne!(first, second);

    let (_, _, history) = send(&app, get("/api/history", second.as_deref())).await;
    assert_eq!(history.as_array().unwrap().len(), 2);
    assert_eq!(history[0]["content"], "b");
}

#[tokio::test]
async fn blank_or_malformed_questions_are_rejected() {
    let app = app(AuthConfig::default());

    let (status, _, body) = send(&app, post_json("/api/chat", None, json!({"question": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "question must not be empty");

    let (status, _, body) = send(&app, post_json("/api/chat", None, json!({"q": "x"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn gate_blocks_chat_until_login() {
    let app = app(gated());

    let (status, _, _) = send(&app, post_json("/api/chat", None, json!({"question": "hi"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, body) = send(
        &app,
        post_json("/api/login", None, json!({"username": "analyst", "password": "nope"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid username or password");

    let (status, cookie, body) = send(
        &app,
        post_json("/api/login", None, json!({"username": "analyst", "password": "s3cret"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"authenticated": true, "auth_required": true}));
    let cookie = cookie.expect("session cookie");

    let (status, _, turn) = send(
        &app,
        post_json("/api/chat", Some(&cookie), json!({"question": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(turn["content"], "You asked: hi");

    let (status, _, _) = send(&app, post_json("/api/logout", Some(&cookie), json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&app, get("/api/history", Some(&cookie))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn templates_and_status_describe_the_service() {
    let app = app(AuthConfig::default());

    let (status, _, templates) = send(&app, get("/api/templates", None)).await;
    assert_eq!(status, StatusCode::OK);
    let templates = templates.as_array().unwrap();
    assert_eq!(templates.len(), 118);
    let country = templates
        .iter()
        .find(|t| t["name"] == "analyze_specific_country")
        .unwrap();
    assert!(country["placeholders"]
        .as_array()
        .unwrap()
        .contains(&json!("country_name")));

    let (status, _, info) = send(&app, get("/api/status", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["project_id"], "acme-analytics");
    assert_eq!(info["dataset_id"], "analytics_123456789");
    assert_eq!(info["template_count"], 118);
    assert_eq!(info["auth_required"], false);
    assert_eq!(info["authenticated"], true);
}

#[tokio::test]
async fn gated_server_hides_deployment_until_login() {
    let app = app(gated());

    let (status, _, _) = send(&app, get("/api/templates", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, info) = send(&app, get("/api/status", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["auth_required"], true);
    assert_eq!(info["authenticated"], false);
    assert!(info.get("project_id").is_none());
    assert!(info.get("dataset_id").is_none());
    assert!(info.get("template_count").is_none());

    let (_, cookie, _) = send(
        &app,
        post_json("/api/login", None, json!({"username": "analyst", "password": "s3cret"})),
    )
    .await;
    let cookie = cookie.expect("session cookie");

    let (status, _, templates) = send(&app, get("/api/templates", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(templates.as_array().unwrap().len(), 118);

    let (_, _, info) = send(&app, get("/api/status", Some(&cookie))).await;
    assert_eq!(info["authenticated"], true);
    assert_eq!(info["project_id"], "acme-analytics");
}

#[tokio::test]
async fn rejected_requests_do_not_create_sessions() {
    let app = app(gated());

    for _ in 0..20 {
        let (status, cookie, _) =
            send(&app, post_json("/api/chat", None, json!({"question": "hi"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(cookie.is_none());

        let (status, cookie, _) = send(
            &app,
            post_json("/api/login", None, json!({"username": "analyst", "password": "wrong"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(cookie.is_none());
    }

    let (_, cookie, _) = send(
        &app,
        post_json("/api/login", None, json!({"username": "analyst", "password": "s3cret"})),
    )
    .await;
    let (_, _, info) = send(&app, get("/api/status", cookie.as_deref())).await;
    assert_eq!(info["session_count"], 1);
}

#[tokio::test]
async fn chat_page_and_assets_are_served() {
    let app = app(AuthConfig::default());

    let response = app.clone().oneshot(get("/", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("Speak with GA4"));

    let response = app.clone().oneshot(get("/static/app.js", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.contains("javascript"));

    let response = app.clone().oneshot(get("/static/missing.js", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
