//! Gateway tests: auth rejection and SSE event framing, driven through the
//! router with oneshot requests.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use morada::llm::{LlmResponse, MockLlm};
use morada::pipeline::{FixedVision, FixtureScraper};
use morada::store::SqliteStore;
use morada::tools::default_registry;
use morada::{RuntimeConfig, Services, TurnRunner};
use serve::{build_router, AppState, StaticTokenIdentity};
use stream_event::ClientEvent;

fn test_app(dir: &tempfile::TempDir, llm: MockLlm, max_cycles: Option<u32>) -> axum::Router {
    let store = Arc::new(SqliteStore::new(dir.path().join("morada.db")).unwrap());
    let mut config = RuntimeConfig::default();
    if let Some(n) = max_cycles {
        config.max_cycles = n;
    }
    let services = Services::new(
        store,
        Arc::new(llm),
        Arc::new(FixedVision),
        Arc::new(FixtureScraper),
        config,
    );
    let runner = Arc::new(TurnRunner::new(services.clone(), default_registry()).unwrap());
    let auth = Arc::new(StaticTokenIdentity::new("segredo", "u1"));
    build_router(AppState::new(runner, services, auth))
}

fn chat_request(token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(t) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Parses `data: <json>` SSE lines back into typed events.
fn parse_events(body: &str) -> Vec<ClientEvent> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|json| serde_json::from_str(json).expect("valid event json"))
        .collect()
}

/// **Scenario**: requests without (or with a wrong) bearer token are rejected
/// before any work.
#[tokio::test]
async fn rejects_unauthenticated_requests() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir, MockLlm::always(LlmResponse::text("olá")), None);

    let response = app
        .clone()
        .oneshot(chat_request(None, r#"{"message": "olá"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(chat_request(Some("errado"), r#"{"message": "olá"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// **Scenario**: an empty message is a 400 before the graph starts.
#[tokio::test]
async fn rejects_empty_message() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir, MockLlm::always(LlmResponse::text("olá")), None);
    let response = app
        .oneshot(chat_request(Some("segredo"), r#"{"message": "  "}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// **Scenario**: a successful turn streams `thinking` first and ends with the
/// final `message` event carrying `done = true`; every frame is `data: `-
/// prefixed JSON.
#[tokio::test]
async fn streams_thinking_then_final_message() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(
        &dir,
        MockLlm::scripted(vec![LlmResponse::text("Olá! Em que posso ajudar?")]),
        None,
    );

    let response = app
        .oneshot(chat_request(Some("segredo"), r#"{"message": "Olá"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body = String::from_utf8(body.to_vec()).unwrap();
    let events = parse_events(&body);

    assert_eq!(events.first(), Some(&ClientEvent::Thinking));
    match events.last().unwrap() {
        ClientEvent::Message { content, done } => {
            assert!(content.contains("posso ajudar"));
            assert!(*done);
        }
        other => panic!("unexpected final event: {:?}", other),
    }
    assert!(!events
        .iter()
        .any(|e| matches!(e, ClientEvent::Error { .. })));
}

/// **Scenario**: tool calls surface as `tool_call` events between thinking
/// and the final message.
#[tokio::test]
async fn streams_tool_call_events() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(
        &dir,
        MockLlm::scripted(vec![
            LlmResponse::tool_call(
                "manage_todos",
                serde_json::json!({"action": "add", "task": "ver a cozinha"}),
            ),
            LlmResponse::text("Anotei."),
        ]),
        None,
    );

    let response = app
        .oneshot(chat_request(
            Some("segredo"),
            r#"{"message": "lembra-me de ver a cozinha"}"#,
        ))
        .await
        .unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let events = parse_events(&String::from_utf8(body.to_vec()).unwrap());

    assert!(events
        .iter()
        .any(|e| matches!(e, ClientEvent::ToolCall { name, .. } if name == "manage_todos")));
    assert!(events
        .iter()
        .any(|e| matches!(e, ClientEvent::TodoUpdate { .. })));
}

/// **Scenario**: turn-budget exhaustion produces exactly one `error` event
/// with the budget code, and the stream closes.
#[tokio::test]
async fn budget_exhaustion_emits_single_error_event() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(
        &dir,
        MockLlm::always(LlmResponse::tool_call(
            "manage_todos",
            serde_json::json!({"action": "list"}),
        )),
        Some(3),
    );

    let response = app
        .oneshot(chat_request(Some("segredo"), r#"{"message": "loop"}"#))
        .await
        .unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let events = parse_events(&String::from_utf8(body.to_vec()).unwrap());

    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Error { code, .. } => Some(*code),
            _ => None,
        })
        .collect();
    assert_eq!(errors, vec![stream_event::ErrorCode::TurnBudgetExceeded]);

    // No final message with done = true on a failed turn.
    assert!(!events
        .iter()
        .any(|e| matches!(e, ClientEvent::Message { done: true, .. })));
}
