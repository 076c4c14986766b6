//! `POST /chat`: one turn in, a typed SSE stream out.
//!
//! The handler authenticates, emits an immediate `thinking` event, starts the
//! graph in streaming mode, and forwards only the client events that have not
//! been sent yet (the state's event queue is append-only, so a per-request
//! index is enough). Infrastructure failures produce exactly one `error`
//! event; tool-level failures never do.

use std::convert::Infallible;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use morada::error::AgentError;
use morada::stream::StreamEvent;
use morada::{Services, TurnRequest};
use stream_event::{ClientEvent, ErrorCode};

use crate::app::AppState;
use crate::auth::bearer_token;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

fn error_code(e: &AgentError) -> ErrorCode {
    match e {
        AgentError::TurnBudgetExceeded(_) => ErrorCode::TurnBudgetExceeded,
        AgentError::InvalidInput(_) => ErrorCode::InvalidRequest,
        _ => ErrorCode::Upstream,
    }
}

/// Drives one graph run, forwarding fresh client events into `tx`. A failed
/// send means the client disconnected; the run is cancelled and in-flight
/// work unwinds at its next suspension point.
async fn drive_turn(
    state: AppState,
    services: Services,
    request: TurnRequest,
    tx: mpsc::Sender<ClientEvent>,
) {
    if tx.send(ClientEvent::Thinking).await.is_err() {
        return;
    }

    let run = state.runner.stream(&request, &services);
    let mut events = run.events;
    let mut sent = 0usize;
    let mut observed_conversation = request.conversation_id.clone();

    while let Some(event) = events.next().await {
        let StreamEvent::Updates {
            state: turn_state, ..
        } = event
        else {
            continue;
        };
        if !turn_state.conversation_id.is_empty() {
            observed_conversation = Some(turn_state.conversation_id.clone());
        }
        for client_event in turn_state.stream_events.iter().skip(sent) {
            if tx.send(client_event.clone()).await.is_err() {
                tracing::debug!("client disconnected, cancelling run");
                services.cancel.cancel();
                return;
            }
        }
        sent = turn_state.stream_events.len();
    }

    let result = match run.handle.await {
        Ok(result) => result,
        Err(join) => Err(AgentError::ExecutionFailed(format!("turn task join: {}", join))),
    };

    if let Err(e) = result {
        if matches!(e, AgentError::TurnBudgetExceeded(_)) {
            state
                .runner
                .persist_user_turn_after_failure(&request, observed_conversation.as_deref())
                .await;
        }
        tracing::warn!(error = %e, "turn failed");
        let _ = tx
            .send(ClientEvent::Error {
                code: error_code(&e),
                message: e.to_string(),
            })
            .await;
    }
}

/// The chat endpoint. Rejects unauthenticated and empty requests before any
/// work; otherwise answers with the event stream.
pub async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Response {
    let user_id = bearer_token(&headers).and_then(|t| state.auth.verify(t));
    let Some(user_id) = user_id else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "missing or invalid bearer token"
            })),
        )
            .into_response();
    };

    if request.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "message cannot be empty"})),
        )
            .into_response();
    }

    let turn_request = TurnRequest {
        user_id,
        conversation_id: request.conversation_id,
        message: request.message,
    };
    let services = state.services.for_request();

    let (tx, rx) = mpsc::channel::<ClientEvent>(64);
    tokio::spawn(drive_turn(state, services, turn_request, tx));

    Sse::new(client_event_stream(rx)).into_response()
}

fn client_event_stream(
    rx: mpsc::Receiver<ClientEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    ReceiverStream::new(rx).map(|event| {
        let json = serde_json::to_string(&event)
            .unwrap_or_else(|_| r#"{"type":"error","code":"upstream","message":"encode"}"#.into());
        Ok(Event::default().data(json))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_by_class() {
        assert_eq!(
            error_code(&AgentError::TurnBudgetExceeded(12)),
            ErrorCode::TurnBudgetExceeded
        );
        assert_eq!(
            error_code(&AgentError::InvalidInput("x".into())),
            ErrorCode::InvalidRequest
        );
        assert_eq!(
            error_code(&AgentError::Llm("down".into())),
            ErrorCode::Upstream
        );
    }
}
