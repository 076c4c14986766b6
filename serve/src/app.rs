//! Router and shared application state.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use morada::{Services, TurnRunner};

use crate::auth::IdentityProvider;
use crate::chat;

/// Per-process state shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<TurnRunner>,
    pub services: Services,
    pub auth: Arc<dyn IdentityProvider>,
}

impl AppState {
    pub fn new(
        runner: Arc<TurnRunner>,
        services: Services,
        auth: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            runner,
            services,
            auth,
        }
    }
}

/// Builds the router: the chat endpoint plus a liveness probe.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat::chat_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}
