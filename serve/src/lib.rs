//! SSE gateway for Morada.
//!
//! One endpoint: `POST /chat` with `{message, conversation_id?}` and a bearer
//! token. The response is `text/event-stream`; each event is one JSON object
//! from the `stream-event` taxonomy. The gateway invokes the turn graph in
//! streaming mode and demuxes graph chunks into client events, deduplicating
//! against a per-request sent index.

pub mod app;
pub mod auth;
pub mod chat;

pub use app::{build_router, AppState};
pub use auth::{bearer_token, IdentityProvider, StaticTokenIdentity};
