//! # Morada
//!
//! Conversational orchestrator for a property-analysis assistant aimed at
//! first-time home buyers. One user turn drives a cyclic state graph
//! (hydrate → agent ⇄ tools/reflect → post-process) around two cores:
//!
//! - **The orchestrator graph**: a generic state-in/state-out graph runtime
//!   ([`StateGraph`], [`Node`], conditional routing, stream events) carrying a
//!   single [`TurnState`] record through a tool-calling LLM node, a
//!   deterministic context-refresh node, and a persistence node.
//! - **The knowledge base**: a virtual file system ([`KnowledgeBase`]) with
//!   two-tier presence: summaries always projected into the context block,
//!   content loaded on demand and demoted between turns.
//!
//! Around them: the tool registry (eleven tools returning [`Command`]s with
//! state deltas and transactional durable effects), the five-stage analysis
//! pipeline ([`pipeline`]), the SQLite-backed durable store ([`store`]), and
//! deterministic summaries ([`summary`]).
//!
//! ## Main modules
//!
//! - [`graph`]: [`StateGraph`], [`CompiledStateGraph`], [`Node`], [`Next`].
//! - [`agent`]: the five turn nodes, graph wiring, and [`TurnRunner`].
//! - [`kb`]: [`KnowledgeBase`], [`ContentFetcher`], store-backed fetcher.
//! - [`tools`]: [`Tool`], [`ToolRegistry`], [`default_registry`], commands.
//! - [`pipeline`]: scrape → classify → group → estimate → summarize.
//! - [`store`]: [`AdvisorStore`] trait, [`SqliteStore`], [`DurableEffect`].
//! - [`llm`]: [`LlmClient`], [`ChatOpenAI`], [`MockLlm`].
//! - [`summary`]: deterministic templates + conversation narrative.
//! - [`stream`] / `stream-event` crate: graph chunks and client SSE events.

pub mod agent;
pub mod channels;
pub mod config;
pub mod error;
pub mod graph;
pub mod kb;
pub mod llm;
pub mod message;
pub mod pipeline;
pub mod prompts;
pub mod retry;
pub mod services;
pub mod state;
pub mod store;
pub mod stream;
pub mod summary;
pub mod tools;

#[cfg(test)]
pub(crate) mod testutil;

pub use agent::{build_turn_graph, tools_condition, TurnRequest, TurnRunner};
pub use config::RuntimeConfig;
pub use error::{AgentError, KbError, StoreError};
pub use graph::{CompiledStateGraph, Next, Node, StateGraph, END, START};
pub use kb::{ContentFetcher, KnowledgeBase, KnowledgeEntry, KnowledgeSource};
pub use llm::{ChatOpenAI, LlmClient, LlmResponse, LlmUsage, MockLlm};
pub use message::{Message, SystemTag, ToolCall};
pub use services::Services;
pub use state::{CurrentFocus, ExecutedAction, TodoItem, TodoStatus, TurnState};
pub use store::{AdvisorStore, DurableEffect, SqliteStore};
pub use stream::{StreamEvent, StreamMode};
pub use tools::{default_registry, Command, Tool, ToolRegistry, ToolSpec};
