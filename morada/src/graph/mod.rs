//! State graph: nodes + explicit edges, conditional routing, compile and run.
//!
//! Build with `add_node` / `add_edge(from, to)` using [`START`] and [`END`],
//! optionally `add_conditional_edges` for state-based routing, then
//! [`StateGraph::compile`] to get an immutable [`CompiledStateGraph`] that
//! supports `invoke` and `stream`.

mod compile_error;
mod compiled;
mod conditional;
mod next;
mod node;
mod node_middleware;
mod run_context;
mod state_graph;

pub use compile_error::CompilationError;
pub use compiled::{CompiledStateGraph, GraphStream};
pub use conditional::{ConditionalRouter, ConditionalRouterFn, NextEntry};
pub use next::Next;
pub use node::Node;
pub use node_middleware::{LoggingNodeMiddleware, NodeMiddleware};
pub use run_context::RunContext;
pub use state_graph::{StateGraph, END, START};
