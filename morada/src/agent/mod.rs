//! The orchestrator graph: hydrate → agent ⇄ (tools → reflect) → post-process.

mod agent_node;
mod hydrate;
mod post_process;
mod reflect;
mod runner;
mod tools_node;

pub use agent_node::AgentNode;
pub use hydrate::HydrateNode;
pub use post_process::PostProcessNode;
pub use reflect::ReflectNode;
pub use runner::{TurnRequest, TurnRunner};
pub use tools_node::ToolsNode;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AgentError;
use crate::graph::{CompiledStateGraph, LoggingNodeMiddleware, StateGraph, END, START};
use crate::services::Services;
use crate::state::TurnState;
use crate::tools::ToolRegistry;

/// Routing after the agent node: tool calls go to the tools node, final text
/// to post-process.
pub fn tools_condition(state: &TurnState) -> String {
    if state.pending_tool_calls().is_empty() {
        "post_process".to_string()
    } else {
        "tools".to_string()
    }
}

/// Compiles the five-node turn graph.
///
/// Routing: `START → hydrate → agent`; `agent → tools` when the last message
/// has tool calls, else `agent → post_process`; `tools → reflect → agent`;
/// `post_process → END`.
pub fn build_turn_graph(
    services: Services,
    registry: ToolRegistry,
) -> Result<CompiledStateGraph<TurnState>, AgentError> {
    let mut graph = StateGraph::new();
    graph.add_node("hydrate", Arc::new(HydrateNode::new(services.clone())));
    graph.add_node("agent", Arc::new(AgentNode::new(services.clone())));
    graph.add_node(
        "tools",
        Arc::new(ToolsNode::new(services.clone(), registry)),
    );
    graph.add_node("reflect", Arc::new(ReflectNode));
    graph.add_node("post_process", Arc::new(PostProcessNode::new(services)));

    graph.add_edge(START, "hydrate");
    graph.add_edge("hydrate", "agent");
    graph.add_edge("tools", "reflect");
    graph.add_edge("reflect", "agent");
    graph.add_edge("post_process", END);
    graph.add_conditional_edges(
        "agent",
        Arc::new(tools_condition),
        Some(HashMap::from([
            ("tools".to_string(), "tools".to_string()),
            ("post_process".to_string(), "post_process".to_string()),
        ])),
    );

    graph
        .with_middleware(Arc::new(LoggingNodeMiddleware))
        .compile()
        .map_err(|e| AgentError::ExecutionFailed(format!("turn graph: {}", e)))
}
