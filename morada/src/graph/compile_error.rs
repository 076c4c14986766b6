//! Graph compilation errors.

use thiserror::Error;

/// Returned by [`StateGraph::compile`](super::StateGraph::compile) when the
/// declared nodes and edges do not form a runnable graph.
#[derive(Debug, Error)]
pub enum CompilationError {
    /// An edge references a node id that was never added.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// No edge from START.
    #[error("missing edge from START")]
    MissingStart,

    /// No path reaches END.
    #[error("no edge or conditional path reaches END")]
    MissingEnd,

    /// Edges do not form a valid chain (branch without conditional, cycle
    /// without conditional, multiple START edges).
    #[error("invalid chain: {0}")]
    InvalidChain(String),

    /// A conditional path map targets a node that does not exist.
    #[error("conditional path map targets unknown node: {0}")]
    InvalidConditionalPathMap(String),

    /// A node has both a plain outgoing edge and conditional edges.
    #[error("node has both an edge and conditional edges: {0}")]
    NodeHasBothEdgeAndConditional(String),
}
