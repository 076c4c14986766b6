//! Streaming types for graph runs.
//!
//! A streamed run emits one [`StreamEvent`] per enabled [`StreamMode`] after
//! each node: the full state (`Values`), the node id plus state (`Updates`),
//! or ad-hoc JSON (`Custom`). The gateway consumes `Updates` chunks and diffs
//! the state's client-event queue against what it has already sent.

use serde_json::Value;
use std::fmt::Debug;

/// Which event kinds a streamed run emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamMode {
    /// Full state snapshot after each node completes.
    Values,
    /// Node id plus state after that node.
    Updates,
    /// Ad-hoc JSON payloads emitted by nodes.
    Custom,
}

/// One streamed event from a graph run.
#[derive(Clone, Debug)]
pub enum StreamEvent<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Full state snapshot after a node finished.
    Values(S),
    /// Incremental update: which node ran and the state after it.
    Updates { node_id: String, state: S },
    /// Custom JSON payload.
    Custom(Value),
}
