//! Graph node trait: one step in a state graph.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::AgentError;

use super::{Next, RunContext};

/// One step in a graph: state in, (state out, next step).
///
/// The runner uses the returned [`Next`] to choose the next node (Continue =
/// declared edges, Node(id) = jump, End = stop). Nodes with conditional edges
/// have their `Next` ignored in favor of the router.
#[async_trait]
pub trait Node<S>: Send + Sync
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Node id (e.g. `"agent"`, `"tools"`). Unique within a graph.
    fn id(&self) -> &str;

    /// One step: state in, (state out, next step).
    async fn run(&self, state: S) -> Result<(S, Next), AgentError>;

    /// Variant with run context (streaming, cancellation). Default delegates
    /// to [`Node::run`].
    async fn run_with_context(
        &self,
        state: S,
        _ctx: &RunContext<S>,
    ) -> Result<(S, Next), AgentError> {
        self.run(state).await
    }
}
