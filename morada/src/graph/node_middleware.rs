//! Node middleware: wrap each node run with custom async logic.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::error::AgentError;

use super::Next;

/// Boxed continuation invoking the wrapped node.
pub type NodeRunFn<S> = Box<
    dyn FnOnce(S) -> Pin<Box<dyn Future<Output = Result<(S, Next), AgentError>> + Send>> + Send,
>;

/// Wraps node execution; set via [`StateGraph::with_middleware`](super::StateGraph::with_middleware).
#[async_trait]
pub trait NodeMiddleware<S>: Send + Sync
where
    S: Clone + Send + Sync + Debug + 'static,
{
    async fn around_run(
        &self,
        node_id: &str,
        state: S,
        run: NodeRunFn<S>,
    ) -> Result<(S, Next), AgentError>;
}

/// Middleware that logs node entry, exit, and failures via `tracing`.
#[derive(Debug, Clone, Default)]
pub struct LoggingNodeMiddleware;

#[async_trait]
impl<S> NodeMiddleware<S> for LoggingNodeMiddleware
where
    S: Clone + Send + Sync + Debug + 'static,
{
    async fn around_run(
        &self,
        node_id: &str,
        state: S,
        run: NodeRunFn<S>,
    ) -> Result<(S, Next), AgentError> {
        tracing::debug!(node = %node_id, "node start");
        let result = run(state).await;
        match &result {
            Ok((_, next)) => tracing::debug!(node = %node_id, ?next, "node complete"),
            Err(e) => tracing::warn!(node = %node_id, error = %e, "node failed"),
        }
        result
    }
}
