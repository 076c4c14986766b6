//! Compiled state graph: immutable, supports `invoke` and `stream`.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::channels::BoxedStateUpdater;
use crate::error::AgentError;
use crate::stream::{StreamEvent, StreamMode};

use super::conditional::NextEntry;
use super::node::Node;
use super::node_middleware::NodeMiddleware;
use super::state_graph::END;
use super::{Next, RunContext};

/// Immutable executable graph produced by
/// [`StateGraph::compile`](super::StateGraph::compile).
///
/// Runs from the first node; after each node the runner consults the node's
/// returned [`Next`] or the conditional router to pick the next node, merges
/// the output into state through the configured updater, and stops at END.
#[derive(Clone)]
pub struct CompiledStateGraph<S> {
    pub(super) nodes: HashMap<String, Arc<dyn Node<S>>>,
    pub(super) first_node_id: String,
    /// Node id → how to find the next node.
    pub(super) next_map: HashMap<String, NextEntry<S>>,
    pub(super) middleware: Option<Arc<dyn NodeMiddleware<S>>>,
    pub(super) state_updater: BoxedStateUpdater<S>,
}

/// A streamed graph run: the event receiver plus the handle resolving to the
/// final state.
pub struct GraphStream<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    pub events: ReceiverStream<StreamEvent<S>>,
    pub handle: tokio::task::JoinHandle<Result<S, AgentError>>,
}

impl<S> CompiledStateGraph<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    async fn execute_node(
        &self,
        node: Arc<dyn Node<S>>,
        state: S,
        ctx: &RunContext<S>,
    ) -> Result<(S, Next), AgentError> {
        if let Some(middleware) = &self.middleware {
            let node_id = node.id().to_string();
            let ctx_owned = ctx.clone();
            let node_clone = node.clone();
            middleware
                .around_run(
                    &node_id,
                    state,
                    Box::new(move |s| {
                        let node = node_clone.clone();
                        Box::pin(async move { node.run_with_context(s, &ctx_owned).await })
                    }),
                )
                .await
        } else {
            node.run_with_context(state, ctx).await
        }
    }

    /// Shared run loop used by `invoke` and `stream`: steps through nodes
    /// until END, a node error, or cancellation.
    async fn run_loop(&self, state: &mut S, ctx: &RunContext<S>) -> Result<(), AgentError> {
        let mut current_id = self.first_node_id.clone();
        loop {
            if ctx.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let node = self
                .nodes
                .get(&current_id)
                .expect("compiled graph has all nodes")
                .clone();

            let (new_state, next) = self.execute_node(node, state.clone(), ctx).await?;
            self.state_updater.apply_update(state, &new_state);

            ctx.emit_values(state.clone()).await;
            ctx.emit_updates(&current_id, state.clone()).await;

            let next_id: Option<String> =
                if let Some(NextEntry::Conditional(router)) = self.next_map.get(&current_id) {
                    let target = router.resolve_next(state);
                    tracing::debug!(from = %current_id, to = %target, "conditional routing");
                    Some(target)
                } else {
                    match next {
                        Next::End => None,
                        Next::Node(id) => Some(id),
                        Next::Continue => self.next_map.get(&current_id).and_then(|e| {
                            if let NextEntry::Unconditional(id) = e {
                                Some(id.clone())
                            } else {
                                None
                            }
                        }),
                    }
                };

            match next_id {
                None => return Ok(()),
                Some(id) if id == END => return Ok(()),
                Some(id) => current_id = id,
            }
        }
    }

    /// Runs the graph to completion and returns the final state.
    pub async fn invoke(&self, state: S) -> Result<S, AgentError> {
        self.invoke_with_cancel(state, CancellationToken::new()).await
    }

    /// Runs the graph with an external cancellation token.
    pub async fn invoke_with_cancel(
        &self,
        state: S,
        cancel: CancellationToken,
    ) -> Result<S, AgentError> {
        if self.nodes.is_empty() || !self.nodes.contains_key(&self.first_node_id) {
            return Err(AgentError::ExecutionFailed("empty graph".into()));
        }
        let ctx = RunContext::new().with_cancel(cancel);
        let mut state = state;
        self.run_loop(&mut state, &ctx).await?;
        Ok(state)
    }

    /// Runs the graph in a spawned task, streaming one event per enabled mode
    /// after each node. The returned handle resolves to the final state.
    pub fn stream(
        &self,
        state: S,
        modes: HashSet<StreamMode>,
        cancel: CancellationToken,
    ) -> GraphStream<S> {
        let (tx, rx) = mpsc::channel::<StreamEvent<S>>(64);
        let graph = self.clone();
        let handle = tokio::spawn(async move {
            let ctx = RunContext::new().with_cancel(cancel).with_stream(tx, modes);
            let mut state = state;
            graph.run_loop(&mut state, &ctx).await?;
            Ok(state)
        });
        GraphStream {
            events: ReceiverStream::new(rx),
            handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio_stream::StreamExt;

    use crate::graph::{StateGraph, START};

    #[derive(Clone, Debug, PartialEq)]
    struct CounterState {
        hits: Vec<String>,
        n: i32,
    }

    struct Bump(&'static str);

    #[async_trait]
    impl Node<CounterState> for Bump {
        fn id(&self) -> &str {
            self.0
        }
        async fn run(
            &self,
            mut state: CounterState,
        ) -> Result<(CounterState, Next), AgentError> {
            state.hits.push(self.0.to_string());
            state.n += 1;
            Ok((state, Next::Continue))
        }
    }

    fn linear_graph() -> CompiledStateGraph<CounterState> {
        let mut graph = StateGraph::new();
        graph.add_node("a", Arc::new(Bump("a")));
        graph.add_node("b", Arc::new(Bump("b")));
        graph.add_edge(START, "a");
        graph.add_edge("a", "b");
        graph.add_edge("b", END);
        graph.compile().unwrap()
    }

    /// **Scenario**: invoke runs nodes in edge order and returns the final state.
    #[tokio::test]
    async fn invoke_runs_linear_chain() {
        let graph = linear_graph();
        let out = graph
            .invoke(CounterState { hits: vec![], n: 0 })
            .await
            .unwrap();
        assert_eq!(out.hits, vec!["a", "b"]);
        assert_eq!(out.n, 2);
    }

    /// **Scenario**: conditional edges route by state; the loop terminates
    /// when the router returns END.
    #[tokio::test]
    async fn conditional_routing_loops_until_done() {
        let mut graph = StateGraph::new();
        graph.add_node("work", Arc::new(Bump("work")));
        graph.add_edge(START, "work");
        graph.add_conditional_edges(
            "work",
            Arc::new(|s: &CounterState| {
                if s.n < 3 {
                    "work".to_string()
                } else {
                    END.to_string()
                }
            }),
            None,
        );
        let graph = graph.compile().unwrap();
        let out = graph
            .invoke(CounterState { hits: vec![], n: 0 })
            .await
            .unwrap();
        assert_eq!(out.n, 3);
        assert_eq!(out.hits.len(), 3);
    }

    /// **Scenario**: stream emits one Updates event per node, then the handle
    /// resolves with the final state.
    #[tokio::test]
    async fn stream_emits_updates_per_node() {
        let graph = linear_graph();
        let run = graph.stream(
            CounterState { hits: vec![], n: 0 },
            [StreamMode::Updates].into_iter().collect(),
            CancellationToken::new(),
        );
        let events: Vec<_> = run.events.collect().await;
        assert_eq!(events.len(), 2);
        match &events[0] {
            StreamEvent::Updates { node_id, state } => {
                assert_eq!(node_id, "a");
                assert_eq!(state.n, 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        let final_state = run.handle.await.unwrap().unwrap();
        assert_eq!(final_state.n, 2);
    }

    /// **Scenario**: a pre-cancelled token stops the run before any node.
    #[tokio::test]
    async fn cancelled_run_returns_cancelled() {
        let graph = linear_graph();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = graph
            .invoke_with_cancel(CounterState { hits: vec![], n: 0 }, cancel)
            .await;
        assert!(matches!(out, Err(AgentError::Cancelled)));
    }

    /// **Scenario**: node errors propagate out of invoke.
    #[tokio::test]
    async fn node_error_propagates() {
        struct Failing;
        #[async_trait]
        impl Node<CounterState> for Failing {
            fn id(&self) -> &str {
                "failing"
            }
            async fn run(
                &self,
                _state: CounterState,
            ) -> Result<(CounterState, Next), AgentError> {
                Err(AgentError::ExecutionFailed("boom".into()))
            }
        }
        let mut graph = StateGraph::new();
        graph.add_node("failing", Arc::new(Failing));
        graph.add_edge(START, "failing");
        graph.add_edge("failing", END);
        let graph = graph.compile().unwrap();
        let out = graph.invoke(CounterState { hits: vec![], n: 0 }).await;
        assert!(matches!(out, Err(AgentError::ExecutionFailed(_))));
    }

    /// **Scenario**: middleware wraps every node run.
    #[tokio::test]
    async fn middleware_wraps_nodes() {
        use crate::graph::LoggingNodeMiddleware;
        let mut graph = StateGraph::new();
        graph.add_node("a", Arc::new(Bump("a")));
        graph.add_edge(START, "a");
        graph.add_edge("a", END);
        let graph = graph
            .with_middleware(Arc::new(LoggingNodeMiddleware))
            .compile()
            .unwrap();
        let out = graph
            .invoke(CounterState { hits: vec![], n: 0 })
            .await
            .unwrap();
        assert_eq!(out.hits, vec!["a"]);
    }
}
