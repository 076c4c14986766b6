//! Conditional edges: route to the next node based on state.
//!
//! A source node owns a routing function `(state) -> key`; the key is either
//! used directly as the next node id or looked up in an optional path map.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Router function: reads the state, returns a routing key.
pub type ConditionalRouterFn<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

/// Conditional edge definition: routing function plus optional path map.
///
/// - `path_map` `None`: the router's return value is the next node id.
/// - `path_map` `Some(map)`: the return value is the key; next node is
///   `map[key]` if present, otherwise the key itself.
#[derive(Clone)]
pub struct ConditionalRouter<S> {
    pub(super) path: ConditionalRouterFn<S>,
    pub(super) path_map: Option<HashMap<String, String>>,
}

impl<S> ConditionalRouter<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    pub fn new(path: ConditionalRouterFn<S>, path_map: Option<HashMap<String, String>>) -> Self {
        Self { path, path_map }
    }

    /// Resolves the next node id (or END) from the current state.
    pub fn resolve_next(&self, state: &S) -> String {
        let key = (self.path)(state);
        self.path_map
            .as_ref()
            .and_then(|m| m.get(&key))
            .cloned()
            .unwrap_or(key)
    }
}

/// How to find the next node after a given node runs.
#[derive(Clone)]
pub enum NextEntry<S> {
    /// Single fixed next node (or END); the node's own `Next` is still respected.
    Unconditional(String),
    /// Router decides from state; the node's own `Next` is ignored.
    Conditional(ConditionalRouter<S>),
}
