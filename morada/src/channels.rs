//! State-update strategies for graph execution.
//!
//! By default a node's return value replaces the whole state
//! ([`ReplaceUpdater`]); [`FieldBasedUpdater`] lets a graph merge per field
//! (e.g. append one list, replace the rest).

use std::fmt::Debug;
use std::sync::Arc;

/// Controls how a node's output is merged into the current state.
pub trait StateUpdater<S>: Send + Sync + Debug
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Merges `update` (the node's output) into `current`.
    fn apply_update(&self, current: &mut S, update: &S);
}

/// Default updater: the node output replaces the entire state.
#[derive(Debug, Clone, Default)]
pub struct ReplaceUpdater;

impl<S> StateUpdater<S> for ReplaceUpdater
where
    S: Clone + Send + Sync + Debug + 'static,
{
    fn apply_update(&self, current: &mut S, update: &S) {
        *current = update.clone();
    }
}

/// Applies updates through a caller-provided merge function, so different
/// fields can use different strategies.
pub struct FieldBasedUpdater<S, F>
where
    S: Clone + Send + Sync + Debug + 'static,
    F: Fn(&mut S, &S) + Send + Sync + 'static,
{
    updater_fn: F,
    _marker: std::marker::PhantomData<S>,
}

impl<S, F> FieldBasedUpdater<S, F>
where
    S: Clone + Send + Sync + Debug + 'static,
    F: Fn(&mut S, &S) + Send + Sync + 'static,
{
    pub fn new(updater_fn: F) -> Self {
        Self {
            updater_fn,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<S, F> Debug for FieldBasedUpdater<S, F>
where
    S: Clone + Send + Sync + Debug + 'static,
    F: Fn(&mut S, &S) + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldBasedUpdater")
            .field("updater_fn", &"<fn>")
            .finish()
    }
}

impl<S, F> StateUpdater<S> for FieldBasedUpdater<S, F>
where
    S: Clone + Send + Sync + Debug + 'static,
    F: Fn(&mut S, &S) + Send + Sync + 'static,
{
    fn apply_update(&self, current: &mut S, update: &S) {
        (self.updater_fn)(current, update);
    }
}

/// Boxed updater stored by the graph.
pub type BoxedStateUpdater<S> = Arc<dyn StateUpdater<S>>;

/// Convenience: wraps an updater in an `Arc`.
pub fn boxed_updater<S, U>(updater: U) -> BoxedStateUpdater<S>
where
    S: Clone + Send + Sync + Debug + 'static,
    U: StateUpdater<S> + 'static,
{
    Arc::new(updater)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct S {
        log: Vec<String>,
        n: i32,
    }

    /// **Scenario**: ReplaceUpdater swaps the whole state.
    #[test]
    fn replace_updater_replaces() {
        let mut current = S {
            log: vec!["a".into()],
            n: 1,
        };
        let update = S {
            log: vec!["b".into()],
            n: 2,
        };
        ReplaceUpdater.apply_update(&mut current, &update);
        assert_eq!(current, update);
    }

    /// **Scenario**: FieldBasedUpdater can append one field and replace another.
    #[test]
    fn field_based_updater_merges_per_field() {
        let updater = FieldBasedUpdater::new(|current: &mut S, update: &S| {
            current.log.extend(update.log.iter().cloned());
            current.n = update.n;
        });
        let mut current = S {
            log: vec!["a".into()],
            n: 1,
        };
        let update = S {
            log: vec!["b".into()],
            n: 7,
        };
        updater.apply_update(&mut current, &update);
        assert_eq!(current.log, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(current.n, 7);
    }
}
