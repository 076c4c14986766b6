//! Run context passed into nodes: streaming sender, modes, cancellation.

use std::collections::HashSet;
use std::fmt::Debug;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::stream::{StreamEvent, StreamMode};

/// Per-run context handed to every node.
///
/// Carries the optional stream sender with its enabled modes and the
/// cancellation token for the run. Long operations inside nodes should check
/// [`RunContext::is_cancelled`] between suspension points.
#[derive(Clone)]
pub struct RunContext<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Sender for streamed events; `None` on plain `invoke`.
    pub stream_tx: Option<mpsc::Sender<StreamEvent<S>>>,
    /// Enabled stream modes.
    pub stream_mode: HashSet<StreamMode>,
    /// Cancellation for the whole run (client disconnect).
    pub cancel: CancellationToken,
}

impl<S> RunContext<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Context without streaming.
    pub fn new() -> Self {
        Self {
            stream_tx: None,
            stream_mode: HashSet::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_stream(
        mut self,
        tx: mpsc::Sender<StreamEvent<S>>,
        modes: HashSet<StreamMode>,
    ) -> Self {
        self.stream_tx = Some(tx);
        self.stream_mode = modes;
        self
    }

    /// True when the run has been cancelled (client gone).
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Emits a full-state snapshot when `Values` mode is enabled.
    pub async fn emit_values(&self, state: S) -> bool {
        if !self.stream_mode.contains(&StreamMode::Values) {
            return false;
        }
        match &self.stream_tx {
            Some(tx) => tx.send(StreamEvent::Values(state)).await.is_ok(),
            None => false,
        }
    }

    /// Emits a node update when `Updates` mode is enabled.
    pub async fn emit_updates(&self, node_id: impl Into<String>, state: S) -> bool {
        if !self.stream_mode.contains(&StreamMode::Updates) {
            return false;
        }
        match &self.stream_tx {
            Some(tx) => tx
                .send(StreamEvent::Updates {
                    node_id: node_id.into(),
                    state,
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Emits a custom JSON payload when `Custom` mode is enabled (non-blocking).
    pub fn try_emit_custom(&self, value: serde_json::Value) -> bool {
        if !self.stream_mode.contains(&StreamMode::Custom) {
            return false;
        }
        match &self.stream_tx {
            Some(tx) => tx.try_send(StreamEvent::Custom(value)).is_ok(),
            None => false,
        }
    }
}

impl<S> Default for RunContext<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Debug for RunContext<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("has_stream", &self.stream_tx.is_some())
            .field("stream_mode", &self.stream_mode)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
