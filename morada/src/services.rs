//! Explicit service bundle injected into nodes and tools. No globals: clients
//! are created at process start and handed down at invocation time.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::llm::LlmClient;
use crate::pipeline::{ListingScraper, VisionClient};
use crate::store::{ActionLogEntry, AdvisorStore};

/// Action-log entries whose write failed after the mutation committed; kept
/// for later retry instead of failing the turn.
#[derive(Default)]
pub struct ActionRetryQueue {
    entries: tokio::sync::Mutex<Vec<ActionLogEntry>>,
}

impl ActionRetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, entry: ActionLogEntry) {
        self.entries.lock().await.push(entry);
    }

    pub async fn drain(&self) -> Vec<ActionLogEntry> {
        std::mem::take(&mut *self.entries.lock().await)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

/// Everything a node or tool may need, passed explicitly.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn AdvisorStore>,
    pub llm: Arc<dyn LlmClient>,
    pub vision: Arc<dyn VisionClient>,
    pub scraper: Arc<dyn ListingScraper>,
    pub config: RuntimeConfig,
    /// Cancellation for the current request; a child token per turn.
    pub cancel: CancellationToken,
    pub action_retries: Arc<ActionRetryQueue>,
}

impl Services {
    pub fn new(
        store: Arc<dyn AdvisorStore>,
        llm: Arc<dyn LlmClient>,
        vision: Arc<dyn VisionClient>,
        scraper: Arc<dyn ListingScraper>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            store,
            llm,
            vision,
            scraper,
            config,
            cancel: CancellationToken::new(),
            action_retries: Arc::new(ActionRetryQueue::new()),
        }
    }

    /// Per-request view: same clients, child cancellation token.
    pub fn for_request(&self) -> Self {
        let mut cloned = self.clone();
        cloned.cancel = self.cancel.child_token();
        cloned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retry_queue_push_and_drain() {
        let q = ActionRetryQueue::new();
        assert!(q.is_empty().await);
        q.push(ActionLogEntry {
            id: "a".into(),
            user_id: "u".into(),
            conversation_id: "c".into(),
            message_id: None,
            action_type: "t".into(),
            entity_type: "e".into(),
            entity_id: "id".into(),
            field_changed: None,
            old_value: None,
            new_value: None,
            trigger_message: None,
            confidence: 1.0,
            confirmed_by_user: false,
            timestamp: "now".into(),
        })
        .await;
        assert_eq!(q.len().await, 1);
        let drained = q.drain().await;
        assert_eq!(drained.len(), 1);
        assert!(q.is_empty().await);
    }
}
