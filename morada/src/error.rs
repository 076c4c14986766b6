//! Error taxonomy for the orchestrator.
//!
//! Tool-recoverable failures ([`KbError`], invalid input) become ordinary tool
//! messages so the agent can react in its next cycle; infrastructure failures
//! bubble to the gateway and end the turn with a single error event.

use thiserror::Error;

/// Knowledge-base contract violations. Surfaced as tool errors, never crash a
/// turn. The display strings reach the model as tool-message content, so they
/// are Portuguese like the rest of the tool-error surface.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KbError {
    /// The key is not present in the index.
    #[error("chave de conhecimento desconhecida: {0}")]
    UnknownKey(String),

    /// The key is always-present and cannot be removed during a turn.
    #[error("chave de conhecimento protegida: {0}")]
    ProtectedKey(String),
}

/// Durable store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested row does not exist (or is not visible to this user).
    #[error("not found: {0}")]
    NotFound(String),

    /// A SQLite operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A row column could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound("no rows".to_string()),
            other => StoreError::Storage(other.to_string()),
        }
    }
}

/// Orchestrator execution error.
///
/// Returned by graph nodes, tools, the pipeline, and clients. The tools node
/// converts [`AgentError::is_tool_recoverable`] errors into tool messages;
/// everything else propagates out of the graph run.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Malformed request or invalid tool argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Knowledge-base violation (unknown or protected key).
    #[error(transparent)]
    Knowledge(#[from] KbError),

    /// Durable store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// LLM call failed (after retries, or not retryable).
    #[error("llm: {0}")]
    Llm(String),

    /// Upstream timeout or 5xx that exhausted its retry budget.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// Upstream 4xx; not retried.
    #[error("upstream rejected request: {0}")]
    Permanent(String),

    /// An analysis pipeline stage failed; the pipeline short-circuits.
    #[error("analysis stage '{stage}' failed: {message}")]
    PipelineStage { stage: String, message: String },

    /// The agent loop did not emit final text within the cycle ceiling.
    #[error("turn budget exceeded after {0} agent cycles")]
    TurnBudgetExceeded(u32),

    /// The client disconnected and the run was cancelled.
    #[error("run cancelled")]
    Cancelled,

    /// Graph or node failure with no more specific class.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

impl AgentError {
    /// True for failures the agent can recover from in its next cycle: they
    /// become tool messages instead of ending the turn.
    pub fn is_tool_recoverable(&self) -> bool {
        matches!(
            self,
            AgentError::InvalidInput(_)
                | AgentError::Knowledge(_)
                | AgentError::PipelineStage { .. }
        )
    }

    /// True for failures worth retrying with backoff (timeouts, 5xx).
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: KB violations and invalid input are tool-recoverable;
    /// store and LLM failures are not.
    #[test]
    fn tool_recoverable_classes() {
        assert!(AgentError::InvalidInput("bad".into()).is_tool_recoverable());
        assert!(AgentError::Knowledge(KbError::UnknownKey("x".into())).is_tool_recoverable());
        assert!(AgentError::PipelineStage {
            stage: "scrape".into(),
            message: "timeout".into()
        }
        .is_tool_recoverable());
        assert!(!AgentError::Llm("down".into()).is_tool_recoverable());
        assert!(!AgentError::Store(StoreError::Storage("locked".into())).is_tool_recoverable());
        assert!(!AgentError::TurnBudgetExceeded(12).is_tool_recoverable());
    }

    /// **Scenario**: Display strings carry enough context to log.
    #[test]
    fn display_formats() {
        let e = AgentError::Knowledge(KbError::ProtectedKey("user/profile".into()));
        assert!(e
            .to_string()
            .contains("chave de conhecimento protegida: user/profile"));

        let e = AgentError::PipelineStage {
            stage: "estimate".into(),
            message: "vision unavailable".into(),
        };
        let s = e.to_string();
        assert!(s.contains("estimate") && s.contains("vision unavailable"));
    }

    #[test]
    fn query_no_rows_maps_to_not_found() {
        let e: StoreError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(e, StoreError::NotFound(_)));
    }
}
