//! Tool registry: the eleven tools the agent can invoke.
//!
//! Each tool has a JSON-schema spec (what the LLM sees), and an execution
//! function receiving validated args, a read-only view of the turn, and the
//! injected services. Tools return [`Command`]s; they never mutate state or
//! the store themselves.

mod analysis;
mod command;
mod navigation;
mod portfolio;
mod profile;
mod todos;

pub use analysis::{RecalculateCostsTool, TriggerPropertyAnalysisTool};
pub use command::{Command, StateUpdates};
pub use navigation::{ReadContextTool, RemoveContextTool, WriteContextTool};
pub use portfolio::{
    RemoveFromPortfolioTool, SaveToPortfolioTool, SearchPortfolioTool, SwitchActivePropertyTool,
};
pub use profile::UpdateUserProfileTool;
pub use todos::ManageTodosTool;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AgentError;
use crate::kb::KnowledgeBase;
use crate::services::Services;
use crate::state::{CurrentFocus, TodoItem, TurnState};
use crate::store::PortfolioEntry;
use crate::summary;

/// Tool name, description, and input schema, as advertised to the LLM.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Read-only view of the turn handed to tools.
pub struct TurnView<'a> {
    pub user_id: &'a str,
    pub conversation_id: &'a str,
    pub incoming: &'a str,
    pub knowledge: &'a KnowledgeBase,
    pub todos: &'a [TodoItem],
    pub current_focus: Option<&'a CurrentFocus>,
}

impl<'a> TurnView<'a> {
    pub fn of(state: &'a TurnState) -> Self {
        Self {
            user_id: &state.user_id,
            conversation_id: &state.conversation_id,
            incoming: &state.incoming,
            knowledge: &state.knowledge,
            todos: &state.todos,
            current_focus: state.current_focus.as_ref(),
        }
    }
}

/// A single tool the agent may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name, used for dispatch and in the LLM tool list.
    fn name(&self) -> &str;

    /// Spec advertised to the LLM; args are validated against its schema
    /// before [`Tool::call`] runs.
    fn spec(&self) -> ToolSpec;

    /// Executes the tool. Recoverable failures should come back as
    /// [`Command::Error`]; infrastructure failures as `Err`.
    async fn call(
        &self,
        args: Value,
        turn: &TurnView<'_>,
        services: &Services,
    ) -> Result<Command, AgentError>;
}

/// Explicit list of registered tools.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.tools.push(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// The full production registry: all eleven tools.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(ReadContextTool))
        .register(Arc::new(WriteContextTool))
        .register(Arc::new(RemoveContextTool))
        .register(Arc::new(ManageTodosTool))
        .register(Arc::new(UpdateUserProfileTool))
        .register(Arc::new(SaveToPortfolioTool))
        .register(Arc::new(RemoveFromPortfolioTool))
        .register(Arc::new(SwitchActivePropertyTool))
        .register(Arc::new(SearchPortfolioTool))
        .register(Arc::new(TriggerPropertyAnalysisTool))
        .register(Arc::new(RecalculateCostsTool));
    registry
}

/// Minimal JSON-schema validation: `required` membership plus primitive type
/// and `enum` checks on declared properties.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), AgentError> {
    let obj = args
        .as_object()
        .ok_or_else(|| AgentError::InvalidInput("arguments must be a JSON object".into()))?;

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required {
            let key = key.as_str().unwrap_or_default();
            if !obj.contains_key(key) {
                return Err(AgentError::InvalidInput(format!(
                    "missing required argument '{}'",
                    key
                )));
            }
        }
    }

    let props = schema.get("properties").and_then(|p| p.as_object());
    if let Some(props) = props {
        for (key, value) in obj {
            let Some(prop) = props.get(key) else { continue };
            if let Some(expected) = prop.get("type").and_then(|t| t.as_str()) {
                let ok = match expected {
                    "string" => value.is_string(),
                    "integer" => value.is_i64() || value.is_u64(),
                    "number" => value.is_number(),
                    "boolean" => value.is_boolean(),
                    "object" => value.is_object(),
                    "array" => value.is_array(),
                    _ => true,
                };
                if !ok {
                    return Err(AgentError::InvalidInput(format!(
                        "argument '{}' must be of type {}",
                        key, expected
                    )));
                }
            }
            if let Some(allowed) = prop.get("enum").and_then(|e| e.as_array()) {
                if !allowed.contains(value) {
                    return Err(AgentError::InvalidInput(format!(
                        "argument '{}' must be one of {}",
                        key,
                        serde_json::to_string(allowed).unwrap_or_default()
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Rewrites the `portfolio/index` entry from a fresh portfolio listing.
pub(crate) fn refresh_portfolio_index(kb: &mut KnowledgeBase, entries: &[PortfolioEntry]) {
    kb.write(
        "portfolio/index",
        Some(&summary::portfolio_index_summary(entries)),
        Some(&summary::portfolio_index_content(entries)),
        crate::kb::KnowledgeSource::Store,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: the default registry carries exactly the eleven tools.
    #[test]
    fn default_registry_has_eleven_tools() {
        let registry = default_registry();
        assert_eq!(registry.len(), 11);
        for name in [
            "read_context",
            "write_context",
            "remove_context",
            "manage_todos",
            "update_user_profile",
            "save_to_portfolio",
            "remove_from_portfolio",
            "switch_active_property",
            "search_portfolio",
            "trigger_property_analysis",
            "recalculate_costs",
        ] {
            assert!(registry.get(name).is_some(), "missing tool {}", name);
            let spec = registry.get(name).unwrap().spec();
            assert_eq!(spec.name, name);
            assert!(spec.input_schema.get("type").is_some());
        }
    }

    /// **Scenario**: validation enforces required keys, primitive types, and
    /// enums; extra undeclared keys pass through.
    #[test]
    fn validate_args_rules() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "key": {"type": "string"},
                "lines": {"type": "integer"},
                "action": {"type": "string", "enum": ["add", "complete", "list"]},
            },
            "required": ["key"],
        });

        assert!(validate_args(&schema, &serde_json::json!({"key": "a"})).is_ok());
        assert!(validate_args(&schema, &serde_json::json!({})).is_err());
        assert!(validate_args(&schema, &serde_json::json!({"key": 7})).is_err());
        assert!(
            validate_args(&schema, &serde_json::json!({"key": "a", "lines": "x"})).is_err()
        );
        assert!(
            validate_args(&schema, &serde_json::json!({"key": "a", "action": "drop"})).is_err()
        );
        assert!(validate_args(
            &schema,
            &serde_json::json!({"key": "a", "action": "add", "extra": true})
        )
        .is_ok());
        assert!(validate_args(&schema, &serde_json::json!("not an object")).is_err());
    }
}
