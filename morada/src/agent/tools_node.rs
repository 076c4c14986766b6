//! Tools: execute the agent's tool calls sequentially and apply commands.

use async_trait::async_trait;
use stream_event::ClientEvent;

use crate::error::AgentError;
use crate::graph::{Next, Node, RunContext};
use crate::message::{Message, ToolCall};
use crate::services::Services;
use crate::state::TurnState;
use crate::tools::{validate_args, Command, StateUpdates, ToolRegistry, TurnView};

/// Executes every tool call from the last assistant message, strictly in the
/// order the agent emitted them. Each command's durable effects are applied in
/// one store transaction before its state deltas; recoverable failures become
/// ordinary tool messages.
pub struct ToolsNode {
    services: Services,
    registry: ToolRegistry,
}

impl ToolsNode {
    pub fn new(services: Services, registry: ToolRegistry) -> Self {
        Self { services, registry }
    }

    fn args_summary(call: &ToolCall) -> String {
        let compact = call.arguments.replace(['\n', '\r'], " ");
        if compact.chars().count() > 80 {
            let mut s: String = compact.chars().take(77).collect();
            s.push_str("...");
            s
        } else {
            compact
        }
    }

    async fn execute_one(
        &self,
        state: &TurnState,
        call: &ToolCall,
        services: &Services,
    ) -> Result<Command, AgentError> {
        let Some(tool) = self.registry.get(&call.name) else {
            return Ok(Command::error(format!("ferramenta desconhecida: {}", call.name)));
        };

        let args: serde_json::Value = if call.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(&call.arguments) {
                Ok(v) => v,
                Err(e) => {
                    return Ok(Command::error(format!("argumentos inválidos: {}", e)));
                }
            }
        };
        if let Err(e) = validate_args(&tool.spec().input_schema, &args) {
            return Ok(Command::error(e.to_string()));
        }

        let timeout = services.config.timeout_for_tool(&call.name);
        let view = TurnView::of(state);
        let result = tokio::time::timeout(timeout, tool.call(args, &view, services)).await;
        match result {
            Err(_) => Ok(Command::error(format!(
                "a ferramenta {} excedeu o tempo limite de {:?}",
                call.name, timeout
            ))),
            Ok(Err(e)) if e.is_tool_recoverable() => Ok(Command::error(e.to_string())),
            Ok(Err(e)) => Err(e),
            Ok(Ok(command)) => Ok(command),
        }
    }
}

fn apply_updates(state: &mut TurnState, updates: StateUpdates) {
    if let Some(kb) = updates.knowledge {
        state.knowledge = kb;
    }
    if let Some(todos) = updates.todos {
        state.todos = todos;
    }
    if let Some(focus) = updates.current_focus {
        state.current_focus = focus;
    }
    state.stream_events.extend(updates.stream_events);
    state.executed_actions.extend(updates.executed_actions);
    for key in updates.touched_keys {
        state.touched_keys.insert(key);
    }
}

impl ToolsNode {
    async fn run_inner(
        &self,
        state: TurnState,
        services: &Services,
    ) -> Result<(TurnState, Next), AgentError> {
        let mut state = state;
        let calls = state.pending_tool_calls().to_vec();

        for call in calls {
            state.push_event(ClientEvent::ToolCall {
                name: call.name.clone(),
                call_id: call.id.clone(),
                summary: Self::args_summary(&call),
            });

            let command = self.execute_one(&state, &call, services).await?;
            match command {
                Command::Error { message } => {
                    tracing::debug!(tool = %call.name, error = %message, "tool returned error");
                    state
                        .messages
                        .push(Message::tool(&call.id, &call.name, format!("Erro: {}", message)));
                }
                Command::Success {
                    response_text,
                    updates,
                    effects,
                } => {
                    if !effects.is_empty() {
                        if let Err(e) =
                            services.store.apply_effects(&state.user_id, &effects).await
                        {
                            tracing::warn!(tool = %call.name, error = %e, "durable effects failed, store untouched");
                            state.messages.push(Message::tool(
                                &call.id,
                                &call.name,
                                format!("Erro: não consegui gravar as alterações ({})", e),
                            ));
                            continue;
                        }
                    }
                    apply_updates(&mut state, updates);
                    state
                        .messages
                        .push(Message::tool(&call.id, &call.name, response_text));
                }
            }
        }

        Ok((state, Next::Continue))
    }
}

#[async_trait]
impl Node<TurnState> for ToolsNode {
    fn id(&self) -> &str {
        "tools"
    }

    async fn run(&self, state: TurnState) -> Result<(TurnState, Next), AgentError> {
        self.run_inner(state, &self.services).await
    }

    /// Threads the run's cancellation token into tool executions (and through
    /// them into the pipeline and store calls).
    async fn run_with_context(
        &self,
        state: TurnState,
        ctx: &RunContext<TurnState>,
    ) -> Result<(TurnState, Next), AgentError> {
        let mut services = self.services.clone();
        services.cancel = ctx.cancel.clone();
        self.run_inner(state, &services).await
    }
}
