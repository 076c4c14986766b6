//! Reflect: pure regeneration of the context block after tool execution.

use async_trait::async_trait;

use crate::error::AgentError;
use crate::graph::{Next, Node};
use crate::message::Message;
use crate::state::TurnState;

/// Rebuilds the context-block text from the current knowledge, todos, and
/// focus, replacing the single `context_refresh` system message in place. No
/// LLM call, no I/O.
pub struct ReflectNode;

#[async_trait]
impl Node<TurnState> for ReflectNode {
    fn id(&self) -> &str {
        "reflect"
    }

    async fn run(&self, state: TurnState) -> Result<(TurnState, Next), AgentError> {
        let mut state = state;
        let rendered = state
            .knowledge
            .render(&state.todos, state.current_focus.as_ref());

        match state.messages.iter().position(|m| m.is_context_refresh()) {
            Some(index) => state.messages[index] = Message::context_refresh(rendered),
            None => {
                // Keep the persona prompt first.
                let at = usize::from(!state.messages.is_empty());
                state.messages.insert(at, Message::context_refresh(rendered));
            }
        }
        Ok((state, Next::Continue))
    }
}
