//! Working todo list: add, complete, list.

use async_trait::async_trait;
use serde_json::{json, Value};
use stream_event::{ClientEvent, TodoView};

use crate::error::AgentError;
use crate::services::Services;
use crate::state::{TodoItem, TodoStatus};

use super::{Command, StateUpdates, Tool, ToolSpec, TurnView};

fn todo_views(todos: &[TodoItem]) -> Vec<TodoView> {
    todos
        .iter()
        .map(|t| TodoView {
            id: t.id.clone(),
            task: t.task.clone(),
            status: t.status.as_str().to_string(),
        })
        .collect()
}

fn render_list(todos: &[TodoItem]) -> String {
    if todos.is_empty() {
        return "Sem tarefas pendentes.".to_string();
    }
    todos
        .iter()
        .map(|t| {
            let mark = match t.status {
                TodoStatus::Pending => ' ',
                TodoStatus::Done => 'x',
            };
            format!("[{}] ({}) {}", mark, t.id, t.task)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `manage_todos`: actions `add | complete | list`.
pub struct ManageTodosTool;

#[async_trait]
impl Tool for ManageTodosTool {
    fn name(&self) -> &str {
        "manage_todos"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: Some(
                "Gere a lista de tarefas da sessão: add (com task), complete (com id), list."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["add", "complete", "list"]},
                    "task": {"type": "string"},
                    "id": {"type": "string"},
                },
                "required": ["action"],
            }),
        }
    }

    async fn call(
        &self,
        args: Value,
        turn: &TurnView<'_>,
        _services: &Services,
    ) -> Result<Command, AgentError> {
        let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("");
        match action {
            "add" => {
                let Some(task) = args.get("task").and_then(|v| v.as_str()) else {
                    return Ok(Command::error("'add' precisa do campo 'task'"));
                };
                let mut todos = turn.todos.to_vec();
                let id = format!("t{}", todos.len() + 1);
                todos.push(TodoItem {
                    id: id.clone(),
                    task: task.to_string(),
                    status: TodoStatus::Pending,
                });
                let views = todo_views(&todos);
                Ok(Command::success(
                    format!("Tarefa ({}) adicionada: {}", id, task),
                    StateUpdates {
                        todos: Some(todos),
                        stream_events: vec![ClientEvent::TodoUpdate { todos: views }],
                        ..Default::default()
                    },
                    vec![],
                ))
            }
            "complete" => {
                let Some(id) = args.get("id").and_then(|v| v.as_str()) else {
                    return Ok(Command::error("'complete' precisa do campo 'id'"));
                };
                let mut todos = turn.todos.to_vec();
                let Some(todo) = todos.iter_mut().find(|t| t.id == id) else {
                    return Ok(Command::error(format!("tarefa desconhecida: {}", id)));
                };
                todo.status = TodoStatus::Done;
                let done_task = todo.task.clone();
                let views = todo_views(&todos);
                Ok(Command::success(
                    format!("Tarefa ({}) concluída: {}", id, done_task),
                    StateUpdates {
                        todos: Some(todos),
                        stream_events: vec![ClientEvent::TodoUpdate { todos: views }],
                        ..Default::default()
                    },
                    vec![],
                ))
            }
            "list" => Ok(Command::text(render_list(turn.todos))),
            other => Ok(Command::error(format!("ação desconhecida: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TurnState;
    use crate::testutil::test_services;

    /// **Scenario**: add creates a pending item and emits a todo_update event.
    #[tokio::test]
    async fn add_creates_pending_item() {
        let (_dir, services) = test_services().await;
        let state = TurnState::new("u1", Some("c1".into()), "x");
        let cmd = ManageTodosTool
            .call(
                json!({"action": "add", "task": "ver a cozinha"}),
                &TurnView::of(&state),
                &services,
            )
            .await
            .unwrap();
        let Command::Success { updates, .. } = cmd else {
            panic!("expected success")
        };
        let todos = updates.todos.unwrap();
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0].status, TodoStatus::Pending);
        assert_eq!(updates.stream_events.len(), 1);
        match &updates.stream_events[0] {
            ClientEvent::TodoUpdate { todos } => assert_eq!(todos[0].status, "pending"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    /// **Scenario**: completing an unknown id is a tool error and the list is
    /// unchanged (no updates at all).
    #[tokio::test]
    async fn complete_unknown_id_errors() {
        let (_dir, services) = test_services().await;
        let mut state = TurnState::new("u1", Some("c1".into()), "x");
        state.todos.push(TodoItem {
            id: "t1".into(),
            task: "a".into(),
            status: TodoStatus::Pending,
        });
        let cmd = ManageTodosTool
            .call(
                json!({"action": "complete", "id": "t9"}),
                &TurnView::of(&state),
                &services,
            )
            .await
            .unwrap();
        assert!(cmd.is_error());
        assert_eq!(state.todos.len(), 1);
        assert_eq!(state.todos[0].status, TodoStatus::Pending);
    }

    /// **Scenario**: complete marks done; list renders both states.
    #[tokio::test]
    async fn complete_and_list() {
        let (_dir, services) = test_services().await;
        let mut state = TurnState::new("u1", Some("c1".into()), "x");
        state.todos.push(TodoItem {
            id: "t1".into(),
            task: "ver a cozinha".into(),
            status: TodoStatus::Pending,
        });

        let cmd = ManageTodosTool
            .call(
                json!({"action": "complete", "id": "t1"}),
                &TurnView::of(&state),
                &services,
            )
            .await
            .unwrap();
        let Command::Success { updates, .. } = cmd else {
            panic!("expected success")
        };
        state.todos = updates.todos.unwrap();
        assert_eq!(state.todos[0].status, TodoStatus::Done);

        let cmd = ManageTodosTool
            .call(json!({"action": "list"}), &TurnView::of(&state), &services)
            .await
            .unwrap();
        let Command::Success { response_text, .. } = cmd else {
            panic!("expected success")
        };
        assert!(response_text.contains("[x] (t1) ver a cozinha"));
    }
}
