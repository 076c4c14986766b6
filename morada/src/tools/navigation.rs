//! Navigation tools: read, write, and remove knowledge entries.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::AgentError;
use crate::kb::{KnowledgeSource, StoreContentFetcher};
use crate::services::Services;

use super::{Command, StateUpdates, Tool, ToolSpec, TurnView};

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

fn arg_usize(args: &Value, key: &str) -> Option<usize> {
    args.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
}

/// Loads content for a knowledge key, optionally a line range.
pub struct ReadContextTool;

#[async_trait]
impl Tool for ReadContextTool {
    fn name(&self) -> &str {
        "read_context"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: Some(
                "Carrega o conteúdo de uma entrada da base de conhecimento. \
                 Opcionalmente só um intervalo de linhas (start_line é 1-based)."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string", "description": "Chave, p.ex. user/fiscal ou portfolio/<id>/analise"},
                    "start_line": {"type": "integer"},
                    "num_lines": {"type": "integer"},
                },
                "required": ["key"],
            }),
        }
    }

    async fn call(
        &self,
        args: Value,
        turn: &TurnView<'_>,
        services: &Services,
    ) -> Result<Command, AgentError> {
        let key = arg_str(&args, "key").unwrap_or_default().to_string();
        let start_line = arg_usize(&args, "start_line");
        let num_lines = arg_usize(&args, "num_lines");

        let mut kb = turn.knowledge.clone();
        let fetcher = StoreContentFetcher::new(services.store.clone(), turn.user_id);
        match kb.load(&key, start_line, num_lines, &fetcher).await {
            Ok(()) => {}
            Err(e) if e.is_tool_recoverable() => return Ok(Command::error(e.to_string())),
            Err(e) => return Err(e),
        }

        let entry = kb.get(&key).expect("loaded above");
        let header = if entry.lines_loaded < entry.total_lines {
            format!(
                "{} (linhas {} de {})\n\n",
                key, entry.lines_loaded, entry.total_lines
            )
        } else {
            format!("{}\n\n", key)
        };
        let body = entry.content.clone().unwrap_or_default();

        Ok(Command::success(
            format!("{}{}", header, body),
            StateUpdates {
                knowledge: Some(kb),
                touched_keys: vec![key],
                ..Default::default()
            },
            vec![],
        ))
    }
}

/// Creates or overwrites a derived knowledge entry.
pub struct WriteContextTool;

#[async_trait]
impl Tool for WriteContextTool {
    fn name(&self) -> &str {
        "write_context"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: Some(
                "Guarda uma entrada derivada na base de conhecimento (notas, comparações, cálculos)."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string", "description": "Chave nova ou existente, p.ex. notes/comparacao"},
                    "summary": {"type": "string"},
                    "content": {"type": "string"},
                },
                "required": ["key", "summary"],
            }),
        }
    }

    async fn call(
        &self,
        args: Value,
        turn: &TurnView<'_>,
        _services: &Services,
    ) -> Result<Command, AgentError> {
        let key = arg_str(&args, "key").unwrap_or_default().to_string();
        let summary = arg_str(&args, "summary").unwrap_or_default().to_string();
        let content = arg_str(&args, "content");

        if key.is_empty() {
            return Ok(Command::error("a chave não pode ser vazia"));
        }

        let mut kb = turn.knowledge.clone();
        kb.write(&key, Some(&summary), content, KnowledgeSource::Tool);

        Ok(Command::success(
            format!("Guardado em {}.", key),
            StateUpdates {
                knowledge: Some(kb),
                touched_keys: vec![key],
                ..Default::default()
            },
            vec![],
        ))
    }
}

/// Removes a non-protected knowledge entry.
pub struct RemoveContextTool;

#[async_trait]
impl Tool for RemoveContextTool {
    fn name(&self) -> &str {
        "remove_context"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: Some(
                "Remove uma entrada da base de conhecimento. Chaves de sistema não podem ser removidas."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string"},
                },
                "required": ["key"],
            }),
        }
    }

    async fn call(
        &self,
        args: Value,
        turn: &TurnView<'_>,
        _services: &Services,
    ) -> Result<Command, AgentError> {
        let key = arg_str(&args, "key").unwrap_or_default().to_string();
        let mut kb = turn.knowledge.clone();
        match kb.remove(&key) {
            Ok(()) => Ok(Command::success(
                format!("Removido {}.", key),
                StateUpdates {
                    knowledge: Some(kb),
                    ..Default::default()
                },
                vec![],
            )),
            Err(e) => Ok(Command::error(e.to_string())),
        }
    }
}
