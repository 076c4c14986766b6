//! Knowledge base: a virtual file system with two-tier presence.
//!
//! Every entry always projects its `summary` into the rendered context block;
//! `content` is loaded on demand and demoted between turns. Always-present
//! keys are pinned at hydrate in their declared order and cannot be removed
//! for the rest of the turn.
//!
//! Operations are state-in/state-out on `&mut self` and keep three invariants:
//! every pinned key stays indexed, `lines_loaded ≤ total_lines`, and
//! `content == None ⇔ lines_loaded == 0`.

mod fetcher;

pub use fetcher::StoreContentFetcher;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::error::{AgentError, KbError};
use crate::state::{CurrentFocus, TodoItem, TodoStatus};

/// Where an entry's content comes from when loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum KnowledgeSource {
    Store,
    Tool,
    Pipeline,
}

/// One indexed entry: summary always present, content on demand.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct KnowledgeEntry {
    pub summary: String,
    /// `None` means indexed but not loaded.
    pub content: Option<String>,
    pub lines_loaded: usize,
    pub total_lines: usize,
    pub source: KnowledgeSource,
}

impl KnowledgeEntry {
    fn summary_only(summary: impl Into<String>, source: KnowledgeSource) -> Self {
        Self {
            summary: summary.into(),
            content: None,
            lines_loaded: 0,
            total_lines: 0,
            source,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.content.is_some()
    }

    fn is_fully_loaded(&self) -> bool {
        self.total_lines > 0 && self.lines_loaded == self.total_lines
    }
}

/// Provides the bytes behind a key when [`KnowledgeBase::load`] is called for
/// an entry whose content lives in the durable store.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<String, AgentError>;
}

/// The per-turn knowledge base.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    entries: BTreeMap<String, KnowledgeEntry>,
    /// Always-present keys in declared render order; set at hydrate,
    /// immutable for the turn.
    pinned: Vec<String>,
    /// Below this many total lines a ranged load falls back to a full load.
    min_lines_for_partial_read: usize,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::new(40)
    }
}

impl KnowledgeBase {
    pub fn new(min_lines_for_partial_read: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            pinned: Vec::new(),
            min_lines_for_partial_read,
        }
    }

    /// Indexes an always-present key in declared order, optionally with
    /// content already loaded. Re-pinning an existing key is a no-op on order.
    pub fn pin(
        &mut self,
        key: impl Into<String>,
        summary: impl Into<String>,
        content: Option<&str>,
        source: KnowledgeSource,
    ) {
        let key = key.into();
        if !self.pinned.contains(&key) {
            self.pinned.push(key.clone());
        }
        let mut entry = KnowledgeEntry::summary_only(summary, source);
        // Empty content stays indexed-only so `content == None ⇔ lines == 0` holds.
        if let Some(c) = content.filter(|c| !c.is_empty()) {
            let lines = line_count(c);
            entry.content = Some(c.to_string());
            entry.lines_loaded = lines;
            entry.total_lines = lines;
        }
        self.entries.insert(key, entry);
    }

    /// Indexes an available-only key (summary only, content on demand).
    pub fn index(
        &mut self,
        key: impl Into<String>,
        summary: impl Into<String>,
        source: KnowledgeSource,
    ) {
        self.entries
            .insert(key.into(), KnowledgeEntry::summary_only(summary, source));
    }

    /// Always-present keys in their declared order.
    pub fn pinned_keys(&self) -> &[String] {
        &self.pinned
    }

    /// Always-present keys as a set (the demotion-protected set).
    pub fn protected_set(&self) -> BTreeSet<String> {
        self.pinned.iter().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<&KnowledgeEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Loads content for `key` from its source, honoring a partial range.
    ///
    /// No-op when the entry is already fully loaded. `start_line` is 1-based.
    /// Ranges below the partial-read threshold load the full entry. Fails with
    /// [`KbError::UnknownKey`] when the key is not indexed.
    pub async fn load(
        &mut self,
        key: &str,
        start_line: Option<usize>,
        num_lines: Option<usize>,
        fetcher: &dyn ContentFetcher,
    ) -> Result<(), AgentError> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| KbError::UnknownKey(key.to_string()))?;
        if entry.is_fully_loaded() {
            return Ok(());
        }

        let full = fetcher.fetch(key).await?;
        let total = line_count(&full);

        let use_range = start_line.is_some() || num_lines.is_some();
        let entry = self.entries.get_mut(key).expect("checked above");
        if total == 0 {
            entry.content = None;
            entry.lines_loaded = 0;
            entry.total_lines = 0;
            return Ok(());
        }
        if !use_range || total < self.min_lines_for_partial_read {
            entry.content = Some(full);
            entry.lines_loaded = total;
            entry.total_lines = total;
            return Ok(());
        }

        let start = start_line.unwrap_or(1).max(1);
        let n = num_lines.unwrap_or(total);
        let slice: Vec<&str> = full.lines().skip(start - 1).take(n).collect();
        let loaded = slice.len();
        if loaded == 0 {
            return Err(AgentError::InvalidInput(format!(
                "range starts past the end of '{}' ({} lines)",
                key, total
            )));
        }
        entry.content = Some(slice.join("\n"));
        entry.lines_loaded = loaded;
        entry.total_lines = total;
        Ok(())
    }

    /// Clears content and resets `lines_loaded`; the entry and its summary
    /// remain indexed.
    pub fn offload(&mut self, key: &str) -> Result<(), KbError> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| KbError::UnknownKey(key.to_string()))?;
        entry.content = None;
        entry.lines_loaded = 0;
        Ok(())
    }

    /// Upserts an entry. A `None` summary preserves the existing summary
    /// (empty string for a new key). Supplied content counts as fully loaded.
    pub fn write(
        &mut self,
        key: impl Into<String>,
        summary: Option<&str>,
        content: Option<&str>,
        source: KnowledgeSource,
    ) {
        let key = key.into();
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| KnowledgeEntry::summary_only("", source));
        if let Some(s) = summary {
            entry.summary = s.to_string();
        }
        entry.source = source;
        if let Some(c) = content.filter(|c| !c.is_empty()) {
            let lines = line_count(c);
            entry.content = Some(c.to_string());
            entry.lines_loaded = lines;
            entry.total_lines = lines;
        }
    }

    /// Deletes an entry entirely. Rejected for always-present keys.
    pub fn remove(&mut self, key: &str) -> Result<(), KbError> {
        if self.pinned.iter().any(|k| k == key) {
            return Err(KbError::ProtectedKey(key.to_string()));
        }
        if self.entries.remove(key).is_none() {
            return Err(KbError::UnknownKey(key.to_string()));
        }
        Ok(())
    }

    /// Clears content of every loaded entry not referenced this turn and not
    /// protected. Summaries stay. Idempotent.
    pub fn demote_stale(&mut self, referenced: &BTreeSet<String>, protected: &BTreeSet<String>) {
        for (key, entry) in self.entries.iter_mut() {
            if entry.content.is_none() {
                continue;
            }
            if referenced.contains(key) || protected.contains(key) {
                continue;
            }
            entry.content = None;
            entry.lines_loaded = 0;
        }
    }

    /// Renders the deterministic context block inserted as a system message.
    ///
    /// Ordering is a contract: pinned keys first in declared order, then the
    /// remaining keys alphabetically (which groups them by prefix).
    pub fn render(&self, todos: &[TodoItem], focus: Option<&CurrentFocus>) -> String {
        let mut out = String::from("## Current State\n\n### Knowledge Base\n");
        let pinned_set: BTreeSet<&String> = self.pinned.iter().collect();
        for key in &self.pinned {
            if let Some(entry) = self.entries.get(key) {
                render_entry_line(&mut out, key, entry);
            }
        }
        for (key, entry) in &self.entries {
            if pinned_set.contains(key) {
                continue;
            }
            render_entry_line(&mut out, key, entry);
        }

        if !todos.is_empty() {
            out.push_str("\n### Tasks\n");
            for todo in todos {
                let mark = match todo.status {
                    TodoStatus::Pending => ' ',
                    TodoStatus::Done => 'x',
                };
                out.push_str(&format!("  [{}] ({}) {}\n", mark, todo.id, todo.task));
            }
        }

        if let Some(f) = focus {
            out.push_str(&format!(
                "\n### Current Focus\n  Property: {} | Topic: {} | Depth: {}\n",
                f.property_id, f.topic, f.depth
            ));
        }

        out
    }
}

fn render_entry_line(out: &mut String, key: &str, entry: &KnowledgeEntry) {
    let status = if entry.is_loaded() {
        "loaded"
    } else {
        "available"
    };
    out.push_str(&format!("  {} [{}] — {}\n", key, status, entry.summary));
}

/// Number of lines in `content` (empty string counts as zero).
pub fn line_count(content: &str) -> usize {
    if content.is_empty() {
        0
    } else {
        content.lines().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MapFetcher(BTreeMap<String, String>);

    #[async_trait]
    impl ContentFetcher for MapFetcher {
        async fn fetch(&self, key: &str) -> Result<String, AgentError> {
            self.0
                .get(key)
                .cloned()
                .ok_or_else(|| AgentError::ExecutionFailed(format!("no fixture for {}", key)))
        }
    }

    fn fetcher_with(key: &str, content: &str) -> MapFetcher {
        let mut m = BTreeMap::new();
        m.insert(key.to_string(), content.to_string());
        MapFetcher(m)
    }

    fn base_kb() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new(5);
        kb.pin(
            "user/profile",
            "Comprador de primeira casa, perfil incompleto",
            Some("nome: Ana"),
            KnowledgeSource::Store,
        );
        kb.pin(
            "portfolio/index",
            "Nenhum imóvel guardado ainda.",
            Some(""),
            KnowledgeSource::Store,
        );
        kb.index("user/fiscal", "Situação fiscal", KnowledgeSource::Store);
        kb
    }

    /// **Scenario**: removing an always-present key returns ProtectedKey and
    /// leaves the base unchanged.
    #[test]
    fn remove_protected_key_rejected() {
        let mut kb = base_kb();
        let before = kb.clone();
        let err = kb.remove("user/profile").unwrap_err();
        assert_eq!(err, KbError::ProtectedKey("user/profile".into()));
        assert_eq!(
            kb.render(&[], None),
            before.render(&[], None),
            "kb must be unchanged"
        );
    }

    /// **Scenario**: removing an unknown key is UnknownKey; removing an
    /// available key deletes it.
    #[test]
    fn remove_unknown_and_available() {
        let mut kb = base_kb();
        assert_eq!(
            kb.remove("ghost/key").unwrap_err(),
            KbError::UnknownKey("ghost/key".into())
        );
        kb.remove("user/fiscal").unwrap();
        assert!(!kb.contains("user/fiscal"));
    }

    /// **Scenario**: offload clears content and lines_loaded, keeps the summary.
    #[test]
    fn offload_keeps_summary() {
        let mut kb = base_kb();
        let summary_before = kb.get("user/profile").unwrap().summary.clone();
        kb.offload("user/profile").unwrap();
        let e = kb.get("user/profile").unwrap();
        assert!(e.content.is_none());
        assert_eq!(e.lines_loaded, 0);
        assert_eq!(e.summary, summary_before);
    }

    /// **Scenario**: write-then-load yields exactly the written content
    /// (load is a no-op on a fully loaded entry).
    #[tokio::test]
    async fn write_then_load_roundtrip() {
        let mut kb = base_kb();
        kb.write(
            "notes/comparacao",
            Some("Comparação entre imóveis"),
            Some("linha 1\nlinha 2"),
            KnowledgeSource::Tool,
        );
        let fetcher = fetcher_with("notes/comparacao", "SHOULD NOT BE FETCHED");
        kb.load("notes/comparacao", None, None, &fetcher).await.unwrap();
        let e = kb.get("notes/comparacao").unwrap();
        assert_eq!(e.content.as_deref(), Some("linha 1\nlinha 2"));
        assert_eq!(e.lines_loaded, 2);
        assert_eq!(e.total_lines, 2);
    }

    /// **Scenario**: load is idempotent; loading twice renders identically.
    #[tokio::test]
    async fn load_idempotent_for_render() {
        let mut kb = base_kb();
        let fetcher = fetcher_with("user/fiscal", "IRS: categoria A\nIMT: isento");
        kb.load("user/fiscal", None, None, &fetcher).await.unwrap();
        let once = kb.render(&[], None);
        kb.load("user/fiscal", None, None, &fetcher).await.unwrap();
        assert_eq!(kb.render(&[], None), once);
    }

    /// **Scenario**: a ranged load below the threshold loads the full entry;
    /// above it, only the requested lines.
    #[tokio::test]
    async fn partial_read_respects_threshold() {
        let mut kb = KnowledgeBase::new(5);
        kb.index("small", "small doc", KnowledgeSource::Store);
        kb.index("big", "big doc", KnowledgeSource::Store);

        let fetcher = fetcher_with("small", "a\nb\nc");
        kb.load("small", Some(2), Some(1), &fetcher).await.unwrap();
        let e = kb.get("small").unwrap();
        assert_eq!(e.lines_loaded, 3, "below threshold loads everything");

        let big: String = (1..=10).map(|i| format!("line {}\n", i)).collect();
        let fetcher = fetcher_with("big", big.trim_end());
        kb.load("big", Some(3), Some(2), &fetcher).await.unwrap();
        let e = kb.get("big").unwrap();
        assert_eq!(e.content.as_deref(), Some("line 3\nline 4"));
        assert_eq!(e.lines_loaded, 2);
        assert_eq!(e.total_lines, 10);
        assert!(e.lines_loaded <= e.total_lines);
    }

    /// **Scenario**: loading an unindexed key fails with UnknownKey.
    #[tokio::test]
    async fn load_unknown_key_fails() {
        let mut kb = base_kb();
        let fetcher = fetcher_with("x", "y");
        let err = kb.load("missing/key", None, None, &fetcher).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Knowledge(KbError::UnknownKey(_))
        ));
    }

    /// **Scenario**: demote_stale clears unreferenced loaded entries, keeps
    /// protected and referenced ones, and is idempotent.
    #[tokio::test]
    async fn demote_stale_is_idempotent() {
        let mut kb = base_kb();
        let fetcher = fetcher_with("user/fiscal", "IRS: categoria A");
        kb.load("user/fiscal", None, None, &fetcher).await.unwrap();
        assert!(kb.get("user/fiscal").unwrap().is_loaded());

        let referenced = BTreeSet::new();
        let protected = kb.protected_set();
        kb.demote_stale(&referenced, &protected);
        let once = kb.clone();

        assert!(!kb.get("user/fiscal").unwrap().is_loaded());
        assert!(
            kb.get("user/profile").unwrap().is_loaded(),
            "protected entries keep content"
        );

        kb.demote_stale(&referenced, &protected);
        assert_eq!(kb.render(&[], None), once.render(&[], None));
    }

    /// **Scenario**: render orders pinned keys first in declared order, then
    /// available keys alphabetically; status and summary are projected.
    #[test]
    fn render_ordering_contract() {
        let mut kb = base_kb();
        kb.index("user/budget", "Orçamento", KnowledgeSource::Store);
        kb.index(
            "portfolio/p1/analise",
            "Análise detalhada",
            KnowledgeSource::Store,
        );
        let text = kb.render(&[], None);

        let pos = |needle: &str| text.find(needle).unwrap_or_else(|| panic!("missing {}", needle));
        assert!(pos("user/profile") < pos("portfolio/index"));
        assert!(pos("portfolio/index") < pos("portfolio/p1/analise"));
        assert!(pos("portfolio/p1/analise") < pos("user/budget"));
        assert!(text.contains("user/profile [loaded]"));
        assert!(text.contains("user/fiscal [available]"));
        assert!(text.starts_with("## Current State"));
    }

    /// **Scenario**: tasks and focus sections appear only when present.
    #[test]
    fn render_tasks_and_focus_sections() {
        let kb = base_kb();
        let no_extra = kb.render(&[], None);
        assert!(!no_extra.contains("### Tasks"));
        assert!(!no_extra.contains("### Current Focus"));

        let todos = vec![
            TodoItem {
                id: "t1".into(),
                task: "ver cozinha".into(),
                status: TodoStatus::Pending,
            },
            TodoItem {
                id: "t2".into(),
                task: "comparar preços".into(),
                status: TodoStatus::Done,
            },
        ];
        let focus = CurrentFocus {
            property_id: "item-1".into(),
            topic: "análise".into(),
            depth: 2,
        };
        let text = kb.render(&todos, Some(&focus));
        assert!(text.contains("[ ] (t1) ver cozinha"));
        assert!(text.contains("[x] (t2) comparar preços"));
        assert!(text.contains("Property: item-1 | Topic: análise | Depth: 2"));
    }

    #[test]
    fn line_count_rules() {
        assert_eq!(line_count(""), 0);
        assert_eq!(line_count("a"), 1);
        assert_eq!(line_count("a\nb"), 2);
        assert_eq!(line_count("a\nb\n"), 2);
    }
}
