//! Typed runtime configuration, read from the environment once at startup.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime knobs for the orchestrator, pipeline, and clients.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Chat model for the agent node and summaries.
    pub model: String,
    pub db_path: PathBuf,
    /// Per-LLM-call timeout.
    pub llm_timeout: Duration,
    /// Per-tool timeout.
    pub tool_timeout: Duration,
    /// Extended timeout for `trigger_property_analysis`.
    pub analysis_tool_timeout: Duration,
    /// Hard ceiling on agent cycles per turn.
    pub max_cycles: u32,
    /// Vision fan-out bound in the classify stage.
    pub classify_concurrency: usize,
    /// Vision fan-out bound in the estimate stage.
    pub estimate_concurrency: usize,
    /// Base URL of the scraping service; `None` uses the fixture scraper.
    pub scraper_base_url: Option<String>,
    /// Below this many lines a ranged knowledge load reads the full entry.
    pub min_lines_for_partial_read: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            db_path: PathBuf::from("morada.db"),
            llm_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(120),
            analysis_tool_timeout: Duration::from_secs(480),
            max_cycles: 12,
            classify_concurrency: 5,
            estimate_concurrency: 3,
            scraper_base_url: None,
            min_lines_for_partial_read: 40,
        }
    }
}

impl RuntimeConfig {
    /// Reads `MORADA_*` overrides on top of the defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("MORADA_MODEL") {
            if !v.is_empty() {
                cfg.model = v;
            }
        }
        if let Ok(v) = std::env::var("MORADA_DB_PATH") {
            if !v.is_empty() {
                cfg.db_path = PathBuf::from(v);
            }
        }
        if let Some(secs) = env_u64("MORADA_LLM_TIMEOUT_SECS") {
            cfg.llm_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("MORADA_TOOL_TIMEOUT_SECS") {
            cfg.tool_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("MORADA_ANALYSIS_TIMEOUT_SECS") {
            cfg.analysis_tool_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_u64("MORADA_MAX_CYCLES") {
            cfg.max_cycles = n as u32;
        }
        if let Ok(v) = std::env::var("MORADA_SCRAPER_URL") {
            if !v.is_empty() {
                cfg.scraper_base_url = Some(v);
            }
        }
        cfg
    }

    /// Timeout for one tool execution by name.
    pub fn timeout_for_tool(&self, tool_name: &str) -> Duration {
        if tool_name == "trigger_property_analysis" {
            self.analysis_tool_timeout
        } else {
            self.tool_timeout
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
