//! Configuration loading, validation, and management for Taskwright.
//!
//! Loads configuration from `~/.taskwright/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.taskwright/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Agent execution loop limits
    #[serde(default)]
    pub agent: AgentLoopConfig,

    /// Escalation gate behavior
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Orchestrator decision engine
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// State store backend
    #[serde(default)]
    pub store: StoreConfig,

    /// Available agent types
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentProfile>,
}

/// Limits and cadences for one agent execution loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoopConfig {
    /// Steps before the task is reported exhausted
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Plan/execute attempts per step
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay; doubles per attempt. 0 disables backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Progress score at which the acceptance criteria count as met
    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,

    /// Confidence is checked every N steps
    #[serde(default = "default_confidence_interval")]
    pub confidence_interval: u32,

    /// Confidence below this escalates
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,

    /// Consecutive same-category failures that count as a loop
    #[serde(default = "default_loop_window")]
    pub loop_window: usize,

    #[serde(default = "default_wall_clock_budget_secs")]
    pub wall_clock_budget_secs: u64,

    /// Accumulated advisor cost that stops the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_budget: Option<f64>,

    /// Recent steps included in each plan request
    #[serde(default = "default_history_in_prompt")]
    pub history_in_prompt: usize,
}

fn default_max_steps() -> u32 {
    20
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    250
}
fn default_backoff_max_ms() -> u64 {
    8_000
}
fn default_success_threshold() -> f64 {
    1.0
}
fn default_confidence_interval() -> u32 {
    5
}
fn default_confidence_floor() -> f64 {
    0.5
}
fn default_loop_window() -> usize {
    3
}
fn default_wall_clock_budget_secs() -> u64 {
    30 * 60
}
fn default_history_in_prompt() -> usize {
    5
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            success_threshold: default_success_threshold(),
            confidence_interval: default_confidence_interval(),
            confidence_floor: default_confidence_floor(),
            loop_window: default_loop_window(),
            wall_clock_budget_secs: default_wall_clock_budget_secs(),
            cost_budget: None,
            history_in_prompt: default_history_in_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// How long an open gate may stay unresolved
    #[serde(default = "default_escalation_timeout_secs")]
    pub timeout_secs: u64,

    /// Whether the escalating loop waits for a human decision before returning
    #[serde(default = "default_true")]
    pub block_on_escalation: bool,
}

fn default_escalation_timeout_secs() -> u64 {
    60 * 60
}
fn default_true() -> bool {
    true
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_escalation_timeout_secs(),
            block_on_escalation: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Completed tasks shown to the advisor when deciding
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Tasks of one project allowed in flight
    #[serde(default = "default_project_concurrency")]
    pub project_concurrency: usize,

    /// Characters kept in an artifact preview
    #[serde(default = "default_artifact_preview_chars")]
    pub artifact_preview_chars: usize,

    /// Delay before the single retry of a failed decision call
    #[serde(default = "default_advisor_retry_backoff_ms")]
    pub advisor_retry_backoff_ms: u64,
}

fn default_history_window() -> usize {
    5
}
fn default_project_concurrency() -> usize {
    1
}
fn default_artifact_preview_chars() -> usize {
    400
}
fn default_advisor_retry_backoff_ms() -> u64 {
    500
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            project_concurrency: default_project_concurrency(),
            artifact_preview_chars: default_artifact_preview_chars(),
            advisor_retry_backoff_ms: default_advisor_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "memory" or "file"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// JSONL file for the "file" backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_store_backend() -> String {
    "memory".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

/// An agent type the orchestrator may assign tasks to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_type: String,

    #[serde(default)]
    pub description: String,

    /// Tools this agent type may call. Empty allows every tool.
    #[serde(default)]
    pub allowed_tools: Vec<String>,

    /// Overrides `agent.max_steps` for this agent type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
}

impl AgentProfile {
    pub fn new(agent_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            description: description.into(),
            allowed_tools: Vec::new(),
            max_steps: None,
        }
    }

    pub fn with_allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }
}

fn default_agents() -> Vec<AgentProfile> {
    vec![AgentProfile::new("generalist", "Handles any task; may use every tool")]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent: AgentLoopConfig::default(),
            escalation: EscalationConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            store: StoreConfig::default(),
            agents: default_agents(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default path (~/.taskwright/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `TASKWRIGHT_MAX_STEPS`
    /// - `TASKWRIGHT_ESCALATION_TIMEOUT_SECS`
    /// - `TASKWRIGHT_PROJECT_CONCURRENCY`
    /// - `TASKWRIGHT_STORE_PATH` (also switches the backend to "file")
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in production).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TASKWRIGHT_MAX_STEPS") {
            self.agent.max_steps = parse_env("TASKWRIGHT_MAX_STEPS", &v)?;
        }
        if let Some(v) = lookup("TASKWRIGHT_ESCALATION_TIMEOUT_SECS") {
            self.escalation.timeout_secs = parse_env("TASKWRIGHT_ESCALATION_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("TASKWRIGHT_PROJECT_CONCURRENCY") {
            self.orchestrator.project_concurrency = parse_env("TASKWRIGHT_PROJECT_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("TASKWRIGHT_STORE_PATH") {
            self.store.backend = "file".into();
            self.store.path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".taskwright")
    }

    /// Look up an agent profile by type.
    pub fn agent_profile(&self, agent_type: &str) -> Option<&AgentProfile> {
        self.agents.iter().find(|a| a.agent_type == agent_type)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let agent = &self.agent;
        if agent.max_steps == 0 {
            return Err(ConfigError::ValidationError("agent.max_steps must be > 0".into()));
        }
        if agent.max_attempts == 0 {
            return Err(ConfigError::ValidationError("agent.max_attempts must be > 0".into()));
        }
        if agent.loop_window == 0 {
            return Err(ConfigError::ValidationError("agent.loop_window must be > 0".into()));
        }
        if agent.confidence_interval == 0 {
            return Err(ConfigError::ValidationError(
                "agent.confidence_interval must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&agent.success_threshold) {
            return Err(ConfigError::ValidationError(
                "agent.success_threshold must be between 0.0 and 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&agent.confidence_floor) {
            return Err(ConfigError::ValidationError(
                "agent.confidence_floor must be between 0.0 and 1.0".into(),
            ));
        }
        if agent.cost_budget.is_some_and(|budget| budget <= 0.0) {
            return Err(ConfigError::ValidationError("agent.cost_budget must be > 0".into()));
        }
        if self.orchestrator.project_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.project_concurrency must be > 0".into(),
            ));
        }
        match self.store.backend.as_str() {
            "memory" => {}
            "file" if self.store.path.is_some() => {}
            "file" => {
                return Err(ConfigError::ValidationError(
                    "store.path is required for the file backend".into(),
                ));
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown store backend '{other}'"
                )));
            }
        }
        if self.agents.is_empty() {
            return Err(ConfigError::ValidationError("at least one agent profile is required".into()));
        }
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key}: invalid value '{value}'")))
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
