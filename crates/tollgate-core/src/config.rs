use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TollgateError};
use crate::types::Stage;

/// Top-level Tollgate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub stages: StagesConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub lookups: LookupsConfig,
    #[serde(default)]
    pub rules: RulesConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Maximum node executions per run. 0 means "number of registered nodes".
    #[serde(default)]
    pub step_limit: usize,
    /// Drop the work item's session once its run returns.
    #[serde(default)]
    pub clear_sessions_on_completion: bool,
}

/// Per-stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Actor identifier recorded in outcomes and audit records.
    pub actor: String,
    /// Capability flag: whether this stage may call auxiliary lookups.
    #[serde(default = "default_lookups_enabled")]
    pub lookups_enabled: bool,
    /// Upper bound on auxiliary lookups per invocation.
    #[serde(default = "default_max_lookup_calls")]
    pub max_lookup_calls: usize,
}

impl StageConfig {
    fn for_stage(stage: Stage) -> Self {
        Self {
            actor: stage.as_str().to_string(),
            lookups_enabled: stage != Stage::Fulfillment,
            max_lookup_calls: default_max_lookup_calls(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesConfig {
    #[serde(default = "default_maker_stage")]
    pub maker: StageConfig,
    #[serde(default = "default_checker_stage")]
    pub checker: StageConfig,
    #[serde(default = "default_fulfillment_stage")]
    pub fulfillment: StageConfig,
}

impl StagesConfig {
    pub fn get(&self, stage: Stage) -> &StageConfig {
        match stage {
            Stage::Maker => &self.maker,
            Stage::Checker => &self.checker,
            Stage::Fulfillment => &self.fulfillment,
        }
    }
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            maker: default_maker_stage(),
            checker: default_checker_stage(),
            fulfillment: default_fulfillment_stage(),
        }
    }
}

fn default_maker_stage() -> StageConfig { StageConfig::for_stage(Stage::Maker) }
fn default_checker_stage() -> StageConfig { StageConfig::for_stage(Stage::Checker) }
fn default_fulfillment_stage() -> StageConfig { StageConfig::for_stage(Stage::Fulfillment) }
fn default_lookups_enabled() -> bool { true }
fn default_max_lookup_calls() -> usize { 4 }

/// Audit side-channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Bounded dispatcher queue. Records emitted while it is full are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Per-store delivery timeout in milliseconds.
    #[serde(default = "default_persist_timeout_ms")]
    pub persist_timeout_ms: u64,
    /// Records kept by the in-memory store (oldest evicted first).
    #[serde(default = "default_retain_records")]
    pub retain_records: usize,
    /// Mirror every record into the tracing log.
    #[serde(default = "default_log_records")]
    pub log_records: bool,
    /// Optional append-only JSONL destination.
    #[serde(default)]
    pub jsonl_path: Option<String>,
}

impl AuditConfig {
    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            persist_timeout_ms: default_persist_timeout_ms(),
            retain_records: default_retain_records(),
            log_records: default_log_records(),
            jsonl_path: None,
        }
    }
}

fn default_queue_capacity() -> usize { 1024 }
fn default_persist_timeout_ms() -> u64 { 2000 }
fn default_retain_records() -> usize { 10_000 }
fn default_log_records() -> bool { true }

/// Session memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Turns kept per session; the oldest is evicted first.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Idle seconds before a session expires. 0 disables expiry.
    #[serde(default)]
    pub idle_ttl_secs: u64,
    /// How often the sweeper looks for expired sessions.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl MemoryConfig {
    pub fn idle_ttl(&self) -> Option<Duration> {
        (self.idle_ttl_secs > 0).then(|| Duration::from_secs(self.idle_ttl_secs))
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            idle_ttl_secs: 0,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_max_turns() -> usize { 50 }
fn default_sweep_interval() -> u64 { 300 }

/// Auxiliary lookup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupsConfig {
    #[serde(default = "default_lookup_timeout")]
    pub timeout_secs: u64,
    /// JSON file of canned lookup responses, keyed by lookup kind.
    #[serde(default)]
    pub fixtures: Option<String>,
}

impl Default for LookupsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_lookup_timeout(),
            fixtures: None,
        }
    }
}

fn default_lookup_timeout() -> u64 { 10 }

/// Thresholds for the built-in rule-based executors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "default_max_amount")]
    pub max_amount: f64,
    #[serde(default = "default_required_fields")]
    pub required_fields: Vec<String>,
    #[serde(default = "default_valid_reasons")]
    pub valid_reasons: Vec<String>,
    /// Force the fulfillment side effect to fail.
    #[serde(default)]
    pub fail_fulfillment: bool,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            max_amount: default_max_amount(),
            required_fields: default_required_fields(),
            valid_reasons: default_valid_reasons(),
            fail_fulfillment: false,
        }
    }
}

fn default_max_amount() -> f64 { 10_000.0 }

fn default_required_fields() -> Vec<String> {
    ["customer_id", "account_number", "amount", "reason"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_valid_reasons() -> Vec<String> {
    [
        "overpayment",
        "duplicate charge",
        "service cancellation",
        "account closure",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| TollgateError::ConfigNotFound(path.display().to_string()))?;

        Self::from_toml(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn from_toml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);

        toml::from_str(&expanded).map_err(|e| TollgateError::Config(e.to_string()))
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the JSONL audit path (expand ~).
    pub fn audit_jsonl_path(&self) -> Option<PathBuf> {
        self.audit.jsonl_path.as_deref().map(expand_home)
    }

    /// Resolve the lookup fixtures path (expand ~).
    pub fn lookup_fixtures_path(&self) -> Option<PathBuf> {
        self.lookups.fixtures.as_deref().map(expand_home)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}
