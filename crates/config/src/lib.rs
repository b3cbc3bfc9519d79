//! Configuration loading, validation, and management for IronLoop.
//!
//! Loads configuration from `~/.ironloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use ironloop_core::{ErrorKind, Severity, StrategyKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.ironloop/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model the loop starts with
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentLoopConfig,

    /// Recovery subsystem settings
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

fn default_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoopConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Ask for a final answer two iterations before the limit
    #[serde(default = "default_true")]
    pub force_final_answer: bool,

    #[serde(default = "default_call_timeout_secs")]
    pub llm_timeout_secs: u64,

    #[serde(default = "default_call_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Truncation limit for tool input/output in telemetry events
    #[serde(default = "default_max_event_chars")]
    pub max_event_chars: usize,

    /// Stop sequences passed to the model
    #[serde(default)]
    pub stop: Vec<String>,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_call_timeout_secs() -> u64 {
    60
}
fn default_max_event_chars() -> usize {
    500
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            force_final_answer: true,
            llm_timeout_secs: default_call_timeout_secs(),
            tool_timeout_secs: default_call_timeout_secs(),
            max_event_chars: default_max_event_chars(),
            stop: vec![],
        }
    }
}

/// Recovery manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enabled: bool,

    /// Ceiling applied to every strategy's `max_attempts`
    pub global_max_attempts: u32,

    /// Ceiling applied to every strategy's `timeout_ms`
    pub global_timeout_ms: u64,

    /// Run resource/performance checks after each recovery
    pub validate_after_recovery: bool,

    /// Registration order; the first strategy that accepts a failure wins
    pub order: Vec<StrategyKind>,

    pub thresholds: ValidationThresholds,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub degradation: DegradationConfig,
    pub agent_restart: AgentRestartConfig,
    pub agent_reassign: AgentReassignConfig,
    pub agent_fallback_model: AgentFallbackModelConfig,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            global_max_attempts: 5,
            global_timeout_ms: 30_000,
            validate_after_recovery: false,
            order: StrategyKind::ALL.to_vec(),
            thresholds: ValidationThresholds::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            degradation: DegradationConfig::default(),
            agent_restart: AgentRestartConfig::default(),
            agent_reassign: AgentReassignConfig::default(),
            agent_fallback_model: AgentFallbackModelConfig::default(),
        }
    }
}

/// Limits checked after a recovery when `validate_after_recovery` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationThresholds {
    /// CPU usage as a fraction (0.0–1.0)
    pub max_cpu: f64,
    pub max_memory_mb: f64,
    pub max_disk_io_mbps: f64,
    pub max_network_latency_ms: f64,
    pub min_success_rate: f64,
    pub max_error_rate: f64,
    pub max_latency_ms: f64,
    /// Operations per second
    pub min_throughput: f64,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            max_cpu: 0.9,
            max_memory_mb: 1024.0,
            max_disk_io_mbps: 100.0,
            max_network_latency_ms: 1000.0,
            min_success_rate: 0.9,
            max_error_rate: 0.1,
            max_latency_ms: 5000.0,
            min_throughput: 10.0,
        }
    }
}

/// Settings every strategy shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySettings {
    pub enabled: bool,
    pub max_attempts: u32,
    pub timeout_ms: u64,
    /// Empty = any kind
    pub error_kinds: Vec<ErrorKind>,
    /// Empty = any severity
    pub severities: Vec<Severity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub timeout_ms: u64,
    pub error_kinds: Vec<ErrorKind>,
    pub severities: Vec<Severity>,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            timeout_ms: 30_000,
            error_kinds: vec![ErrorKind::Network, ErrorKind::Timeout, ErrorKind::RateLimit],
            severities: vec![Severity::Low, Severity::Medium],
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            exponential_backoff: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub timeout_ms: u64,
    pub error_kinds: Vec<ErrorKind>,
    pub severities: Vec<Severity>,
    /// Failures in CLOSED before tripping to OPEN
    pub failure_threshold: u32,
    /// Cool-down before an OPEN circuit admits a probe batch
    pub reset_timeout_ms: u64,
    /// Probe batch size in HALF_OPEN
    pub half_open_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 1,
            timeout_ms: 10_000,
            error_kinds: vec![ErrorKind::Network, ErrorKind::Server, ErrorKind::Timeout],
            severities: vec![Severity::High, Severity::Critical],
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            half_open_requests: 3,
        }
    }
}

/// One tier of graceful degradation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationLevelConfig {
    pub level: usize,
    /// All must hold, e.g. `CPU_USAGE > 0.9`
    pub conditions: Vec<String>,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub timeout_ms: u64,
    pub error_kinds: Vec<ErrorKind>,
    pub severities: Vec<Severity>,
    pub levels: Vec<DegradationLevelConfig>,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 1,
            timeout_ms: 15_000,
            error_kinds: vec![ErrorKind::ResourceExhausted, ErrorKind::Overload],
            severities: vec![],
            levels: vec![
                DegradationLevelConfig {
                    level: 1,
                    conditions: vec!["CPU_USAGE > 0.7".into()],
                    actions: vec!["trim_history".into()],
                },
                DegradationLevelConfig {
                    level: 2,
                    conditions: vec!["CPU_USAGE > 0.85".into(), "MEMORY_USAGE > 768".into()],
                    actions: vec!["trim_history".into(), "disable_non_critical_features".into()],
                },
                DegradationLevelConfig {
                    level: 3,
                    conditions: vec!["CPU_USAGE > 0.95".into()],
                    actions: vec!["minimal_mode".into()],
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentRestartConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub timeout_ms: u64,
    pub error_kinds: Vec<ErrorKind>,
    pub severities: Vec<Severity>,
    /// Save agent state before restarting and restore it afterwards
    pub preserve_state: bool,
}

impl Default for AgentRestartConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            timeout_ms: 30_000,
            error_kinds: vec![ErrorKind::AgentCrash, ErrorKind::Internal, ErrorKind::Parse],
            severities: vec![],
            preserve_state: true,
        }
    }
}

/// Routes work to another agent type when its condition holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReassignmentRule {
    /// `ALWAYS` or a resource predicate such as `CPU_USAGE > 0.8`
    pub condition: String,
    pub target_agent_type: String,
    /// Higher is evaluated first
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentReassignConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub timeout_ms: u64,
    pub error_kinds: Vec<ErrorKind>,
    pub severities: Vec<Severity>,
    pub preserve_state: bool,
    pub rules: Vec<ReassignmentRule>,
}

impl Default for AgentReassignConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 2,
            timeout_ms: 30_000,
            error_kinds: vec![ErrorKind::Overload, ErrorKind::AgentCrash],
            severities: vec![Severity::High, Severity::Critical],
            preserve_state: true,
            rules: vec![
                ReassignmentRule {
                    condition: "CPU_USAGE > 0.8".into(),
                    target_agent_type: "lightweight".into(),
                    priority: 10,
                },
                ReassignmentRule {
                    condition: "MEMORY_USAGE > 768".into(),
                    target_agent_type: "low_memory".into(),
                    priority: 5,
                },
                ReassignmentRule {
                    condition: "ALWAYS".into(),
                    target_agent_type: "general".into(),
                    priority: 0,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentFallbackModelConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub timeout_ms: u64,
    pub error_kinds: Vec<ErrorKind>,
    pub severities: Vec<Severity>,
    pub preserve_state: bool,
    /// Failing model → fallback model
    pub fallbacks: BTreeMap<String, String>,
}

impl Default for AgentFallbackModelConfig {
    fn default() -> Self {
        let fallbacks = [
            ("gpt-4o", "gpt-4o-mini"),
            ("gpt-4-turbo", "gpt-4o-mini"),
            ("o1", "o1-mini"),
            ("claude-3-opus", "claude-3-sonnet"),
            ("claude-3-5-sonnet", "claude-3-5-haiku"),
            ("claude-sonnet-4", "claude-3-5-haiku"),
            ("gemini-1.5-pro", "gemini-1.5-flash"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            enabled: true,
            max_attempts: 2,
            timeout_ms: 30_000,
            error_kinds: vec![
                ErrorKind::ModelUnavailable,
                ErrorKind::RateLimit,
                ErrorKind::Server,
                ErrorKind::Timeout,
            ],
            severities: vec![Severity::High, Severity::Critical],
            preserve_state: true,
            fallbacks,
        }
    }
}

macro_rules! impl_settings {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $ty {
                /// The settings shared by every strategy.
                pub fn settings(&self) -> StrategySettings {
                    StrategySettings {
                        enabled: self.enabled,
                        max_attempts: self.max_attempts,
                        timeout_ms: self.timeout_ms,
                        error_kinds: self.error_kinds.clone(),
                        severities: self.severities.clone(),
                    }
                }
            }
        )+
    };
}

impl_settings!(
    RetryConfig,
    CircuitBreakerConfig,
    DegradationConfig,
    AgentRestartConfig,
    AgentReassignConfig,
    AgentFallbackModelConfig,
);

impl RecoveryConfig {
    /// Shared settings of the given strategy.
    pub fn settings_for(&self, kind: StrategyKind) -> StrategySettings {
        match kind {
            StrategyKind::Retry => self.retry.settings(),
            StrategyKind::CircuitBreaker => self.circuit_breaker.settings(),
            StrategyKind::GracefulDegradation => self.degradation.settings(),
            StrategyKind::AgentRestart => self.agent_restart.settings(),
            StrategyKind::AgentReassign => self.agent_reassign.settings(),
            StrategyKind::AgentFallbackModel => self.agent_fallback_model.settings(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.global_max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "recovery.global_max_attempts must be at least 1".into(),
            ));
        }
        if self.global_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "recovery.global_timeout_ms must be > 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for kind in &self.order {
            if !seen.insert(kind) {
                return Err(ConfigError::ValidationError(format!(
                    "recovery.order lists '{kind}' more than once"
                )));
            }
        }

        for kind in StrategyKind::ALL {
            let settings = self.settings_for(kind);
            if settings.max_attempts == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "recovery.{kind}.max_attempts must be at least 1"
                )));
            }
            if settings.timeout_ms == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "recovery.{kind}.timeout_ms must be > 0"
                )));
            }
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "recovery.retry.initial_delay_ms must not exceed max_delay_ms".into(),
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 || self.circuit_breaker.half_open_requests == 0 {
            return Err(ConfigError::ValidationError(
                "recovery.circuit_breaker thresholds must be at least 1".into(),
            ));
        }

        let mut levels: Vec<_> = self.degradation.levels.iter().map(|l| l.level).collect();
        levels.sort_unstable();
        let expected: Vec<_> = (1..=levels.len()).collect();
        if levels != expected {
            return Err(ConfigError::ValidationError(
                "recovery.degradation.levels must be numbered 1..N without gaps".into(),
            ));
        }

        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.ironloop/config.toml).
    ///
    /// Environment variables take precedence over the file:
    /// - `IRONLOOP_MODEL`
    /// - `IRONLOOP_MAX_ITERATIONS`
    /// - `IRONLOOP_RECOVERY_ENABLED`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
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

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(model) = std::env::var("IRONLOOP_MODEL") {
            self.model = model;
        }

        if let Ok(raw) = std::env::var("IRONLOOP_MAX_ITERATIONS") {
            self.agent.max_iterations = raw.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "IRONLOOP_MAX_ITERATIONS must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        if let Ok(raw) = std::env::var("IRONLOOP_RECOVERY_ENABLED") {
            self.recovery.enabled = matches!(raw.as_str(), "1" | "true" | "yes" | "on");
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ironloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.agent.llm_timeout_secs == 0 || self.agent.tool_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent timeouts must be > 0".into(),
            ));
        }

        self.recovery.validate()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            agent: AgentLoopConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.agent.llm_timeout_secs, 60);
        assert_eq!(config.recovery.order.len(), 6);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.recovery.order, config.recovery.order);
        assert_eq!(parsed.recovery.agent_fallback_model.fallbacks, config.recovery.agent_fallback_model.fallbacks);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_iterations_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_strategy_order_rejected() {
        let mut config = AppConfig::default();
        config.recovery.order = vec![StrategyKind::Retry, StrategyKind::Retry];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retry"));
    }

    #[test]
    fn degradation_levels_must_be_contiguous() {
        let mut config = AppConfig::default();
        config.recovery.degradation.levels.remove(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.model, "gpt-4o");
    }

    #[test]
    fn partial_file_keeps_strategy_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
model = "claude-sonnet-4"

[agent]
max_iterations = 3
force_final_answer = false

[recovery]
validate_after_recovery = true
order = ["agent_restart", "retry"]

[recovery.retry]
initial_delay_ms = 100
max_delay_ms = 800
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.model, "claude-sonnet-4");
        assert_eq!(config.agent.max_iterations, 3);
        assert!(!config.agent.force_final_answer);
        assert_eq!(config.agent.tool_timeout_secs, 60);
        assert!(config.recovery.validate_after_recovery);
        assert_eq!(config.recovery.order, vec![StrategyKind::AgentRestart, StrategyKind::Retry]);
        assert_eq!(config.recovery.retry.initial_delay_ms, 100);
        assert_eq!(config.recovery.retry.max_attempts, 3);
        assert!(config.recovery.retry.exponential_backoff);
        assert_eq!(config.recovery.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "model = [not toml").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn settings_accessor_matches_fields() {
        let config = RecoveryConfig::default();
        let settings = config.settings_for(StrategyKind::CircuitBreaker);
        assert_eq!(settings.max_attempts, config.circuit_breaker.max_attempts);
        assert_eq!(settings.severities, vec![Severity::High, Severity::Critical]);
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o"));
        assert!(toml_str.contains("failure_threshold"));
    }
}
