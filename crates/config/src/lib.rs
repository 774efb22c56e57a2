//! Configuration loading, validation, and management for Traymind.
//!
//! Loads configuration from `~/.traymind/config.toml` with environment
//! variable overrides. Validates all settings at startup, and again on
//! every reload.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use traymind_core::event::{DispatcherOptions, EventPriorities};

/// The root configuration structure.
///
/// Maps directly to `~/.traymind/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Event bus settings
    #[serde(default)]
    pub events: EventsConfig,

    /// Conversation context settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Plugin loading settings
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Assistant roles and their system prompts
    #[serde(default)]
    pub roles: RolesConfig,

    /// Command execution settings
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Recurring-error detection
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub report_listener_errors: bool,

    /// Opt-in fairness: see [`DispatcherOptions::max_consecutive_same_priority`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_consecutive_same_priority: Option<usize>,

    /// Event category (or full event type) → priority. Lower runs first.
    #[serde(default = "default_priorities")]
    pub priorities: BTreeMap<String, i64>,
}

fn default_stop_timeout_ms() -> u64 {
    2000
}
fn default_true() -> bool {
    true
}
fn default_priorities() -> BTreeMap<String, i64> {
    [
        (EventPriorities::DEFAULT_KEY, EventPriorities::FALLBACK),
        ("ERROR_EVENT", 0),
        ("SYSTEM_EVENT", 5),
        ("UI_EVENT", 10),
        ("USER_ACTION", 10),
        ("MODEL_RESPONSE", 20),
        ("LOGGING_EVENT", 100),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: default_stop_timeout_ms(),
            report_listener_errors: true,
            max_consecutive_same_priority: None,
            priorities: default_priorities(),
        }
    }
}

impl EventsConfig {
    /// The priority table in the dispatcher's form.
    pub fn priorities(&self) -> EventPriorities {
        let table: HashMap<String, i64> = self
            .priorities
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        EventPriorities::from_map(table)
    }

    pub fn dispatcher_options(&self) -> DispatcherOptions {
        DispatcherOptions {
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            report_listener_errors: self.report_listener_errors,
            max_consecutive_same_priority: self.max_consecutive_same_priority,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Eviction policy applied when context is read. Only `fifo` exists.
    #[serde(default = "default_pruning_strategy")]
    pub pruning_strategy: String,

    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

fn default_pruning_strategy() -> String {
    "fifo".into()
}
fn default_max_messages() -> usize {
    50
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            pruning_strategy: default_pruning_strategy(),
            max_messages: default_max_messages(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Defer loading of non-eager plugins until first use.
    #[serde(default = "default_true")]
    pub lazy_load: bool,

    /// Per-plugin switches. Plugins not listed are enabled.
    #[serde(default)]
    pub enabled: BTreeMap<String, bool>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            lazy_load: true,
            enabled: BTreeMap::new(),
        }
    }
}

impl PluginsConfig {
    pub fn is_enabled(&self, plugin_id: &str) -> bool {
        self.enabled.get(plugin_id).copied().unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` filter when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// A persona the agent can answer as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Lowercase substrings that select this role for a new conversation.
    #[serde(default)]
    pub keywords: Vec<String>,

    pub system_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolesConfig {
    /// Role used when no keyword matches. Falls back to the first role.
    #[serde(default = "default_role_id")]
    pub default_role_id: String,

    #[serde(default = "default_roles")]
    pub roles: Vec<RoleConfig>,
}

fn default_role_id() -> String {
    "general".into()
}

fn default_roles() -> Vec<RoleConfig> {
    let role = |id: &str, name: &str, keywords: &[&str], prompt: &str| RoleConfig {
        id: id.into(),
        name: name.into(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        system_prompt: prompt.into(),
    };
    vec![
        role(
            "general",
            "General Assistant",
            &[],
            "You are a helpful desktop assistant. Answer concisely.",
        ),
        role(
            "coder",
            "Programming Assistant",
            &["code", "function", "compile", "bug", "error", "rust", "python"],
            "You are an expert programmer. Explain code precisely and prefer working examples.",
        ),
        role(
            "writer",
            "Writing Assistant",
            &["write", "essay", "email", "rephrase", "grammar"],
            "You are a careful editor. Improve clarity and keep the author's voice.",
        ),
    ]
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            default_role_id: default_role_id(),
            roles: default_roles(),
        }
    }
}

impl RolesConfig {
    pub fn find(&self, id: &str) -> Option<&RoleConfig> {
        self.roles.iter().find(|r| r.id == id)
    }

    /// The configured default role, or the first role if that id is unknown.
    pub fn default_role(&self) -> Option<&RoleConfig> {
        self.find(&self.default_role_id).or_else(|| self.roles.first())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Successful commands kept for undo; the oldest is dropped first.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_max_history() -> usize {
    50
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Occurrences of one error pattern, within the window, that count as recurring.
    #[serde(default = "default_threshold_count")]
    pub threshold_count: usize,

    #[serde(default = "default_threshold_timespan_secs")]
    pub threshold_timespan_secs: u64,

    /// Minimum time between two reports of the same pattern.
    #[serde(default = "default_report_cooldown_secs")]
    pub report_cooldown_secs: u64,
}

fn default_threshold_count() -> usize {
    5
}
fn default_threshold_timespan_secs() -> u64 {
    3600
}
fn default_report_cooldown_secs() -> u64 {
    86_400
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            threshold_count: default_threshold_count(),
            threshold_timespan_secs: default_threshold_timespan_secs(),
            report_cooldown_secs: default_report_cooldown_secs(),
        }
    }
}

impl AnalyticsConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.threshold_timespan_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.report_cooldown_secs)
    }
}

impl AppConfig {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env_overrides();
        Ok(config)
    }

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

    /// Write the configuration as TOML, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let write_error = |reason: String| ConfigError::WriteError {
            path: path.to_path_buf(),
            reason,
        };

        let content = toml::to_string_pretty(self).map_err(|e| write_error(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_error(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| write_error(e.to_string()))
    }

    pub fn config_dir() -> PathBuf {
        dirs_home().join(".traymind")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.events.priorities.contains_key(EventPriorities::DEFAULT_KEY) {
            return Err(ConfigError::ValidationError(
                "events.priorities must define a DEFAULT priority".into(),
            ));
        }

        if self.events.stop_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "events.stop_timeout_ms must be > 0".into(),
            ));
        }

        if self.context.max_messages == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_messages must be at least 1".into(),
            ));
        }

        if self.roles.roles.is_empty() {
            return Err(ConfigError::ValidationError(
                "roles.roles must define at least one role".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for role in &self.roles.roles {
            if !seen.insert(role.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate role id '{}'",
                    role.id
                )));
            }
        }

        if self.commands.max_history == 0 {
            return Err(ConfigError::ValidationError(
                "commands.max_history must be at least 1".into(),
            ));
        }

        if self.analytics.threshold_count == 0 {
            return Err(ConfigError::ValidationError(
                "analytics.threshold_count must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Environment variable overrides (highest priority).
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup("TRAYMIND_LOG") {
            self.logging.level = level;
        }

        if let Some(raw) = lookup("TRAYMIND_LAZY_PLUGINS") {
            match parse_bool(&raw) {
                Some(lazy) => self.plugins.lazy_load = lazy,
                None => tracing::warn!(value = %raw, "Ignoring TRAYMIND_LAZY_PLUGINS, expected a boolean"),
            }
        }
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Shared, reloadable configuration.
///
/// Components keep an `Arc<ConfigStore>` and read a fresh snapshot whenever
/// they need one, so a reload is picked up without rewiring anything.
#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    current: RwLock<AppConfig>,
}

impl ConfigStore {
    /// A store with no backing file; `reload` keeps the current values.
    pub fn in_memory(config: AppConfig) -> Self {
        Self {
            path: None,
            current: RwLock::new(config),
        }
    }

    /// Load from `path` (defaults if absent) with environment overrides.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let mut config = AppConfig::load_from(&path)?;
        config.apply_env_overrides();
        Ok(Self {
            path: Some(path),
            current: RwLock::new(config),
        })
    }

    /// Load from `~/.traymind/config.toml`.
    pub fn open_default() -> Result<Self, ConfigError> {
        Self::open(AppConfig::config_path())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// A snapshot of the current configuration.
    pub fn get(&self) -> AppConfig {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-read the backing file. On error the current values are kept.
    pub fn reload(&self) -> Result<AppConfig, ConfigError> {
        let Some(path) = &self.path else {
            return Ok(self.get());
        };
        let mut config = AppConfig::load_from(path)?;
        config.apply_env_overrides();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = config.clone();
        tracing::info!(path = %path.display(), "Configuration reloaded");
        Ok(config)
    }

    /// Apply a change; rejected (and not applied) if it fails validation.
    pub fn update(&self, change: impl FnOnce(&mut AppConfig)) -> Result<(), ConfigError> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut candidate = current.clone();
        change(&mut candidate);
        candidate.validate()?;
        *current = candidate;
        Ok(())
    }

    /// Persist the current configuration to the backing file.
    pub fn save(&self) -> Result<(), ConfigError> {
        match &self.path {
            Some(path) => self.get().save_to(path),
            None => Err(ConfigError::WriteError {
                path: PathBuf::new(),
                reason: "store has no backing file".into(),
            }),
        }
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::in_memory(AppConfig::default())
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

    #[error("Failed to write config file at {path}: {reason}")]
    WriteError { path: PathBuf, reason: String },
}

impl From<ConfigError> for traymind_core::Error {
    fn from(err: ConfigError) -> Self {
        traymind_core::Error::Config {
            message: err.to_string(),
        }
    }
}
