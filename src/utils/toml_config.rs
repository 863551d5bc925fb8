//! TOML-based configuration for the research server
//!
//! One file (`research.toml`) declares the HTTP server, the record store,
//! executor sizing, timeline/stream tuning, the search provider, the models
//! a run may be bound to, and the named budget tiers.
//!
//! # Hot Reloading
//!
//! `ResearchConfigManager` keeps the active configuration behind an
//! `ArcSwap`. Budgets and models are resolved once when a run is admitted, so
//! a reload only affects runs admitted afterwards.

use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Root configuration structure loaded from research.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub timeline: TimelineConfig,

    #[serde(default)]
    pub search: SearchConfig,

    /// Model used when a submission does not name one
    #[serde(default = "default_model_id")]
    pub default_model: String,

    /// Named model endpoints a run may be bound to
    #[serde(default = "default_models")]
    pub models: HashMap<String, ModelConfig>,

    #[serde(default)]
    pub budget: BudgetConfig,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            executor: ExecutorConfig::default(),
            timeline: TimelineConfig::default(),
            search: SearchConfig::default(),
            default_model: default_model_id(),
            models: default_models(),
            budget: BudgetConfig::default(),
        }
    }
}

// ============= Server Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

// ============= Database Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Local file path, `:memory:`, or a `libsql://` / `https://` Turso URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Environment variable holding the Turso auth token (remote only)
    #[serde(default)]
    pub auth_token_env: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            auth_token_env: None,
        }
    }
}

impl DatabaseConfig {
    pub fn is_remote(&self) -> bool {
        self.url.starts_with("libsql://") || self.url.starts_with("https://")
    }
}

fn default_database_url() -> String {
    "./data/research.db".to_string()
}

// ============= Executor Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Runs executing concurrently
    #[serde(default = "default_pool_size")]
    pub max_pool_size: usize,

    /// Admitted runs allowed to wait for a worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Per-run duration used only for start time estimates
    #[serde(default = "default_task_timeout_minutes")]
    pub task_timeout_minutes: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_pool_size: default_pool_size(),
            queue_capacity: default_queue_capacity(),
            task_timeout_minutes: default_task_timeout_minutes(),
        }
    }
}

fn default_pool_size() -> usize {
    10
}

fn default_queue_capacity() -> usize {
    50
}

fn default_task_timeout_minutes() -> u64 {
    3
}

// ============= Timeline Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineConfig {
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Frames buffered per viewer before it counts as a failed send
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
            heartbeat_secs: default_heartbeat_secs(),
            client_buffer: default_client_buffer(),
        }
    }
}

impl TimelineConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes * 60)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

fn default_ttl_minutes() -> u64 {
    30
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_client_buffer() -> usize {
    256
}

// ============= Search Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// `tavily` or `duckduckgo`
    #[serde(default = "default_search_provider")]
    pub provider: String,

    #[serde(default = "default_search_base_url")]
    pub base_url: String,

    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,

    /// Hits with more content than this are summarized by the model
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold: usize,

    /// Characters kept when summarization fails
    #[serde(default = "default_fallback_chars")]
    pub fallback_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_search_provider(),
            base_url: default_search_base_url(),
            api_key_env: default_search_key_env(),
            timeout_secs: default_search_timeout(),
            summarize_threshold: default_summarize_threshold(),
            fallback_chars: default_fallback_chars(),
        }
    }
}

fn default_search_provider() -> String {
    "tavily".to_string()
}

fn default_search_base_url() -> String {
    "https://api.tavily.com".to_string()
}

fn default_search_key_env() -> String {
    "TAVILY_API_KEY".to_string()
}

fn default_search_timeout() -> u64 {
    30
}

fn default_summarize_threshold() -> usize {
    500
}

fn default_fallback_chars() -> usize {
    1000
}

// ============= Model Configuration =============

/// An OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Environment variable holding the API key. Unset means no auth header.
    #[serde(default)]
    pub api_key_env: Option<String>,

    pub model: String,

    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model_timeout() -> u64 {
    120
}

fn default_model_id() -> String {
    "default".to_string()
}

fn default_models() -> HashMap<String, ModelConfig> {
    HashMap::from([(
        default_model_id(),
        ModelConfig {
            api_base: default_api_base(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: default_model_timeout(),
            max_tokens: None,
        },
    )])
}

// ============= Budget Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLevelConfig {
    pub max_conduct_count: u32,
    pub max_search_count: u32,
    pub max_concurrent_units: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_budget_level")]
    pub default_level: String,

    #[serde(default = "default_budget_levels")]
    pub levels: HashMap<String, BudgetLevelConfig>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_level: default_budget_level(),
            levels: default_budget_levels(),
        }
    }
}

fn default_budget_level() -> String {
    "MEDIUM".to_string()
}

fn default_budget_levels() -> HashMap<String, BudgetLevelConfig> {
    HashMap::from([
        (
            "MEDIUM".to_string(),
            BudgetLevelConfig {
                max_conduct_count: 2,
                max_search_count: 3,
                max_concurrent_units: 2,
            },
        ),
        (
            "HIGH".to_string(),
            BudgetLevelConfig {
                max_conduct_count: 4,
                max_search_count: 5,
                max_concurrent_units: 3,
            },
        ),
        (
            "ULTRA".to_string(),
            BudgetLevelConfig {
                max_conduct_count: 6,
                max_search_count: 8,
                max_concurrent_units: 4,
            },
        ),
    ])
}

// ============= Loading & Validation =============

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Watcher error: {0}")]
    WatchError(#[from] notify::Error),
}

impl ResearchConfig {
    /// Load and validate the configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ResearchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency. Secrets are resolved lazily and not checked here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.max_pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "executor.max_pool_size must be at least 1".to_string(),
            ));
        }
        if self.timeline.client_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "timeline.client_buffer must be at least 1".to_string(),
            ));
        }

        match self.search.provider.as_str() {
            "tavily" | "duckduckgo" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown search provider '{}'",
                    other
                )));
            }
        }

        if !self.models.contains_key(&self.default_model) {
            return Err(ConfigError::ValidationError(format!(
                "default_model '{}' is not defined under [models]",
                self.default_model
            )));
        }

        if !self.budget.levels.contains_key(&self.budget.default_level) {
            return Err(ConfigError::ValidationError(format!(
                "budget.default_level '{}' is not defined under [budget.levels]",
                self.budget.default_level
            )));
        }

        for (name, level) in &self.budget.levels {
            if level.max_conduct_count == 0 || level.max_search_count == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Budget level '{}' must allow at least one delegation and one search",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Resolve a budget tier by name, falling back to the default tier.
    /// Tier names are matched case-insensitively.
    pub fn budget_level(&self, name: Option<&str>) -> Option<(String, BudgetLevelConfig)> {
        let wanted = name
            .map(|n| n.trim().to_uppercase())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.budget.default_level.clone());

        self.budget
            .levels
            .iter()
            .find(|(level, _)| level.eq_ignore_ascii_case(&wanted))
            .map(|(level, cfg)| (level.clone(), *cfg))
    }

    /// Resolve a model by id, falling back to `default_model`.
    pub fn model(&self, id: Option<&str>) -> Option<(String, &ModelConfig)> {
        let wanted = id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(&self.default_model);
        self.models.get(wanted).map(|cfg| (wanted.to_string(), cfg))
    }

    /// Get a resolved value from an env var reference
    pub fn resolve_env(&self, env_name: &str) -> Option<String> {
        std::env::var(env_name).ok().filter(|v| !v.is_empty())
    }
}

// ============= Config Manager =============

/// Thread-safe configuration holder with optional file watching
pub struct ResearchConfigManager {
    config: Arc<ArcSwap<ResearchConfig>>,
    config_path: PathBuf,
    watcher: RwLock<Option<RecommendedWatcher>>,
}

impl ResearchConfigManager {
    /// Create a new configuration manager and load the initial config
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(ConfigError::ReadError)?
                .join(path)
        };

        let config = ResearchConfig::load(&path)?;

        Ok(Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: path,
            watcher: RwLock::new(None),
        })
    }

    /// Create a config manager directly from a config (useful for testing).
    /// It has no file to reload from.
    pub fn from_config(config: ResearchConfig) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: PathBuf::from("research.toml"),
            watcher: RwLock::new(None),
        }
    }

    /// Get the current configuration (lockless read)
    pub fn config(&self) -> Arc<ResearchConfig> {
        self.config.load_full()
    }

    /// Replace the active configuration after validating it
    pub fn update(&self, config: ResearchConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config.store(Arc::new(config));
        Ok(())
    }

    /// Manually reload the configuration from disk
    pub fn reload(&self) -> Result<(), ConfigError> {
        info!("Reloading configuration from {:?}", self.config_path);

        let new_config = ResearchConfig::load(&self.config_path)?;
        self.config.store(Arc::new(new_config));

        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Start watching the config file and reload it on change
    pub fn start_watching(&self) -> Result<(), ConfigError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        let config_path = self.config_path.clone();
        let config_arc = Arc::clone(&self.config);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        let _ = tx.send(());
                    }
                }
                Err(e) => {
                    error!("Config watcher error: {:?}", e);
                }
            }
        })?;

        if let Some(parent) = self.config_path.parent() {
            watcher.watch(parent, RecursiveMode::NonRecursive)?;
        }

        *self.watcher.write() = Some(watcher);

        tokio::spawn(async move {
            let mut last_reload = std::time::Instant::now();
            let debounce = Duration::from_millis(500);

            while rx.recv().await.is_some() {
                if last_reload.elapsed() < debounce {
                    continue;
                }

                // let the writer finish
                tokio::time::sleep(Duration::from_millis(100)).await;

                match ResearchConfig::load(&config_path) {
                    Ok(new_config) => {
                        config_arc.store(Arc::new(new_config));
                        info!("Configuration hot-reloaded successfully");
                        last_reload = std::time::Instant::now();
                    }
                    Err(e) => {
                        warn!("Failed to hot-reload config: {}. Keeping previous config.", e);
                    }
                }
            }
        });

        info!("Configuration hot-reload watcher started");
        Ok(())
    }

    /// Stop watching for configuration changes
    pub fn stop_watching(&self) {
        *self.watcher.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> String {
        r#"
default_model = "fast"

[server]
host = "0.0.0.0"
port = 8080
log_format = "json"

[database]
url = ":memory:"

[executor]
max_pool_size = 2
queue_capacity = 4

[search]
provider = "duckduckgo"

[models.fast]
api_base = "http://localhost:8000/v1"
model = "qwen2.5"

[budget]
default_level = "LOW"

[budget.levels.LOW]
max_conduct_count = 1
max_search_count = 2
max_concurrent_units = 1
"#
        .to_string()
    }

    #[test]
    fn test_parse_config() {
        let config = ResearchConfig::from_toml(&create_test_config()).expect("valid config");

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.executor.max_pool_size, 2);
        assert_eq!(config.executor.task_timeout_minutes, 3);
        assert_eq!(config.timeline.ttl_minutes, 30);
        assert_eq!(config.search.summarize_threshold, 500);
        assert!(config.models["fast"].api_key_env.is_none());
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ResearchConfig::default();
        config.validate().expect("defaults validate");
        let (name, medium) = config.budget_level(None).unwrap();
        assert_eq!(name, "MEDIUM");
        assert_eq!(medium.max_search_count, 3);
    }

    #[test]
    fn test_budget_level_lookup_is_case_insensitive() {
        let config = ResearchConfig::default();
        let (name, high) = config.budget_level(Some("high")).unwrap();
        assert_eq!(name, "HIGH");
        assert_eq!(high.max_conduct_count, 4);
        assert!(config.budget_level(Some("galactic")).is_none());
    }

    #[test]
    fn test_model_lookup_falls_back_to_default() {
        let config = ResearchConfig::from_toml(&create_test_config()).unwrap();
        let (id, model) = config.model(None).unwrap();
        assert_eq!(id, "fast");
        assert_eq!(model.model, "qwen2.5");
        assert!(config.model(Some("missing")).is_none());
    }

    #[test]
    fn test_rejects_unknown_default_model() {
        let toml = r#"
default_model = "ghost"
"#;
        let err = ResearchConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_rejects_zero_pool() {
        let toml = r#"
[executor]
max_pool_size = 0
"#;
        assert!(ResearchConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_rejects_unknown_search_provider() {
        let toml = r#"
[search]
provider = "altavista"
"#;
        assert!(ResearchConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_manager_update_swaps_config() {
        let manager = ResearchConfigManager::from_config(ResearchConfig::default());
        let mut next = ResearchConfig::default();
        next.executor.max_pool_size = 3;
        manager.update(next).unwrap();
        assert_eq!(manager.config().executor.max_pool_size, 3);

        let mut invalid = ResearchConfig::default();
        invalid.executor.max_pool_size = 0;
        assert!(manager.update(invalid).is_err());
        assert_eq!(manager.config().executor.max_pool_size, 3);
    }

    #[test]
    fn test_load_missing_file() {
        let err = ResearchConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
