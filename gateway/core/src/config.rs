//! TOML Configuration File Support
//!
//! Centralized configuration loading for the gateway, supporting a TOML
//! configuration file at `~/.config/llm-gateway/gateway.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/llm-gateway/gateway.toml` (typically `~/.config/llm-gateway/gateway.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [pools.big]
//! url = "http://gpu-box:11434"
//! default_model = "qwen2.5:32b"
//!
//! [pools.fast]
//! url = "http://localhost:11434"
//! default_model = "llama3.2:3b"
//!
//! [classifier]
//! pool = "fast"
//! model = "llama3.2:3b"
//! timeout_ms = 3000
//!
//! [rate_limit]
//! caller_capacity = 20
//! caller_refill_per_sec = 2.0
//!
//! [cache]
//! vector_store = "memory"
//! embedding_pool = "fast"
//! embedding_model = "nomic-embed-text"
//!
//! [[models]]
//! query_type = "code"
//! name = "qwen2.5-coder:32b"
//! weight = 0.95
//! size_b = 32.0
//! pool = "big"
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{CacheConfig, TtlPolicy};
use crate::resilience::{BreakerConfig, RateLimitConfig, RetryPolicy, MAX_BACKOFF_BASE};
use crate::routing::{ClassifierConfig, ModelCatalog, ModelSpec, PoolConfig, PoolId, QueryType, RouterConfig};

/// Pool URL used when nothing is configured: a local Ollama
pub const DEFAULT_BIG_POOL_URL: &str = "http://localhost:11434";

/// Default model of the big pool
pub const DEFAULT_BIG_MODEL: &str = "qwen2.5:32b";

/// Default model of the fast pool
pub const DEFAULT_FAST_MODEL: &str = "llama3.2:3b";

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Remote vector store backing the semantic cache
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStoreKind {
    /// Local map only
    #[default]
    None,
    /// In-process similarity store
    Memory,
}

impl FromStr for CacheStoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::ValidationError(format!(
                "unknown cache store '{other}' (expected 'none' or 'memory')"
            ))),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// One pool in the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolToml {
    /// Base URL; absent leaves the pool unconfigured
    pub url: Option<String>,
    /// Model used when no candidate is available
    pub default_model: Option<String>,
}

/// Pools section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolsToml {
    /// Large-model pool
    pub big: PoolToml,
    /// Small-model pool
    pub fast: PoolToml,
}

/// Classifier section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierToml {
    /// Pool running the classification model
    pub pool: Option<PoolId>,
    /// Classification model
    pub model: Option<String>,
    /// Timeout of the classification call in milliseconds
    pub timeout_ms: Option<u64>,
    /// Token budget of the classification call
    pub max_tokens: Option<u32>,
    /// Size of the prefix cache
    pub cache_size: Option<usize>,
    /// Query prefix length used as cache key
    pub prefix_len: Option<usize>,
}

/// Router section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterToml {
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Token limit per answer (0 = pool default)
    pub num_predict: Option<u32>,
    /// Timeout of each model call in milliseconds
    pub request_timeout_ms: Option<u64>,
    /// Candidates asked in an ensemble
    pub ensemble_size: Option<usize>,
    /// Model that merges ensemble answers
    pub synthesis_model: Option<String>,
}

/// Circuit breaker section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerToml {
    /// Consecutive failures that open a breaker
    pub failure_threshold: Option<u32>,
    /// Consecutive half-open successes that close it
    pub success_threshold: Option<u32>,
    /// Seconds an open breaker waits before a trial call
    pub timeout_secs: Option<u64>,
}

/// Retry section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryToml {
    /// Total attempts including the first
    pub max_attempts: Option<u32>,
    /// First backoff delay in milliseconds
    pub initial_delay_ms: Option<u64>,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: Option<u64>,
    /// Backoff multiplier
    pub base: Option<f64>,
    /// Whether to jitter delays
    pub jitter: Option<bool>,
}

/// Rate limiting section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitToml {
    /// Whether admission control is enabled
    pub enabled: Option<bool>,
    /// Burst size per caller
    pub caller_capacity: Option<u32>,
    /// Refill rate per caller
    pub caller_refill_per_sec: Option<f64>,
    /// Burst size per endpoint
    pub endpoint_capacity: Option<u32>,
    /// Refill rate per endpoint
    pub endpoint_refill_per_sec: Option<f64>,
    /// Cap on live caller buckets
    pub max_callers: Option<usize>,
}

/// Cache section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheToml {
    /// Whether the cache is enabled
    pub enabled: Option<bool>,
    /// Minimum similarity for a nearest-neighbour hit
    pub similarity_threshold: Option<f32>,
    /// Size cap of the local map
    pub max_local_entries: Option<usize>,
    /// Size cap of the in-process vector store
    pub max_store_entries: Option<usize>,
    /// Remote store kind
    pub vector_store: Option<CacheStoreKind>,
    /// Pool serving embeddings
    pub embedding_pool: Option<PoolId>,
    /// Embedding model
    pub embedding_model: Option<String>,
    /// TTL of time-sensitive answers
    pub short_ttl_secs: Option<u64>,
    /// Default TTL
    pub medium_ttl_secs: Option<u64>,
    /// TTL of durable answers
    pub long_ttl_secs: Option<u64>,
    /// Timeout of remote cache calls in milliseconds
    pub backend_timeout_ms: Option<u64>,
}

/// One `[[models]]` entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelToml {
    /// Query type the model serves
    pub query_type: QueryType,
    /// Model name as loaded on the pool
    pub name: String,
    /// What the model is good at
    pub specialty: Option<String>,
    /// Static weight; higher is tried first
    pub weight: f32,
    /// Parameter count in billions
    pub size_b: f32,
    /// Pool restriction
    pub pool: Option<PoolId>,
    /// Keep-alive policy
    pub keep_alive: Option<String>,
}

/// Root TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayToml {
    /// Pool endpoints
    pub pools: PoolsToml,
    /// Classifier settings
    pub classifier: ClassifierToml,
    /// Router settings
    pub router: RouterToml,
    /// Circuit breaker settings
    pub breaker: BreakerToml,
    /// Retry settings
    pub retry: RetryToml,
    /// Rate limiting settings
    pub rate_limit: RateLimitToml,
    /// Cache settings
    pub cache: CacheToml,
    /// Candidate model overrides
    pub models: Vec<ModelToml>,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Embedding source for similarity lookups
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmbeddingConfig {
    /// Pool serving embeddings
    pub pool: PoolId,
    /// Embedding model
    pub model: String,
}

/// Centralized configuration for the gateway
///
/// Consolidates every source and tracks where the values came from. Use
/// [`load_config`] to load with proper priority handling.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Pool endpoints and default models
    pub pools: HashMap<PoolId, PoolConfig>,
    /// Classifier settings
    pub classifier: ClassifierConfig,
    /// Router settings
    pub router: RouterConfig,
    /// Breaker thresholds for every dependency
    pub breaker: BreakerConfig,
    /// Retry policy for model calls
    pub retry: RetryPolicy,
    /// Admission control
    pub rate_limit: RateLimitConfig,
    /// Cache settings
    pub cache: CacheConfig,
    /// Remote cache store
    pub cache_store: CacheStoreKind,
    /// Embedding source; `None` disables similarity lookups
    pub embedding: Option<EmbeddingConfig>,
    /// Candidate models
    pub catalog: ModelCatalog,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    /// Source of configuration values
    source: ConfigSource,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let pools = HashMap::from([
            (PoolId::Big, PoolConfig::new(DEFAULT_BIG_POOL_URL, DEFAULT_BIG_MODEL)),
            (PoolId::Fast, PoolConfig::unconfigured(DEFAULT_FAST_MODEL)),
        ]);
        Self {
            pools,
            classifier: ClassifierConfig::default(),
            router: RouterConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            cache_store: CacheStoreKind::default(),
            embedding: None,
            catalog: ModelCatalog::builtin(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Settings of one pool
    pub fn pool_mut(&mut self, id: PoolId) -> &mut PoolConfig {
        self.pools
            .entry(id)
            .or_insert_with(|| PoolConfig::unconfigured(String::new()))
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| -> Result<(), ConfigError> { Err(ConfigError::ValidationError(msg)) };

        for (id, pool) in &self.pools {
            if let Some(url) = &pool.url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return invalid(format!("pool '{id}' url must start with http:// or https://, got '{url}'"));
                }
            }
        }
        if self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0 {
            return invalid("breaker thresholds must be at least 1".into());
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".into());
        }
        let base = self.retry.base;
        if !(base.is_finite() && (1.0..=MAX_BACKOFF_BASE).contains(&base)) {
            return invalid(format!("retry.base must be in [1, {MAX_BACKOFF_BASE}], got {base}"));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return invalid(format!(
                "retry.initial_delay_ms ({}) must not exceed retry.max_delay_ms ({})",
                self.retry.initial_delay.as_millis(),
                self.retry.max_delay.as_millis()
            ));
        }
        if self.rate_limit.caller_capacity == 0 || self.rate_limit.endpoint_capacity == 0 {
            return invalid("rate limit capacities must be greater than 0".into());
        }
        for (name, rate) in [
            ("caller_refill_per_sec", self.rate_limit.caller_refill_per_sec),
            ("endpoint_refill_per_sec", self.rate_limit.endpoint_refill_per_sec),
        ] {
            if !(rate.is_finite() && rate >= 0.0) {
                return invalid(format!("rate_limit.{name} must be a finite number >= 0, got {rate}"));
            }
        }
        if self.rate_limit.max_callers == 0 {
            return invalid("rate_limit.max_callers must be at least 1".into());
        }
        if self.cache.max_store_entries == 0 {
            return invalid("cache.max_store_entries must be at least 1".into());
        }
        let threshold = self.cache.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return invalid(format!("cache.similarity_threshold must be in (0, 1], got {threshold}"));
        }
        if self.router.ensemble_size == 0 {
            return invalid("router.ensemble_size must be at least 1".into());
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/llm-gateway/gateway.toml` or
/// `~/.config/llm-gateway/gateway.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("llm-gateway").join("gateway.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resolved values fail validation. A missing config file is not an error.
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// With `None`, only defaults and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the resolved values fail validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<GatewayConfig, ConfigError> {
    let mut config = GatewayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: GatewayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config)?;
    config.validate()?;

    Ok(config)
}

fn apply_pool_toml(config: &mut GatewayConfig, id: PoolId, toml: &PoolToml) {
    let pool = config.pool_mut(id);
    if toml.url.is_some() {
        pool.url = toml.url.clone();
    }
    if let Some(ref model) = toml.default_model {
        pool.default_model = model.clone();
    }
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut GatewayConfig, toml: &GatewayToml) {
    // Pools
    apply_pool_toml(config, PoolId::Big, &toml.pools.big);
    apply_pool_toml(config, PoolId::Fast, &toml.pools.fast);

    // Classifier
    if let Some(pool) = toml.classifier.pool {
        config.classifier.pool = pool;
    }
    if let Some(ref model) = toml.classifier.model {
        config.classifier.model = model.clone();
    }
    if let Some(ms) = toml.classifier.timeout_ms {
        config.classifier.timeout = Duration::from_millis(ms);
    }
    if let Some(n) = toml.classifier.max_tokens {
        config.classifier.max_tokens = n;
    }
    if let Some(n) = toml.classifier.cache_size {
        config.classifier.cache_size = n;
    }
    if let Some(n) = toml.classifier.prefix_len {
        config.classifier.prefix_len = n;
    }

    // Router
    if let Some(t) = toml.router.temperature {
        config.router.temperature = t;
    }
    if let Some(n) = toml.router.num_predict {
        config.router.num_predict = n;
    }
    if let Some(ms) = toml.router.request_timeout_ms {
        config.router.request_timeout = Duration::from_millis(ms);
    }
    if let Some(n) = toml.router.ensemble_size {
        config.router.ensemble_size = n;
    }
    if toml.router.synthesis_model.is_some() {
        config.router.synthesis_model = toml.router.synthesis_model.clone();
    }

    // Breaker
    if let Some(n) = toml.breaker.failure_threshold {
        config.breaker.failure_threshold = n;
    }
    if let Some(n) = toml.breaker.success_threshold {
        config.breaker.success_threshold = n;
    }
    if let Some(secs) = toml.breaker.timeout_secs {
        config.breaker.timeout = Duration::from_secs(secs);
    }

    // Retry
    if let Some(n) = toml.retry.max_attempts {
        config.retry.max_attempts = n;
    }
    if let Some(ms) = toml.retry.initial_delay_ms {
        config.retry.initial_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.retry.max_delay_ms {
        config.retry.max_delay = Duration::from_millis(ms);
    }
    if let Some(base) = toml.retry.base {
        config.retry.base = base;
    }
    if let Some(jitter) = toml.retry.jitter {
        config.retry.jitter = jitter;
    }

    // Rate limit
    if let Some(enabled) = toml.rate_limit.enabled {
        config.rate_limit.enabled = enabled;
    }
    if let Some(n) = toml.rate_limit.caller_capacity {
        config.rate_limit.caller_capacity = n;
    }
    if let Some(rate) = toml.rate_limit.caller_refill_per_sec {
        config.rate_limit.caller_refill_per_sec = rate;
    }
    if let Some(n) = toml.rate_limit.endpoint_capacity {
        config.rate_limit.endpoint_capacity = n;
    }
    if let Some(rate) = toml.rate_limit.endpoint_refill_per_sec {
        config.rate_limit.endpoint_refill_per_sec = rate;
    }
    if let Some(n) = toml.rate_limit.max_callers {
        config.rate_limit.max_callers = n;
    }

    // Cache
    let cache = &toml.cache;
    if let Some(enabled) = cache.enabled {
        config.cache.enabled = enabled;
    }
    if let Some(t) = cache.similarity_threshold {
        config.cache.similarity_threshold = t;
    }
    if let Some(n) = cache.max_local_entries {
        config.cache.max_local_entries = n;
    }
    if let Some(n) = cache.max_store_entries {
        config.cache.max_store_entries = n;
    }
    if let Some(store) = cache.vector_store {
        config.cache_store = store;
    }
    if let Some(ms) = cache.backend_timeout_ms {
        config.cache.backend_timeout = Duration::from_millis(ms);
    }
    let defaults = TtlPolicy::default();
    config.cache.ttl = TtlPolicy {
        short: cache.short_ttl_secs.map_or(defaults.short, Duration::from_secs),
        medium: cache.medium_ttl_secs.map_or(defaults.medium, Duration::from_secs),
        long: cache.long_ttl_secs.map_or(defaults.long, Duration::from_secs),
    };
    if cache.embedding_pool.is_some() || cache.embedding_model.is_some() {
        config.embedding = Some(EmbeddingConfig {
            pool: cache.embedding_pool.unwrap_or(PoolId::Fast),
            model: cache
                .embedding_model
                .clone()
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
        });
    }

    // Models: entries for a query type replace its built-in candidates
    let mut by_type: HashMap<QueryType, Vec<ModelSpec>> = HashMap::new();
    for entry in &toml.models {
        let mut spec = ModelSpec::new(
            entry.name.clone(),
            entry
                .specialty
                .clone()
                .unwrap_or_else(|| entry.query_type.as_str().to_string()),
            entry.weight,
            entry.size_b,
        );
        if let Some(pool) = entry.pool {
            spec = spec.on_pool(pool);
        }
        if let Some(ref keep_alive) = entry.keep_alive {
            spec = spec.with_keep_alive(keep_alive.clone());
        }
        by_type.entry(entry.query_type).or_default().push(spec);
    }
    for (query_type, specs) in by_type {
        config.catalog.set(query_type, specs);
    }
}

/// Apply environment variable overrides to the config
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] for unparseable pool or store names.
pub fn apply_env_config(config: &mut GatewayConfig) -> Result<(), ConfigError> {
    if let Ok(url) = std::env::var("GATEWAY_BIG_POOL_URL") {
        config.pool_mut(PoolId::Big).url = Some(url);
        config.source = ConfigSource::Env;
    }
    if let Ok(url) = std::env::var("GATEWAY_FAST_POOL_URL") {
        config.pool_mut(PoolId::Fast).url = Some(url);
        config.source = ConfigSource::Env;
    }
    if let Ok(model) = std::env::var("GATEWAY_BIG_DEFAULT_MODEL") {
        config.pool_mut(PoolId::Big).default_model = model;
        config.source = ConfigSource::Env;
    }
    if let Ok(model) = std::env::var("GATEWAY_FAST_DEFAULT_MODEL") {
        config.pool_mut(PoolId::Fast).default_model = model;
        config.source = ConfigSource::Env;
    }
    if let Ok(pool) = std::env::var("GATEWAY_CLASSIFIER_POOL") {
        config.classifier.pool = pool
            .parse()
            .map_err(|e| ConfigError::ValidationError(format!("GATEWAY_CLASSIFIER_POOL: {e}")))?;
        config.source = ConfigSource::Env;
    }
    if let Ok(model) = std::env::var("GATEWAY_CLASSIFIER_MODEL") {
        config.classifier.model = model;
        config.source = ConfigSource::Env;
    }
    if let Ok(value) = std::env::var("GATEWAY_RATE_LIMIT") {
        config.rate_limit.enabled = !matches!(value.trim(), "0" | "false" | "off");
        config.source = ConfigSource::Env;
    }
    if let Ok(store) = std::env::var("GATEWAY_CACHE_STORE") {
        config.cache_store = store.parse()?;
        config.source = ConfigSource::Env;
    }
    Ok(())
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Big pool URL override
    pub big_pool_url: Option<String>,

    /// Fast pool URL override
    pub fast_pool_url: Option<String>,

    /// Classifier model override
    pub classifier_model: Option<String>,

    /// Rate limiter switch override
    pub rate_limit_enabled: Option<bool>,

    /// Cache store override
    pub cache_store: Option<CacheStoreKind>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set big pool URL override
    #[must_use]
    pub fn with_big_pool_url(mut self, url: impl Into<String>) -> Self {
        self.big_pool_url = Some(url.into());
        self
    }

    /// Set fast pool URL override
    #[must_use]
    pub fn with_fast_pool_url(mut self, url: impl Into<String>) -> Self {
        self.fast_pool_url = Some(url.into());
        self
    }

    /// Set classifier model override
    #[must_use]
    pub fn with_classifier_model(mut self, model: impl Into<String>) -> Self {
        self.classifier_model = Some(model.into());
        self
    }

    /// Set rate limiter switch override
    #[must_use]
    pub fn with_rate_limit_enabled(mut self, enabled: bool) -> Self {
        self.rate_limit_enabled = Some(enabled);
        self
    }

    /// Set cache store override
    #[must_use]
    pub fn with_cache_store(mut self, store: CacheStoreKind) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the result is invalid.
    pub fn apply(&self, config: &mut GatewayConfig) -> Result<(), ConfigError> {
        if self.big_pool_url.is_some()
            || self.fast_pool_url.is_some()
            || self.classifier_model.is_some()
            || self.rate_limit_enabled.is_some()
            || self.cache_store.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.big_pool_url {
            config.pool_mut(PoolId::Big).url = Some(url.clone());
        }
        if let Some(ref url) = self.fast_pool_url {
            config.pool_mut(PoolId::Fast).url = Some(url.clone());
        }
        if let Some(ref model) = self.classifier_model {
            config.classifier.model = model.clone();
        }
        if let Some(enabled) = self.rate_limit_enabled {
            config.rate_limit.enabled = enabled;
        }
        if let Some(store) = self.cache_store {
            config.cache_store = store;
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Clean up all environment variables used by config loading
    fn clear_config_env_vars() {
        for var in [
            "GATEWAY_BIG_POOL_URL",
            "GATEWAY_FAST_POOL_URL",
            "GATEWAY_BIG_DEFAULT_MODEL",
            "GATEWAY_FAST_DEFAULT_MODEL",
            "GATEWAY_CLASSIFIER_POOL",
            "GATEWAY_CLASSIFIER_MODEL",
            "GATEWAY_RATE_LIMIT",
            "GATEWAY_CACHE_STORE",
        ] {
            std::env::remove_var(var);
        }
    }

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();

        assert_eq!(config.pools[&PoolId::Big].url.as_deref(), Some(DEFAULT_BIG_POOL_URL));
        assert_eq!(config.pools[&PoolId::Big].default_model, DEFAULT_BIG_MODEL);
        assert_eq!(config.pools[&PoolId::Fast].url, None);
        assert_eq!(config.pools[&PoolId::Fast].default_model, DEFAULT_FAST_MODEL);
        assert_eq!(config.router.ensemble_size, 3);
        assert!((config.cache.similarity_threshold - 0.92).abs() < f32::EPSILON);
        assert_eq!(config.cache_store, CacheStoreKind::None);
        assert!(config.embedding.is_none());
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("llm-gateway"));
            assert!(p.to_string_lossy().ends_with("gateway.toml"));
        }
    }

    // =========================================================================
    // TOML Parsing Tests
    // =========================================================================

    #[test]
    #[serial]
    fn test_parse_valid_toml() {
        clear_config_env_vars();
        let file = write_toml(
            r#"
[pools.big]
url = "http://gpu:11434"
default_model = "qwen2.5:32b"

[pools.fast]
url = "http://laptop:11434"
default_model = "llama3.2:1b"

[classifier]
pool = "big"
model = "qwen2.5:3b"
timeout_ms = 1500
cache_size = 50

[router]
ensemble_size = 2
synthesis_model = "qwen2.5:14b"

[breaker]
failure_threshold = 5
timeout_secs = 10

[retry]
max_attempts = 4
initial_delay_ms = 250
jitter = false

[rate_limit]
caller_capacity = 5
caller_refill_per_sec = 0.5

[cache]
similarity_threshold = 0.9
vector_store = "memory"
embedding_model = "mxbai-embed-large"
short_ttl_secs = 60
"#,
        );

        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.pools[&PoolId::Big].url.as_deref(), Some("http://gpu:11434"));
        assert_eq!(config.pools[&PoolId::Fast].default_model, "llama3.2:1b");
        assert_eq!(config.classifier.pool, PoolId::Big);
        assert_eq!(config.classifier.model, "qwen2.5:3b");
        assert_eq!(config.classifier.timeout, Duration::from_millis(1500));
        assert_eq!(config.classifier.cache_size, 50);
        assert_eq!(config.router.ensemble_size, 2);
        assert_eq!(config.router.synthesis_model.as_deref(), Some("qwen2.5:14b"));
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.timeout, Duration::from_secs(10));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert!(!config.retry.jitter);
        assert_eq!(config.rate_limit.caller_capacity, 5);
        assert_eq!(config.cache_store, CacheStoreKind::Memory);
        assert_eq!(config.cache.ttl.short, Duration::from_secs(60));
        assert_eq!(config.cache.ttl.long, Duration::from_secs(86_400));
        assert_eq!(
            config.embedding,
            Some(EmbeddingConfig {
                pool: PoolId::Fast,
                model: "mxbai-embed-large".into()
            })
        );
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path, Some(file.path().to_path_buf()));
    }

    #[test]
    #[serial]
    fn test_models_replace_builtin_candidates_per_type() {
        clear_config_env_vars();
        let file = write_toml(
            r#"
[[models]]
query_type = "code"
name = "starcoder2:15b"
weight = 0.7
size_b = 15.0

[[models]]
query_type = "code"
name = "codestral:22b"
weight = 0.9
size_b = 22.0
pool = "big"
keep_alive = "30m"
"#,
        );

        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
        let code = config.catalog.candidates(QueryType::Code);
        assert_eq!(code.len(), 2);
        assert_eq!(code[0].name, "codestral:22b");
        assert_eq!(code[0].pool, Some(PoolId::Big));
        assert_eq!(code[0].keep_alive.as_deref(), Some("30m"));
        assert_eq!(code[1].specialty, "code");

        let builtin = ModelCatalog::builtin();
        assert_eq!(
            config.catalog.candidates(QueryType::Math),
            builtin.candidates(QueryType::Math)
        );
    }

    #[test]
    #[serial]
    fn test_parse_empty_toml() {
        clear_config_env_vars();
        let file = write_toml("");
        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.router.ensemble_size, 3);
        assert_eq!(config.source(), ConfigSource::File);
    }

    #[test]
    #[serial]
    fn test_missing_file_graceful() {
        clear_config_env_vars();
        let config =
            load_config_from_path(Some(PathBuf::from("/nonexistent/llm-gateway/gateway.toml")))
                .unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    #[serial]
    fn test_malformed_toml_error() {
        clear_config_env_vars();
        let file = write_toml("[pools.big\nurl = ");
        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    #[serial]
    fn test_unknown_pool_name_is_parse_error() {
        clear_config_env_vars();
        let file = write_toml("[classifier]\npool = \"medium\"\n");
        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    // =========================================================================
    // Validation Tests
    // =========================================================================

    #[test]
    #[serial]
    fn test_validation_rejects_bad_values() {
        clear_config_env_vars();
        for content in [
            "[pools.fast]\nurl = \"localhost:11434\"\n",
            "[breaker]\nfailure_threshold = 0\n",
            "[cache]\nsimilarity_threshold = 1.5\n",
            "[rate_limit]\ncaller_capacity = 0\n",
            "[rate_limit]\nmax_callers = 0\n",
            "[cache]\nmax_store_entries = 0\n",
        ] {
            let file = write_toml(content);
            let result = load_config_from_path(Some(file.path().to_path_buf()));
            assert!(
                matches!(result, Err(ConfigError::ValidationError(_))),
                "expected validation error for {content:?}"
            );
        }
    }

    #[test]
    #[serial]
    fn test_validation_rejects_bad_numbers() {
        clear_config_env_vars();
        for content in [
            "[retry]\nbase = 1e300\n",
            "[retry]\nbase = inf\n",
            "[retry]\nbase = nan\n",
            "[retry]\nbase = 0.5\n",
            "[retry]\ninitial_delay_ms = 5000\nmax_delay_ms = 100\n",
            "[rate_limit]\ncaller_refill_per_sec = -1.0\n",
            "[rate_limit]\ncaller_refill_per_sec = nan\n",
            "[rate_limit]\nendpoint_refill_per_sec = inf\n",
            "[rate_limit]\nendpoint_refill_per_sec = -0.5\n",
        ] {
            let file = write_toml(content);
            let result = load_config_from_path(Some(file.path().to_path_buf()));
            assert!(
                matches!(result, Err(ConfigError::ValidationError(_))),
                "expected validation error for {content:?}"
            );
        }
    }

    #[test]
    #[serial]
    fn test_boundary_numbers_are_accepted() {
        clear_config_env_vars();
        let file = write_toml(
            "[retry]\nbase = 10.0\ninitial_delay_ms = 100\nmax_delay_ms = 100\n\n\
             [rate_limit]\ncaller_refill_per_sec = 0.0\nmax_callers = 50\n\n\
             [cache]\nmax_store_entries = 20\n",
        );
        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
        assert!((config.retry.base - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.retry.initial_delay, config.retry.max_delay);
        assert_eq!(config.rate_limit.max_callers, 50);
        assert_eq!(config.cache.max_store_entries, 20);
    }

    // =========================================================================
    // Priority Tests
    // =========================================================================

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        clear_config_env_vars();
        let file = write_toml("[pools.fast]\nurl = \"http://file:11434\"\n");

        std::env::set_var("GATEWAY_FAST_POOL_URL", "http://env:11434");
        std::env::set_var("GATEWAY_CLASSIFIER_POOL", "big");
        std::env::set_var("GATEWAY_RATE_LIMIT", "0");
        std::env::set_var("GATEWAY_CACHE_STORE", "memory");

        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
        clear_config_env_vars();

        assert_eq!(config.pools[&PoolId::Fast].url.as_deref(), Some("http://env:11434"));
        assert_eq!(config.classifier.pool, PoolId::Big);
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.cache_store, CacheStoreKind::Memory);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    #[serial]
    fn test_bad_env_value_is_validation_error() {
        clear_config_env_vars();
        std::env::set_var("GATEWAY_CACHE_STORE", "redis");
        let result = load_config_from_path(None);
        clear_config_env_vars();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    #[serial]
    fn test_cli_overrides_env() {
        clear_config_env_vars();
        std::env::set_var("GATEWAY_BIG_POOL_URL", "http://env:11434");
        let mut config = load_config_from_path(None).unwrap();
        clear_config_env_vars();

        ConfigOverrides::new()
            .with_big_pool_url("http://cli:11434")
            .with_rate_limit_enabled(false)
            .apply(&mut config)
            .unwrap();

        assert_eq!(config.pools[&PoolId::Big].url.as_deref(), Some("http://cli:11434"));
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = GatewayConfig::default();
        ConfigOverrides::new().apply(&mut config).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_overrides_are_validated() {
        let mut config = GatewayConfig::default();
        let result = ConfigOverrides::new()
            .with_fast_pool_url("ftp://nope")
            .apply(&mut config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_cache_store_from_str() {
        assert_eq!("Memory".parse::<CacheStoreKind>().unwrap(), CacheStoreKind::Memory);
        assert_eq!("none".parse::<CacheStoreKind>().unwrap(), CacheStoreKind::None);
        assert!("redis".parse::<CacheStoreKind>().is_err());
    }
}
