//! Model Catalog
//!
//! Query categories, pool identifiers, importance hints and the static table
//! of candidate models per category.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Query Types
// ============================================================================

/// Coarse category of a query
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Writing, reading or fixing code
    Code,
    /// Calculation and formal math
    Math,
    /// Stories, poems, jokes
    Creative,
    /// Systems, tooling and technical explanations
    Technical,
    /// Analysis, comparison, multi-step reasoning
    Reasoning,
    /// Live-stream and chat moderation chatter
    Broadcast,
    /// Anything else
    General,
    /// Personal assistant lookups (weather, reminders, notes)
    Secretary,
    /// Sorting urgent issues
    Triage,
    /// Calendars and meetings
    Scheduling,
    /// Condensing text
    Summary,
}

impl Default for QueryType {
    fn default() -> Self {
        Self::General
    }
}

impl QueryType {
    /// Every category, in tie-break order
    pub const ALL: [QueryType; 11] = [
        Self::Code,
        Self::Math,
        Self::Creative,
        Self::Technical,
        Self::Reasoning,
        Self::Broadcast,
        Self::General,
        Self::Secretary,
        Self::Triage,
        Self::Scheduling,
        Self::Summary,
    ];

    /// Lowercase name, as used in config files and classifier prompts
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Math => "math",
            Self::Creative => "creative",
            Self::Technical => "technical",
            Self::Reasoning => "reasoning",
            Self::Broadcast => "broadcast",
            Self::General => "general",
            Self::Secretary => "secretary",
            Self::Triage => "triage",
            Self::Scheduling => "scheduling",
            Self::Summary => "summary",
        }
    }

    /// Latency-sensitive categories that prefer the fast pool
    #[must_use]
    pub fn is_fast_lane(&self) -> bool {
        matches!(
            self,
            Self::Secretary | Self::Triage | Self::Scheduling | Self::Summary
        )
    }

    /// Whole-word keywords and phrases that suggest this category
    #[must_use]
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Code => &[
                "code", "function", "bug", "bugs", "compile", "compiler", "python", "rust",
                "javascript", "typescript", "debug", "refactor", "implement", "script",
                "stack trace", "syntax", "regex", "sql", "unit test",
            ],
            Self::Math => &[
                "calculate", "solve", "equation", "integral", "derivative", "math", "algebra",
                "probability", "multiply", "divide", "percent", "proof", "theorem",
            ],
            Self::Creative => &[
                "story", "poem", "creative", "imagine", "lyrics", "fiction", "character",
                "haiku", "joke", "write a",
            ],
            Self::Technical => &[
                "explain", "how does", "architecture", "configure", "install", "network",
                "server", "docker", "kubernetes", "database", "protocol", "linux",
            ],
            Self::Reasoning => &[
                "why", "analyze", "analyse", "compare", "reason", "pros and cons", "tradeoff",
                "evaluate", "argument", "logic", "step by step",
            ],
            Self::Broadcast => &[
                "stream", "broadcast", "obs", "viewers", "chat", "twitch", "scene", "overlay",
                "live",
            ],
            Self::General => &[],
            Self::Secretary => &[
                "weather", "right now", "remind", "reminder", "email", "note", "todo",
                "what time", "today", "tomorrow", "forecast",
            ],
            Self::Triage => &[
                "urgent", "triage", "priority", "incident", "outage", "alert", "critical",
                "error rate", "on call", "escalate",
            ],
            Self::Scheduling => &[
                "schedule", "meeting", "calendar", "appointment", "reschedule", "availability",
                "deadline", "book a",
            ],
            Self::Summary => &[
                "summarize", "summarise", "summary", "tldr", "recap", "key points", "brief",
                "overview",
            ],
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown query type '{s}'"))
    }
}

// ============================================================================
// Importance
// ============================================================================

/// Caller-supplied hint for how to route
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    /// Best available model
    #[default]
    Normal,
    /// Smallest available model, fast pool first
    Fast,
    /// Ensemble of models with a synthesis pass
    Critical,
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::Fast => f.write_str("fast"),
            Self::Critical => f.write_str("critical"),
        }
    }
}

impl FromStr for Importance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "fast" => Ok(Self::Fast),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown importance '{other}'")),
        }
    }
}

// ============================================================================
// Pools
// ============================================================================

/// Named inference pool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolId {
    /// Large-model pool (GPU box)
    Big,
    /// Small-model, low-latency pool
    Fast,
}

impl PoolId {
    /// Both pools
    pub const ALL: [PoolId; 2] = [Self::Big, Self::Fast];

    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Big => "big",
            Self::Fast => "fast",
        }
    }

    /// Name of the circuit breaker guarding this pool
    #[must_use]
    pub fn breaker_name(&self) -> String {
        format!("pool:{}", self.as_str())
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "big" => Ok(Self::Big),
            "fast" => Ok(Self::Fast),
            other => Err(format!("unknown pool '{other}'")),
        }
    }
}

// ============================================================================
// Model Specs
// ============================================================================

/// A candidate model for a query type
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Model name as loaded on the pool
    pub name: String,
    /// What the model is good at
    pub specialty: String,
    /// Static confidence weight; higher is tried first
    pub weight: f32,
    /// Parameter count in billions, used as a latency proxy
    pub size_b: f32,
    /// Pool the model is restricted to (`None` = any pool)
    #[serde(default)]
    pub pool: Option<PoolId>,
    /// Keep-alive policy passed to the pool
    #[serde(default)]
    pub keep_alive: Option<String>,
}

impl ModelSpec {
    /// Create an unrestricted spec
    pub fn new(name: impl Into<String>, specialty: impl Into<String>, weight: f32, size_b: f32) -> Self {
        Self {
            name: name.into(),
            specialty: specialty.into(),
            weight,
            size_b,
            pool: None,
            keep_alive: None,
        }
    }

    /// Restrict the model to one pool
    #[must_use]
    pub fn on_pool(mut self, pool: PoolId) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Set the keep-alive policy
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: impl Into<String>) -> Self {
        self.keep_alive = Some(keep_alive.into());
        self
    }

    /// Whether this spec may run on `pool`
    #[must_use]
    pub fn allowed_on(&self, pool: PoolId) -> bool {
        self.pool.map_or(true, |p| p == pool)
    }
}

/// Candidate models per query type, ordered by descending weight
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelCatalog {
    entries: HashMap<QueryType, Vec<ModelSpec>>,
}

impl ModelCatalog {
    /// Empty catalog
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in table of Ollama models
    #[must_use]
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.set(
            QueryType::Code,
            vec![
                ModelSpec::new("qwen2.5-coder:32b", "code generation", 0.95, 32.0).on_pool(PoolId::Big),
                ModelSpec::new("deepseek-coder-v2:16b", "code generation", 0.90, 16.0),
                ModelSpec::new("qwen2.5-coder:7b", "code completion", 0.80, 7.0),
            ],
        );
        catalog.set(
            QueryType::Math,
            vec![
                ModelSpec::new("qwen2.5:32b", "math", 0.90, 32.0).on_pool(PoolId::Big),
                ModelSpec::new("deepseek-r1:14b", "step-by-step math", 0.85, 14.0),
                ModelSpec::new("qwen2.5:7b", "arithmetic", 0.75, 7.0),
            ],
        );
        catalog.set(
            QueryType::Creative,
            vec![
                ModelSpec::new("mistral-nemo:12b", "creative writing", 0.85, 12.0),
                ModelSpec::new("llama3.1:8b", "creative writing", 0.80, 8.0),
            ],
        );
        catalog.set(
            QueryType::Technical,
            vec![
                ModelSpec::new("qwen2.5:32b", "technical depth", 0.90, 32.0).on_pool(PoolId::Big),
                ModelSpec::new("qwen2.5:14b", "technical", 0.85, 14.0),
                ModelSpec::new("llama3.1:8b", "technical", 0.80, 8.0),
            ],
        );
        catalog.set(
            QueryType::Reasoning,
            vec![
                ModelSpec::new("deepseek-r1:32b", "reasoning", 0.95, 32.0).on_pool(PoolId::Big),
                ModelSpec::new("deepseek-r1:14b", "reasoning", 0.85, 14.0),
                ModelSpec::new("qwen2.5:14b", "analysis", 0.80, 14.0),
            ],
        );
        catalog.set(
            QueryType::Broadcast,
            vec![
                ModelSpec::new("llama3.2:3b", "chat banter", 0.85, 3.0).with_keep_alive("-1"),
                ModelSpec::new("llama3.1:8b", "chat", 0.80, 8.0),
            ],
        );
        catalog.set(
            QueryType::General,
            vec![
                ModelSpec::new("llama3.1:8b", "general", 0.85, 8.0),
                ModelSpec::new("qwen2.5:7b", "general", 0.80, 7.0),
                ModelSpec::new("llama3.2:3b", "general", 0.70, 3.0),
            ],
        );
        catalog.set(
            QueryType::Secretary,
            vec![
                ModelSpec::new("llama3.2:3b", "assistant lookups", 0.90, 3.0).with_keep_alive("-1"),
                ModelSpec::new("qwen2.5:3b", "assistant lookups", 0.85, 3.0),
                ModelSpec::new("llama3.1:8b", "assistant", 0.80, 8.0),
            ],
        );
        catalog.set(
            QueryType::Triage,
            vec![
                ModelSpec::new("qwen2.5:7b", "triage", 0.90, 7.0),
                ModelSpec::new("llama3.2:3b", "triage", 0.85, 3.0),
            ],
        );
        catalog.set(
            QueryType::Scheduling,
            vec![
                ModelSpec::new("llama3.2:3b", "scheduling", 0.90, 3.0),
                ModelSpec::new("qwen2.5:3b", "scheduling", 0.85, 3.0),
            ],
        );
        catalog.set(
            QueryType::Summary,
            vec![
                ModelSpec::new("qwen2.5:7b", "summaries", 0.90, 7.0),
                ModelSpec::new("llama3.2:3b", "short summaries", 0.80, 3.0),
            ],
        );
        catalog
    }

    /// Replace the candidates for `query_type`
    pub fn set(&mut self, query_type: QueryType, mut specs: Vec<ModelSpec>) {
        specs.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        self.entries.insert(query_type, specs);
    }

    /// Candidates for `query_type`, highest weight first
    #[must_use]
    pub fn candidates(&self, query_type: QueryType) -> &[ModelSpec] {
        self.entries.get(&query_type).map_or(&[], Vec::as_slice)
    }

    /// Find a spec by model name across all categories
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&ModelSpec> {
        self.entries.values().flatten().find(|s| s.name == name)
    }
}
