//! Configuration for the memory engine.
//!
//! Everything has a sensible default; environment variables override:
//! - `OPENROUTER_API_KEY` - Required for the OpenRouter-backed capabilities.
//! - `MEMORY_EMBED_MODEL` - Optional. Embedding model. Defaults to `openai/text-embedding-3-small`.
//! - `MEMORY_CLASSIFY_MODEL` - Optional. Model for the retrieval-need fallback.
//! - `MEMORY_MERGE_MODEL` - Optional. Model for duplicate consolidation.
//! - `MEMORY_MAX_BUDGET_TOKENS` - Optional. Hard cap on any retrieval budget.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Importance bounds and adjustment steps.
#[derive(Debug, Clone)]
pub struct ImportanceConfig {
    /// Floor importance; decay never goes below this.
    pub min: f64,
    /// Ceiling importance; reinforcement never exceeds this.
    pub max: f64,
    /// Added to importance on each confirmed use.
    pub access_boost: f64,
    /// Initial importance of a newly created entry.
    pub initial: f64,
}

impl Default for ImportanceConfig {
    fn default() -> Self {
        Self {
            min: 1.0,
            max: 10.0,
            access_boost: 0.5,
            initial: 5.0,
        }
    }
}

/// Retrieval-policy knobs.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Budget granted when the fast path decides memory is needed.
    pub generous_budget_tokens: u32,
    /// Budget granted by the conservative fallback default.
    pub moderate_budget_tokens: u32,
    /// Hard cap; every budget is clamped to `[0, max]`.
    pub max_budget_tokens: u32,
    /// Timeout on the external classifier call.
    pub classifier_timeout: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            generous_budget_tokens: 2000,
            moderate_budget_tokens: 800,
            max_budget_tokens: 3000,
            classifier_timeout: Duration::from_secs(5),
        }
    }
}

/// Per-scope retrieval fan-out.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub user_top_k: usize,
    pub project_top_k: usize,
    pub agent_top_k: usize,
    /// Overall deadline applied to a retrieval when the caller supplies none.
    pub deadline: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            user_top_k: 3,
            project_top_k: 5,
            agent_top_k: 3,
            deadline: Duration::from_secs(10),
        }
    }
}

/// Background-maintenance knobs.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Entries untouched for this many days start decaying.
    pub aging_start_days: i64,
    /// Importance subtracted per aging sweep.
    pub aging_decrement: f64,
    /// Page size of one aging batch.
    pub aging_page_size: usize,
    /// Entries below this importance are consolidation candidates.
    pub consolidation_max_importance: f64,
    /// Candidate cap per consolidation run.
    pub consolidation_candidates: usize,
    /// Entries at or below this importance are eviction candidates.
    pub eviction_threshold: f64,
    /// Inactivity required before eviction.
    pub eviction_inactive_days: i64,
    /// Row cap per eviction call.
    pub eviction_max_batch: usize,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            aging_start_days: 30,
            aging_decrement: 1.0,
            aging_page_size: 500,
            consolidation_max_importance: 5.0,
            consolidation_candidates: 50,
            eviction_threshold: 2.0,
            eviction_inactive_days: 90,
            eviction_max_batch: 100,
        }
    }
}

/// OpenRouter-backed capability configuration.
#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub embed_model: String,
    pub classify_model: String,
    pub merge_model: String,
}

impl OpenRouterConfig {
    /// Load the OpenRouter capability configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENROUTER_API_KEY` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        Ok(Self {
            api_key,
            embed_model: std::env::var("MEMORY_EMBED_MODEL")
                .unwrap_or_else(|_| "openai/text-embedding-3-small".to_string()),
            classify_model: std::env::var("MEMORY_CLASSIFY_MODEL")
                .unwrap_or_else(|_| "openai/gpt-4o-mini".to_string()),
            merge_model: std::env::var("MEMORY_MERGE_MODEL")
                .unwrap_or_else(|_| "openai/gpt-4o-mini".to_string()),
        })
    }
}

/// Top-level configuration for the memory engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    pub importance: ImportanceConfig,
    pub policy: PolicyConfig,
    pub retrieval: RetrievalConfig,
    pub maintenance: MaintenanceConfig,
}

impl MemoryConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("MEMORY_MAX_BUDGET_TOKENS") {
            config.policy.max_budget_tokens = v.parse().map_err(|e| {
                ConfigError::InvalidValue("MEMORY_MAX_BUDGET_TOKENS".to_string(), format!("{}", e))
            })?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let config = MemoryConfig::default();
        assert_eq!(config.importance.min, 1.0);
        assert_eq!(config.importance.max, 10.0);
        assert_eq!(config.policy.max_budget_tokens, 3000);
        assert_eq!(config.retrieval.user_top_k, 3);
        assert_eq!(config.retrieval.project_top_k, 5);
        assert_eq!(config.retrieval.agent_top_k, 3);
        assert_eq!(config.maintenance.aging_start_days, 30);
        assert_eq!(config.maintenance.eviction_inactive_days, 90);
        assert_eq!(config.maintenance.eviction_max_batch, 100);
    }
}
