// Configuration module for docsync.
// Reads from environment variables with sensible defaults.

use std::env;
use std::sync::OnceLock;

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// AI provider settings. Provider names select concrete adapters through the
/// capability factories; empty strings mean "not configured".
#[derive(Debug, Clone)]
pub struct AiConfig {
    /// Embedding provider name (DOCSYNC_EMBEDDING_PROVIDER): openai|mock|disabled
    pub embedding_provider: String,
    /// Embedding model name (DOCSYNC_EMBEDDING_MODEL)
    pub embedding_model: String,
    /// Embedding API key (DOCSYNC_EMBEDDING_API_KEY)
    pub embedding_api_key: String,
    /// Embedding vector dimension (DOCSYNC_EMBEDDING_DIMENSION)
    pub embedding_dimension: usize,
    /// Embedding endpoint base URL override (DOCSYNC_EMBEDDING_BASE_URL)
    pub embedding_base_url: String,
    /// Text generation provider name (DOCSYNC_LLM_PROVIDER): openai|mock|disabled
    pub llm_provider: String,
    /// Text generation model name (DOCSYNC_LLM_MODEL)
    pub llm_model: String,
    /// Text generation API key (DOCSYNC_LLM_API_KEY)
    pub llm_api_key: String,
    /// Text generation endpoint base URL override (DOCSYNC_LLM_BASE_URL)
    pub llm_base_url: String,
}

/// Documentation runtime knobs.
#[derive(Debug, Clone)]
pub struct DocsConfig {
    /// Max sections rewritten by the LLM per run (DOCSYNC_MAX_LLM_SECTIONS)
    pub max_llm_sections: usize,
    /// Enable embedding-based section routing fallback (DOCSYNC_ENABLE_SEMANTIC_MATCH)
    pub enable_semantic_match: bool,
    /// Enable LLM insertion-point routing for unmatched chunks (DOCSYNC_ENABLE_LLM_ROUTER)
    pub enable_llm_router: bool,
    /// Max LLM routing calls per run (DOCSYNC_MAX_LLM_ROUTES)
    pub max_llm_routes: usize,
    /// Minimum section confidence before the LLM is consulted (DOCSYNC_MIN_CONFIDENCE_FOR_LLM)
    pub min_confidence_for_llm: f64,
    /// Embedding budget per incremental run (DOCSYNC_MAX_EMBED_CHUNKS_PER_RUN)
    pub max_embed_chunks_per_run: usize,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub ai: AiConfig,
    pub docs: DocsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ai: AiConfig {
                embedding_provider: String::new(),
                embedding_model: "text-embedding-3-small".to_string(),
                embedding_api_key: String::new(),
                embedding_dimension: 1536,
                embedding_base_url: String::new(),
                llm_provider: String::new(),
                llm_model: "gpt-4o-mini".to_string(),
                llm_api_key: String::new(),
                llm_base_url: String::new(),
            },
            docs: DocsConfig {
                max_llm_sections: 2,
                enable_semantic_match: false,
                enable_llm_router: false,
                max_llm_routes: 2,
                min_confidence_for_llm: 0.60,
                max_embed_chunks_per_run: 80,
            },
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let mut config = Config::default();

        read_string("DOCSYNC_EMBEDDING_PROVIDER", &mut config.ai.embedding_provider);
        read_string("DOCSYNC_EMBEDDING_MODEL", &mut config.ai.embedding_model);
        read_string("DOCSYNC_EMBEDDING_API_KEY", &mut config.ai.embedding_api_key);
        read_string("DOCSYNC_EMBEDDING_BASE_URL", &mut config.ai.embedding_base_url);
        read_parsed("DOCSYNC_EMBEDDING_DIMENSION", &mut config.ai.embedding_dimension);
        read_string("DOCSYNC_LLM_PROVIDER", &mut config.ai.llm_provider);
        read_string("DOCSYNC_LLM_MODEL", &mut config.ai.llm_model);
        read_string("DOCSYNC_LLM_API_KEY", &mut config.ai.llm_api_key);
        read_string("DOCSYNC_LLM_BASE_URL", &mut config.ai.llm_base_url);

        read_parsed("DOCSYNC_MAX_LLM_SECTIONS", &mut config.docs.max_llm_sections);
        read_bool("DOCSYNC_ENABLE_SEMANTIC_MATCH", &mut config.docs.enable_semantic_match);
        read_bool("DOCSYNC_ENABLE_LLM_ROUTER", &mut config.docs.enable_llm_router);
        read_parsed("DOCSYNC_MAX_LLM_ROUTES", &mut config.docs.max_llm_routes);
        read_parsed(
            "DOCSYNC_MIN_CONFIDENCE_FOR_LLM",
            &mut config.docs.min_confidence_for_llm,
        );
        read_parsed(
            "DOCSYNC_MAX_EMBED_CHUNKS_PER_RUN",
            &mut config.docs.max_embed_chunks_per_run,
        );

        config.docs.min_confidence_for_llm = config.docs.min_confidence_for_llm.clamp(0.0, 1.0);
        config
    }

    /// Get the global configuration instance
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }
}

fn read_string(key: &str, target: &mut String) {
    if let Ok(val) = env::var(key) {
        let trimmed = val.trim();
        if !trimmed.is_empty() {
            *target = trimmed.to_string();
        }
    }
}

fn read_parsed<T: std::str::FromStr + std::fmt::Display>(key: &str, target: &mut T) {
    if let Ok(val) = env::var(key) {
        if let Ok(parsed) = val.trim().parse() {
            *target = parsed;
        } else {
            tracing::warn!("invalid {key} value {val:?}, using default {target}");
        }
    }
}

fn read_bool(key: &str, target: &mut bool) {
    if let Ok(val) = env::var(key) {
        *target = matches!(
            val.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_knobs() {
        let config = Config::default();
        assert_eq!(config.docs.max_llm_sections, 2);
        assert!(!config.docs.enable_semantic_match);
        assert!(!config.docs.enable_llm_router);
        assert_eq!(config.docs.max_llm_routes, 2);
        assert!((config.docs.min_confidence_for_llm - 0.60).abs() < f64::EPSILON);
        assert_eq!(config.docs.max_embed_chunks_per_run, 80);
    }
}
