//! Environment-variable configuration, read once at composition-root time.
//!
//! Plain `std::env::var` parsing rather than a config-file framework.

#[derive(Debug, Clone)]
pub struct Config {
    pub embedding_model: String,
    pub embedding_storage: std::path::PathBuf,
    pub max_parallel_steps: usize,
    pub plan_timeout_secs: u64,
    pub llm_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding_model: "bge-small-en-v1.5".to_string(),
            embedding_storage: crate::paths::memory_dir(),
            max_parallel_steps: 4,
            plan_timeout_secs: 600,
            llm_endpoint: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or(default.embedding_model),
            embedding_storage: std::env::var("EMBEDDING_STORAGE")
                .map(std::path::PathBuf::from)
                .unwrap_or(default.embedding_storage),
            max_parallel_steps: std::env::var("MAX_PARALLEL_STEPS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_parallel_steps),
            plan_timeout_secs: std::env::var("PLAN_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.plan_timeout_secs),
            llm_endpoint: std::env::var("LLM_ENDPOINT").ok(),
        }
    }
}
