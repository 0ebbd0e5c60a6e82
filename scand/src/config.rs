/// Identifies this system on every outbound request except those whose
/// service mandates its own headers (e.g. the LLM and search providers).
pub const USER_AGENT: &str =
    "scand-research-bot/1.0 (+https://scand.example/about-bot; research@scand.example)";

pub const SEARCH_ENGINE_URL: &str = "https://www.google.com/search";

/// Process-wide configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub search_api_key: Option<String>,
    /// Shared KV/Redis URL for the rate-limit and response-cache backends.
    /// Absent means both fall back to in-process, single-node behavior.
    pub kv_url: Option<String>,
}

impl Config {
    /// - `LLM_API_KEY` (primary and extractor models)
    /// - `SEARCH_API_KEY` (web-search provider)
    /// - `KV_URL` (optional shared-KV URL)
    /// - `DATABASE_URL` (via `scan_db::DbConfig::from_env`)
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            llm_api_key: std::env::var("LLM_API_KEY").ok(),
            search_api_key: std::env::var("SEARCH_API_KEY").ok(),
            kv_url: std::env::var("KV_URL").ok(),
        }
    }
}
