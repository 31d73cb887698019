use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

pub const DEFAULT_API_URL: &str = "https://api.dedaluslabs.ai/v1";
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_SEARCH_MCP: &str = "akakak/sonar";

/// Runtime settings, read once from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub search_tools: Vec<String>,
    pub timeout_secs: u64,
    pub bind_addr: String,
    pub static_dir: PathBuf,
    pub input_csv: PathBuf,
    pub output_csv: PathBuf,
    pub deal_lookup: bool,
    pub concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            search_tools: vec![DEFAULT_SEARCH_MCP.to_string()],
            timeout_secs: 300,
            bind_addr: "0.0.0.0:5001".to_string(),
            static_dir: PathBuf::from("./static"),
            input_csv: PathBuf::from("Name,Gift Idea,Budget.csv"),
            output_csv: PathBuf::from("results.csv"),
            deal_lookup: false,
            concurrency: 1,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let search_tools = match get("SEARCH_MCP") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.search_tools,
        };

        Self {
            api_url: get("LLM_API_URL").unwrap_or(defaults.api_url),
            api_key: get("LLM_API_KEY")
                .or_else(|| get("DEDALUS_API_KEY"))
                .unwrap_or_default(),
            model: get("LLM_MODEL").unwrap_or(defaults.model),
            search_tools,
            timeout_secs: parse_or(
                "LLM_TIMEOUT_SECS",
                get("LLM_TIMEOUT_SECS"),
                defaults.timeout_secs,
            ),
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            static_dir: get("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            input_csv: get("INPUT_CSV")
                .map(PathBuf::from)
                .unwrap_or(defaults.input_csv),
            output_csv: get("OUTPUT_CSV")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_csv),
            deal_lookup: get("DEAL_LOOKUP").map(|v| is_truthy(&v)).unwrap_or(false),
            concurrency: parse_or(
                "RIDDLE_CONCURRENCY",
                get("RIDDLE_CONCURRENCY"),
                defaults.concurrency,
            )
            .max(1),
        }
    }
}

fn parse_or<T: FromStr + Copy>(key: &str, value: Option<String>, default: T) -> T {
    match value {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("[config] Ignoring invalid {}={:?}, using default", key, raw);
            default
        }),
        None => default,
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
