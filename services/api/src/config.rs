use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Defines the supported backend providers for the chat and evaluator models.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub guide_path: PathBuf,
    pub progress_dir: PathBuf,
    pub learnings_dir: PathBuf,
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub chat_model: String,
    pub eval_model: String,
    pub scanner_api_key: Option<String>,
    pub scanner_base_url: String,
    pub input_timeout: Duration,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let guide_path = std::env::var("GUIDE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./guide.json"));

        let progress_dir = std::env::var("PROGRESS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./progress"));

        let learnings_dir = std::env::var("LEARNINGS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./learnings"));

        let provider_str = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "gemini" => Provider::Gemini,
            _ => Provider::OpenAI,
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();

        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let eval_model = std::env::var("EVAL_MODEL").unwrap_or_else(|_| chat_model.clone());

        let scanner_api_key = std::env::var("SCANNER_API_KEY").ok();
        let scanner_base_url = std::env::var("SCANNER_BASE_URL")
            .unwrap_or_else(|_| "https://defend.example.com".to_string());

        let input_timeout_str =
            std::env::var("INPUT_TIMEOUT_SECS").unwrap_or_else(|_| "120".to_string());
        let input_timeout_secs = input_timeout_str.parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(
                "INPUT_TIMEOUT_SECS".to_string(),
                format!("'{input_timeout_str}' is not a number of seconds"),
            )
        })?;
        let input_timeout = Duration::from_secs(input_timeout_secs);

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{log_level_str}' is not a valid log level"),
            )
        })?;

        match provider {
            Provider::OpenAI => {
                if openai_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
                    ));
                }
            }
            Provider::Gemini => {
                if gemini_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "GEMINI_API_KEY must be set for 'gemini' provider".to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            bind_address,
            guide_path,
            progress_dir,
            learnings_dir,
            provider,
            openai_api_key,
            gemini_api_key,
            chat_model,
            eval_model,
            scanner_api_key,
            scanner_base_url,
            input_timeout,
            log_level,
        })
    }
}
