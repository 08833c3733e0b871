use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
#[cfg(feature = "cli")]
use tracing::warn;

use crate::chat::TurnConfig;
use crate::gateway::LlmGatewayConfig;
use crate::hub::LivenessConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub database_path: PathBuf,
    pub llm_api_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_max_tokens: u32,
    pub llm_temperature: f32,
    pub generation_timeout_seconds: u64,
    pub history_limit: usize,
    pub sweep_interval_seconds: u64,
    pub ws_ping_interval_seconds: u64,
    pub ws_idle_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        #[cfg(feature = "cli")]
        {
            if let Err(e) = dotenvy::dotenv() {
                warn!("Failed to load .env file: {}. Using system environment variables.", e);
            } else {
                info!("Loaded environment variables from .env file");
            }
        }

        Self::from_source(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_source<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let llm_api_key = lookup("LLM_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .context("LLM_API_KEY environment variable not set. Please set it in your .env file")?;

        let config = Self {
            api_host: var("API_HOST", "127.0.0.1"),
            api_port: var("API_PORT", "8000").parse().context("API_PORT must be a port number")?,
            database_path: PathBuf::from(var("DATABASE_PATH", "./data/storefront_chat.db")),
            llm_api_url: var("LLM_API_URL", "https://api.z.ai/api/paas/v4"),
            llm_api_key,
            llm_model: var("LLM_MODEL", "glm-4.5"),
            llm_max_tokens: var("LLM_MAX_TOKENS", "1000")
                .parse()
                .context("LLM_MAX_TOKENS must be a positive integer")?,
            llm_temperature: var("LLM_TEMPERATURE", "0.7")
                .parse()
                .context("LLM_TEMPERATURE must be a number")?,
            generation_timeout_seconds: var("GENERATION_TIMEOUT_SECONDS", "30")
                .parse()
                .context("GENERATION_TIMEOUT_SECONDS must be a positive integer")?,
            history_limit: var("HISTORY_LIMIT", "10")
                .parse()
                .context("HISTORY_LIMIT must be a positive integer")?,
            sweep_interval_seconds: var("SWEEP_INTERVAL_SECONDS", "300")
                .parse()
                .context("SWEEP_INTERVAL_SECONDS must be a positive integer")?,
            ws_ping_interval_seconds: var("WS_PING_INTERVAL_SECONDS", "30")
                .parse()
                .context("WS_PING_INTERVAL_SECONDS must be a positive integer")?,
            ws_idle_timeout_seconds: var("WS_IDLE_TIMEOUT_SECONDS", "90")
                .parse()
                .context("WS_IDLE_TIMEOUT_SECONDS must be a positive integer")?,
            request_timeout_seconds: var("REQUEST_TIMEOUT_SECONDS", "60")
                .parse()
                .context("REQUEST_TIMEOUT_SECONDS must be a positive integer")?,
        };

        if config.generation_timeout_seconds == 0 || config.sweep_interval_seconds == 0 {
            return Err(anyhow::anyhow!(
                "GENERATION_TIMEOUT_SECONDS and SWEEP_INTERVAL_SECONDS must be greater than zero"
            ));
        }
        if config.ws_ping_interval_seconds == 0
            || config.ws_idle_timeout_seconds <= config.ws_ping_interval_seconds
        {
            return Err(anyhow::anyhow!(
                "WS_IDLE_TIMEOUT_SECONDS must be greater than WS_PING_INTERVAL_SECONDS, which must be greater than zero"
            ));
        }
        Ok(config)
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Database: {}", self.database_path.display());
        info!("- LLM API: {}", self.llm_api_url);
        info!("- LLM Model: {} (max tokens {}, temperature {})", self.llm_model, self.llm_max_tokens, self.llm_temperature);
        info!("- Generation Timeout: {}s", self.generation_timeout_seconds);
        info!("- History Limit: {} messages", self.history_limit);
        info!("- Sweep Interval: {}s", self.sweep_interval_seconds);
        info!("- WebSocket Ping/Idle: {}s/{}s", self.ws_ping_interval_seconds, self.ws_idle_timeout_seconds);
        info!("- Request Timeout: {}s", self.request_timeout_seconds);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn liveness(&self) -> LivenessConfig {
        LivenessConfig {
            ping_interval: Duration::from_secs(self.ws_ping_interval_seconds),
            idle_timeout: Duration::from_secs(self.ws_idle_timeout_seconds),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn turn_config(&self) -> TurnConfig {
        TurnConfig {
            history_limit: self.history_limit,
            generation_timeout: Duration::from_secs(self.generation_timeout_seconds),
        }
    }

    /// The HTTP client timeout sits a little above the turn timeout so the
    /// turn's own deadline is what the customer sees.
    pub fn gateway_config(&self) -> LlmGatewayConfig {
        LlmGatewayConfig {
            api_url: self.llm_api_url.clone(),
            api_key: self.llm_api_key.clone(),
            model: self.llm_model.clone(),
            max_tokens: self.llm_max_tokens,
            temperature: self.llm_temperature,
            request_timeout: Duration::from_secs(self.generation_timeout_seconds + 5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_source(|key| vars.get(key).cloned())
    }

    /// Helper function to create a test Config with default values
    fn create_test_config() -> Config {
        Config {
            api_host: "127.0.0.1".to_string(),
            api_port: 8000,
            database_path: PathBuf::from("./data/test.db"),
            llm_api_url: "http://127.0.0.1:9999".to_string(),
            llm_api_key: "test-key".to_string(),
            llm_model: "glm-4.5".to_string(),
            llm_max_tokens: 1000,
            llm_temperature: 0.7,
            generation_timeout_seconds: 30,
            history_limit: 10,
            sweep_interval_seconds: 300,
            ws_ping_interval_seconds: 30,
            ws_idle_timeout_seconds: 90,
            request_timeout_seconds: 60,
        }
    }

    #[test]
    fn test_defaults_apply() {
        let config = config_from(&[("LLM_API_KEY", "secret")]).unwrap();
        assert_eq!(config.api_host, "127.0.0.1");
        assert_eq!(config.api_port, 8000);
        assert_eq!(config.llm_model, "glm-4.5");
        assert_eq!(config.llm_max_tokens, 1000);
        assert_eq!(config.generation_timeout_seconds, 30);
        assert_eq!(config.history_limit, 10);
        assert_eq!(config.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.database_path, PathBuf::from("./data/storefront_chat.db"));
    }

    #[test]
    fn test_overrides_apply() {
        let config = config_from(&[
            ("LLM_API_KEY", "secret"),
            ("API_PORT", "9100"),
            ("LLM_MODEL", "gpt-4o-mini"),
            ("HISTORY_LIMIT", "4"),
        ])
        .unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.llm_model, "gpt-4o-mini");
        assert_eq!(config.turn_config().history_limit, 4);
    }

    #[test]
    fn test_missing_api_key_fails() {
        assert!(config_from(&[]).is_err());
        assert!(config_from(&[("LLM_API_KEY", "  ")]).is_err());
    }

    #[test]
    fn test_invalid_numbers_fail() {
        assert!(config_from(&[("LLM_API_KEY", "k"), ("API_PORT", "eighty")]).is_err());
        assert!(config_from(&[("LLM_API_KEY", "k"), ("GENERATION_TIMEOUT_SECONDS", "0")]).is_err());
    }

    #[test]
    fn test_liveness_settings() {
        let config = config_from(&[("LLM_API_KEY", "k")]).unwrap();
        assert_eq!(config.liveness(), LivenessConfig::default());

        let config = config_from(&[
            ("LLM_API_KEY", "k"),
            ("WS_PING_INTERVAL_SECONDS", "5"),
            ("WS_IDLE_TIMEOUT_SECONDS", "15"),
        ])
        .unwrap();
        assert_eq!(config.liveness().idle_timeout, Duration::from_secs(15));

        assert!(config_from(&[("LLM_API_KEY", "k"), ("WS_PING_INTERVAL_SECONDS", "0")]).is_err());
        assert!(config_from(&[("LLM_API_KEY", "k"), ("WS_IDLE_TIMEOUT_SECONDS", "30")]).is_err());
    }

    #[test]
    fn test_api_addr_parsing() {
        let config = create_test_config();
        let addr = config.api_addr().unwrap();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 8000);
    }

    #[test]
    fn test_api_addr_with_zero_address() {
        let mut config = create_test_config();
        config.api_host = "0.0.0.0".to_string();
        config.api_port = 5000;
        let addr = config.api_addr().unwrap();
        assert_eq!(addr.ip().to_string(), "0.0.0.0");
    }

    #[test]
    fn test_invalid_host_is_an_error() {
        let mut config = create_test_config();
        config.api_host = "not a host".to_string();
        assert!(config.api_addr().is_err());
    }

    #[test]
    fn test_gateway_timeout_exceeds_turn_timeout() {
        let config = create_test_config();
        assert!(config.gateway_config().request_timeout > config.turn_config().generation_timeout);
        assert_eq!(config.gateway_config().api_key, "test-key");
    }
}
