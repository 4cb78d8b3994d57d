//! Bridge configuration.
//!
//! All knobs have defaults so tests can build a config directly; `from_env`
//! reads the environment (a `.env` file is honored via dotenvy).

use std::time::Duration;

use crate::error::BridgeError;

/// Configuration for one bridge instance, shared by all calls.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Speech backend WebSocket URL, e.g. `wss://api.openai.com/v1/realtime`.
    pub backend_url: String,
    /// Bearer token for the backend.
    pub api_key: String,
    /// Model name appended to the URL query.
    pub model: String,
    /// Voice requested in session negotiation.
    pub voice: String,
    /// System instructions sent with `session.update`.
    pub instructions: String,
    /// Greeting/compliance text spoken once when a call goes active.
    pub greeting: Option<String>,
    /// Bound on backend connect + negotiation.
    pub connect_timeout: Duration,
    /// Case-insensitive opt-out phrase alternatives, without boundaries.
    pub opt_out_pattern: String,
    /// How long an ended call stays visible in the registry.
    pub registry_grace: Duration,
    /// TTL for idempotency keys.
    pub idempotency_ttl: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            backend_url: "wss://api.openai.com/v1/realtime".to_string(),
            api_key: String::new(),
            model: "gpt-4o-realtime-preview".to_string(),
            voice: "alloy".to_string(),
            instructions: String::new(),
            greeting: None,
            connect_timeout: Duration::from_secs(10),
            opt_out_pattern: "STOP|END|CANCEL|UNSUBSCRIBE".to_string(),
            registry_grace: Duration::from_secs(300),
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl BridgeConfig {
    /// Load from the environment. Only `BRIDGE_API_KEY` is required.
    pub fn from_env() -> Result<Self, BridgeError> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let api_key = std::env::var("BRIDGE_API_KEY")
            .map_err(|_| BridgeError::Config("BRIDGE_API_KEY is not set".to_string()))?;

        Ok(Self {
            backend_url: env_or("BRIDGE_BACKEND_URL", &defaults.backend_url),
            api_key,
            model: env_or("BRIDGE_MODEL", &defaults.model),
            voice: env_or("BRIDGE_VOICE", &defaults.voice),
            instructions: env_or("BRIDGE_INSTRUCTIONS", &defaults.instructions),
            greeting: std::env::var("BRIDGE_GREETING").ok(),
            connect_timeout: env_secs("BRIDGE_CONNECT_TIMEOUT_SECS", defaults.connect_timeout)?,
            opt_out_pattern: env_or("BRIDGE_OPT_OUT_PATTERN", &defaults.opt_out_pattern),
            registry_grace: env_secs("BRIDGE_REGISTRY_GRACE_SECS", defaults.registry_grace)?,
            idempotency_ttl: env_secs("BRIDGE_IDEMPOTENCY_TTL_SECS", defaults.idempotency_ttl)?,
        })
    }

    /// Full backend URL including the model query parameter.
    pub fn backend_url_with_model(&self) -> String {
        format!("{}?model={}", self.backend_url, self.model)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_secs(key: &str, default: Duration) -> Result<Duration, BridgeError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| BridgeError::Config(format!("{key} must be an integer, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = BridgeConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.opt_out_pattern.contains("STOP"));
    }

    #[test]
    fn url_includes_model() {
        let config = BridgeConfig::default();
        let url = config.backend_url_with_model();
        assert!(url.starts_with("wss://"));
        assert!(url.contains("?model="));
    }
}
