use crate::error::ConfigError;
use crate::types::KeywordFilter;
use std::time::Duration;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Runtime configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Baidu session cookie used as the Tieba credential.
    pub bduss: String,
    /// Thread to watch, constant for the process lifetime.
    pub thread_id: u64,
    pub telegram_token: String,
    pub telegram_chat_id: String,
    pub keywords: KeywordFilter,
    pub poll_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables. Missing or malformed
    /// required values fail startup; the monitor never runs half-configured.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bduss = required_var("BDUSS")?;
        let thread_id = parse_u64("TID", &required_var("TID")?)?;
        let telegram_token = required_var("TELEGRAM_TOKEN")?;
        let telegram_chat_id = required_var("TELEGRAM_CHAT_ID")?;
        let keywords = KeywordFilter::parse(std::env::var("KEYWORDS").ok().as_deref());

        let poll_interval_secs = match std::env::var("POLL_INTERVAL_SECS") {
            Ok(raw) => parse_poll_interval(&raw)?,
            Err(_) => DEFAULT_POLL_INTERVAL_SECS,
        };

        Ok(Self {
            bduss,
            thread_id,
            telegram_token,
            telegram_chat_id,
            keywords,
            poll_interval: Duration::from_secs(poll_interval_secs),
        })
    }
}

fn required_var(var_name: &str) -> Result<String, ConfigError> {
    match std::env::var(var_name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnvironmentVariable {
            var_name: var_name.to_string(),
        }),
    }
}

fn parse_u64(field: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: raw.to_string(),
    })
}

// The watch loop ticks on this interval; tokio rejects a zero period, so
// a zero here must die as a configuration error instead.
fn parse_poll_interval(raw: &str) -> Result<u64, ConfigError> {
    let secs = parse_u64("POLL_INTERVAL_SECS", raw)?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            field: "POLL_INTERVAL_SECS".to_string(),
            value: raw.to_string(),
        });
    }
    Ok(secs)
}
