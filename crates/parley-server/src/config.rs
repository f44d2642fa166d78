use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail};
use tracing::warn;

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Runtime settings, read from `PARLEY_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Allowed browser origin. `None` means any origin.
    pub cors_origin: Option<String>,
    pub max_message_len: usize,
    pub db_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub reap_interval: Duration,
    pub outbound_buffer: usize,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("PARLEY_JWT_SECRET").unwrap_or_else(|| {
            warn!("PARLEY_JWT_SECRET not set, using the development secret");
            DEV_JWT_SECRET.into()
        });

        let config = Self {
            host: lookup("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "PARLEY_PORT", 3000)?,
            db_path: lookup("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into()).into(),
            jwt_secret,
            cors_origin: lookup("PARLEY_CORS_ORIGIN"),
            max_message_len: parse_or(&lookup, "PARLEY_MAX_MESSAGE_LEN", parley_db::DEFAULT_MAX_CONTENT_LEN)?,
            db_timeout: Duration::from_millis(parse_or(&lookup, "PARLEY_DB_TIMEOUT_MS", 5000)?),
            heartbeat_interval: Duration::from_secs(parse_or(&lookup, "PARLEY_HEARTBEAT_SECS", 15)?),
            reap_interval: Duration::from_secs(parse_or(&lookup, "PARLEY_REAP_INTERVAL_SECS", 30)?),
            outbound_buffer: parse_or(&lookup, "PARLEY_OUTBOUND_BUFFER", 64)?,
        };

        // tokio intervals panic on a zero period
        if config.heartbeat_interval.is_zero() || config.reap_interval.is_zero() {
            bail!("PARLEY_HEARTBEAT_SECS and PARLEY_REAP_INTERVAL_SECS must be positive");
        }
        if config.db_timeout.is_zero() {
            bail!("PARLEY_DB_TIMEOUT_MS must be positive");
        }
        if config.max_message_len == 0 || config.outbound_buffer == 0 {
            bail!("PARLEY_MAX_MESSAGE_LEN and PARLEY_OUTBOUND_BUFFER must be positive");
        }

        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{key}={raw:?} is not valid: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<ServerConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.db_path, PathBuf::from("parley.db"));
        assert_eq!(config.jwt_secret, DEV_JWT_SECRET);
        assert_eq!(config.cors_origin, None);
        assert_eq!(config.max_message_len, 4096);
        assert_eq!(config.db_timeout, Duration::from_millis(5000));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.reap_interval, Duration::from_secs(30));
        assert_eq!(config.outbound_buffer, 64);
    }

    #[test]
    fn overrides_are_read() {
        let config = config_from(&[
            ("PARLEY_PORT", "8080"),
            ("PARLEY_JWT_SECRET", "prod"),
            ("PARLEY_CORS_ORIGIN", "https://chat.example.com"),
            ("PARLEY_MAX_MESSAGE_LEN", " 100 "),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.jwt_secret, "prod");
        assert_eq!(config.cors_origin.as_deref(), Some("https://chat.example.com"));
        assert_eq!(config.max_message_len, 100);
    }

    #[test]
    fn malformed_numbers_are_errors() {
        let err = config_from(&[("PARLEY_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PARLEY_PORT"));
        assert!(config_from(&[("PARLEY_OUTBOUND_BUFFER", "-1")]).is_err());
    }

    #[test]
    fn zero_intervals_are_rejected() {
        assert!(config_from(&[("PARLEY_HEARTBEAT_SECS", "0")]).is_err());
        assert!(config_from(&[("PARLEY_OUTBOUND_BUFFER", "0")]).is_err());
    }
}
