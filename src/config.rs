use crate::http::cors::CorsConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming an optional YAML config file.
pub const CONFIG_ENV: &str = "LOCALBACKEND_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_address: String,
    /// `0` asks the OS for an ephemeral port.
    pub port: u16,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
    #[serde(rename = "keep_alive_timeout_ms", with = "millis")]
    pub keep_alive_timeout: Duration,
    /// Time allowed to receive a request head once its first byte arrived.
    #[serde(rename = "read_timeout_ms", with = "millis")]
    pub read_timeout: Duration,
    #[serde(rename = "write_timeout_ms", with = "millis")]
    pub write_timeout: Duration,
    #[serde(rename = "shutdown_grace_period_ms", with = "millis")]
    pub shutdown_grace_period: Duration,
    /// `0` means unlimited.
    pub max_connections: usize,
    /// Answer non-loopback peers with 403.
    pub loopback_only: bool,
    /// Stop serving when the host moves to the background.
    pub stop_on_background: bool,
    pub cors: CorsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            max_header_bytes: 16 * 1024,
            max_body_bytes: 1024 * 1024,
            keep_alive_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            shutdown_grace_period: Duration::from_secs(5),
            max_connections: 0,
            loopback_only: true,
            stop_on_background: true,
            cors: CorsConfig::default(),
        }
    }
}

impl Config {
    /// Defaults, then the YAML file named by `LOCALBACKEND_CONFIG`, then the
    /// `LISTEN` and `PORT` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Like [`Config::load`] with a custom environment lookup.
    pub fn load_with<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_ENV) {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file {path}"))?;
                Self::from_yaml_str(&content)
                    .with_context(|| format!("failed to parse config file {path}"))?
            }
            None => Self::default(),
        };

        config.apply_env(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    fn apply_env<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup("LISTEN") {
            let (host, port) = listen
                .rsplit_once(':')
                .ok_or_else(|| ConfigError::InvalidEnv {
                    var: "LISTEN",
                    value: listen.clone(),
                })?;
            self.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "LISTEN",
                value: listen.clone(),
            })?;
            self.bind_address = host
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string();
        }

        if let Some(port) = lookup("PORT") {
            self.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { var: "PORT", value: port })?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_address
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidBindAddress(self.bind_address.clone()))?;

        for (name, value) in [
            ("max_header_bytes", self.max_header_bytes),
            ("max_body_bytes", self.max_body_bytes),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroLimit(name));
            }
        }

        for (name, value) in [
            ("keep_alive_timeout", self.keep_alive_timeout),
            ("read_timeout", self.read_timeout),
            ("write_timeout", self.write_timeout),
            ("shutdown_grace_period", self.shutdown_grace_period),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroTimeout(name));
            }
        }

        Ok(())
    }

    /// `host:port` for binding, with IPv6 hosts in brackets.
    pub fn listen_addr(&self) -> String {
        match self.bind_address.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => format!("[{ip}]:{}", self.port),
            _ => format!("{}:{}", self.bind_address, self.port),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
