//! Process configuration, read from the environment (and a `.env` file when present).
//!
//! Bind address, port and TLS are Rocket's own `ROCKET_*` settings and are not handled here.
use std::{fmt::Display, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::warn;

use crate::{
    dispatcher::{DispatcherConfig, ProtocolParams},
    store::StoreConfig,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name}={value} is invalid: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("threshold {threshold} must be between 1 and the party count {parties}")]
    Threshold { threshold: u16, parties: u16 },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub signer_url: String,
    pub party_count: u16,
    pub threshold: u16,
    pub share_ttl: Duration,
    pub cache_capacity: usize,
    pub max_concurrent_runs: usize,
    pub run_queue_depth: usize,
    pub run_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Config {
    /// Load `.env` if it exists, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!("could not read .env: {}", e);
            }
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            api_key: lookup("API_KEY").unwrap_or_default(),
            signer_url: lookup("SIGNER_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8787".to_string()),
            party_count: parse(&lookup, "PARTY_COUNT", 2)?,
            threshold: parse(&lookup, "THRESHOLD", 2)?,
            share_ttl: Duration::from_secs(parse(&lookup, "SHARE_TTL_SECS", 3600)?),
            cache_capacity: parse(&lookup, "CACHE_CAPACITY", 10_000)?,
            max_concurrent_runs: parse(&lookup, "MAX_CONCURRENT_RUNS", 64)?,
            run_queue_depth: parse(&lookup, "RUN_QUEUE_DEPTH", 256)?,
            run_timeout: Duration::from_secs(parse(&lookup, "RUN_TIMEOUT_SECS", 120)?),
            sweep_interval: Duration::from_secs(parse(&lookup, "SWEEP_INTERVAL_SECS", 60)?),
        };
        config.validate()?;

        if config.api_key.is_empty() {
            warn!("API_KEY is not set, the signer relay will likely reject room creation");
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.party_count == 0 {
            return Err(ConfigError::Zero("PARTY_COUNT"));
        }
        if self.threshold == 0 || self.threshold > self.party_count {
            return Err(ConfigError::Threshold {
                threshold: self.threshold,
                parties: self.party_count,
            });
        }
        let durations = [
            ("SHARE_TTL_SECS", self.share_ttl),
            ("RUN_TIMEOUT_SECS", self.run_timeout),
            ("SWEEP_INTERVAL_SECS", self.sweep_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Zero(name));
            }
        }
        let counts = [
            ("CACHE_CAPACITY", self.cache_capacity),
            ("MAX_CONCURRENT_RUNS", self.max_concurrent_runs),
            ("RUN_QUEUE_DEPTH", self.run_queue_depth),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if reqwest::Url::parse(&self.signer_url).is_err() {
            return Err(ConfigError::Invalid {
                name: "SIGNER_URL",
                value: self.signer_url.clone(),
                reason: "not a url".to_string(),
            });
        }
        Ok(())
    }

    pub fn store(&self) -> StoreConfig {
        StoreConfig {
            ttl: self.share_ttl,
            capacity: self.cache_capacity,
        }
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_concurrent_runs: self.max_concurrent_runs,
            queue_depth: self.run_queue_depth,
            run_timeout: self.run_timeout,
        }
    }

    pub fn protocol(&self) -> ProtocolParams {
        ProtocolParams {
            parties: self.party_count,
            threshold: self.threshold,
        }
    }
}

fn parse<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.protocol(), ProtocolParams::default());
        assert_eq!(config.share_ttl, Duration::from_secs(3600));
        assert_eq!(config.store().capacity, 10_000);
        assert_eq!(config.dispatcher().queue_depth, 256);
        assert_eq!(config.signer_url, "http://127.0.0.1:8787");
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("API_KEY", "secret"),
            ("PARTY_COUNT", "3"),
            ("THRESHOLD", " 2 "),
            ("SHARE_TTL_SECS", "60"),
            ("RUN_TIMEOUT_SECS", "5"),
        ])
        .unwrap();
        assert_eq!(config.api_key, "secret");
        assert_eq!(
            config.protocol(),
            ProtocolParams {
                parties: 3,
                threshold: 2
            }
        );
        assert_eq!(config.store().ttl, Duration::from_secs(60));
        assert_eq!(config.dispatcher().run_timeout, Duration::from_secs(5));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            config(&[("PARTY_COUNT", "two")]),
            Err(ConfigError::Invalid {
                name: "PARTY_COUNT",
                ..
            })
        ));
        assert_eq!(
            config(&[("PARTY_COUNT", "2"), ("THRESHOLD", "3")]).unwrap_err(),
            ConfigError::Threshold {
                threshold: 3,
                parties: 2
            }
        );
        assert!(matches!(
            config(&[("THRESHOLD", "0")]),
            Err(ConfigError::Threshold { .. })
        ));
        assert_eq!(
            config(&[("RUN_QUEUE_DEPTH", "0")]).unwrap_err(),
            ConfigError::Zero("RUN_QUEUE_DEPTH")
        );
        assert!(matches!(
            config(&[("SIGNER_URL", "nowhere")]),
            Err(ConfigError::Invalid {
                name: "SIGNER_URL",
                ..
            })
        ));
    }
}
