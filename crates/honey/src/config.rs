// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline configuration, read from `HONEY_*` environment variables.

use crate::codec::{Compressor, Serializer};
use crate::errors::ConfigError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_ENV: &str = "dev";
pub const DEFAULT_INSTANCE: &str = "unknown";
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_AUTO_ROTATE_SECS: i64 = 3;
pub const DEFAULT_MAX_CONCURRENT_ROTATIONS: usize = 10;
pub const DEFAULT_CACHE_LEN: usize = 10_000;
pub const DEFAULT_OUTPUTS: &str = "std";

pub const DEFAULT_REPORT_ADDRESS: &str = "http://127.0.0.1:8080/report";
pub const DEFAULT_REPORT_TIMEOUT_SECS: u64 = 5;

/// What producers experience when the ingress queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backpressure {
    /// Wait for space.
    #[default]
    Block,
    /// Discard the record and count it.
    Drop,
}

impl FromStr for Backpressure {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Backpressure::Block),
            "drop" => Ok(Backpressure::Drop),
            other => Err(ConfigError::UnknownBackpressure(other.to_string())),
        }
    }
}

/// Settings of the `http` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOutputConfig {
    pub disable: bool,
    /// Collector endpoint, e.g. `http://127.0.0.1:8080/report`
    pub report_address: String,
    pub compressor: Compressor,
    pub serializer: Serializer,
    /// Sent as the `token` request header when set.
    pub auth_token: Option<String>,
    pub report_timeout: Duration,
    pub https_proxy: Option<String>,
}

impl Default for HttpOutputConfig {
    fn default() -> Self {
        Self {
            disable: false,
            report_address: DEFAULT_REPORT_ADDRESS.to_string(),
            compressor: Compressor::default(),
            serializer: Serializer::default(),
            auth_token: None,
            report_timeout: Duration::from_secs(DEFAULT_REPORT_TIMEOUT_SECS),
            https_proxy: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub env: String,
    pub service: String,
    pub instance: String,
    /// Records per batch
    pub batch_size: usize,
    /// Seconds between timer rotations; `<= 0` disables the timer
    pub auto_rotate_secs: i64,
    /// Upper bound on concurrent batch deliveries
    pub max_concurrent_rotations: usize,
    /// Capacity of the ingress queue
    pub cache_len: usize,
    pub backpressure: Backpressure,
    /// Suppress the host's own output once the pipeline is running
    pub stop_log_output: bool,
    /// Output names, in configured order
    pub outputs: Vec<String>,
    pub http: HttpOutputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: DEFAULT_ENV.to_string(),
            service: String::new(),
            instance: DEFAULT_INSTANCE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            auto_rotate_secs: DEFAULT_AUTO_ROTATE_SECS,
            max_concurrent_rotations: DEFAULT_MAX_CONCURRENT_ROTATIONS,
            cache_len: DEFAULT_CACHE_LEN,
            backpressure: Backpressure::Block,
            stop_log_output: false,
            outputs: vec![DEFAULT_OUTPUTS.to_string()],
            http: HttpOutputConfig::default(),
        }
    }
}

impl Config {
    /// Default configuration for the given service.
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let instance = get("HONEY_INSTANCE")
            .or_else(|| get("HOSTNAME"))
            .unwrap_or_else(|| DEFAULT_INSTANCE.to_string());

        let http = HttpOutputConfig {
            disable: parse_bool(get("HONEY_HTTP_DISABLE"), false),
            report_address: get("HONEY_HTTP_REPORT_ADDRESS")
                .unwrap_or_else(|| DEFAULT_REPORT_ADDRESS.to_string()),
            compressor: get("HONEY_HTTP_COMPRESS")
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or_default(),
            serializer: get("HONEY_HTTP_SERIALIZER")
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or_default(),
            auth_token: get("HONEY_HTTP_AUTH_TOKEN"),
            report_timeout: Duration::from_secs(
                parse_number::<u64>(
                    "HONEY_HTTP_REPORT_TIMEOUT",
                    get("HONEY_HTTP_REPORT_TIMEOUT"),
                )?
                .filter(|t| *t >= 1)
                .unwrap_or(DEFAULT_REPORT_TIMEOUT_SECS),
            ),
            https_proxy: get("HONEY_PROXY_HTTPS").or_else(|| get("HTTPS_PROXY")),
        };

        let config = Self {
            env: get("HONEY_ENV").unwrap_or_else(|| DEFAULT_ENV.to_string()),
            service: get("HONEY_SERVICE").unwrap_or_default(),
            instance,
            batch_size: parse_number("HONEY_BATCH_SIZE", get("HONEY_BATCH_SIZE"))?
                .unwrap_or(DEFAULT_BATCH_SIZE),
            auto_rotate_secs: parse_number("HONEY_AUTO_ROTATE_TIME", get("HONEY_AUTO_ROTATE_TIME"))?
                .unwrap_or(DEFAULT_AUTO_ROTATE_SECS),
            max_concurrent_rotations: parse_number(
                "HONEY_MAX_ROTATE_THREAD_NUM",
                get("HONEY_MAX_ROTATE_THREAD_NUM"),
            )?
            .unwrap_or(DEFAULT_MAX_CONCURRENT_ROTATIONS),
            cache_len: parse_number("HONEY_CACHE_LEN", get("HONEY_CACHE_LEN"))?
                .unwrap_or(DEFAULT_CACHE_LEN),
            backpressure: get("HONEY_BACKPRESSURE")
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or_default(),
            stop_log_output: parse_bool(get("HONEY_STOP_LOG_OUTPUT"), false),
            outputs: parse_outputs(
                &get("HONEY_OUTPUTS").unwrap_or_else(|| DEFAULT_OUTPUTS.to_string()),
            )?,
            http,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.trim().is_empty() {
            return Err(ConfigError::MissingService);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HONEY_BATCH_SIZE",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.max_concurrent_rotations == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HONEY_MAX_ROTATE_THREAD_NUM",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.cache_len == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HONEY_CACHE_LEN",
                reason: "must be greater than 0".to_string(),
            });
        }
        let mut seen = Vec::with_capacity(self.outputs.len());
        for name in &self.outputs {
            if seen.contains(&name) {
                return Err(ConfigError::DuplicateOutput(name.clone()));
            }
            seen.push(name);
        }
        Ok(())
    }
}

/// Splits a comma separated output list, skipping blanks.
pub fn parse_outputs(list: &str) -> Result<Vec<String>, ConfigError> {
    let mut outputs: Vec<String> = Vec::new();
    for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        if outputs.iter().any(|o| o == name) {
            return Err(ConfigError::DuplicateOutput(name.to_string()));
        }
        outputs.push(name.to_string());
    }
    Ok(outputs)
}

fn parse_number<T: FromStr>(
    key: &'static str,
    value: Option<String>,
) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key,
                reason: format!("{v:?}: {e}"),
            })
        })
        .transpose()
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    value
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("HONEY_SERVICE", "api")])).unwrap();
        assert_eq!(config.service, "api");
        assert_eq!(config.env, DEFAULT_ENV);
        assert_eq!(config.instance, DEFAULT_INSTANCE);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.auto_rotate_secs, DEFAULT_AUTO_ROTATE_SECS);
        assert_eq!(config.max_concurrent_rotations, 10);
        assert_eq!(config.backpressure, Backpressure::Block);
        assert!(!config.stop_log_output);
        assert_eq!(config.outputs, vec!["std".to_string()]);
        assert_eq!(config.http, HttpOutputConfig::default());
    }

    #[test]
    fn test_all_values() {
        let config = Config::from_lookup(lookup(&[
            ("HONEY_ENV", "prod"),
            ("HONEY_SERVICE", "api"),
            ("HONEY_INSTANCE", "pod-7"),
            ("HONEY_BATCH_SIZE", "50"),
            ("HONEY_AUTO_ROTATE_TIME", "0"),
            ("HONEY_MAX_ROTATE_THREAD_NUM", "2"),
            ("HONEY_CACHE_LEN", "64"),
            ("HONEY_BACKPRESSURE", "DROP"),
            ("HONEY_STOP_LOG_OUTPUT", "true"),
            ("HONEY_OUTPUTS", " std , http "),
            ("HONEY_HTTP_REPORT_ADDRESS", "http://collector/report"),
            ("HONEY_HTTP_COMPRESS", "raw"),
            ("HONEY_HTTP_SERIALIZER", "json"),
            ("HONEY_HTTP_AUTH_TOKEN", "secret"),
            ("HONEY_HTTP_REPORT_TIMEOUT", "0"),
            ("HTTPS_PROXY", "http://proxy:3128"),
        ]))
        .unwrap();

        assert_eq!(config.env, "prod");
        assert_eq!(config.instance, "pod-7");
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.auto_rotate_secs, 0);
        assert_eq!(config.max_concurrent_rotations, 2);
        assert_eq!(config.cache_len, 64);
        assert_eq!(config.backpressure, Backpressure::Drop);
        assert!(config.stop_log_output);
        assert_eq!(config.outputs, vec!["std".to_string(), "http".to_string()]);
        assert_eq!(config.http.report_address, "http://collector/report");
        assert_eq!(config.http.compressor, Compressor::Raw);
        assert_eq!(config.http.serializer, Serializer::Json);
        assert_eq!(config.http.auth_token.as_deref(), Some("secret"));
        assert_eq!(
            config.http.report_timeout,
            Duration::from_secs(DEFAULT_REPORT_TIMEOUT_SECS)
        );
        assert_eq!(config.http.https_proxy.as_deref(), Some("http://proxy:3128"));
    }

    #[test]
    fn test_instance_falls_back_to_hostname() {
        let config = Config::from_lookup(lookup(&[
            ("HONEY_SERVICE", "api"),
            ("HOSTNAME", "host-1"),
        ]))
        .unwrap();
        assert_eq!(config.instance, "host-1");
    }

    #[test]
    fn test_missing_service_is_rejected() {
        assert!(matches!(
            Config::from_lookup(lookup(&[])),
            Err(ConfigError::MissingService)
        ));
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("HONEY_SERVICE", "api"),
            ("HONEY_BATCH_SIZE", "lots"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "HONEY_BATCH_SIZE",
                ..
            }
        ));

        let err = Config::from_lookup(lookup(&[
            ("HONEY_SERVICE", "api"),
            ("HONEY_BATCH_SIZE", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        assert!(matches!(
            Config::from_lookup(lookup(&[
                ("HONEY_SERVICE", "api"),
                ("HONEY_BACKPRESSURE", "spill"),
            ])),
            Err(ConfigError::UnknownBackpressure(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[
                ("HONEY_SERVICE", "api"),
                ("HONEY_HTTP_SERIALIZER", "xml"),
            ])),
            Err(ConfigError::UnknownSerializer(_))
        ));
    }

    #[test]
    fn test_duplicate_outputs_are_rejected() {
        assert!(matches!(
            parse_outputs("std,http,std"),
            Err(ConfigError::DuplicateOutput(name)) if name == "std"
        ));
        assert_eq!(parse_outputs(" , ,").unwrap(), Vec::<String>::new());

        let config = Config {
            outputs: vec!["http".to_string(), "http".to_string()],
            ..Config::for_service("api")
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateOutput(_))
        ));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        env::set_var("HONEY_SERVICE", "env-service");
        env::set_var("HONEY_BATCH_SIZE", "7");
        let config = Config::from_env().unwrap();
        env::remove_var("HONEY_SERVICE");
        env::remove_var("HONEY_BATCH_SIZE");

        assert_eq!(config.service, "env-service");
        assert_eq!(config.batch_size, 7);
    }

    #[test]
    #[serial]
    fn test_from_env_without_service_fails() {
        env::remove_var("HONEY_SERVICE");
        assert!(Config::from_env().is_err());
    }
}
