// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `OIDC_CLIENT_ID` | Client id expected in the token audience | Required |
//! | `OIDC_ISSUER` | Expected `iss` claim | Required unless discovered |
//! | `OIDC_JWKS_URI` | Provider JWKS endpoint | Required unless discovered |
//! | `OIDC_USERINFO_URI` | Provider userinfo endpoint | Required unless discovered |
//! | `OIDC_DISCOVERY_URI` | Provider metadata document | Optional |
//! | `OIDC_USE_DISCOVERY` | Populate endpoints from the metadata document | `false` |
//! | `OIDC_JWKS_CACHE_TTL_SECS` | Key set cache lifetime, `0` disables caching | `300` |
//! | `OIDC_HTTP_TIMEOUT_SECS` | Timeout for provider calls | `10` |
//! | `OIDC_CLOCK_LEEWAY_SECS` | Tolerance for `iat`/`exp`/`nbf` checks | `0` |
//! | `ERROR_CATALOG_PATH` | JSON error catalog file | Built-in catalog |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use thiserror::Error;
use url::Url;

pub const CLIENT_ID_ENV: &str = "OIDC_CLIENT_ID";
pub const ISSUER_ENV: &str = "OIDC_ISSUER";
pub const JWKS_URI_ENV: &str = "OIDC_JWKS_URI";
pub const USERINFO_URI_ENV: &str = "OIDC_USERINFO_URI";
pub const DISCOVERY_URI_ENV: &str = "OIDC_DISCOVERY_URI";
pub const USE_DISCOVERY_ENV: &str = "OIDC_USE_DISCOVERY";
pub const JWKS_CACHE_TTL_ENV: &str = "OIDC_JWKS_CACHE_TTL_SECS";
pub const HTTP_TIMEOUT_ENV: &str = "OIDC_HTTP_TIMEOUT_SECS";
pub const CLOCK_LEEWAY_ENV: &str = "OIDC_CLOCK_LEEWAY_SECS";
pub const ERROR_CATALOG_PATH_ENV: &str = "ERROR_CATALOG_PATH";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Default key set cache lifetime (5 minutes).
pub const DEFAULT_JWKS_CACHE_TTL: Duration = Duration::from_secs(300);
/// Default timeout for calls to the provider.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration errors detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required configuration value {0} is missing or empty")]
    Missing(&'static str),
    #[error("configuration value {name} is not a valid URL: {source}")]
    InvalidUrl {
        name: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("configuration value {name} is invalid: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Identity provider endpoints and client identity.
///
/// Immutable once the gate is installed. With discovery enabled, the issuer
/// and both endpoints are filled in from the provider metadata document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderConfig {
    pub client_id: String,
    pub issuer: String,
    pub jwks_uri: Option<Url>,
    pub userinfo_uri: Option<Url>,
    pub discovery_uri: Option<Url>,
    pub use_discovery: bool,
}

impl ProviderConfig {
    pub fn new(client_id: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            issuer: issuer.into(),
            ..Self::default()
        }
    }

    pub fn with_jwks_uri(mut self, uri: Url) -> Self {
        self.jwks_uri = Some(uri);
        self
    }

    pub fn with_userinfo_uri(mut self, uri: Url) -> Self {
        self.userinfo_uri = Some(uri);
        self
    }

    pub fn with_discovery(mut self, uri: Url) -> Self {
        self.discovery_uri = Some(uri);
        self.use_discovery = true;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let value = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            client_id: value(CLIENT_ID_ENV).ok_or(ConfigError::Missing(CLIENT_ID_ENV))?,
            issuer: value(ISSUER_ENV).unwrap_or_default(),
            jwks_uri: parse_url(JWKS_URI_ENV, value(JWKS_URI_ENV))?,
            userinfo_uri: parse_url(USERINFO_URI_ENV, value(USERINFO_URI_ENV))?,
            discovery_uri: parse_url(DISCOVERY_URI_ENV, value(DISCOVERY_URI_ENV))?,
            use_discovery: parse_bool(USE_DISCOVERY_ENV, value(USE_DISCOVERY_ENV))?,
        })
    }

    /// Check that everything the gate needs is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Missing(CLIENT_ID_ENV));
        }
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::Missing(ISSUER_ENV));
        }
        if self.jwks_uri.is_none() {
            return Err(ConfigError::Missing(JWKS_URI_ENV));
        }
        if self.userinfo_uri.is_none() {
            return Err(ConfigError::Missing(USERINFO_URI_ENV));
        }
        Ok(())
    }
}

/// Tunables for the gate's outbound calls and claim checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSettings {
    pub jwks_cache_ttl: Duration,
    pub http_timeout: Duration,
    pub clock_leeway: Duration,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            jwks_cache_ttl: DEFAULT_JWKS_CACHE_TTL,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            clock_leeway: Duration::ZERO,
        }
    }
}

impl GateSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            jwks_cache_ttl: parse_secs(JWKS_CACHE_TTL_ENV, lookup(JWKS_CACHE_TTL_ENV))?
                .unwrap_or(defaults.jwks_cache_ttl),
            http_timeout: parse_secs(HTTP_TIMEOUT_ENV, lookup(HTTP_TIMEOUT_ENV))?
                .unwrap_or(defaults.http_timeout),
            clock_leeway: parse_secs(CLOCK_LEEWAY_ENV, lookup(CLOCK_LEEWAY_ENV))?
                .unwrap_or(defaults.clock_leeway),
        })
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Process-level settings for the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub log_format: LogFormat,
    pub error_catalog_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string());
        let port = lookup(PORT_ENV).unwrap_or_else(|| "8080".to_string());
        let bind_addr = format!("{host}:{port}")
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                name: PORT_ENV,
                value: format!("{host}:{port}"),
            })?;

        let log_format = match lookup(LOG_FORMAT_ENV).as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: LOG_FORMAT_ENV,
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            bind_addr,
            log_format,
            error_catalog_path: lookup(ERROR_CATALOG_PATH_ENV).map(PathBuf::from),
        })
    }
}

fn parse_url(name: &'static str, value: Option<String>) -> Result<Option<Url>, ConfigError> {
    value
        .map(|v| Url::parse(v.trim()).map_err(|source| ConfigError::InvalidUrl { name, source }))
        .transpose()
}

fn parse_bool(name: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::trim) {
        None => Ok(false),
        Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue {
            name,
            value: v.to_string(),
        }),
    }
}

fn parse_secs(name: &'static str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    value
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::InvalidValue { name, value: v })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn provider_config_from_env() {
        let config = ProviderConfig::from_lookup(env(&[
            (CLIENT_ID_ENV, "my-client"),
            (ISSUER_ENV, "https://id.example.com/realms/main"),
            (JWKS_URI_ENV, "https://id.example.com/certs"),
            (USERINFO_URI_ENV, "https://id.example.com/userinfo"),
        ]))
        .unwrap();

        assert_eq!(config.client_id, "my-client");
        assert!(!config.use_discovery);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn client_id_is_required() {
        let result = ProviderConfig::from_lookup(env(&[(CLIENT_ID_ENV, "  ")]));
        assert!(matches!(result, Err(ConfigError::Missing(CLIENT_ID_ENV))));
    }

    #[test]
    fn invalid_url_is_rejected() {
        let result = ProviderConfig::from_lookup(env(&[
            (CLIENT_ID_ENV, "my-client"),
            (JWKS_URI_ENV, "not a url"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidUrl { name: JWKS_URI_ENV, .. })
        ));
    }

    #[test]
    fn validate_requires_endpoints() {
        let config = ProviderConfig::new("my-client", "https://id.example.com");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing(JWKS_URI_ENV))
        ));

        let config = config.with_jwks_uri(Url::parse("https://id.example.com/certs").unwrap());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing(USERINFO_URI_ENV))
        ));
    }

    #[test]
    fn use_discovery_parses_booleans() {
        let config = ProviderConfig::from_lookup(env(&[
            (CLIENT_ID_ENV, "c"),
            (USE_DISCOVERY_ENV, "TRUE"),
        ]))
        .unwrap();
        assert!(config.use_discovery);

        let result = ProviderConfig::from_lookup(env(&[
            (CLIENT_ID_ENV, "c"),
            (USE_DISCOVERY_ENV, "maybe"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn gate_settings_defaults_and_overrides() {
        let defaults = GateSettings::from_lookup(env(&[])).unwrap();
        assert_eq!(defaults, GateSettings::default());

        let settings = GateSettings::from_lookup(env(&[
            (JWKS_CACHE_TTL_ENV, "0"),
            (CLOCK_LEEWAY_ENV, "30"),
        ]))
        .unwrap();
        assert_eq!(settings.jwks_cache_ttl, Duration::ZERO);
        assert_eq!(settings.clock_leeway, Duration::from_secs(30));
        assert_eq!(settings.http_timeout, DEFAULT_HTTP_TIMEOUT);
    }

    #[test]
    fn server_config_defaults() {
        let config = ServerConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.error_catalog_path.is_none());
    }

    #[test]
    fn server_config_rejects_unknown_log_format() {
        let result = ServerConfig::from_lookup(env(&[(LOG_FORMAT_ENV, "xml")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { name: LOG_FORMAT_ENV, .. })
        ));
    }
}
