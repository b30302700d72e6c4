//! Process configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables. The environment names are the ones the game
//! frontend deployment already sets (`DOMAIN`, `SNAKE_NAMESPACE`, ...).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{RESOURCE_PREFIX, SessionId};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for environment variable {key}")]
    Env { key: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Public domain the session ingresses are served under.
    pub domain: String,
    /// Origins allowed by the HTTP API's CORS policy.
    pub cors_origins: Vec<String>,
    /// Namespace holding session workloads.
    pub namespace: String,
    /// Namespace targeted by random chaos deletes. Defaults to `namespace`.
    pub chaos_namespace: Option<String>,
    /// Container image of the session workload.
    pub image: String,
    /// Requests/sec added by a load request that carries no explicit rate.
    pub load_increment: f64,
    /// Every N-th eat deletes a pod.
    pub delete_interval: u64,
    pub metrics_interval_ms: u64,
    /// Share of the declared limit assumed in use when no usage sample exists.
    pub usage_fallback_ratio: f64,
    pub request_timeout_ms: u64,
    pub idle_poll_ms: u64,
    /// Pod count per session in simulated mode.
    pub simulated_replicas: u32,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            cors_origins: vec!["http://localhost:5173".to_string()],
            namespace: "snake".to_string(),
            chaos_namespace: None,
            image: "nginx:alpine".to_string(),
            load_increment: 100.0,
            delete_interval: 3,
            metrics_interval_ms: 1000,
            usage_fallback_ratio: 0.5,
            request_timeout_ms: 2000,
            idle_poll_ms: 100,
            simulated_replicas: 1,
        }
    }
}

impl ArenaConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ArenaConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load defaults, the optional file, and the process environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment variables resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(domain) = lookup("DOMAIN") {
            self.domain = domain;
        }
        if let Some(origins) = lookup("CORS_DOMAIN") {
            self.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(ns) = lookup("SNAKE_NAMESPACE") {
            self.namespace = ns;
        }
        if let Some(ns) = lookup("CHAOS_NAMESPACE") {
            self.chaos_namespace = Some(ns);
        }
        if let Some(image) = lookup("SNAKE_IMAGE").filter(|i| !i.is_empty()) {
            self.image = image;
        }
        if let Some(raw) = lookup("LOAD_INCREMENT") {
            self.load_increment = raw.trim().parse().map_err(|_| ConfigError::Env {
                key: "LOAD_INCREMENT",
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = lookup("PODS_DELETE_INTERVAL") {
            self.delete_interval = raw.trim().parse().map_err(|_| ConfigError::Env {
                key: "PODS_DELETE_INTERVAL",
                value: raw.clone(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delete_interval == 0 {
            return Err(ConfigError::Invalid("delete_interval must be at least 1".into()));
        }
        if !self.load_increment.is_finite() || self.load_increment < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "load_increment must be a non-negative number, got {}",
                self.load_increment
            )));
        }
        if !(0.0..=1.0).contains(&self.usage_fallback_ratio) {
            return Err(ConfigError::Invalid(format!(
                "usage_fallback_ratio must be within [0, 1], got {}",
                self.usage_fallback_ratio
            )));
        }
        if self.metrics_interval_ms == 0 || self.request_timeout_ms == 0 || self.idle_poll_ms == 0 {
            return Err(ConfigError::Invalid("intervals and timeouts must be non-zero".into()));
        }
        if self.domain.is_empty() || self.namespace.is_empty() {
            return Err(ConfigError::Invalid("domain and namespace must be set".into()));
        }
        Ok(())
    }

    pub fn chaos_namespace(&self) -> &str {
        self.chaos_namespace.as_deref().unwrap_or(&self.namespace)
    }

    /// Externally reachable address of a session's workload.
    pub fn ingress_url(&self, session: &SessionId) -> String {
        format!("http://{}/{RESOURCE_PREFIX}/{session}", self.domain)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}
