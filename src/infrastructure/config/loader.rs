//! Layered configuration loading: defaults, YAML files, then `LINTLOOP_` environment variables.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::{Config, RetryConfig};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_iterations: {0}. Must be at least 1")]
    InvalidMaxIterations(u32),

    #[error("Invalid {name}: {value}. Must be at least {min}")]
    InvalidWindow {
        name: &'static str,
        value: usize,
        min: usize,
    },

    #[error("Invalid {name}: {value}. Must be between 0 and 1")]
    InvalidConfidence { name: &'static str, value: f64 },

    #[error("Invalid token budget: {0}. Must be at least 1")]
    InvalidTokenBudget(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must not exceed max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .lintloop/config.yaml (project config)
    /// 3. .lintloop/local.yaml (local overrides, optional)
    /// 4. Environment variables (LINTLOOP_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".lintloop/config.yaml"))
            .merge(Yaml::file(".lintloop/local.yaml"))
            .merge(Env::prefixed("LINTLOOP_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file. Environment variables still
    /// override the file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("LINTLOOP_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate_retry(name: &str, retry: &RetryConfig) -> Result<(), ConfigError> {
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                retry.initial_backoff_ms,
                retry.max_backoff_ms,
            ));
        }
        if retry.max_retries > 20 {
            return Err(ConfigError::ValidationFailed(format!(
                "{name}.retry.max_retries ({}) must be at most 20",
                retry.max_retries
            )));
        }
        Ok(())
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        // Loop caps
        if config.run.max_iterations == 0 {
            return Err(ConfigError::InvalidMaxIterations(config.run.max_iterations));
        }
        for (name, value) in [
            ("loop.max_findings_per_iteration", config.run.max_findings_per_iteration),
            ("loop.max_batches_per_iteration", config.run.max_batches_per_iteration),
            ("loop.max_items_per_batch", config.run.max_items_per_batch),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidWindow { name, value, min: 1 });
            }
        }

        // Convergence windows
        let convergence = &config.convergence;
        for (name, value, min) in [
            ("convergence.plateau_window", convergence.plateau_window, 1),
            ("convergence.converged_window", convergence.converged_window, 1),
            ("convergence.diverge_window", convergence.diverge_window, 1),
            ("convergence.oscillation_window", convergence.oscillation_window, 2),
        ] {
            if value < min {
                return Err(ConfigError::InvalidWindow { name, value, min });
            }
        }
        if convergence.improve_threshold < 0 {
            return Err(ConfigError::ValidationFailed(format!(
                "convergence.improve_threshold ({}) cannot be negative",
                convergence.improve_threshold
            )));
        }
        let model_confidence = convergence.model.min_model_confidence;
        if !(0.0..=1.0).contains(&model_confidence) {
            return Err(ConfigError::InvalidConfidence {
                name: "convergence.model.min_model_confidence",
                value: model_confidence,
            });
        }

        // Classifier
        let floor = config.classifier.confidence_floor;
        if !(0.0..=1.0).contains(&floor) {
            return Err(ConfigError::InvalidConfidence {
                name: "classifier.confidence_floor",
                value: floor,
            });
        }
        for rule in &config.classifier.extra_patterns {
            if rule.pattern.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "classifier.extra_patterns entries need a non-empty pattern".to_string(),
                ));
            }
            if !(0.0..=1.0).contains(&rule.confidence) {
                return Err(ConfigError::InvalidConfidence {
                    name: "classifier.extra_patterns.confidence",
                    value: rule.confidence,
                });
            }
        }

        // Budget
        if config.budget.token_budget == 0 {
            return Err(ConfigError::InvalidTokenBudget(config.budget.token_budget));
        }
        if config.budget.chars_per_token == 0 {
            return Err(ConfigError::InvalidWindow {
                name: "budget.chars_per_token",
                value: 0,
                min: 1,
            });
        }
        if config.budget.min_digest_group < 2 {
            return Err(ConfigError::InvalidWindow {
                name: "budget.min_digest_group",
                value: config.budget.min_digest_group,
                min: 2,
            });
        }

        // Executor
        if config.executor.command.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "executor.command cannot be empty".to_string(),
            ));
        }
        if config.executor.concurrency == 0 {
            return Err(ConfigError::InvalidWindow {
                name: "executor.concurrency",
                value: 0,
                min: 1,
            });
        }
        if config.executor.rate_limit_per_minute == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "executor.rate_limit_per_minute must be positive when set".to_string(),
            ));
        }
        Self::validate_retry("executor", &config.executor.retry)?;

        // Collector
        for command in &config.collector.commands {
            if command.tool.is_empty() || command.command.is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "collector.commands entries need both tool and command".to_string(),
                ));
            }
        }
        Self::validate_retry("collector", &config.collector.retry)?;

        // Cost
        if let Some(max) = config.cost.max_cost_usd {
            if max <= 0.0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "cost.max_cost_usd ({max}) must be positive"
                )));
            }
        }

        // Database
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        // Logging
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(
                config.logging.rotation.clone(),
            ));
        }

        Ok(())
    }
}
