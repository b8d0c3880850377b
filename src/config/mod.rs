//! Layered configuration for the executor
//!
//! Sources, lowest priority first:
//! 1. the embedded `default-config.toml`
//! 2. `hierexec.toml` in the working directory
//! 3. a custom file passed by the caller (TOML, or JSON by extension)
//! 4. `HIEREXEC_` environment variables, `__` separating nesting levels
//! 5. serialized command line overrides

use anyhow::{Context, Result, bail};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml};
use serde::Serialize;
use std::path::Path;

pub mod settings;
pub mod strategy;


pub use settings::{
    CustomSettings, DynamicSettings, FixedSettings, ParallelSettings, PoolSettings,
    StrategyKind, StrategySettings, WorkerSettings,
};
pub use strategy::{
    DynamicStrategy, EXTRA_POOL_THREADS, FixedStrategy, KEEP_ALIVE, MAX_PARALLELISM,
    ParallelExecutionConfiguration, ParallelExecutionConfigurationStrategy,
    resolve_configuration,
};

// Embed the default config at compile time
const DEFAULT_CONFIG: &str = include_str!("../../default-config.toml");

/// File picked up from the working directory when present
pub const PROJECT_CONFIG_FILE: &str = "hierexec.toml";

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "HIEREXEC_";

pub struct ExecutorConfig {
    figment: Figment,
}

impl ExecutorConfig {
    pub fn load<T: Serialize>(custom_config: Option<&str>, cli_overrides: Option<T>) -> Result<Self> {
        tracing::trace!("CONFIG LOAD: Starting");

        let mut figment = Figment::new()
            .merge(Toml::string(DEFAULT_CONFIG))
            .merge(Toml::file(PROJECT_CONFIG_FILE));

        if let Some(path) = custom_config {
            if !Path::new(path).exists() {
                bail!("Config file not found: {path}");
            }
            figment = if path.ends_with(".json") {
                figment.merge(Json::file(path))
            } else {
                figment.merge(Toml::file(path))
            };
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(overrides) = cli_overrides {
            tracing::trace!("CONFIG LOAD: Applying CLI overrides");
            figment = figment.merge(Serialized::defaults(overrides));
        }

        Ok(Self { figment })
    }

    /// Defaults only; ignores files and environment
    pub fn defaults() -> Self {
        Self {
            figment: Figment::new().merge(Toml::string(DEFAULT_CONFIG)),
        }
    }

    /// Get a nested object/section as JSON
    pub fn get_section(&self, path: &str) -> Result<serde_json::Value> {
        let value = self
            .figment
            .extract_inner(path)
            .with_context(|| format!("Missing config section `{path}`"))?;
        Ok(value)
    }

    /// Get the full merged configuration as a structured value
    pub fn get_full_config(&self) -> Result<serde_json::Value> {
        let value = self.figment.extract()?;
        Ok(value)
    }

    /// The typed `parallel` section
    pub fn parallel_settings(&self) -> Result<ParallelSettings> {
        let settings = self
            .figment
            .extract_inner("parallel")
            .context("Invalid `parallel` configuration")?;
        Ok(settings)
    }
}
