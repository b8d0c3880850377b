use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::settings::{DynamicSettings, FixedSettings, StrategySettings, StrategyKind};
use crate::error::{ExecutorError, Result};
use crate::parallel::{PoolStats, SaturatePredicate};

/// Idle time after which spare workers above the core size retire
pub const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Spare threads allowed on top of the parallelism when no max is configured
pub const EXTRA_POOL_THREADS: usize = 256;

/// Upper limit for the parallelism of a pool
pub const MAX_PARALLELISM: usize = 0x7fff;

/// Thread management knobs of a fork/join pool
#[derive(Clone)]
pub struct ParallelExecutionConfiguration {
    parallelism: usize,
    minimum_runnable: usize,
    max_pool_size: usize,
    core_pool_size: usize,
    keep_alive: Duration,
    saturate: Option<SaturatePredicate>,
}

impl ParallelExecutionConfiguration {
    pub fn new(
        parallelism: usize,
        minimum_runnable: usize,
        max_pool_size: usize,
        core_pool_size: usize,
        keep_alive: Duration,
        saturate: Option<SaturatePredicate>,
    ) -> Self {
        Self {
            parallelism,
            minimum_runnable,
            max_pool_size,
            core_pool_size,
            keep_alive,
            saturate,
        }
    }

    /// Configuration the fixed strategy produces for `parallelism`
    pub fn fixed(parallelism: usize) -> Self {
        Self::from_parallelism(parallelism, parallelism.saturating_add(EXTRA_POOL_THREADS), true)
    }

    fn from_parallelism(parallelism: usize, max_pool_size: usize, saturate: bool) -> Self {
        Self::new(
            parallelism,
            parallelism,
            max_pool_size,
            parallelism,
            KEEP_ALIVE,
            saturate.then(always_saturate),
        )
    }

    /// Replace the saturate predicate
    pub fn with_saturate(mut self, saturate: Option<SaturatePredicate>) -> Self {
        self.saturate = saturate;
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn minimum_runnable(&self) -> usize {
        self.minimum_runnable
    }

    pub fn max_pool_size(&self) -> usize {
        self.max_pool_size
    }

    pub fn core_pool_size(&self) -> usize {
        self.core_pool_size
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn saturate(&self) -> Option<&SaturatePredicate> {
        self.saturate.as_ref()
    }

    /// Check the relations the tuned pool relies on
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(ExecutorError::Configuration(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if self.parallelism > MAX_PARALLELISM {
            return Err(ExecutorError::Configuration(format!(
                "parallelism {} exceeds the maximum of {MAX_PARALLELISM}",
                self.parallelism
            )));
        }
        if self.core_pool_size > self.max_pool_size {
            return Err(ExecutorError::Configuration(format!(
                "core pool size {} exceeds max pool size {}",
                self.core_pool_size, self.max_pool_size
            )));
        }
        if self.minimum_runnable > self.max_pool_size {
            return Err(ExecutorError::Configuration(format!(
                "minimum runnable {} exceeds max pool size {}",
                self.minimum_runnable, self.max_pool_size
            )));
        }
        if self.parallelism > self.max_pool_size {
            return Err(ExecutorError::Configuration(format!(
                "parallelism {} exceeds max pool size {}",
                self.parallelism, self.max_pool_size
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ParallelExecutionConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelExecutionConfiguration")
            .field("parallelism", &self.parallelism)
            .field("minimum_runnable", &self.minimum_runnable)
            .field("max_pool_size", &self.max_pool_size)
            .field("core_pool_size", &self.core_pool_size)
            .field("keep_alive", &self.keep_alive)
            .field("saturate", &self.saturate.is_some())
            .finish()
    }
}

fn always_saturate() -> SaturatePredicate {
    Arc::new(|_: &PoolStats| true)
}

/// Produces a [`ParallelExecutionConfiguration`] from the `parallel.config`
/// settings
pub trait ParallelExecutionConfigurationStrategy: Send + Sync {
    fn create_configuration(
        &self,
        settings: &StrategySettings,
    ) -> Result<ParallelExecutionConfiguration>;
}

/// Parallelism proportional to the number of available cores
#[derive(Debug, Clone)]
pub struct DynamicStrategy {
    processors: usize,
}

impl DynamicStrategy {
    /// Use `processors` instead of the detected core count
    pub fn with_processors(processors: usize) -> Self {
        Self { processors }
    }
}

impl Default for DynamicStrategy {
    fn default() -> Self {
        Self {
            processors: num_cpus::get(),
        }
    }
}

impl ParallelExecutionConfigurationStrategy for DynamicStrategy {
    fn create_configuration(
        &self,
        settings: &StrategySettings,
    ) -> Result<ParallelExecutionConfiguration> {
        let DynamicSettings {
            factor,
            max_pool_size_factor,
            saturate,
        } = settings.dynamic;

        if !(factor.is_finite() && factor > 0.0) {
            return Err(ExecutorError::Configuration(format!(
                "parallel.config.dynamic.factor must be a positive number, was {factor}"
            )));
        }
        let scaled = (factor * self.processors as f64).floor();
        if scaled > MAX_PARALLELISM as f64 {
            return Err(ExecutorError::Configuration(format!(
                "parallel.config.dynamic.factor {factor} yields a parallelism above {MAX_PARALLELISM}"
            )));
        }
        let parallelism = (scaled as usize).max(1);

        let max_pool_size = match max_pool_size_factor {
            Some(max_factor) if !(max_factor.is_finite() && max_factor >= 1.0) => {
                return Err(ExecutorError::Configuration(format!(
                    "parallel.config.dynamic.max_pool_size_factor must be at least 1.0, was {max_factor}"
                )));
            }
            Some(max_factor) => {
                let scaled = (max_factor * self.processors as f64).floor();
                if scaled > (MAX_PARALLELISM + EXTRA_POOL_THREADS) as f64 {
                    return Err(ExecutorError::Configuration(format!(
                        "parallel.config.dynamic.max_pool_size_factor {max_factor} yields a pool above {} threads",
                        MAX_PARALLELISM + EXTRA_POOL_THREADS
                    )));
                }
                (scaled as usize).max(parallelism)
            }
            None => parallelism + EXTRA_POOL_THREADS,
        };

        Ok(ParallelExecutionConfiguration::from_parallelism(
            parallelism,
            max_pool_size,
            saturate,
        ))
    }
}

/// Parallelism given explicitly
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedStrategy;

impl ParallelExecutionConfigurationStrategy for FixedStrategy {
    fn create_configuration(
        &self,
        settings: &StrategySettings,
    ) -> Result<ParallelExecutionConfiguration> {
        let FixedSettings {
            parallelism,
            max_pool_size,
            saturate,
        } = settings.fixed;

        let parallelism = match parallelism {
            Some(parallelism) if (1..=MAX_PARALLELISM).contains(&parallelism) => parallelism,
            Some(parallelism) => {
                return Err(ExecutorError::Configuration(format!(
                    "parallel.config.fixed.parallelism must be between 1 and {MAX_PARALLELISM}, was {parallelism}"
                )));
            }
            None => {
                return Err(ExecutorError::Configuration(
                    "parallel.config.fixed.parallelism is required for the fixed strategy"
                        .to_string(),
                ));
            }
        };

        let max_pool_size = match max_pool_size {
            Some(max) if max < parallelism => {
                return Err(ExecutorError::Configuration(format!(
                    "parallel.config.fixed.max_pool_size ({max}) must not be below parallelism ({parallelism})"
                )));
            }
            Some(max) => max,
            None => parallelism + EXTRA_POOL_THREADS,
        };

        Ok(ParallelExecutionConfiguration::from_parallelism(
            parallelism,
            max_pool_size,
            saturate,
        ))
    }
}

/// Resolve the configured strategy.
///
/// `custom` must be supplied when the settings select the custom strategy.
pub fn resolve_configuration(
    settings: &StrategySettings,
    custom: Option<&dyn ParallelExecutionConfigurationStrategy>,
) -> Result<ParallelExecutionConfiguration> {
    match settings.strategy {
        StrategyKind::Dynamic => DynamicStrategy::default().create_configuration(settings),
        StrategyKind::Fixed => FixedStrategy.create_configuration(settings),
        StrategyKind::Custom => match custom {
            Some(strategy) => strategy.create_configuration(settings),
            None => Err(ExecutorError::Configuration(format!(
                "parallel.config.strategy is `custom` but no strategy named `{}` was registered",
                settings.custom.name.as_deref().unwrap_or("<unnamed>")
            ))),
        },
    }
}
