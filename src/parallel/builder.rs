use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::pool::{ForkJoinPool, PoolTuning};
use super::worker::WorkerThreadFactory;
use crate::config::ParallelExecutionConfiguration;
use crate::error::{ExecutorError, Result};

/// Which pool constructions the builder may try
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolConstructionMode {
    /// Tuned pool with compensation, falling back to a basic pool
    #[default]
    Auto,
    /// Fixed-size pool honoring only the parallelism
    Basic,
}

/// One way of turning a configuration into a running pool
trait PoolConstruction {
    fn name(&self) -> &'static str;

    fn build(
        &self,
        configuration: &ParallelExecutionConfiguration,
        factory: &WorkerThreadFactory,
    ) -> Result<ForkJoinPool>;
}

/// Honors every knob of the configuration
struct TunedPool;

impl PoolConstruction for TunedPool {
    fn name(&self) -> &'static str {
        "tuned"
    }

    fn build(
        &self,
        configuration: &ParallelExecutionConfiguration,
        factory: &WorkerThreadFactory,
    ) -> Result<ForkJoinPool> {
        configuration.validate()?;
        let tuning = PoolTuning {
            parallelism: configuration.parallelism(),
            core_pool_size: configuration.core_pool_size(),
            max_pool_size: configuration.max_pool_size(),
            minimum_runnable: configuration.minimum_runnable(),
            keep_alive: configuration.keep_alive(),
            saturate: configuration.saturate().cloned(),
            compensate: true,
        };
        ForkJoinPool::start(tuning, factory.clone())
    }
}

/// Only the parallelism; no spare threads
struct BasicPool;

impl PoolConstruction for BasicPool {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn build(
        &self,
        configuration: &ParallelExecutionConfiguration,
        factory: &WorkerThreadFactory,
    ) -> Result<ForkJoinPool> {
        let parallelism = configuration.parallelism();
        if parallelism == 0 {
            return Err(ExecutorError::Configuration(
                "parallelism must be at least 1".to_string(),
            ));
        }
        ForkJoinPool::start(PoolTuning::basic(parallelism), factory.clone())
    }
}

/// Creates the [`ForkJoinPool`] behind a fork/join executor service.
///
/// In [`PoolConstructionMode::Auto`] a tuned pool is tried first; if that
/// fails a basic pool with the same parallelism is created instead, and only
/// when both fail is the error reported.
#[derive(Debug, Clone)]
pub struct ForkJoinPoolBuilder {
    configuration: ParallelExecutionConfiguration,
    factory: WorkerThreadFactory,
    construction: PoolConstructionMode,
}

impl ForkJoinPoolBuilder {
    pub fn new(configuration: ParallelExecutionConfiguration) -> Self {
        Self {
            configuration,
            factory: WorkerThreadFactory::default(),
            construction: PoolConstructionMode::default(),
        }
    }

    pub fn thread_factory(mut self, factory: WorkerThreadFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn construction(mut self, construction: PoolConstructionMode) -> Self {
        self.construction = construction;
        self
    }

    pub fn configuration(&self) -> &ParallelExecutionConfiguration {
        &self.configuration
    }

    pub fn build(self) -> Result<ForkJoinPool> {
        let constructions: Vec<Box<dyn PoolConstruction>> = match self.construction {
            PoolConstructionMode::Auto => vec![Box::new(TunedPool), Box::new(BasicPool)],
            PoolConstructionMode::Basic => vec![Box::new(BasicPool)],
        };

        let mut last_error = None;
        for construction in constructions {
            match construction.build(&self.configuration, &self.factory) {
                Ok(pool) => {
                    debug!(construction = construction.name(), "Created fork/join pool");
                    return Ok(pool);
                }
                Err(error) => {
                    warn!(
                        "Failed to create {} fork/join pool: {error}",
                        construction.name()
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(ExecutorError::PoolCreation(match last_error {
            Some(error) => error.to_string(),
            None => "no pool construction available".to_string(),
        }))
    }
}
