use serde::{Deserialize, Serialize};

use crate::error::{ExecutorError, Result};
use crate::parallel::{PoolConstructionMode, WorkerThreadFactory};

/// The `parallel` section of the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelSettings {
    /// Use the fork/join executor instead of running tasks inline
    pub enabled: bool,
    pub config: StrategySettings,
    pub pool: PoolSettings,
    pub worker: WorkerSettings,
}

impl Default for ParallelSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            config: StrategySettings::default(),
            pool: PoolSettings::default(),
            worker: WorkerSettings::default(),
        }
    }
}

/// Names the built-in strategy that computes the pool configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Dynamic,
    Fixed,
    Custom,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Dynamic => f.write_str("dynamic"),
            StrategyKind::Fixed => f.write_str("fixed"),
            StrategyKind::Custom => f.write_str("custom"),
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dynamic" => Ok(StrategyKind::Dynamic),
            "fixed" => Ok(StrategyKind::Fixed),
            "custom" => Ok(StrategyKind::Custom),
            other => Err(format!(
                "unknown strategy `{other}` (expected dynamic, fixed or custom)"
            )),
        }
    }
}

/// `parallel.config`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    pub strategy: StrategyKind,
    pub dynamic: DynamicSettings,
    pub fixed: FixedSettings,
    pub custom: CustomSettings,
}

/// `parallel.config.dynamic`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicSettings {
    pub factor: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pool_size_factor: Option<f64>,
    pub saturate: bool,
}

impl Default for DynamicSettings {
    fn default() -> Self {
        Self {
            factor: 1.0,
            max_pool_size_factor: None,
            saturate: true,
        }
    }
}

/// `parallel.config.fixed`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pool_size: Option<usize>,
    pub saturate: bool,
}

impl Default for FixedSettings {
    fn default() -> Self {
        Self {
            parallelism: None,
            max_pool_size: None,
            saturate: true,
        }
    }
}

/// `parallel.config.custom`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// `parallel.pool`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub construction: PoolConstructionMode,
}

/// `parallel.worker`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub thread_name_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_size_kb: Option<usize>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            thread_name_prefix: "hierexec-worker".to_string(),
            stack_size_kb: None,
        }
    }
}

impl WorkerSettings {
    /// Configured stack size in bytes; `None` keeps the factory default
    pub fn stack_size(&self) -> Result<Option<usize>> {
        match self.stack_size_kb {
            Some(0) | None => Ok(None),
            Some(kb) => kb.checked_mul(1024).map(Some).ok_or_else(|| {
                ExecutorError::Configuration(format!(
                    "parallel.worker.stack_size_kb ({kb}) is too large"
                ))
            }),
        }
    }

    pub fn thread_factory(&self) -> Result<WorkerThreadFactory> {
        let factory = WorkerThreadFactory::new(self.thread_name_prefix.clone());
        Ok(match self.stack_size()? {
            Some(bytes) => factory.with_stack_size(bytes),
            None => factory,
        })
    }
}
