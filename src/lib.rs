//! # hierexec - Hierarchical Parallel Test Execution
//!
//! Executes a tree of test tasks on a work-stealing thread pool while honoring
//! the resource locks each task declares.
//!
//! ## Features
//!
//! - **Fork/join scheduling**: concurrent siblings are forked onto worker
//!   deques, isolated siblings run on the scheduling thread
//! - **Resource locks**: shared and exclusive locks over named resources,
//!   always acquired in one global order
//! - **Deferral**: a worker never starts a task whose lock conflicts with one
//!   it already holds; such work is parked and rescheduled later
//! - **Configurable parallelism**: dynamic, fixed or custom strategies,
//!   layered from files, environment and command line
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hierexec::config::ParallelExecutionConfiguration;
//! use hierexec::executor::{ExecutorService, ForkJoinPoolExecutorService};
//! use hierexec::task::{ExecutionMode, NodeTask, TestTask};
//!
//! let executor = ForkJoinPoolExecutorService::new(ParallelExecutionConfiguration::fixed(4))?;
//! let leaves: Vec<Arc<dyn TestTask>> = (0..8)
//!     .map(|i| -> Arc<dyn TestTask> {
//!         NodeTask::builder(format!("test-{i}"))
//!             .mode(ExecutionMode::Concurrent)
//!             .body(|_| Ok(()))
//!             .build()
//!     })
//!     .collect();
//! executor.invoke_all(&leaves)?;
//! executor.close();
//! # Ok::<(), hierexec::ExecutorError>(())
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod lock;
pub mod parallel;
pub mod task;

pub use cli::{Cli, Output};
pub use config::ExecutorConfig;
pub use error::{ExecutorError, Result};
pub use executor::{ExecutionStrategy, ExecutorService, ForkJoinPoolExecutorService};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
