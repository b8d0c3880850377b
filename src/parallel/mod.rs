//! Work-stealing thread pool
//!
//! This module owns threads and queues; it knows nothing about tests, locks
//! or hierarchies. The executor layer hands it opaque jobs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  submit   ┌──────────────┐  steal   ┌──────────────┐
//! │ caller       │──────────▶│ injector     │◀─────────│ worker N     │
//! │ (any thread) │           └──────────────┘          │ LIFO deque   │
//! └──────────────┘                  ▲                  └──────────────┘
//!                                   │ steal                   ▲
//!                            ┌──────────────┐  steal          │
//!                            │ worker 0     │─────────────────┘
//!                            │ LIFO deque   │ fork (own deque)
//!                            └──────────────┘
//! ```
//!
//! - **Fork**: a worker pushes onto its own deque and pops newest first
//! - **Steal**: idle workers take from the injector, then the oldest end of
//!   other workers' deques
//! - **Help while joining**: a worker waiting for a task runs other queued
//!   jobs, and asks the pool for a spare thread when nothing is left to run
//! - **Compensation**: spare threads are bounded by the max pool size; beyond
//!   it the saturate predicate decides between waiting and failing the join
//!
//! # Example
//!
//! ```rust,no_run
//! use hierexec::config::ParallelExecutionConfiguration;
//! use hierexec::parallel::ForkJoinPoolBuilder;
//!
//! let pool = ForkJoinPoolBuilder::new(ParallelExecutionConfiguration::fixed(4))
//!     .build()
//!     .expect("pool");
//! assert_eq!(pool.parallelism(), 4);
//! pool.shutdown_now();
//! ```

pub mod builder;
pub mod pool;
pub mod worker;

#[cfg(test)]
mod tests;

pub use builder::{ForkJoinPoolBuilder, PoolConstructionMode};
pub use pool::{ForkJoinPool, PoolStats, SaturatePredicate};
pub use worker::WorkerThreadFactory;
