use parking_lot::Mutex;
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Result;

/// What a listener learns about the node being reported
#[derive(Debug, Clone, Copy)]
pub struct NodeInfo<'a> {
    pub name: &'a str,
    /// Whether the node has children
    pub is_container: bool,
}

/// Observer of node execution.
///
/// Called on the thread that runs the node; implementations must tolerate
/// concurrent calls from several workers.
pub trait ExecutionListener: Send + Sync {
    fn execution_started(&self, _node: NodeInfo<'_>) {}

    fn execution_finished(&self, _node: NodeInfo<'_>, _outcome: &Result<()>) {}
}

#[derive(Debug, Clone)]
struct Record {
    name: String,
    thread: String,
    is_container: bool,
    started: Instant,
    finished: Option<Instant>,
    error: Option<String>,
}

/// Listener that keeps every start and finish for later inspection
#[derive(Debug)]
pub struct ExecutionRecorder {
    origin: Instant,
    records: Mutex<Vec<Record>>,
}

impl Default for ExecutionRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionRecorder {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Names of finished nodes in completion order
    pub fn finished(&self) -> Vec<String> {
        let mut finished: Vec<(Instant, String)> = self
            .records
            .lock()
            .iter()
            .filter_map(|record| record.finished.map(|at| (at, record.name.clone())))
            .collect();
        finished.sort_by_key(|(at, _)| *at);
        finished.into_iter().map(|(_, name)| name).collect()
    }

    pub fn summary(&self) -> ExecutionSummary {
        let records = self.records.lock();
        let failed: Vec<FailedTask> = records
            .iter()
            .filter_map(|record| {
                record.error.as_ref().map(|error| FailedTask {
                    name: record.name.clone(),
                    thread: record.thread.clone(),
                    error: error.clone(),
                })
            })
            .collect();
        let finished = records.iter().filter(|record| record.finished.is_some()).count();
        let elapsed = records
            .iter()
            .filter_map(|record| record.finished)
            .max()
            .map(|last| last.duration_since(self.origin))
            .unwrap_or_default();

        ExecutionSummary {
            total: records.len(),
            succeeded: finished - failed.len(),
            failed,
            peak_concurrency: peak_concurrency(&records),
            threads: distinct_threads(&records),
            elapsed_ms: elapsed.as_millis(),
        }
    }
}

impl ExecutionListener for ExecutionRecorder {
    fn execution_started(&self, node: NodeInfo<'_>) {
        let thread = thread::current().name().unwrap_or("unnamed").to_string();
        self.records.lock().push(Record {
            name: node.name.to_string(),
            thread,
            is_container: node.is_container,
            started: Instant::now(),
            finished: None,
            error: None,
        });
    }

    fn execution_finished(&self, node: NodeInfo<'_>, outcome: &Result<()>) {
        let now = Instant::now();
        let thread = thread::current();
        let thread = thread.name().unwrap_or("unnamed");
        let mut records = self.records.lock();
        // A node starts and finishes on the same thread
        if let Some(record) = records.iter_mut().rev().find(|record| {
            record.finished.is_none() && record.name == node.name && record.thread == thread
        }) {
            record.finished = Some(now);
            record.error = outcome.as_ref().err().map(ToString::to_string);
        }
    }
}

/// Maximum number of leaf nodes that were running at the same instant
fn peak_concurrency(records: &[Record]) -> usize {
    let mut events: Vec<(Instant, i32)> = Vec::new();
    for record in records.iter().filter(|record| !record.is_container) {
        events.push((record.started, 1));
        if let Some(finished) = record.finished {
            events.push((finished, -1));
        }
    }
    // Ends sort before starts at the same instant
    events.sort();

    let mut running: i32 = 0;
    let mut peak: i32 = 0;
    for (_, delta) in events {
        running += delta;
        peak = peak.max(running);
    }
    peak as usize
}

fn distinct_threads(records: &[Record]) -> usize {
    let mut threads: Vec<&str> = records.iter().map(|record| record.thread.as_str()).collect();
    threads.sort_unstable();
    threads.dedup();
    threads.len()
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedTask {
    pub name: String,
    pub thread: String,
    pub error: String,
}

/// Aggregated outcome of a recorded execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<FailedTask>,
    pub peak_concurrency: usize,
    pub threads: usize,
    pub elapsed_ms: u128,
}

impl ExecutionSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(u64::try_from(self.elapsed_ms).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutorError;

    fn leaf(name: &str) -> NodeInfo<'_> {
        NodeInfo {
            name,
            is_container: false,
        }
    }

    #[test]
    fn test_recorder_summary() {
        let recorder = ExecutionRecorder::new();
        let root = NodeInfo {
            name: "root",
            is_container: true,
        };

        recorder.execution_started(root);
        recorder.execution_started(leaf("a"));
        recorder.execution_finished(leaf("a"), &Ok(()));
        recorder.execution_started(leaf("b"));
        recorder.execution_finished(leaf("b"), &Err(ExecutorError::Saturated));
        recorder.execution_finished(root, &Ok(()));

        let summary = recorder.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].name, "b");
        assert_eq!(summary.peak_concurrency, 1);
        assert_eq!(summary.threads, 1);
        assert!(!summary.is_success());
        assert_eq!(recorder.finished(), vec!["a", "b", "root"]);
    }

    #[test]
    fn test_overlapping_leaves_count_towards_peak() {
        let recorder = ExecutionRecorder::new();
        recorder.execution_started(leaf("a"));
        recorder.execution_started(leaf("b"));
        recorder.execution_finished(leaf("b"), &Ok(()));
        recorder.execution_finished(leaf("a"), &Ok(()));

        assert_eq!(recorder.summary().peak_concurrency, 2);
    }
}
