//! Task tree descriptions for `hierexec run`
//!
//! ```toml
//! [root]
//! name = "suite"
//!
//! [[root.children]]
//! name = "db-tests"
//! mode = "concurrent"
//! locks = [{ key = "db", mode = "read_write" }]
//! sleep_ms = 50
//!
//! [[root.children]]
//! name = "flaky"
//! mode = "concurrent"
//! fail = true
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::lock::{ExclusiveResource, LockManager};
use crate::task::{ExecutionListener, ExecutionMode, NodeTask, TestTask};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub root: PlanNode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    pub name: String,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub locks: Vec<ExclusiveResource>,
    /// Simulated work
    #[serde(default)]
    pub sleep_ms: u64,
    /// Make the node's body fail
    #[serde(default)]
    pub fail: bool,
    #[serde(default)]
    pub children: Vec<PlanNode>,
}

impl Plan {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid plan file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let plan: Plan = toml::from_str(content)?;
        plan.root.validate(&[])?;
        Ok(plan)
    }

    /// Number of nodes in the tree
    pub fn node_count(&self) -> usize {
        self.root.node_count()
    }

    /// Build the task tree, reporting every node to `listener`
    pub fn build(
        &self,
        manager: &LockManager,
        listener: Arc<dyn ExecutionListener>,
    ) -> Arc<dyn TestTask> {
        self.root.build(manager, &listener)
    }
}

impl PlanNode {
    fn node_count(&self) -> usize {
        1 + self.children.iter().map(PlanNode::node_count).sum::<usize>()
    }

    /// Names and lock keys must be non-empty, and no node may lock a key in
    /// a way that conflicts with one of its ancestors; such a node could only
    /// start after the ancestor finished, which in turn waits for the node.
    fn validate(&self, ancestors: &[&PlanNode]) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("plan nodes must have a non-empty name");
        }
        for resource in &self.locks {
            if resource.key().trim().is_empty() {
                bail!("node `{}` declares a lock with an empty key", self.name);
            }
            for ancestor in ancestors {
                if let Some(held) = ancestor.locks.iter().find(|held| held.conflicts_with(resource)) {
                    bail!(
                        "node `{}` locks {resource}, which conflicts with {held} held by its ancestor `{}`",
                        self.name,
                        ancestor.name
                    );
                }
            }
        }

        let mut lineage = ancestors.to_vec();
        lineage.push(self);
        self.children.iter().try_for_each(|child| child.validate(&lineage))
    }

    fn build(&self, manager: &LockManager, listener: &Arc<dyn ExecutionListener>) -> Arc<dyn TestTask> {
        let sleep = Duration::from_millis(self.sleep_ms);
        let fail = self.fail;
        let name = self.name.clone();

        NodeTask::builder(self.name.clone())
            .mode(self.mode)
            .lock(manager.lock_for(self.locks.iter().cloned()))
            .body(move |_| {
                if !sleep.is_zero() {
                    thread::sleep(sleep);
                }
                if fail {
                    bail!("`{name}` failed as requested by the plan");
                }
                Ok(())
            })
            .children(self.children.iter().map(|child| child.build(manager, listener)))
            .listener(Arc::clone(listener))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutorService, SameThreadExecutorService};
    use crate::lock::LockMode;
    use crate::task::ExecutionRecorder;

    const PLAN: &str = r#"
[root]
name = "suite"

[[root.children]]
name = "a"
mode = "concurrent"
locks = [{ key = "db", mode = "read" }]

[[root.children]]
name = "b"
fail = true

[[root.children.children]]
name = "b1"
"#;

    #[test]
    fn test_parse_plan() {
        let plan = Plan::parse(PLAN).unwrap();
        assert_eq!(plan.node_count(), 4);
        assert_eq!(plan.root.children[0].mode, ExecutionMode::Concurrent);
        assert_eq!(plan.root.children[0].locks[0].mode(), LockMode::Read);
        assert_eq!(plan.root.children[1].mode, ExecutionMode::Isolated);
        assert_eq!(plan.root.children[1].children[0].name, "b1");
    }

    #[test]
    fn test_empty_name_is_rejected() {
        assert!(Plan::parse("[root]\nname = \"\"").is_err());
    }

    #[test]
    fn test_lock_conflicting_with_ancestor_is_rejected() {
        let plan = r#"
[root]
name = "suite"
locks = [{ key = "db", mode = "read_write" }]

[[root.children]]
name = "group"

[[root.children.children]]
name = "writer"
mode = "concurrent"
locks = [{ key = "db" }]
"#;
        let error = Plan::parse(plan).unwrap_err().to_string();
        assert!(error.contains("`writer`"), "{error}");
        assert!(error.contains("ancestor `suite`"), "{error}");
    }

    #[test]
    fn test_shared_lock_under_shared_ancestor_is_accepted() {
        let plan = r#"
[root]
name = "suite"
locks = [{ key = "db", mode = "read" }]

[[root.children]]
name = "reader"
mode = "concurrent"
locks = [{ key = "db", mode = "read" }, { key = "cache" }]
"#;
        assert_eq!(Plan::parse(plan).unwrap().node_count(), 2);
    }

    #[test]
    fn test_built_tree_reports_failures() {
        let plan = Plan::parse(PLAN).unwrap();
        let recorder = Arc::new(ExecutionRecorder::new());
        let manager = LockManager::new();
        let root = plan.build(&manager, recorder.clone());

        let executor = SameThreadExecutorService::new();
        let outcome = executor.submit(root).unwrap().join();
        assert!(outcome.is_err());

        let summary = recorder.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.failed.len(), 2);
        assert!(summary.failed.iter().any(|failed| failed.name == "b"));
    }
}
