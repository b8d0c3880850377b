use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::listener::{ExecutionListener, NodeInfo};
use super::{ExecutionMode, TestTask};
use crate::error::{ExecutorError, Result};
use crate::executor::ExecutorService;
use crate::lock::ResourceLock;

type Hook = Box<dyn Fn(&dyn ExecutorService) -> anyhow::Result<()> + Send + Sync>;

/// Node of a test tree: optional hooks around a list of children.
///
/// Execution runs `before`, then `body`, then all children through the
/// executor, and finally `after`, which runs even when an earlier step failed.
/// A failing `before` or `body` skips the children. The first failure is the
/// node's outcome.
pub struct NodeTask {
    name: String,
    mode: ExecutionMode,
    lock: ResourceLock,
    before: Option<Hook>,
    body: Option<Hook>,
    after: Option<Hook>,
    children: Vec<Arc<dyn TestTask>>,
    listener: Option<Arc<dyn ExecutionListener>>,
}

impl NodeTask {
    pub fn builder(name: impl Into<String>) -> NodeTaskBuilder {
        NodeTaskBuilder {
            node: NodeTask {
                name: name.into(),
                mode: ExecutionMode::default(),
                lock: ResourceLock::nop(),
                before: None,
                body: None,
                after: None,
                children: Vec::new(),
                listener: None,
            },
        }
    }

    pub fn children(&self) -> &[Arc<dyn TestTask>] {
        &self.children
    }

    fn info(&self) -> NodeInfo<'_> {
        NodeInfo {
            name: &self.name,
            is_container: !self.children.is_empty(),
        }
    }

    fn run_hook(&self, hook: Option<&Hook>, executor: &dyn ExecutorService) -> Result<()> {
        let Some(hook) = hook else {
            return Ok(());
        };
        match panic::catch_unwind(AssertUnwindSafe(|| hook(executor))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(ExecutorError::from_task_error(&self.name, error)),
            Err(payload) => Err(ExecutorError::from_panic(&self.name, payload.as_ref())),
        }
    }

    fn run(&self, executor: &dyn ExecutorService) -> Result<()> {
        let mut outcome = self
            .run_hook(self.before.as_ref(), executor)
            .and_then(|()| self.run_hook(self.body.as_ref(), executor))
            .and_then(|()| executor.invoke_all(&self.children));

        let after = self.run_hook(self.after.as_ref(), executor);
        if outcome.is_ok() {
            outcome = after;
        }
        outcome
    }
}

impl TestTask for NodeTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    fn resource_lock(&self) -> &ResourceLock {
        &self.lock
    }

    fn execute(&self, executor: &dyn ExecutorService) -> anyhow::Result<()> {
        if let Some(listener) = &self.listener {
            listener.execution_started(self.info());
        }
        let outcome = self.run(executor);
        if let Some(listener) = &self.listener {
            listener.execution_finished(self.info(), &outcome);
        }
        outcome.map_err(anyhow::Error::from)
    }
}

impl fmt::Debug for NodeTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeTask")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("lock", &self.lock)
            .field("children", &self.children.len())
            .finish()
    }
}

pub struct NodeTaskBuilder {
    node: NodeTask,
}

impl NodeTaskBuilder {
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.node.mode = mode;
        self
    }

    pub fn lock(mut self, lock: ResourceLock) -> Self {
        self.node.lock = lock;
        self
    }

    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn ExecutorService) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.node.before = Some(Box::new(hook));
        self
    }

    pub fn body<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn ExecutorService) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.node.body = Some(Box::new(hook));
        self
    }

    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn ExecutorService) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.node.after = Some(Box::new(hook));
        self
    }

    pub fn child(mut self, child: Arc<dyn TestTask>) -> Self {
        self.node.children.push(child);
        self
    }

    pub fn children<I>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn TestTask>>,
    {
        self.node.children.extend(children);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.node.listener = Some(listener);
        self
    }

    pub fn build(self) -> Arc<NodeTask> {
        Arc::new(self.node)
    }
}
