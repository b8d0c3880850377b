use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Key of the resource that guards the whole execution.
///
/// Holding it in [`LockMode::ReadWrite`] isolates a task from every other task;
/// it always sorts before any other key so it is acquired first.
pub const GLOBAL_KEY: &str = "hierexec.global";

/// Access mode requested for a resource.
///
/// `ReadWrite` orders before `Read` so that, for the same key, the stronger
/// request is acquired first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    ReadWrite,
    Read,
}

impl LockMode {
    pub fn is_exclusive(self) -> bool {
        self == LockMode::ReadWrite
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::ReadWrite => f.write_str("read_write"),
            LockMode::Read => f.write_str("read"),
        }
    }
}

/// A named resource together with the access mode a task needs on it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExclusiveResource {
    key: String,
    #[serde(default = "default_mode")]
    mode: LockMode,
}

fn default_mode() -> LockMode {
    LockMode::ReadWrite
}

impl ExclusiveResource {
    pub fn new(key: impl Into<String>, mode: LockMode) -> Self {
        Self {
            key: key.into(),
            mode,
        }
    }

    pub fn read(key: impl Into<String>) -> Self {
        Self::new(key, LockMode::Read)
    }

    pub fn read_write(key: impl Into<String>) -> Self {
        Self::new(key, LockMode::ReadWrite)
    }

    pub fn global_read() -> Self {
        Self::read(GLOBAL_KEY)
    }

    pub fn global_read_write() -> Self {
        Self::read_write(GLOBAL_KEY)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn is_global(&self) -> bool {
        self.key == GLOBAL_KEY
    }

    /// Two requests conflict when they touch the same key and at least one of
    /// them needs exclusive access.
    pub fn conflicts_with(&self, other: &ExclusiveResource) -> bool {
        self.key == other.key && (self.mode.is_exclusive() || other.mode.is_exclusive())
    }
}

impl Ord for ExclusiveResource {
    fn cmp(&self, other: &Self) -> Ordering {
        // Global key first, then natural key order, then ReadWrite before Read
        other
            .is_global()
            .cmp(&self.is_global())
            .then_with(|| self.key.cmp(&other.key))
            .then_with(|| self.mode.cmp(&other.mode))
    }
}

impl PartialOrd for ExclusiveResource {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ExclusiveResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.key, self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicts() {
        let read_a = ExclusiveResource::read("a");
        let write_a = ExclusiveResource::read_write("a");
        let write_b = ExclusiveResource::read_write("b");

        assert!(!read_a.conflicts_with(&read_a));
        assert!(read_a.conflicts_with(&write_a));
        assert!(write_a.conflicts_with(&read_a));
        assert!(write_a.conflicts_with(&write_a));
        assert!(!write_a.conflicts_with(&write_b));
    }

    #[test]
    fn test_global_key_sorts_first() {
        let mut resources = vec![
            ExclusiveResource::read("b"),
            ExclusiveResource::read("a"),
            ExclusiveResource::global_read(),
            ExclusiveResource::read_write("a"),
        ];
        resources.sort();

        assert_eq!(
            resources,
            vec![
                ExclusiveResource::global_read(),
                ExclusiveResource::read_write("a"),
                ExclusiveResource::read("a"),
                ExclusiveResource::read("b"),
            ]
        );
    }

    #[test]
    fn test_deserialize_defaults_to_read_write() {
        let resource: ExclusiveResource = serde_json::from_str(r#"{"key": "db"}"#).unwrap();
        assert_eq!(resource, ExclusiveResource::read_write("db"));

        let resource: ExclusiveResource =
            serde_json::from_str(r#"{"key": "db", "mode": "read"}"#).unwrap();
        assert_eq!(resource.mode(), LockMode::Read);
        assert_eq!(resource.to_string(), "db (read)");
    }
}
