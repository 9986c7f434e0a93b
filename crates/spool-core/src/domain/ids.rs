//! Task identifiers.
//!
//! Ids are assigned by the caller and treated as opaque strings. Callers that
//! have no natural key can use [`TaskId::generate`], which hands out a ULID
//! (time-sortable, no coordination needed between producers).

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifier of a Task. Never reassigned once the task has been submitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fresh ULID-backed id, e.g. `task-01HZX...`.
    pub fn generate() -> Self {
        Self(format!("task-{}", Ulid::new()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_prefixed() {
        let a = TaskId::generate();
        let b = TaskId::generate();

        assert_ne!(a, b);
        assert!(a.as_str().starts_with("task-"));
    }

    #[test]
    fn generated_ids_sort_by_creation_time() {
        let id1 = TaskId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = TaskId::generate();

        assert!(id1 < id2);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = TaskId::new("t1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"t1\"");

        let back: TaskId = serde_json::from_str("\"t1\"").unwrap();
        assert_eq!(back, id);
    }
}
