//! Outcome model: what a handler reports for one attempt.
//!
//! Only the *task-level* result lives here. An unexpected fault inside a
//! handler is a [`crate::error::TaskError`] instead, and is treated
//! differently by the worker (no retry).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            kind: OutcomeKind::Success,
            reason: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failure,
            reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_kind_serializes_as_required_names() {
        let s = serde_json::to_string(&OutcomeKind::Success).unwrap();
        assert_eq!(s, "\"SUCCESS\"");

        let s = serde_json::to_string(&OutcomeKind::Failure).unwrap();
        assert_eq!(s, "\"FAILURE\"");
    }

    #[test]
    fn success_omits_reason() {
        let v = serde_json::to_value(Outcome::success()).unwrap();
        assert!(v.get("reason").is_none());

        let failed = Outcome::failure("boom");
        assert!(!failed.is_success());
        assert_eq!(failed.reason.as_deref(), Some("boom"));
    }
}
