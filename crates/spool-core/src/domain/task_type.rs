//! TaskKind - the parsed form of a task's `type` string.
//!
//! The record keeps whatever string the caller submitted; dispatch works on
//! this enum so that handler lookup is exhaustive. Unknown strings land in
//! [`TaskKind::Undefined`] and get the fallback handler.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Succeeds with a configured probability, fails otherwise.
    Fail,
    /// Always fails.
    FailAbsolute,
    Email,
    Report,
    DataCleanup,
    Sms,
    Newsletter,
    TakesLong,
    /// Any type string without a dedicated variant.
    Undefined(String),
}

impl TaskKind {
    /// Every variant with a dedicated handler.
    pub const KNOWN: [TaskKind; 8] = [
        TaskKind::Fail,
        TaskKind::FailAbsolute,
        TaskKind::Email,
        TaskKind::Report,
        TaskKind::DataCleanup,
        TaskKind::Sms,
        TaskKind::Newsletter,
        TaskKind::TakesLong,
    ];

    pub fn parse(value: &str) -> Self {
        match value {
            "fail" => TaskKind::Fail,
            "fail-absolute" => TaskKind::FailAbsolute,
            "email" => TaskKind::Email,
            "report" => TaskKind::Report,
            "data-cleanup" => TaskKind::DataCleanup,
            "sms" => TaskKind::Sms,
            "newsletter" => TaskKind::Newsletter,
            "takes-long" => TaskKind::TakesLong,
            other => TaskKind::Undefined(other.to_string()),
        }
    }

    /// Wire name. `Undefined` reports as `"undefined"` regardless of the
    /// original string.
    pub fn as_str(&self) -> &str {
        match self {
            TaskKind::Fail => "fail",
            TaskKind::FailAbsolute => "fail-absolute",
            TaskKind::Email => "email",
            TaskKind::Report => "report",
            TaskKind::DataCleanup => "data-cleanup",
            TaskKind::Sms => "sms",
            TaskKind::Newsletter => "newsletter",
            TaskKind::TakesLong => "takes-long",
            TaskKind::Undefined(_) => "undefined",
        }
    }

    /// The type string this kind was parsed from. Same as `as_str` except
    /// for `Undefined`, which keeps the caller's string.
    pub fn name(&self) -> &str {
        match self {
            TaskKind::Undefined(raw) => raw,
            known => known.as_str(),
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, TaskKind::Undefined(_))
    }
}

impl From<&str> for TaskKind {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
