//! Error classification, recovery hints and aggregated cleanup failures.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    Connection,
    Render,
    Persistence,
    Cleanup,
    Configuration,
    Serialization,
    Provider,
    ToolExecution,
    Timeout,
    Cancelled,
    Compile,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    CheckConfiguration,
    CheckName,
    CheckFilesystem,
    CheckToolArguments,
    IncreaseTimeout,
    ReportBug,
}

/// One failed step of a best-effort teardown.
///
/// `scope` names what was being released: a session id for registry-wide
/// teardown, a provider name for hub teardown, or a path for workspace removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupFailure {
    pub scope: String,
    pub message: String,
}

impl CleanupFailure {
    pub fn new(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.scope, self.message)
    }
}

pub(crate) fn join_failures(failures: &[CleanupFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
