//! Error types for codebraid.

pub mod unified;

pub use unified::{CleanupFailure, ErrorCategory, RecoverySuggestion};

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Primary error type for all codebraid operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server '{provider}' not found")]
    ServerNotFound { provider: String },

    #[error("Failed to connect to server '{provider}': {source}")]
    ConnectionFailed {
        provider: String,
        #[source]
        source: Box<GatewayError>,
    },

    #[error("Tool '{tool_name}' not found in any server")]
    ToolNotFound { tool_name: String },

    #[error("Failed to render bindings for '{provider}': {message}")]
    RenderFailed { provider: String, message: String },

    #[error("Failed to persist {}: {source}", path.display())]
    PersistFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cleanup failed: {}", unified::join_failures(failures))]
    CleanupFailed { failures: Vec<CleanupFailure> },

    #[error("Failed to initialize session '{session_id}': {source}")]
    SessionInit {
        session_id: String,
        #[source]
        source: Arc<GatewayError>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Compilation failed: {message}\n{diagnostics}")]
    Compile { message: String, diagnostics: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GatewayError {
    /// Wrap a connector failure for one provider.
    pub fn connection_failed(provider: impl Into<String>, source: GatewayError) -> Self {
        Self::ConnectionFailed {
            provider: provider.into(),
            source: Box::new(source),
        }
    }

    pub fn persist(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::PersistFailed {
            path: path.into(),
            source,
        }
    }

    pub fn render(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RenderFailed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Build a `CleanupFailed` error, or `Ok(())` when nothing failed.
    pub fn from_cleanup(failures: Vec<CleanupFailure>) -> Result<()> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Self::CleanupFailed { failures })
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound(_) | Self::ServerNotFound { .. } | Self::ToolNotFound { .. } => {
                ErrorCategory::NotFound
            }
            Self::ConnectionFailed { .. } => ErrorCategory::Connection,
            Self::RenderFailed { .. } => ErrorCategory::Render,
            Self::PersistFailed { .. } | Self::Io(_) => ErrorCategory::Persistence,
            Self::CleanupFailed { .. } => ErrorCategory::Cleanup,
            Self::SessionInit { source, .. } => source.category(),
            Self::Configuration(_) | Self::Toml(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Provider { .. } => ErrorCategory::Provider,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Cancelled(_) => ErrorCategory::Cancelled,
            Self::Compile { .. } => ErrorCategory::Compile,
            Self::InvalidArgument(_) | Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection | ErrorCategory::Timeout | ErrorCategory::Provider
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Connection | ErrorCategory::Provider => {
                RecoverySuggestion::RetryWithBackoff
            }
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::NotFound => RecoverySuggestion::CheckName,
            ErrorCategory::Persistence | ErrorCategory::Cleanup => {
                RecoverySuggestion::CheckFilesystem
            }
            ErrorCategory::ToolExecution => RecoverySuggestion::CheckToolArguments,
            _ => RecoverySuggestion::ReportBug,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, GatewayError>;
