//! Convenience re-exports for common use.

pub use crate::codegen::{BindingGenerator, TypeScriptGenerator};
pub use crate::compiler::{CompileOptions, SourceCompiler, SwcCompiler};
pub use crate::config::{GatewayConfig, LoadOptions, ProviderConfig, RegistryOptions};
pub use crate::error::{GatewayError, Result};
pub use crate::hub::ClientHub;
pub use crate::provider::{
    ProviderConnection, ProviderConnector, ToolCallResult, ToolInfo, ToolSchema,
};
pub use crate::session::{Session, SessionRegistry};
pub use crate::workspace::BundleWorkspace;

#[cfg(feature = "mcp")]
pub use crate::mcp::McpConnector;
