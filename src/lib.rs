//! Codebraid: session-scoped gateway over MCP tool providers.
//!
//! Each end-user session owns its own provider connections and a bundle
//! workspace of generated TypeScript bindings that track every provider's live
//! tool catalog.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use codebraid::prelude::*;
//!
//! # async fn example() -> codebraid::error::Result<()> {
//! let config = GatewayConfig::load_with_options(&LoadOptions::with_defaults())?;
//! let registry = SessionRegistry::new(
//!     config,
//!     Arc::new(McpConnector::new()),
//!     Arc::new(TypeScriptGenerator::new()),
//!     RegistryOptions::default(),
//! );
//!
//! let session = registry.get_or_create("user-42").await?;
//! let provider = session.find_tool_server("git_status")?;
//! let result = session
//!     .call_tool(&provider, "git_status", serde_json::json!({"repo_path": "."}))
//!     .await?;
//! println!("{}", result.into_value_or_text());
//!
//! registry.close_all().await?;
//! # Ok(())
//! # }
//! ```

pub mod codegen;
pub mod compiler;
pub mod config;
pub mod error;
pub mod hub;
pub mod prelude;
pub mod provider;
pub mod session;
pub mod workspace;

#[cfg(feature = "mcp")]
pub mod mcp;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::{GatewayError, Result};
