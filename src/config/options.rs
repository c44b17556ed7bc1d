//! Session registry options.

use std::path::PathBuf;

use bon::Builder;

use crate::workspace::DEFAULT_BUNDLER_CONFIG;

/// Where session workspaces live and what shared support files they get.
#[derive(Debug, Clone, Builder)]
pub struct RegistryOptions {
    /// Parent directory for per-session workspaces.
    #[builder(into, default = std::env::temp_dir())]
    pub workspace_root: PathBuf,
    /// Bundler configuration written once into every workspace.
    #[builder(into, default = DEFAULT_BUNDLER_CONFIG.to_string())]
    pub bundler_config: String,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}
