//! Binding generation: provider catalogs rendered as importable source.

pub mod typescript;

pub use typescript::TypeScriptGenerator;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{GatewayError, Result};
use crate::provider::ToolSchema;
use crate::workspace::{self, INDEX_FILE, SHARED_TYPES_FILE};

/// Renders tool catalogs into target-language source text.
pub trait BindingGenerator: Send + Sync {
    /// Render one provider's module from its current catalog.
    fn render_provider_artifact(&self, provider: &str, tools: &[ToolSchema]) -> Result<String>;

    /// Support module every provider module imports.
    fn render_shared_types_artifact(&self) -> String;

    /// Entry module re-exporting each provider module.
    fn render_index_artifact(&self, providers: &[String]) -> String;
}

/// Write provider modules plus the shared and index modules into `output_dir`.
///
/// Returns the paths written, provider modules first.
pub async fn write_bindings(
    generator: &dyn BindingGenerator,
    output_dir: &Path,
    catalogs: &BTreeMap<String, Vec<ToolSchema>>,
) -> Result<Vec<PathBuf>> {
    let mut targets = Vec::with_capacity(catalogs.len());
    for (provider, tools) in catalogs {
        targets.push((provider, tools, workspace::artifact_file(output_dir, provider)?));
    }

    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| GatewayError::persist(output_dir, e))?;

    let mut written = Vec::with_capacity(catalogs.len() + 2);
    for (provider, tools, path) in targets {
        let source = generator.render_provider_artifact(provider, tools)?;
        workspace::write_atomic(&path, &source).await?;
        written.push(path);
    }

    let shared = output_dir.join(SHARED_TYPES_FILE);
    workspace::write_atomic(&shared, &generator.render_shared_types_artifact()).await?;
    written.push(shared);

    let names: Vec<String> = catalogs.keys().cloned().collect();
    let index = output_dir.join(INDEX_FILE);
    workspace::write_atomic(&index, &generator.render_index_artifact(&names)).await?;
    written.push(index);

    Ok(written)
}
