//! Per-session on-disk bundle area.
//!
//! ```text
//! <parent>/codebraid-<session>-<uuid>/
//!     rspack.config.ts
//!     lib/
//!         <provider>.ts
//!         mcp-types.ts
//!         index.ts
//! ```
//!
//! The directory is a cache of the live provider catalogs. Every file is
//! replaced whole, so a reader sees either the previous or the new content.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codegen::BindingGenerator;
use crate::error::{GatewayError, Result};
use crate::provider::ToolSchema;

pub const LIB_DIR: &str = "lib";
pub const SHARED_TYPES_FILE: &str = "mcp-types.ts";
pub const INDEX_FILE: &str = "index.ts";
pub const BUNDLER_CONFIG_FILE: &str = "rspack.config.ts";
pub const ARTIFACT_EXTENSION: &str = "ts";

const MAX_SESSION_SEGMENT: usize = 48;

/// Bundler configuration written into every workspace unless overridden.
pub const DEFAULT_BUNDLER_CONFIG: &str = r#"import { defineConfig } from "@rspack/cli";

export default defineConfig({
  mode: "production",
  target: "es2020",
  entry: { main: "./entry.ts" },
  output: {
    filename: "bundle.js",
    library: { type: "module" },
    module: true,
    clean: true,
  },
  experiments: { outputModule: true },
  resolve: { extensions: [".ts", ".js"] },
  module: {
    rules: [
      {
        test: /\.ts$/,
        exclude: /node_modules/,
        loader: "builtin:swc-loader",
        options: { jsc: { parser: { syntax: "typescript" }, target: "es2020" } },
        type: "javascript/auto",
      },
    ],
  },
  optimization: { minimize: false },
  devtool: false,
});
"#;

/// Handle to one session's bundle directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleWorkspace {
    root: PathBuf,
    lib_dir: PathBuf,
}

impl BundleWorkspace {
    /// Allocate an empty, uniquely named workspace under `parent`.
    pub async fn create(parent: &Path, session_id: &str) -> Result<Self> {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| GatewayError::persist(parent, e))?;

        let root = parent.join(format!(
            "codebraid-{}-{}",
            sanitize_segment(session_id),
            Uuid::new_v4().simple()
        ));
        tokio::fs::create_dir(&root)
            .await
            .map_err(|e| GatewayError::persist(&root, e))?;

        let lib_dir = root.join(LIB_DIR);
        if let Err(e) = tokio::fs::create_dir(&lib_dir).await {
            let _ = tokio::fs::remove_dir_all(&root).await;
            return Err(GatewayError::persist(&lib_dir, e));
        }

        Ok(Self { root, lib_dir })
    }

    /// Create a workspace and render every provider's artifact into it.
    ///
    /// Returns the workspace plus the provider → artifact map that was written.
    /// On any failure the whole directory is removed before the error is
    /// returned.
    pub async fn build(
        parent: &Path,
        session_id: &str,
        catalogs: &HashMap<String, Vec<ToolSchema>>,
        generator: &dyn BindingGenerator,
        bundler_config: &str,
    ) -> Result<(Self, BTreeMap<String, String>)> {
        let workspace = Self::create(parent, session_id).await?;
        match workspace.populate(catalogs, generator, bundler_config).await {
            Ok(artifacts) => {
                debug!(
                    session_id,
                    root = %workspace.root.display(),
                    providers = artifacts.len(),
                    "bundle workspace ready"
                );
                Ok((workspace, artifacts))
            }
            Err(error) => {
                if let Err(cleanup) = workspace.remove().await {
                    warn!(session_id, error = %cleanup, "failed to remove partial workspace");
                }
                Err(error)
            }
        }
    }

    async fn populate(
        &self,
        catalogs: &HashMap<String, Vec<ToolSchema>>,
        generator: &dyn BindingGenerator,
        bundler_config: &str,
    ) -> Result<BTreeMap<String, String>> {
        let mut providers: Vec<&String> = catalogs.keys().collect();
        providers.sort();

        let mut artifacts = BTreeMap::new();
        for provider in providers {
            let source = generator.render_provider_artifact(provider, &catalogs[provider])?;
            self.write_artifact(provider, &source).await?;
            artifacts.insert(provider.clone(), source);
        }

        write_atomic(
            &self.lib_dir.join(SHARED_TYPES_FILE),
            &generator.render_shared_types_artifact(),
        )
        .await?;

        let names: Vec<String> = artifacts.keys().cloned().collect();
        write_atomic(
            &self.lib_dir.join(INDEX_FILE),
            &generator.render_index_artifact(&names),
        )
        .await?;

        write_atomic(&self.root.join(BUNDLER_CONFIG_FILE), bundler_config).await?;
        Ok(artifacts)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lib_dir(&self) -> &Path {
        &self.lib_dir
    }

    /// Path of a provider's artifact inside the library directory.
    ///
    /// Names that could resolve outside the library directory are rejected.
    pub fn artifact_path(&self, provider: &str) -> Result<PathBuf> {
        artifact_file(&self.lib_dir, provider)
    }

    /// Replace a provider's artifact on disk.
    pub async fn write_artifact(&self, provider: &str, source: &str) -> Result<()> {
        let path = self.artifact_path(provider)?;
        write_atomic(&path, source).await
    }

    /// Remove the whole workspace directory. Missing directories are fine.
    pub async fn remove(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GatewayError::persist(&self.root, e)),
        }
    }
}

/// `<dir>/<provider>.ts`, refusing names that are empty, hidden, contain a
/// path separator or would clobber the shared types or index file.
pub(crate) fn artifact_file(dir: &Path, provider: &str) -> Result<PathBuf> {
    let reserved = [SHARED_TYPES_FILE, INDEX_FILE]
        .iter()
        .any(|file| file.strip_suffix(".ts") == Some(provider));
    let escapes = provider.is_empty()
        || provider.starts_with('.')
        || provider.contains(['/', '\\', '\0'])
        || reserved;
    let path = dir.join(format!("{provider}.{ARTIFACT_EXTENSION}"));
    if escapes {
        return Err(GatewayError::persist(
            path,
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("provider name '{provider}' is not a valid artifact file name"),
            ),
        ));
    }
    Ok(path)
}

/// Whole-file replace: write a sibling temp file, then rename it over `path`.
pub(crate) async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let file_name = path.file_name().ok_or_else(|| {
        GatewayError::persist(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
        )
    })?;
    let temp_path = path.with_file_name(format!(
        ".{}.tmp-{}",
        file_name.to_string_lossy(),
        Uuid::new_v4().simple()
    ));

    let write_result = async {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        Ok::<_, io::Error>(())
    }
    .await;

    if let Err(e) = write_result {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(GatewayError::persist(path, e));
    }

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(GatewayError::persist(path, e));
    }
    Ok(())
}

fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_SESSION_SEGMENT)
        .collect();
    if cleaned.is_empty() {
        "session".to_string()
    } else {
        cleaned
    }
}
