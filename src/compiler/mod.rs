//! TypeScript to JavaScript compilation through an external `swc` process.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;
use uuid::Uuid;

use crate::error::{GatewayError, Result};

/// Output syntax level.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EsTarget {
    Es5,
    Es2015,
    Es2016,
    Es2017,
    Es2018,
    Es2019,
    #[default]
    Es2020,
    Es2021,
    Es2022,
    EsNext,
}

/// Module linkage of the compiled output.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModuleFormat {
    #[default]
    Es6,
    CommonJs,
    Amd,
    Umd,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Builder, Serialize, Deserialize)]
pub struct CompileOptions {
    #[builder(default)]
    pub target: EsTarget,
    #[builder(default)]
    pub module: ModuleFormat,
}

impl CompileOptions {
    /// `.swcrc` contents for these options.
    pub fn swcrc(&self) -> serde_json::Value {
        serde_json::json!({
            "jsc": {
                "parser": {
                    "syntax": "typescript",
                    "tsx": false,
                    "decorators": false,
                    "dynamicImport": true
                },
                "target": self.target.to_string()
            },
            "module": { "type": self.module.to_string() },
            "sourceMaps": false
        })
    }
}

/// Turns source text into runnable output.
#[async_trait]
pub trait SourceCompiler: Send + Sync {
    async fn compile(&self, source: &str) -> Result<String>;
}

/// Compiles with the `swc` CLI, run once per call in a private temp directory.
#[derive(Debug, Clone)]
pub struct SwcCompiler {
    program: PathBuf,
    prefix_args: Vec<String>,
    options: CompileOptions,
}

impl SwcCompiler {
    /// Find `swc` on `PATH`, falling back to `npx -y @swc/cli`.
    pub fn locate() -> Result<Self> {
        Self::locate_in(std::env::var_os("PATH"))
    }

    fn locate_in(path_var: Option<OsString>) -> Result<Self> {
        if let Some(swc) = find_executable(path_var.as_deref(), "swc") {
            return Ok(Self::with_command(swc, Vec::<String>::new()));
        }
        if let Some(npx) = find_executable(path_var.as_deref(), "npx") {
            return Ok(Self::with_command(npx, ["-y", "@swc/cli"]));
        }
        Err(GatewayError::Configuration(
            "swc executable not found (install with: npm install -g @swc/cli @swc/core)".into(),
        ))
    }

    /// Use an explicit program; `prefix_args` go before the `compile` subcommand.
    pub fn with_command<I, S>(program: impl Into<PathBuf>, prefix_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            prefix_args: prefix_args.into_iter().map(Into::into).collect(),
            options: CompileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> CompileOptions {
        self.options
    }
}

#[async_trait]
impl SourceCompiler for SwcCompiler {
    async fn compile(&self, source: &str) -> Result<String> {
        let scratch = ScratchDir::create().await?;
        let input = scratch.path().join("input.ts");
        let config = scratch.path().join(".swcrc");

        tokio::fs::write(&input, source)
            .await
            .map_err(|e| GatewayError::persist(&input, e))?;
        tokio::fs::write(&config, serde_json::to_vec(&self.options.swcrc())?)
            .await
            .map_err(|e| GatewayError::persist(&config, e))?;

        debug!(program = %self.program.display(), target = %self.options.target, "running swc");
        let output = tokio::process::Command::new(&self.program)
            .args(&self.prefix_args)
            .arg("compile")
            .arg(&input)
            .arg("--config-file")
            .arg(&config)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| GatewayError::Compile {
                message: format!("failed to run {}: {e}", self.program.display()),
                diagnostics: String::new(),
            })?;

        if !output.status.success() {
            return Err(GatewayError::Compile {
                message: format!("swc exited with {}", output.status),
                diagnostics: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Temp directory removed on drop, whatever the compile outcome.
struct ScratchDir(PathBuf);

impl ScratchDir {
    async fn create() -> Result<Self> {
        let path = std::env::temp_dir().join(format!("codebraid-swc-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| GatewayError::persist(&path, e))?;
        Ok(Self(path))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn find_executable(path_var: Option<&std::ffi::OsStr>, name: &str) -> Option<PathBuf> {
    let path_var = path_var?;
    std::env::split_paths(path_var)
        .flat_map(|dir| {
            let plain = dir.join(name);
            let windows = dir.join(format!("{name}.cmd"));
            [plain, windows]
        })
        .find(|candidate| candidate.is_file())
}

const TYPESCRIPT_MARKERS: &[&str] = &[
    ": string",
    ": number",
    ": boolean",
    ": any",
    "interface ",
    "type ",
    "enum ",
    "<T>",
    "<T,",
    " as ",
    "readonly ",
    "public ",
    "private ",
    "protected ",
];

/// Cheap guess at whether `code` needs compiling before it can run as JavaScript.
pub fn is_typescript(code: &str) -> bool {
    TYPESCRIPT_MARKERS.iter().any(|marker| code.contains(marker))
}
