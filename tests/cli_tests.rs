//! End-to-end codegen runs against mock providers.

#![cfg(feature = "cli")]

mod common;

use std::path::PathBuf;

use clap::Parser;
use pretty_assertions::assert_eq;

use codebraid::cli::{run_codegen, CodegenArgs};
use codebraid::error::GatewayError;

use common::{dir_entries, MockConnector, ProviderScript};

fn args_for(config: &std::path::Path, output: &std::path::Path, servers: Option<&str>) -> CodegenArgs {
    let mut argv = vec![
        "codebraid-codegen".to_string(),
        "--config".to_string(),
        config.display().to_string(),
        "--output-dir".to_string(),
        output.display().to_string(),
    ];
    if let Some(servers) = servers {
        argv.push("--server".to_string());
        argv.push(servers.to_string());
    }
    CodegenArgs::parse_from(argv)
}

fn write_config(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("servers.json");
    std::fs::write(
        &path,
        r#"{"mcpServers": {"git": {"command": "mock"}, "fs": {"command": "mock"}}}"#,
    )
    .unwrap();
    path
}

#[tokio::test]
async fn writes_bindings_for_selected_servers_and_closes_connections() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let output = dir.path().join("generated");
    let connector = MockConnector::new()
        .with("git", ProviderScript::with_tools(&["commit"]))
        .with("fs", ProviderScript::with_tools(&["read_file"]));

    let written = run_codegen(&args_for(&config, &output, Some("git")), &connector)
        .await
        .unwrap();

    assert_eq!(
        written,
        vec![
            output.join("git.ts"),
            output.join("mcp-types.ts"),
            output.join("index.ts"),
        ]
    );
    assert_eq!(dir_entries(&output), vec!["git.ts", "index.ts", "mcp-types.ts"]);
    let index = std::fs::read_to_string(output.join("index.ts")).unwrap();
    assert!(index.contains(r#"export * as git from "./git";"#));
    assert!(!index.contains("./fs"));

    assert_eq!(connector.latest("git").close_calls(), 1);
    assert_eq!(connector.latest("fs").close_calls(), 1);
}

#[tokio::test]
async fn unknown_servers_only_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let output = dir.path().join("generated");
    let connector = MockConnector::new();

    let err = run_codegen(&args_for(&config, &output, Some("svn")), &connector)
        .await
        .expect_err("nothing selected");
    assert!(matches!(err, GatewayError::Configuration(_)));
    assert!(!output.exists());
    assert_eq!(connector.latest("git").close_calls(), 1);
}

#[tokio::test]
async fn connection_failure_still_closes_earlier_connections() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let output = dir.path().join("generated");
    let connector = MockConnector::new().with("git", ProviderScript::failing("refused"));

    let err = run_codegen(&args_for(&config, &output, None), &connector)
        .await
        .expect_err("git fails to connect");
    assert!(matches!(err, GatewayError::ConnectionFailed { provider, .. } if provider == "git"));
    // Providers connect in name order, so fs came first.
    assert_eq!(connector.latest("fs").close_calls(), 1);
}
