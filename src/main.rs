//! codebraid-codegen binary entry point.

use clap::Parser;
use codebraid::cli::{init_logging, run_codegen, CodegenArgs};
use codebraid::mcp::McpConnector;

#[tokio::main]
async fn main() {
    let args = CodegenArgs::parse();
    init_logging(args.verbose);

    match run_codegen(&args, &McpConnector::new()).await {
        Ok(written) => {
            println!(
                "Generated {} files in {}",
                written.len(),
                args.output_dir.display()
            );
            for path in written {
                println!("  - {}", path.display());
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            if matches!(e, codebraid::GatewayError::Configuration(_)) {
                eprintln!("Hint: pass --config or set CODEBRAID_CONFIG");
            }
            std::process::exit(1);
        }
    }
}
