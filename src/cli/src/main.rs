//! hoist CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use hoist_cli::commands::{dispatch, Cli, LogFormat};
use hoist_cli::output::render_error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
    }

    if let Err(e) = dispatch(cli).await {
        eprintln!("{}", render_error(e.as_ref()));
        std::process::exit(1);
    }
}
