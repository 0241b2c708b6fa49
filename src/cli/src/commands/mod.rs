//! CLI command definitions and dispatch.

mod login;
mod logout;
mod publish;
mod version;

use clap::{Parser, Subcommand, ValueEnum};
use hoist_core::PublishConfig;
use hoist_runtime::CredentialStore;

/// hoist - publish application bundles to OCI registries.
#[derive(Parser)]
#[command(name = "hoist", version, about)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Push the invocation image, relocate bundle images and publish the bundle
    Publish(publish::PublishArgs),
    /// Store registry credentials
    Login(login::LoginArgs),
    /// Remove stored registry credentials
    Logout(logout::LogoutArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Credential store from the configured path, else `~/.hoist/auth.json`.
pub(crate) fn credential_store(
    config: &PublishConfig,
) -> Result<CredentialStore, Box<dyn std::error::Error>> {
    let store = match &config.credentials_path {
        Some(path) => CredentialStore::new(path.clone()),
        None => CredentialStore::default_path()?,
    };
    Ok(store)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Publish(args) => publish::execute(args).await,
        Command::Login(args) => login::execute(args).await,
        Command::Logout(args) => logout::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}
