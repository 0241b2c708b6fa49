//! `hoist login` command - Store registry credentials.

use std::io::BufRead;

use clap::Args;
use hoist_core::PublishConfig;

#[derive(Args)]
pub struct LoginArgs {
    /// Registry server (default: index.docker.io)
    pub server: Option<String>,

    /// Username
    #[arg(short, long)]
    pub username: Option<String>,

    /// Password
    #[arg(short, long)]
    pub password: Option<String>,

    /// Read password from stdin
    #[arg(long)]
    pub password_stdin: bool,
}

fn read_line(prompt: Option<&str>) -> std::io::Result<String> {
    if let Some(prompt) = prompt {
        eprint!("{}", prompt);
    }
    let mut input = String::new();
    std::io::stdin().lock().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

pub async fn execute(args: LoginArgs) -> Result<(), Box<dyn std::error::Error>> {
    let server = args.server.unwrap_or_else(|| "index.docker.io".to_string());

    if args.password_stdin && args.password.is_some() {
        return Err("--password and --password-stdin are mutually exclusive".into());
    }

    let username = match args.username {
        Some(u) => u,
        None => read_line(Some("Username: "))?,
    };

    let password = if args.password_stdin {
        read_line(None)?
    } else {
        match args.password {
            Some(p) => p,
            None => read_line(Some("Password: "))?,
        }
    };

    if username.is_empty() || password.is_empty() {
        return Err("Username and password are required".into());
    }

    let config = PublishConfig::load(None)?;
    let store = super::credential_store(&config)?;
    store.store(&server, &username, &password)?;
    tracing::debug!(registry = %server, "Stored credentials");

    println!("Login Succeeded");
    Ok(())
}
