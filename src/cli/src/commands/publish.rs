//! `hoist publish` command - Publish the bundle in the current directory.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use hoist_core::PublishConfig;
use hoist_runtime::{
    DescriptorBuilder, ImageStore, OciConnector, PublishOptions, Publisher, TransportTimeouts,
    WriterProgress,
};
use tokio_util::sync::CancellationToken;

#[derive(Args)]
pub struct PublishArgs {
    /// Path to the manifest (default: ./hoist.yaml)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Allow plain HTTP or self-signed TLS for the bundle tag's registry
    #[arg(long)]
    pub insecure_registry: bool,

    /// Registry connect timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Registry read timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub read_timeout: Option<u64>,

    /// Directory the generated bundle.json is written to (default: .cnab)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Configuration file (default: ./hoist-config.yaml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl PublishArgs {
    /// Flags override file and environment settings.
    fn apply(&self, config: &mut PublishConfig) {
        if let Some(file) = &self.file {
            config.manifest_file = Some(file.clone());
        }
        if self.insecure_registry {
            config.insecure_registry = true;
        }
        if let Some(secs) = self.connect_timeout {
            config.connect_timeout_secs = Some(secs);
        }
        if let Some(secs) = self.read_timeout {
            config.read_timeout_secs = Some(secs);
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
    }
}

pub async fn execute(args: PublishArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = PublishConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    tracing::debug!(config = ?config, "Resolved publish configuration");

    let connector = OciConnector::new(TransportTimeouts {
        connect: config.connect_timeout(),
        read: config.read_timeout(),
    });
    let publisher = Publisher::new(
        Arc::new(connector),
        Arc::new(super::credential_store(&config)?),
        Arc::new(ImageStore::default_location()?),
        Arc::new(DescriptorBuilder::new(config.output_dir.clone())),
        Arc::new(WriterProgress::new(std::io::stdout())),
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling publish");
            on_interrupt.cancel();
        }
    });

    let options = PublishOptions::from_config(&config, std::env::current_dir()?);
    let outcome = publisher.publish(&options, &cancel).await?;
    tracing::debug!(
        tag = %outcome.tag,
        digest = %outcome.digest,
        invocation_image = %outcome.invocation_image,
        "Publish finished"
    );
    Ok(())
}
