//! `csi_ctl` answers node metadata queries and runs bucket lifecycle operations
//! the same way the plugin does, from the command line.
//!
//! Usage example:
//! ```sh
//! csi_ctl --config /etc/obs-csi/cloud-config.toml instance-id
//! csi_ctl bucket create pvc-0a1b --acl private
//! csi_ctl bucket set-tags pvc-0a1b env=prod owner=csi
//! ```

use std::sync::Arc;

use anyhow::Context;
use bucket_storage::{BucketManager, S3Bucket};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use csi_tools::commands::{BucketCmd, NodeCmd, run_bucket_command, run_node_command};
use csi_tools::config::{CloudConfig, DEFAULT_CONFIG_PATH};
use csi_tools::logging::{self, LogFormat, Output};
use node_metadata::{MetadataCache, MetadataResolver};
use tracing::info;

#[derive(Parser)]
#[command(about = "OBS parallel filesystem plugin utility")]
struct CliOpts {
    /// Cloud configuration file
    #[arg(long, short, env = "CSI_CLOUD_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: Utf8PathBuf,
    /// Log format: plain, json or test
    #[arg(long, default_value = "plain")]
    log_format: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Node(NodeCmd),
    #[command(subcommand)]
    Bucket(BucketCmd),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliOpts::parse();

    // Logs go to stderr, stdout is for the command output.
    logging::init(LogFormat::from_config(&cli.log_format)?, Output::Stderr)?;
    logging::install_panic_hook();

    let config = CloudConfig::load(&cli.config)?;
    info!("loaded cloud config from {}", cli.config);

    let output = match &cli.command {
        Commands::Node(cmd) => {
            let resolver = MetadataResolver::from_config(&config.metadata, MetadataCache::shared())
                .context("failed to set up metadata sources")?;
            run_node_command(&resolver, cmd).await?
        }
        Commands::Bucket(cmd) => {
            let storage = S3Bucket::new(&config.s3_config())
                .context("failed to create the object storage client")?;
            let manager = BucketManager::new(
                Arc::new(storage),
                config.global.region.clone(),
                config.global.project_id.clone(),
            );
            run_bucket_command(&manager, cmd).await?
        }
    };

    println!("{output}");
    Ok(())
}
