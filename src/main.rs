use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use epoch_proofs::api::{self, NoopRecovery};
use epoch_proofs::assembler::{
    populate_missing_proofs, CancelToken, HttpArchiveRpc, KeeperSubmitter,
};
use epoch_proofs::{ChainError, Keeper, NodeConfig, SnapshotStore};

#[derive(Parser)]
#[command(author, version, about = "Active-participants proof pipeline node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the admin server over the local snapshot store
    Serve {
        #[arg(short, long, default_value = "config/node.toml")]
        config: PathBuf,
    },
    /// Rebuild and submit missing epoch proofs from an archive node
    PopulateMissingProofs {
        #[arg(short, long, default_value = "config/node.toml")]
        config: PathBuf,
        /// Archive RPC endpoint; falls back to the configured one
        #[arg(long)]
        archive_rpc: Option<String>,
        #[arg(long, default_value_t = 0)]
        start_epoch: u64,
    },
    /// Generate a default node configuration file
    GenerateConfig {
        #[arg(short, long, default_value = "config/node.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => serve(config).await?,
        Commands::PopulateMissingProofs {
            config,
            archive_rpc,
            start_epoch,
        } => populate(config, archive_rpc, start_epoch).await?,
        Commands::GenerateConfig { path } => generate_config(path)?,
    }
    Ok(())
}

fn open_keeper(config: &NodeConfig) -> Result<Arc<Keeper>> {
    config.ensure_directories()?;
    let store = SnapshotStore::open(&config.data_dir.join("snapshots"))?;
    Ok(Arc::new(Keeper::new(
        store,
        config.chain_id.clone(),
        config.validation.clone(),
    )))
}

async fn serve(config_path: PathBuf) -> Result<()> {
    let config = NodeConfig::load(&config_path)?;
    let keeper = open_keeper(&config)?;
    api::serve(keeper, Arc::new(NoopRecovery), config.admin_listen).await?;
    Ok(())
}

async fn populate(
    config_path: PathBuf,
    archive_rpc: Option<String>,
    start_epoch: u64,
) -> Result<()> {
    let config = NodeConfig::load(&config_path)?;
    let endpoint = archive_rpc
        .or_else(|| config.archive_rpc.clone())
        .ok_or_else(|| {
            ChainError::InvalidArgument("no archive rpc endpoint configured".into())
        })?;
    let keeper = open_keeper(&config)?;

    let submitted = tokio::task::spawn_blocking(move || {
        let rpc = HttpArchiveRpc::new(&endpoint)?;
        let current_epoch = keeper
            .store()
            .upcoming_epoch_index()?
            .ok_or_else(|| ChainError::NotFound("no epoch committed yet".into()))?;
        let submitter = KeeperSubmitter::new(keeper.clone());
        populate_missing_proofs(&rpc, &submitter, current_epoch, start_epoch, &CancelToken::new())
    })
    .await??;

    info!(submitted, "proof population finished");
    Ok(())
}

fn generate_config(path: PathBuf) -> Result<()> {
    let config = NodeConfig::default();
    config.save(&path)?;
    info!(path = %path.display(), "wrote default configuration");
    Ok(())
}
