//! Command-line driver for uploading a single file through the relay.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use fileferry_client::ClientDriver;

/// Uploads a local file to a fileferry relay server over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "fileferry-client", version, about)]
struct Cli {
    /// WebSocket URL of the relay server, e.g. ws://localhost:8080
    #[arg(long)]
    ws_url: String,

    /// Bearer token verified by the relay's Auth Gate.
    #[arg(long)]
    token: String,

    /// File to upload.
    #[arg(long)]
    path: PathBuf,

    /// Identifier for the upload session; a random one is generated if omitted.
    #[arg(long)]
    file_id: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let file_id = cli.file_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let driver = ClientDriver::open(&cli.ws_url).await?;
    driver.auth(&cli.token).await?;

    let offset = driver.start(cli.path.clone(), file_id.clone()).await?;
    tracing::info!(file_id, offset, path = %cli.path.display(), "upload starting");

    let result = driver.upload().await;
    driver.close().await;

    match result {
        Ok(file_path) => {
            tracing::info!(file_id, file_path, "upload complete");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
