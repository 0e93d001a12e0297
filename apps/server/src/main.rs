//! File transfer relay server entry point.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use fileferry_server::{
    Config, Deps, HttpAuthStore, NullMetadataStore, RelayServer, ServerConfig, HTTP_CONNECT_TIMEOUT,
    HTTP_TOTAL_TIMEOUT,
};
use fileferry_transfer::{DownloadSessionStore, SessionStore};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting fileferry relay server");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run())
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    tokio::fs::create_dir_all(&config.staging_dir).await?;

    let http = reqwest::Client::builder()
        .timeout(HTTP_TOTAL_TIMEOUT)
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .build()?;

    let session_store = Arc::new(SessionStore::new(&config.staging_dir));
    let download_store = Arc::new(DownloadSessionStore::new(&config.staging_dir));
    let auth_store = Arc::new(HttpAuthStore::new(http.clone(), config.auth_verify_url.clone()));
    let metadata_store = Arc::new(NullMetadataStore);

    let deps = Deps::new(
        session_store,
        download_store,
        auth_store,
        metadata_store,
        http,
        config.remote_upload_url.clone(),
    );

    let server = RelayServer::new(
        ServerConfig {
            bind_addr: config.ws_bind_addr.clone(),
        },
        deps,
    );

    let running = server.clone();
    let run_handle = tokio::spawn(async move { running.run().await });

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received");
    server.shutdown();

    run_handle.await??;
    tracing::info!("relay server shut down cleanly");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        // Fall back to running indefinitely rather than exiting immediately.
        std::future::pending::<()>().await;
    }
}
