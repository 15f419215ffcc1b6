mod ai;
mod config;
mod error;
mod handlers;
mod metrics;
mod pipeline;
mod prompts;
mod routes;
mod sandbox;
#[cfg(test)]
mod testing;

use anyhow::Context;
use recode_common::blob::{AzureBlobClient, BlobStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::ai::{GeminiClient, TextGenerator};
use crate::config::{ApiConfig, BackendConfig};
use crate::sandbox::aci::AciSandbox;
use crate::sandbox::docker::DockerSandbox;
use crate::sandbox::lifecycle::PollPolicy;
use crate::sandbox::SandboxControl;

pub struct AppState {
    pub blobs: Arc<dyn BlobStore>,
    pub sandbox: Arc<dyn SandboxControl>,
    pub ai: Arc<dyn TextGenerator>,
    pub sandbox_poll: PollPolicy,
    pub output_poll: PollPolicy,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; real deployments set the environment directly
    let _ = dotenvy::dotenv();

    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Recode API booting...");

    let config = ApiConfig::from_env().context("Failed to load configuration")?;
    info!(?config, "Configuration loaded");

    let blobs = AzureBlobClient::new(&config.storage).context("Failed to create blob client")?;
    info!(container = %blobs.container(), "Blob storage client ready");

    let sandbox: Arc<dyn SandboxControl> = match &config.sandbox.backend {
        BackendConfig::Aci(azure) => Arc::new(
            AciSandbox::new(azure, &config.sandbox, &config.storage)
                .context("Failed to create container instance client")?,
        ),
        BackendConfig::Docker => Arc::new(
            DockerSandbox::connect(&config.sandbox, &config.storage)
                .context("Failed to connect to Docker")?,
        ),
    };

    let ai = GeminiClient::new(&config.ai).context("Failed to create AI client")?;

    let state = Arc::new(AppState {
        blobs: Arc::new(blobs),
        sandbox,
        ai: Arc::new(ai),
        sandbox_poll: config.sandbox.poll,
        output_poll: config.sandbox.output_poll,
    });

    // Build router
    let app = routes::app(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Recode API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
