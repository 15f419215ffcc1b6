mod config;
mod functions;
mod ghidra;

use anyhow::Context;
use config::WorkerConfig;
use ghidra::Ghidra;
use recode_common::blob::{AzureBlobClient, BlobStore};
use recode_common::naming;
use tokio::signal;
use tracing::{error, info, instrument, warn};

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Recode worker booting...");

    // A non-zero exit is what marks the sandbox Failed
    let code = tokio::select! {
        result = run() => match result {
            Ok(()) => {
                info!("Worker finished");
                0
            }
            Err(e) => {
                error!(error = %format!("{:#}", e), "Decompilation failed");
                1
            }
        },
        _ = signal::ctrl_c() => {
            warn!("Received shutdown signal, abandoning job");
            1
        }
    };

    std::process::exit(code);
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env().context("Failed to load configuration")?;
    info!(blob = %config.blob_name, ghidra_home = %config.ghidra_home.display(), "Worker configured");

    let blobs = AzureBlobClient::new(&config.storage).context("Failed to create blob client")?;
    let ghidra = Ghidra::new(&config.ghidra_home, config.ghidra_timeout);

    decompile_blob(&blobs, &ghidra, &config.blob_name).await
}

/// Download the input blob, decompile it, and upload the selected functions
/// under the derived output name
#[instrument(skip(blobs, ghidra))]
async fn decompile_blob(blobs: &dyn BlobStore, ghidra: &Ghidra, blob: &str) -> anyhow::Result<()> {
    let work = tempfile::tempdir().context("Failed to create work directory")?;

    let data = blobs
        .download(blob)
        .await
        .with_context(|| format!("Failed to download {}", blob))?;
    let binary = work.path().join(naming::sanitize_filename(blob));
    tokio::fs::write(&binary, &data)
        .await
        .context("Failed to write input binary")?;
    info!(size = data.len(), path = %binary.display(), "Input downloaded");

    let dump = ghidra.dump_functions(work.path(), &binary).await?;
    let all = functions::parse_dump(&dump);
    let selected = functions::select(&all)?;
    info!(
        total = all.len(),
        selected = selected.len(),
        "Functions selected"
    );

    let output = naming::output_blob_name(blob);
    blobs
        .upload(&output, functions::render(&selected).into_bytes())
        .await
        .with_context(|| format!("Failed to upload {}", output))?;
    info!(output = %output, "Decompiled output uploaded");

    Ok(())
}
