mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use recode_common::types::TranslateMethod;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "recode-cli")]
#[command(about = "Recode CLI - Decompile binaries and rework pseudo-code through the Recode API", long_about = None)]
struct Cli {
    /// Base URL of the Recode API
    #[arg(short, long, env = "RECODE_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a binary, decompile it, and print the annotated C
    Decompile {
        /// Binary to decompile (max 5MB, must have an extension)
        file: PathBuf,

        /// Write the result to this file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Translate pseudo-code into another language
    Translate {
        /// File containing the pseudo-code
        file: PathBuf,

        /// Target language (e.g., Rust, Python, Go)
        #[arg(short, long)]
        lang: String,

        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Rewrite pseudo-code in a cleaner style, same language
    Recode {
        /// File containing the pseudo-code
        file: PathBuf,

        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Check that the API is up
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = commands::ApiClient::new(&cli.server)?;

    match cli.command {
        Commands::Decompile { file, out } => {
            commands::decompile(&client, &file, out.as_deref()).await?;
        }
        Commands::Translate { file, lang, out } => {
            commands::rework(&client, &file, TranslateMethod::Translate, Some(&lang), out.as_deref()).await?;
        }
        Commands::Recode { file, out } => {
            commands::rework(&client, &file, TranslateMethod::Recode, None, out.as_deref()).await?;
        }
        Commands::Health => {
            commands::health(&client).await?;
        }
    }

    Ok(())
}
