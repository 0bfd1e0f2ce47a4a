//! CLI parser and dispatch to the command modules.

mod connection;
mod providers;
mod recognize;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ocrbridge::config::Config;

#[derive(Parser)]
#[command(name = "ocrbridge")]
#[command(about = "OCR through vision-language models, with optional local text detection")]
#[command(version)]
pub struct Cli {
    /// Config file (default: ./ocrbridge.toml, then the user config dir)
    #[arg(short, long, global = true, env = "OCRBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize text in one or more images and print the results as JSON
    Recognize {
        /// Image files
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Output format: text_only or with_coordinates
        #[arg(short, long)]
        format: Option<String>,
        /// Recognition mode: remote or dual
        #[arg(short, long)]
        mode: Option<String>,
        /// Provider name (see `ocrbridge providers`)
        #[arg(short, long)]
        provider: Option<String>,
        /// Model name
        #[arg(long)]
        model: Option<String>,
        /// Language hint (auto, zh, en, ja, ko, fr, de, es, ru, ar)
        #[arg(short, long)]
        language: Option<String>,
        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Send a small test image to the configured provider
    TestConnection {
        /// Provider name
        #[arg(short, long)]
        provider: Option<String>,
        /// Model name
        #[arg(long)]
        model: Option<String>,
    },

    /// List the supported providers
    Providers,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Recognize {
            files,
            format,
            mode,
            provider,
            model,
            language,
            pretty,
        } => {
            let config = Config::load(cli.config.as_deref())?;
            let overrides = recognize::Overrides {
                format,
                mode,
                provider,
                model,
                language,
            };
            recognize::cmd_recognize(config, overrides, &files, pretty).await
        }
        Commands::TestConnection { provider, model } => {
            let config = Config::load(cli.config.as_deref())?;
            connection::cmd_test_connection(config, provider, model).await
        }
        Commands::Providers => providers::cmd_providers(),
    }
}
