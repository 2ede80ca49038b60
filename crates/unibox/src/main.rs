// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Unibox - a unified inbox over an integration broker.
//!
//! This is the binary entry point. Without a subcommand it runs `serve`.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod doctor;
mod serve;

use clap::{Parser, Subcommand};
use unibox_config::UniboxConfig;

/// Unibox - message sync and delivery reconciliation for a unified inbox.
#[derive(Parser, Debug)]
#[command(name = "unibox", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP gateway (default).
    Serve,
    /// Print the effective configuration with secrets redacted.
    Config,
    /// Run diagnostic checks against the local environment.
    Doctor,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match unibox_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            unibox_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve::run_serve(config).await,
        Commands::Config => print_config(&config),
        Commands::Doctor => doctor::run_doctor(&config).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn print_config(config: &UniboxConfig) -> Result<(), unibox_core::UniboxError> {
    let rendered = render_config(config)?;
    print!("{rendered}");
    Ok(())
}

fn render_config(config: &UniboxConfig) -> Result<String, unibox_core::UniboxError> {
    toml::to_string_pretty(&config.redacted())
        .map_err(|e| unibox_core::UniboxError::Internal(format!("failed to render config: {e}")))
}
