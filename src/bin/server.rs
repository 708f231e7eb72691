//! # Server Binary Entry Point
//!
//! Loads the location catalogue, rewrites it in canonical form and starts
//! the relay server.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin server -- --config config/server.toml
//! ```
//!
//! Without `--config` every setting takes its default. `$WHEREAMI_ORIGINS`
//! (comma-separated) overrides the configured origin allow-list.

use anyhow::Context;
use clap::Parser;
use env_logger::{Builder, Env};
use std::io::Write;

use whereami::common::config::ServerConfig;
use whereami::server::{Catalogue, Server};

/// Command-line arguments for the server binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the server configuration file (TOML format)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the catalogue path from the configuration file
    #[arg(long)]
    locations: Option<String>,
}

/// Initialize logging with the format `[HH:MM:SS] [LEVEL] message`.
///
/// INFO by default; `RUST_LOG` overrides it.
fn init_logger() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    config.apply_env();
    if let Some(path) = args.locations {
        config.catalogue.path = path;
    }

    let catalogue = Catalogue::prepare(&config.catalogue.path)
        .with_context(|| format!("failed to load catalogue {}", config.catalogue.path))?;

    Server::new(config, catalogue).run().await
}
