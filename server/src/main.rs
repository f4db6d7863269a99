mod config;
mod openfoodfacts;
mod server;

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;

use crate::config::Config;
use fitlog_core::service::TrackerService;

#[derive(Parser)]
#[command(
    name = "fitlog",
    version,
    about = "A local-first fitness & nutrition tracker",
    long_about = "Serves the fitlog dashboard API: meal and metric logging, wearable \
imports, trend predictions, and what-if diet simulations over a local SQLite database."
)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,
    /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,
    /// Disable API key authentication (for development/testing)
    #[arg(long)]
    no_auth: bool,
    /// Path to the SQLite database (default: platform data directory)
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db_path = cli.db.unwrap_or_else(|| config.db_path.clone());

    // Storage initialization (schema migration) happens once, here, before
    // any request handling.
    let service = TrackerService::new(&db_path)?;

    let (api_key, new_api_key) = if cli.no_auth {
        (None, false)
    } else {
        let (key, newly_created) = config.load_or_create_api_key()?;
        (Some(key), newly_created)
    };

    server::start_server(service, cli.port, &cli.bind, api_key, new_api_key).await
}
