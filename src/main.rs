// DuckDB Explorer entry point
// Loads .env, initializes tracing, parses flags and runs the HTTP server

use anyhow::anyhow;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use duckdb_explorer_lib::{run_server, ServerArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .try_init()
        .map_err(|err| anyhow!(err))?;

    let args = ServerArgs::parse();
    run_server(args.into_config()).await
}
