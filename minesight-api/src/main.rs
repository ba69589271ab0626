use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use minesight_api::{router, AppState};

#[derive(Parser, Debug)]
#[command(name = "minesight-api", version = "0.1.0")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value = "5001")]
    port: u16,

    /// Seed the prediction generator for reproducible responses
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let args = Args::parse();
    info!("Parsed command-line args: {:?}", args);

    let state = match args.seed {
        Some(seed) => AppState::seeded(seed),
        None => AppState::new(),
    };

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("binding {}:{}", args.host, args.port))?;
    info!("=== MineSight API listening on http://{} ===", listener.local_addr()?);

    axum::serve(listener, router(state))
        .await
        .context("serving API")?;
    Ok(())
}
