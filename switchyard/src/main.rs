use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use args::Args;
use clap::Parser;

mod args;
mod logger;

const DEFAULT_LISTEN: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8034);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args);

    let config = config::Config::load(&args.config)?;

    let listen_address = args
        .listen
        .or(config.server.listen_address)
        .unwrap_or(DEFAULT_LISTEN);

    let router = gateway::router(&config).await?;

    let listener = tokio::net::TcpListener::bind(listen_address).await?;
    log::info!("switchyard listening on {listen_address}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("switchyard shut down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for the shutdown signal: {error}");
    }
}
