// Peer chat over the LAN: multicast discovery, encrypted session links, line console.

mod adapter;
mod config;
mod console;
mod discovery;
mod transport;

use std::sync::Arc;

use peerchat_core::{event_channel, ChatCore, ChatSession, Keypair};
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("peerchat-lan {}", VERSION);
            return Ok(());
        }
    }

    let cfg = config::load();
    init_tracing(&cfg.log_level);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg))
}

/// RUST_LOG wins over the configured level.
fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cfg: config::Config) -> anyhow::Result<()> {
    let chat_config = cfg.chat_config();
    let name = chat_config.display_name.clone();
    info!(%name, service = %chat_config.service_name, "starting peer chat");

    let keypair = Arc::new(Keypair::generate());
    let (event_tx, event_rx) = event_channel();
    let discovery = discovery::Discovery::new();
    let (links, invite_rx) = transport::Links::new();

    let disc = discovery.clone();
    let disc_name = name.clone();
    let disc_key = keypair.public_key().clone();
    let disc_events = event_tx.clone();
    let (discovery_port, transport_port) = (cfg.discovery_port, cfg.transport_port);
    tokio::spawn(async move {
        if let Err(e) = discovery::run_discovery(
            disc,
            disc_name,
            disc_key,
            discovery_port,
            transport_port,
            disc_events,
        )
        .await
        {
            error!(error = %e, "discovery stopped");
        }
    });
    let trans_links = links.clone();
    tokio::spawn(async move {
        if let Err(e) = transport::run_transport(
            trans_links,
            keypair,
            name,
            transport_port,
            invite_rx,
            event_tx,
        )
        .await
        {
            error!(error = %e, "session listener stopped");
        }
    });

    let core = ChatCore::new(adapter::LanTransport::new(discovery, links), chat_config);
    let (session, _task) = ChatSession::spawn(core, event_rx);
    tokio::spawn(console::print_updates(session.snapshot()));
    tokio::spawn(console::print_reports(session.reports()));

    tokio::select! {
        r = console::run(session) => r?,
        r = shutdown_signal() => r?,
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
