// DeepTalk node: console peer for a two-person question-card session.

mod config;
mod console;
mod control;
mod deck;
mod discovery;
mod lan;
mod transport;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use deeptalk_core::TalkCore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use crate::config::TransportKind;
use crate::control::Controller;
use crate::deck::DeckSet;
use crate::lan::LanTransport;
use crate::transport::{MemoryHub, Transport};

#[derive(Debug, Parser)]
#[command(name = "deeptalk-node", version, about = "Play DeepTalk question cards with a partner")]
struct Cli {
    /// Config file (default: ~/.config/deeptalk/config.toml, then /etc/deeptalk/config.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Invite link or room id to join on startup.
    #[arg(long, env = "DEEPTALK_INVITE")]
    invite: Option<String>,
    /// Transport adapter: lan or memory.
    #[arg(long)]
    transport: Option<TransportKind>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;
    if let Some(kind) = cli.transport {
        cfg.transport = kind;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let invite_base = Url::parse(&cfg.invite_base)
        .with_context(|| format!("invalid invite_base {:?}", cfg.invite_base))?;
    let decks = match &cfg.deck_file {
        Some(path) => DeckSet::load(path)
            .with_context(|| format!("loading decks from {}", path.display()))?,
        None => DeckSet::builtin(),
    };
    if decks.is_empty() {
        tracing::warn!("no decks available; only a partner can start a game");
    }
    let mut core = TalkCore::with_sync_mode(cfg.sync_mode);
    core.set_resync_policy(cfg.resync);
    tracing::debug!(?cfg, "config loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match cfg.transport {
            TransportKind::Lan => {
                let transport = LanTransport::new(cfg.discovery_port, cfg.transport_port);
                session(core, transport, decks, invite_base, cli.invite).await
            }
            TransportKind::Memory => {
                tracing::warn!("memory transport: only peers inside this process are reachable");
                let transport = MemoryHub::new().transport();
                session(core, transport, decks, invite_base, cli.invite).await
            }
        }
    })
}

async fn session<T: Transport>(
    core: TalkCore,
    transport: T,
    decks: DeckSet,
    invite_base: Url,
    invite: Option<String>,
) -> anyhow::Result<()> {
    let (ctrl, events) = Controller::new(core, transport, decks, invite_base);
    let (lines_tx, lines_rx) = mpsc::channel(16);
    if let Some(invite) = invite {
        lines_tx.send(format!("join {invite}")).await?;
    }
    tokio::spawn(read_stdin(lines_tx));
    println!("type `help` for commands");

    tokio::select! {
        res = control::run(ctrl, lines_rx, events, tokio::io::stdout()) => {
            res?;
        }
        res = shutdown_signal() => {
            res?;
            tracing::info!("shutting down");
        }
    }
    Ok(())
}

async fn read_stdin(lines_tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if lines_tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
