//! as-playground page bridge (asplay-bridge)
//!
//! Sits between the page script and the host:
//! 1. Reads page snapshots (one JSON object per line) from stdin
//! 2. Polls them like the live page: comments every 100 ms, player time every 500 ms
//! 3. Sends `BridgeEvent` lines to the host's bridge socket
//! 4. Writes the host's `BridgeCommand` lines to stdout for the page script
//!
//! Logs go to stderr so stdout carries nothing but commands.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::time::interval;
use tracing::{debug, info, warn};

mod page;

use asplay_core::bridge::{
    CommentPoller, PlayerTimePoller, COMMENT_POLL_INTERVAL, PLAYER_POLL_INTERVAL,
};
use asplay_core::config::bridge_socket_path;
use asplay_core::relay::{decode_line, encode_line};
use asplay_core::{BridgeCommand, BridgeEvent};
use page::{Page, PageAction, PageSnapshot};

#[derive(Parser)]
#[command(name = "asplay-bridge")]
#[command(about = "Forward page snapshots to the as-playground host")]
#[command(version)]
struct Args {
    /// Host bridge socket (defaults to ~/.asplay/bridge.sock)
    #[arg(long)]
    socket: Option<PathBuf>,
}

/// Page state shared by the stdin reader, the pollers and the command reader.
#[derive(Default)]
struct Shared {
    page: Page,
    poller: CommentPoller,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

async fn send_event(writer: &mut OwnedWriteHalf, event: &BridgeEvent) -> Result<()> {
    let line = encode_line(event)?;
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}

/// Read snapshots from stdin until it closes.
async fn read_snapshots(shared: Arc<Mutex<Shared>>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PageSnapshot>(&line) {
            Ok(snapshot) => {
                let mut guard = lock(&shared);
                let Shared { page, poller } = &mut *guard;
                page.apply(snapshot, poller);
            }
            Err(e) => warn!("Invalid page snapshot: {}", e),
        }
    }

    info!("Page input closed");
    Ok(())
}

/// Relay host commands to stdout until the host closes the connection.
async fn forward_commands(
    reader: tokio::net::unix::OwnedReadHalf,
    shared: Arc<Mutex<Shared>>,
) -> Result<()> {
    let mut lines = BufReader::new(reader).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let command = match decode_line::<BridgeCommand>(&line) {
            Ok(command) => command,
            Err(e) => {
                warn!("Invalid host command: {}", e);
                continue;
            }
        };

        debug!("Host command: {:?}", command);
        let action = lock(&shared).page.handle_command(command);
        if let PageAction::Forward(command) = action {
            stdout.write_all(encode_line(&command)?.as_bytes()).await?;
            stdout.flush().await?;
        }
    }

    info!("Host closed the connection");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("asplay_bridge=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let socket = args.socket.unwrap_or_else(bridge_socket_path);

    let stream = UnixStream::connect(&socket)
        .await
        .with_context(|| format!("Failed to connect to host at {:?}", socket))?;
    info!("Connected to host at {:?}", socket);

    let (reader, mut writer) = stream.into_split();
    let shared = Arc::new(Mutex::new(Shared::default()));

    let mut snapshots = tokio::spawn(read_snapshots(Arc::clone(&shared)));
    let mut commands = tokio::spawn(forward_commands(reader, Arc::clone(&shared)));

    let mut comment_ticker = interval(COMMENT_POLL_INTERVAL);
    let mut player_ticker = interval(PLAYER_POLL_INTERVAL);
    let mut player_poller = PlayerTimePoller::new();

    loop {
        tokio::select! {
            _ = comment_ticker.tick() => {
                let event = {
                    let shared = lock(&shared);
                    shared.poller.tick(&shared.page, &shared.page)
                };
                if let Some(event) = event {
                    send_event(&mut writer, &event).await?;
                }
            }
            _ = player_ticker.tick() => {
                let event = player_poller.tick(&lock(&shared).page);
                if let Some(event) = event {
                    send_event(&mut writer, &event).await?;
                }
            }
            result = &mut snapshots => {
                result??;
                break;
            }
            result = &mut commands => {
                result??;
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    snapshots.abort();
    commands.abort();
    writer.shutdown().await.ok();
    Ok(())
}
