//! Unix socket server for the host
//!
//! Three listeners, one task per connection:
//! - bridge: `BridgeEvent` lines in, `BridgeCommand` lines out
//! - viewer: `ViewerRequest` lines in, `ViewerMessage` lines out (one viewer at a time)
//! - control: one `HostRequest` line in, one `HostResponse` line out

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use asplay_core::relay::decode_line;
use asplay_core::{BridgeCommand, BridgeEvent, HostRequest, HostResponse, ViewerMessage, ViewerRequest};

use crate::handlers;
use crate::link::{write_lines, ChannelSink};
use crate::HostState;

/// Run the host server
pub async fn run(state: Arc<HostState>) -> Result<()> {
    let bridge_path = state.bridge_socket_path();
    let viewer_path = state.viewer_socket_path();
    let control_path = state.control_socket_path();

    let bridge_listener = UnixListener::bind(&bridge_path)?;
    let viewer_listener = UnixListener::bind(&viewer_path)?;
    let control_listener = UnixListener::bind(&control_path)?;
    info!("Listening on {:?}, {:?} and {:?}", bridge_path, viewer_path, control_path);

    let mut shutdown_check = tokio::time::interval(std::time::Duration::from_millis(500));

    loop {
        if state.should_shutdown() {
            info!("Shutdown requested, stopping server");
            break;
        }

        tokio::select! {
            result = bridge_listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_bridge(stream, state).await {
                                error!("Bridge connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("Accept error (bridge): {}", e),
                }
            }
            result = viewer_listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_viewer(stream, state).await {
                                error!("Viewer connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("Accept error (viewer): {}", e),
                }
            }
            result = control_listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_control(stream, state).await {
                                error!("Control connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("Accept error (control): {}", e),
                }
            }
            _ = shutdown_check.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                state.request_shutdown();
                break;
            }
        }
    }

    // Cleanup
    for path in [&bridge_path, &viewer_path, &control_path] {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
    }

    info!("Host stopped");
    Ok(())
}

/// Serve one bridge connection until it closes
async fn handle_bridge(stream: UnixStream, state: Arc<HostState>) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let (sink, rx) = ChannelSink::<BridgeCommand>::channel();
    let link_id = state.attach_bridge(Box::new(sink));
    info!("Bridge connected (link {})", link_id);

    let writer_task = tokio::spawn(write_lines(writer, rx));

    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Bridge read error (link {}): {}", link_id, e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match decode_line::<BridgeEvent>(&line) {
            Ok(event) => handlers::handle_bridge_event(event, &state),
            Err(e) => warn!("Invalid bridge message: {}", e),
        }
    }

    info!("Bridge disconnected (link {})", link_id);
    state.detach_bridge(link_id);
    writer_task.abort();
    Ok(())
}

/// Serve one viewer connection until it closes or the host drops it
async fn handle_viewer(stream: UnixStream, state: Arc<HostState>) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let (sink, rx) = ChannelSink::<ViewerMessage>::channel();

    let Some(link_id) = handlers::viewer_connected(Box::new(sink), &state, Instant::now()) else {
        // Closing the stream is the rejection
        return Ok(());
    };

    let mut writer_task = tokio::spawn(write_lines(writer, rx));
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Viewer read error (link {}): {}", link_id, e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match decode_line::<ViewerRequest>(&line) {
                    Ok(request) => handlers::handle_viewer_request(link_id, request, &state, Instant::now()),
                    Err(e) => warn!("Invalid viewer message: {}", e),
                }
            }
            _ = &mut writer_task => {
                debug!("Viewer link {} dropped by host", link_id);
                break;
            }
        }
    }

    handlers::viewer_disconnected(link_id, &state);
    writer_task.abort();
    Ok(())
}

/// Answer control requests from the CLI
async fn handle_control(mut stream: UnixStream, state: Arc<HostState>) -> Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match decode_line::<HostRequest>(&line) {
            Ok(request) => handlers::handle_control_request(request, &state),
            Err(e) => {
                warn!("Invalid control message: {}", e);
                HostResponse::Error(format!("Invalid message: {}", e))
            }
        };

        let response_json = serde_json::to_string(&response)? + "\n";
        writer.write_all(response_json.as_bytes()).await?;

        line.clear();
    }

    Ok(())
}
