//! Outbound links to the bridge and the viewer
//!
//! Each connection gets an unbounded channel drained by its writer task.
//! The host holds the sending half; dropping it ends the writer and with
//! it the connection.

use std::time::Instant;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use asplay_core::relay::{encode_line, HeartbeatMonitor, MessageSink, RelayError};
use asplay_core::{BridgeCommand, ViewerMessage};

/// `MessageSink` backed by a tokio channel.
pub struct ChannelSink<M> {
    tx: UnboundedSender<M>,
}

impl<M> ChannelSink<M> {
    pub fn new(tx: UnboundedSender<M>) -> Self {
        Self { tx }
    }

    /// A sink and the receiver its messages arrive on.
    pub fn channel() -> (Self, UnboundedReceiver<M>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl<M: Send> MessageSink<M> for ChannelSink<M> {
    fn send(&self, message: M) -> Result<(), RelayError> {
        self.tx.send(message).map_err(|_| RelayError::Closed)
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// The page bridge currently attached.
pub struct BridgeLink {
    pub id: u64,
    pub sink: Box<dyn MessageSink<BridgeCommand>>,
}

/// The paired viewer and its liveness.
pub struct ViewerLink {
    pub id: u64,
    pub sink: Box<dyn MessageSink<ViewerMessage>>,
    pub heartbeat: HeartbeatMonitor,
}

impl ViewerLink {
    pub fn new(
        id: u64,
        sink: Box<dyn MessageSink<ViewerMessage>>,
        timeout: std::time::Duration,
        now: Instant,
    ) -> Self {
        Self {
            id,
            sink,
            heartbeat: HeartbeatMonitor::new(timeout, now),
        }
    }
}

/// Drain `rx` onto `writer`, one JSON line per message.
pub async fn write_lines<M: Serialize>(
    mut writer: OwnedWriteHalf,
    mut rx: UnboundedReceiver<M>,
) -> anyhow::Result<()> {
    while let Some(message) = rx.recv().await {
        let line = encode_line(&message)?;
        writer.write_all(line.as_bytes()).await?;
    }

    debug!("Link sender dropped, closing writer");
    writer.shutdown().await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_closes_with_receiver() {
        let (sink, rx) = ChannelSink::<ViewerMessage>::channel();
        assert!(sink.is_open());
        assert!(sink.send(ViewerMessage::error("x")).is_ok());

        drop(rx);
        assert!(!sink.is_open());
        assert_eq!(sink.send(ViewerMessage::error("y")), Err(RelayError::Closed));
    }
}
