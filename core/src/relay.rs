//! Relay messages between the bridge, the host and the viewer
//!
//! Every link carries JSON documents tagged by a `type` field, one per
//! `\n`-terminated line. Links are ordered and lossy: a message sent while
//! the peer is gone is dropped, never queued.

use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Comment, RawComment};

/// Time without a heartbeat after which the viewer is considered gone.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors on a relay link.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Link closed")]
    Closed,

    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Failed to decode message: {0}")]
    Decode(String),
}

/// Messages from the bridge (page side) to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeEvent {
    /// A scrape of the comment list. `current_time_seconds` is present on archive pages.
    #[serde(rename_all = "camelCase")]
    CommentsReceived {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_name: Option<String>,
        comments: Vec<RawComment>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_time_seconds: Option<f64>,
    },

    #[serde(rename_all = "camelCase")]
    PlayerCurrentTimeChanged { current_time_seconds: f64 },

    #[serde(rename_all = "camelCase", alias = "ERROR_OCCURRED_ON_AS_BRIDGE")]
    ErrorOccurred { error_message: String },
}

/// Commands from the host to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeCommand {
    SetIframeVisibility { value: bool },
    ShowOverlayComments { comments: Vec<Comment> },
    SetPlayerCurrentTime { seconds: i64 },
    PostComment { nickname: String, comment: String },
}

/// How the bridge was loaded into the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostLoader {
    ChromeExt,
    #[default]
    Bookmarklet,
}

/// Features the host offers to the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableFunctions {
    pub post_comment: bool,
}

/// Messages from the host to the viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViewerMessage {
    /// First message after the viewer connects
    #[serde(rename_all = "camelCase")]
    Greeting {
        comments: Vec<Comment>,
        available_functions: AvailableFunctions,
        host_loader: HostLoader,
    },

    CommentsReceived { comments: Vec<Comment> },

    #[serde(rename_all = "camelCase")]
    ErrorOccurred { error_message: String },
}

impl ViewerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ViewerMessage::ErrorOccurred {
            error_message: message.into(),
        }
    }
}

/// Messages from the viewer to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViewerRequest {
    Heartbeat,
    PostComment { nickname: String, comment: String },
}

/// Encode a message as one newline-terminated JSON line.
pub fn encode_line<M: Serialize>(message: &M) -> Result<String, RelayError> {
    let mut line = serde_json::to_string(message).map_err(|e| RelayError::Encode(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Decode one JSON line (surrounding whitespace ignored).
pub fn decode_line<M: DeserializeOwned>(line: &str) -> Result<M, RelayError> {
    serde_json::from_str(line.trim()).map_err(|e| RelayError::Decode(e.to_string()))
}

/// Outbound half of a link.
pub trait MessageSink<M>: Send + Sync {
    /// Send a message; fails with `RelayError::Closed` once the peer is gone.
    fn send(&self, message: M) -> Result<(), RelayError>;

    fn is_open(&self) -> bool;
}

/// Tracks viewer liveness from its heartbeats.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    last_beat: Instant,
}

impl HeartbeatMonitor {
    /// Start monitoring; connecting counts as the first beat.
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            last_beat: now,
        }
    }

    pub fn beat(&mut self, now: Instant) {
        self.last_beat = now;
    }

    /// Whether the timeout has passed since the last beat.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_beat) >= self.timeout
    }

    pub fn since_last_beat(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_beat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bridge_event_wire_form() {
        let event: BridgeEvent = decode_line(
            r#"{"type":"COMMENTS_RECEIVED","eventName":"E","comments":[{"nickname":"A","comment":"hi"}],"currentTimeSeconds":12.5}"#,
        )
        .unwrap();

        assert_eq!(
            event,
            BridgeEvent::CommentsReceived {
                event_name: Some("E".into()),
                comments: vec![RawComment::new("A", "hi")],
                current_time_seconds: Some(12.5),
            }
        );
    }

    #[test]
    fn test_bridge_error_alias() {
        let event: BridgeEvent =
            decode_line(r#"{"type":"ERROR_OCCURRED_ON_AS_BRIDGE","errorMessage":"boom"}"#).unwrap();
        assert_eq!(
            event,
            BridgeEvent::ErrorOccurred {
                error_message: "boom".into()
            }
        );
    }

    #[test]
    fn test_command_wire_form() {
        let value = serde_json::to_value(BridgeCommand::SetIframeVisibility { value: false }).unwrap();
        assert_eq!(value, json!({"type": "SET_IFRAME_VISIBILITY", "value": false}));

        let value = serde_json::to_value(BridgeCommand::SetPlayerCurrentTime { seconds: 340 }).unwrap();
        assert_eq!(value, json!({"type": "SET_PLAYER_CURRENT_TIME", "seconds": 340}));
    }

    #[test]
    fn test_greeting_wire_form() {
        let greeting = ViewerMessage::Greeting {
            comments: vec![],
            available_functions: AvailableFunctions { post_comment: true },
            host_loader: HostLoader::ChromeExt,
        };

        let value = serde_json::to_value(&greeting).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "GREETING",
                "comments": [],
                "availableFunctions": {"postComment": true},
                "hostLoader": "chrome_ext"
            })
        );
    }

    #[test]
    fn test_viewer_request_decode() {
        assert_eq!(
            decode_line::<ViewerRequest>(r#"{"type":"HEARTBEAT"}"#).unwrap(),
            ViewerRequest::Heartbeat
        );
        assert!(matches!(
            decode_line::<ViewerRequest>(r#"{"type":"NOPE"}"#),
            Err(RelayError::Decode(_))
        ));
    }

    #[test]
    fn test_encode_line_is_single_line() {
        let line = encode_line(&ViewerMessage::error("multi\nline")).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_heartbeat_expiry() {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::new(HEARTBEAT_TIMEOUT, start);

        assert!(!monitor.is_expired(start + Duration::from_secs(9)));
        assert!(monitor.is_expired(start + Duration::from_secs(11)));

        monitor.beat(start + Duration::from_secs(8));
        assert!(!monitor.is_expired(start + Duration::from_secs(11)));
    }
}
