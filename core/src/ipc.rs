//! Control client for the running host
//!
//! The CLI talks to `asplayd` over a Unix socket with one JSON request and
//! one JSON response per line. The client is synchronous; the CLI has no
//! runtime of its own.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::asplay_dir;

/// Default control socket path
pub fn control_socket_path() -> PathBuf {
    asplay_dir().join("control.sock")
}

/// Request from the CLI to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum HostRequest {
    Ping,
    Status,
    /// Move the player to a position (seconds)
    Seek { seconds: i64 },
    Shutdown,
}

/// Snapshot of the host's capture state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatus {
    pub event_name: Option<String>,
    pub player_time_seconds: Option<i64>,
    pub seen_comments: usize,
    pub merged: bool,
    pub bridge_connected: bool,
    pub viewer_connected: bool,
    pub pending_posts: usize,
}

/// Response from the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum HostResponse {
    Ok,
    Error(String),
    Pong {
        uptime_secs: u64,
        comments_received: u64,
    },
    Status(HostStatus),
}

/// Error type for control operations
#[derive(Debug)]
pub enum IpcError {
    /// Host is not running (socket doesn't exist or connection refused)
    HostNotRunning,
    ConnectionFailed(std::io::Error),
    SendFailed(std::io::Error),
    ReceiveFailed(std::io::Error),
    InvalidResponse(String),
    /// Host answered with an error
    HostError(String),
}

impl std::fmt::Display for IpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpcError::HostNotRunning => write!(f, "Host not running"),
            IpcError::ConnectionFailed(e) => write!(f, "Connection failed: {}", e),
            IpcError::SendFailed(e) => write!(f, "Send failed: {}", e),
            IpcError::ReceiveFailed(e) => write!(f, "Receive failed: {}", e),
            IpcError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            IpcError::HostError(msg) => write!(f, "Host error: {}", msg),
        }
    }
}

impl std::error::Error for IpcError {}

/// Synchronous client for the host control socket
pub struct ControlClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for ControlClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlClient {
    pub fn new() -> Self {
        Self::with_socket_path(control_socket_path())
    }

    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: Duration::from_secs(5),
        }
    }

    /// Check if the host appears to be running (socket exists)
    pub fn host_available(&self) -> bool {
        self.socket_path.exists()
    }

    /// Send a request and wait for the response
    pub fn send(&self, request: &HostRequest) -> Result<HostResponse, IpcError> {
        if !self.socket_path.exists() {
            return Err(IpcError::HostNotRunning);
        }

        let mut stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused
                || e.kind() == std::io::ErrorKind::NotFound
            {
                IpcError::HostNotRunning
            } else {
                IpcError::ConnectionFailed(e)
            }
        })?;

        stream.set_read_timeout(Some(self.timeout)).ok();
        stream.set_write_timeout(Some(self.timeout)).ok();

        let json = serde_json::to_string(request).map_err(|e| {
            IpcError::SendFailed(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        writeln!(stream, "{}", json).map_err(IpcError::SendFailed)?;
        stream.flush().map_err(IpcError::SendFailed)?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        reader
            .read_line(&mut response_line)
            .map_err(IpcError::ReceiveFailed)?;

        let response: HostResponse = serde_json::from_str(&response_line)
            .map_err(|e| IpcError::InvalidResponse(e.to_string()))?;

        if let HostResponse::Error(msg) = response {
            return Err(IpcError::HostError(msg));
        }

        Ok(response)
    }

    /// Returns `(uptime_secs, comments_received)`
    pub fn ping(&self) -> Result<(u64, u64), IpcError> {
        match self.send(&HostRequest::Ping)? {
            HostResponse::Pong {
                uptime_secs,
                comments_received,
            } => Ok((uptime_secs, comments_received)),
            _ => Err(IpcError::InvalidResponse("Unexpected response type".into())),
        }
    }

    pub fn status(&self) -> Result<HostStatus, IpcError> {
        match self.send(&HostRequest::Status)? {
            HostResponse::Status(status) => Ok(status),
            _ => Err(IpcError::InvalidResponse("Unexpected response type".into())),
        }
    }

    pub fn seek(&self, seconds: i64) -> Result<(), IpcError> {
        self.expect_ok(&HostRequest::Seek { seconds })
    }

    pub fn shutdown(&self) -> Result<(), IpcError> {
        self.expect_ok(&HostRequest::Shutdown)
    }

    fn expect_ok(&self, request: &HostRequest) -> Result<(), IpcError> {
        match self.send(request)? {
            HostResponse::Ok => Ok(()),
            _ => Err(IpcError::InvalidResponse("Unexpected response type".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_socket_path() {
        let path = control_socket_path();
        assert!(path.ends_with("control.sock"));
        assert!(path.to_str().unwrap().contains(".asplay"));
    }

    #[test]
    fn test_host_not_running() {
        let client = ControlClient::with_socket_path(PathBuf::from("/nonexistent/control.sock"));
        assert!(!client.host_available());
        assert!(matches!(client.ping(), Err(IpcError::HostNotRunning)));
    }

    #[test]
    fn test_request_wire_form() {
        let json = serde_json::to_string(&HostRequest::Seek { seconds: 90 }).unwrap();
        assert_eq!(json, r#"{"type":"Seek","payload":{"seconds":90}}"#);

        let back: HostRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, HostRequest::Seek { seconds: 90 });
    }
}
