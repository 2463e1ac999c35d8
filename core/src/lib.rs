//! as-playground core - shared types, comment store and reconciliation
//!
//! This crate provides:
//! - The comment data model and its identity digest
//! - Live capture deduplication and archive timestamp reconciliation
//! - The realtime/archive merge engine
//! - Chapter extraction and per-minute analysis
//! - The SQLite comment store, schema migrations and JSON backups
//! - Relay message types shared by the host, the bridge and the viewer
//! - The control client used by the CLI to drive a running host

pub mod analysis;
pub mod backup;
pub mod bridge;
pub mod capture;
pub mod chapter;
pub mod config;
pub mod error;
pub mod identity;
pub mod ipc;
pub mod merge;
pub mod post;
pub mod reconcile;
pub mod relay;
pub mod schema;
pub mod store;
pub mod timecode;
pub mod types;

pub use backup::{EventBackup, ImportError, ImportSummary};
pub use capture::CaptureSession;
pub use chapter::{extract_chapters, Chapter};
pub use config::HostConfig;
pub use error::{Error, Result};
pub use identity::comment_id;
pub use ipc::{ControlClient, HostRequest, HostResponse, HostStatus, IpcError};
pub use merge::{MatchedPair, MergeEngine, MergeError, MergeOutcome};
pub use relay::{BridgeCommand, BridgeEvent, RelayError, ViewerMessage, ViewerRequest};
pub use schema::init_schema;
pub use store::{CommentStore, SqliteCommentStore};
pub use types::*;

/// Re-export commonly used items
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::relay::{BridgeCommand, BridgeEvent, MessageSink, ViewerMessage, ViewerRequest};
    pub use crate::store::{CommentStore, SqliteCommentStore};
    pub use crate::types::*;
}
