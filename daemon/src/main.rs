//! as-playground host (asplayd)
//!
//! Long-running service providing:
//! - Comment capture from the page bridge (dedup, reconciliation, storage)
//! - Relay of new comments to a single paired viewer
//! - Realtime/archive merge of recorded comments
//!
//! Architecture:
//! - Unix socket listeners under ~/.asplay/ for the bridge, the viewer and
//!   the CLI control client
//! - JSON-line messages (BridgeEvent/BridgeCommand, ViewerRequest/ViewerMessage,
//!   HostRequest/HostResponse)
//! - Background loops for viewer heartbeats and post verification

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

mod background;
mod handlers;
mod link;
mod server;

use asplay_core::config::{asplay_dir, database_path};
use asplay_core::merge::MergeEngine;
use asplay_core::post::PendingPosts;
use asplay_core::relay::MessageSink;
use asplay_core::{
    BridgeCommand, CaptureSession, CommentStore, HostConfig, HostStatus, SqliteCommentStore,
    ViewerMessage,
};
use link::{BridgeLink, ViewerLink};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Global state for the host.
pub struct HostState {
    /// When the host started
    start_time: Instant,

    /// Comments received from the bridge this session
    comments_received: AtomicU64,

    /// Shutdown signal
    shutdown: AtomicBool,

    /// Path to the asplay directory
    asplay_home: PathBuf,

    next_link_id: AtomicU64,

    pub config: HostConfig,

    pub store: Box<dyn CommentStore>,

    /// Dedup state of the event being watched
    pub session: Mutex<CaptureSession>,

    pub merge_engine: MergeEngine,

    /// Posts forwarded to the bridge, awaiting confirmation
    pub pending_posts: Mutex<PendingPosts>,

    bridge: Mutex<Option<BridgeLink>>,

    viewer: Mutex<Option<ViewerLink>>,
}

impl HostState {
    /// Create the host state from the files under ~/.asplay/.
    ///
    /// # Errors
    /// Returns `anyhow::Error` if the directory or the database cannot be opened.
    pub fn new() -> Result<Self> {
        let asplay_home = asplay_dir();
        std::fs::create_dir_all(&asplay_home)
            .with_context(|| format!("Failed to create {:?}", asplay_home))?;

        let config = HostConfig::load(&asplay_home.join("config.toml"));
        let store = SqliteCommentStore::open(database_path()).context("Failed to open comment store")?;
        info!(
            "Comment store opened ({} comments)",
            store.count().unwrap_or(0)
        );

        Ok(Self::with_parts(asplay_home, config, Box::new(store)))
    }

    /// Assemble a state from its parts (tests use an in-memory store).
    pub fn with_parts(asplay_home: PathBuf, config: HostConfig, store: Box<dyn CommentStore>) -> Self {
        Self {
            start_time: Instant::now(),
            comments_received: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            asplay_home,
            next_link_id: AtomicU64::new(1),
            config,
            store,
            session: Mutex::new(CaptureSession::new()),
            merge_engine: MergeEngine::new(),
            pending_posts: Mutex::new(PendingPosts::default()),
            bridge: Mutex::new(None),
            viewer: Mutex::new(None),
        }
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn comments_received(&self) -> u64 {
        self.comments_received.load(Ordering::Relaxed)
    }

    pub fn add_comments_received(&self, count: usize) {
        self.comments_received.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Check whether a shutdown has been requested.
    pub fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Request a graceful shutdown.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn bridge_socket_path(&self) -> PathBuf {
        self.asplay_home.join("bridge.sock")
    }

    pub fn viewer_socket_path(&self) -> PathBuf {
        self.asplay_home.join("viewer.sock")
    }

    pub fn control_socket_path(&self) -> PathBuf {
        self.asplay_home.join("control.sock")
    }

    fn next_link_id(&self) -> u64 {
        self.next_link_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Attach a bridge, replacing any previous one.
    ///
    /// # Returns
    /// The link id, for `detach_bridge`.
    pub fn attach_bridge(&self, sink: Box<dyn MessageSink<BridgeCommand>>) -> u64 {
        let id = self.next_link_id();
        if lock(&self.bridge).replace(BridgeLink { id, sink }).is_some() {
            info!("Bridge replaced by a new connection");
        }
        id
    }

    pub fn detach_bridge(&self, id: u64) {
        let mut bridge = lock(&self.bridge);
        if bridge.as_ref().is_some_and(|b| b.id == id) {
            *bridge = None;
        }
    }

    pub fn bridge_connected(&self) -> bool {
        lock(&self.bridge).as_ref().is_some_and(|b| b.sink.is_open())
    }

    /// Send a command to the bridge; dropped when no bridge is attached.
    pub fn send_to_bridge(&self, command: BridgeCommand) -> bool {
        match lock(&self.bridge).as_ref() {
            Some(bridge) => bridge.sink.send(command).is_ok(),
            None => false,
        }
    }

    /// Attach a viewer unless one is already attached.
    ///
    /// # Returns
    /// The link id, or `None` if the viewer was rejected.
    pub fn attach_viewer(&self, sink: Box<dyn MessageSink<ViewerMessage>>, now: Instant) -> Option<u64> {
        let mut viewer = lock(&self.viewer);
        if viewer.as_ref().is_some_and(|v| v.sink.is_open()) {
            return None;
        }

        let id = self.next_link_id();
        *viewer = Some(ViewerLink::new(id, sink, self.config.heartbeat_timeout(), now));
        Some(id)
    }

    /// Drop the viewer link if it is still `id`.
    ///
    /// # Returns
    /// True if the link was dropped.
    pub fn detach_viewer(&self, id: u64) -> bool {
        let mut viewer = lock(&self.viewer);
        if viewer.as_ref().is_some_and(|v| v.id == id) {
            *viewer = None;
            return true;
        }
        false
    }

    pub fn viewer_connected(&self) -> bool {
        lock(&self.viewer).is_some()
    }

    /// Run `f` on the viewer link, if any.
    pub fn with_viewer<R>(&self, f: impl FnOnce(&mut ViewerLink) -> R) -> Option<R> {
        lock(&self.viewer).as_mut().map(f)
    }

    /// Send a message to the viewer; dropped when no viewer is attached.
    pub fn send_to_viewer(&self, message: ViewerMessage) -> bool {
        self.with_viewer(|v| v.sink.send(message).is_ok())
            .unwrap_or(false)
    }

    pub fn status(&self) -> HostStatus {
        let session = lock(&self.session);
        HostStatus {
            event_name: session.event_name().map(str::to_string),
            player_time_seconds: session.player_time_seconds(),
            seen_comments: session.seen_count(),
            merged: session.is_merged(),
            bridge_connected: self.bridge_connected(),
            viewer_connected: self.viewer_connected(),
            pending_posts: lock(&self.pending_posts).len(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("asplayd=info".parse()?),
        )
        .init();

    info!("Starting asplayd v{}", env!("CARGO_PKG_VERSION"));

    let state = Arc::new(HostState::new()?);

    // Remove stale sockets
    for socket_path in [
        state.bridge_socket_path(),
        state.viewer_socket_path(),
        state.control_socket_path(),
    ] {
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }
    }

    tokio::spawn(background::viewer_heartbeat_task(Arc::clone(&state)));
    tokio::spawn(background::post_verification_task(Arc::clone(&state)));

    server::run(state).await
}
