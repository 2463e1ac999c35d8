//! The page as seen through its snapshots
//!
//! The page script writes one snapshot per line whenever it rescrapes:
//!
//! ```json
//! {"title":"Live | ASOBISTAGE | アソビストア","path":"/events/live/day1",
//!  "comments":[{"nickname":"A","comment":"hello"}],"currentTimeSeconds":12.5}
//! ```
//!
//! `currentTimeSeconds` is absent on live pages.

use serde::Deserialize;
use tracing::info;

use asplay_core::bridge::{CommentPoller, CommentSource, PlayerClock};
use asplay_core::{BridgeCommand, RawComment};

/// One scrape of the page.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub comments: Vec<RawComment>,
    #[serde(default)]
    pub current_time_seconds: Option<f64>,
}

/// What the page script should do, written to stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum PageAction {
    Forward(BridgeCommand),
    Ignore,
}

/// Latest page state, read by the pollers.
#[derive(Debug, Default)]
pub struct Page {
    snapshot: PageSnapshot,
}

impl Page {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the page state; tells `poller` when the event page changed.
    pub fn apply(&mut self, snapshot: PageSnapshot, poller: &mut CommentPoller) {
        let page_changed = snapshot.title != self.snapshot.title || snapshot.path != self.snapshot.path;
        self.snapshot = snapshot;

        if page_changed {
            poller.set_page(&self.snapshot.title, &self.snapshot.path);
            info!("Page changed: {:?}", poller.event_name());
        }
    }

    /// Apply a host command to the local state and decide what the page gets.
    pub fn handle_command(&mut self, command: BridgeCommand) -> PageAction {
        match command {
            BridgeCommand::SetPlayerCurrentTime { seconds } => {
                if self.snapshot.current_time_seconds.is_none() {
                    // Live pages cannot seek
                    return PageAction::Ignore;
                }
                self.seek(seconds as f64);
                PageAction::Forward(BridgeCommand::SetPlayerCurrentTime { seconds })
            }
            other => PageAction::Forward(other),
        }
    }
}

impl CommentSource for Page {
    fn produce_latest_comments(&self) -> Vec<RawComment> {
        self.snapshot.comments.clone()
    }
}

impl PlayerClock for Page {
    fn current_time(&self) -> Option<f64> {
        self.snapshot.current_time_seconds
    }

    /// Assume the seek took effect until the next snapshot says otherwise.
    fn seek(&mut self, seconds: f64) {
        self.snapshot.current_time_seconds = Some(seconds);
    }
}
