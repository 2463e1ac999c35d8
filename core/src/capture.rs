//! Live capture session
//!
//! The comment source rereads the whole visible comment list on every poll,
//! so the same comments arrive again and again (more so when the list is
//! scrolled). A `CaptureSession` remembers which ids it has already seen for
//! the current event and turns each scraped batch into just the new comments.
//!
//! The session lives as long as the host is attached to one event. Changing
//! event, or seeking the archive player, clears what has been seen.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::identity::comment_id;
use crate::types::{Comment, RawComment, DEFAULT_NICKNAME_COLOR, TIME_UNKNOWN};

/// Jump in playback position (seconds) treated as a seek.
pub const SEEK_THRESHOLD_SECONDS: i64 = 3;

/// Per-event capture state.
#[derive(Debug, Default)]
pub struct CaptureSession {
    event_name: Option<String>,
    seen: HashMap<String, Comment>,
    latest: Vec<Comment>,
    player_time_seconds: Option<i64>,
    merged: bool,
}

impl CaptureSession {
    /// Create an empty session (no event yet).
    pub fn new() -> Self {
        Self::default()
    }

    /// Event the session is currently attached to.
    pub fn event_name(&self) -> Option<&str> {
        self.event_name.as_deref()
    }

    /// Number of distinct comments seen since the last reset.
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// The last non-empty batch of new comments.
    pub fn latest(&self) -> &[Comment] {
        &self.latest
    }

    /// Last observed playback position.
    pub fn player_time_seconds(&self) -> Option<i64> {
        self.player_time_seconds
    }

    /// Comments seen in this session that carry a real playback position.
    pub fn known_time_comments(&self) -> Vec<Comment> {
        let mut comments: Vec<Comment> = self
            .seen
            .values()
            .filter(|c| c.has_known_time())
            .cloned()
            .collect();
        comments.sort_by(|a, b| {
            a.time_seconds
                .cmp(&b.time_seconds)
                .then(a.registered_date.cmp(&b.registered_date))
        });
        comments
    }

    /// Whether a realtime/archive merge already succeeded for this event.
    pub fn is_merged(&self) -> bool {
        self.merged
    }

    /// Record that the merge for this event succeeded.
    pub fn mark_merged(&mut self) {
        self.merged = true;
    }

    /// Switch to `event_name`, dropping all state if it differs.
    ///
    /// # Returns
    /// True if the event changed.
    pub fn switch_event(&mut self, event_name: &str) -> bool {
        if self.event_name.as_deref() == Some(event_name) {
            return false;
        }

        debug!("Capture session switching to event {:?}", event_name);
        self.event_name = Some(event_name.to_string());
        self.seen.clear();
        self.latest.clear();
        self.merged = false;
        true
    }

    /// Filter a scraped batch down to comments not seen before.
    ///
    /// # Arguments
    ///
    /// * `raw_comments` - Scraped records, newest first
    /// * `event_name` - Event the records belong to
    /// * `current_time_seconds` - Playback position for archive pages, `None` when live
    /// * `now` - Capture time for records that carry none
    ///
    /// # Returns
    ///
    /// The new comments, oldest first
    pub fn ingest(
        &mut self,
        raw_comments: &[RawComment],
        event_name: &str,
        current_time_seconds: Option<f64>,
        now: DateTime<Utc>,
    ) -> Vec<Comment> {
        self.switch_event(event_name);

        let time_seconds = match current_time_seconds {
            Some(t) if t.is_finite() => t.floor() as i64,
            _ => TIME_UNKNOWN,
        };

        let mut new_comments = Vec::new();
        for raw in raw_comments.iter().rev() {
            let Some((nickname, text)) = raw.content() else {
                continue;
            };

            let id = comment_id(event_name, nickname, text);
            if self.seen.contains_key(&id) {
                continue;
            }

            let comment = Comment {
                id: id.clone(),
                event_name: event_name.to_string(),
                nickname: nickname.to_string(),
                nickname_color: raw
                    .nickname_color
                    .clone()
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| DEFAULT_NICKNAME_COLOR.to_string()),
                comment: text.to_string(),
                time_seconds,
                registered_date: raw.registered_date.unwrap_or(now),
            };

            self.seen.insert(id, comment.clone());
            new_comments.push(comment);
        }

        if !new_comments.is_empty() {
            self.latest = new_comments.clone();
        }

        new_comments
    }

    /// Record a playback position reported by the player.
    ///
    /// A jump of `SEEK_THRESHOLD_SECONDS` or more is a seek: the seen set is
    /// cleared so that comments shown again after the seek are re-observed.
    ///
    /// # Returns
    /// True if the position change was treated as a seek.
    pub fn observe_player_time(&mut self, current_time_seconds: f64) -> bool {
        if !current_time_seconds.is_finite() {
            return false;
        }

        let current = current_time_seconds.floor() as i64;
        let seeked = matches!(
            self.player_time_seconds,
            Some(previous) if (previous - current).abs() >= SEEK_THRESHOLD_SECONDS
        );

        if seeked {
            debug!(
                "Seek detected ({:?} -> {}), resetting seen comments",
                self.player_time_seconds, current
            );
            self.seen.clear();
        }

        self.player_time_seconds = Some(current);
        seeked
    }
}
