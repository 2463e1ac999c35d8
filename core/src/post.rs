//! Verification of comments posted from the viewer
//!
//! Posting goes through the page, which gives no acknowledgement. A post
//! counts as confirmed when a comment with the same nickname and text shows
//! up in the captured stream within `POST_CONFIRM_WINDOW`. This is a
//! heuristic: someone else posting the same text under the same nickname
//! also confirms it.

use std::time::{Duration, Instant};

use crate::types::Comment;

/// How long a post may stay unconfirmed before it is reported as lost.
pub const POST_CONFIRM_WINDOW: Duration = Duration::from_secs(10);

/// A post forwarded to the bridge and not yet seen in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPost {
    pub nickname: String,
    pub comment: String,
    pub requested_at: Instant,
}

/// Posts awaiting confirmation, oldest first.
#[derive(Debug)]
pub struct PendingPosts {
    window: Duration,
    pending: Vec<PendingPost>,
}

impl Default for PendingPosts {
    fn default() -> Self {
        Self::new(POST_CONFIRM_WINDOW)
    }
}

impl PendingPosts {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn register(&mut self, nickname: &str, comment: &str, now: Instant) {
        self.pending.push(PendingPost {
            nickname: nickname.to_string(),
            comment: comment.to_string(),
            requested_at: now,
        });
    }

    /// Confirm pending posts that appear among `comments`.
    ///
    /// Each captured comment confirms at most one post.
    pub fn observe(&mut self, comments: &[Comment]) -> Vec<PendingPost> {
        let mut confirmed = Vec::new();
        for comment in comments {
            if let Some(index) = self
                .pending
                .iter()
                .position(|p| p.nickname == comment.nickname && p.comment == comment.comment)
            {
                confirmed.push(self.pending.remove(index));
            }
        }
        confirmed
    }

    /// Remove and return posts older than the window.
    pub fn expire(&mut self, now: Instant) -> Vec<PendingPost> {
        let window = self.window;
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|p| now.saturating_duration_since(p.requested_at) > window);
        self.pending = kept;
        expired
    }
}
