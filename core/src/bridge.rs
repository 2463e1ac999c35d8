//! Page-side polling
//!
//! The bridge runs next to the streaming page. Two tickers read it: the
//! comment poller rereads the whole visible comment list, and the player
//! poller reports the playback position when it changes. Both are plain
//! functions of the page state so they can be driven without timers.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::relay::BridgeEvent;
use crate::types::RawComment;

/// Interval between comment list reads.
pub const COMMENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between player position reads.
pub const PLAYER_POLL_INTERVAL: Duration = Duration::from_millis(500);

const TITLE_SUFFIX: &str = " | ASOBISTAGE | アソビストア";

/// The scraped comment list.
pub trait CommentSource {
    /// All currently visible comments, newest first.
    fn produce_latest_comments(&self) -> Vec<RawComment>;
}

/// The video player.
pub trait PlayerClock {
    /// Playback position in seconds; `None` on live pages.
    fn current_time(&self) -> Option<f64>;

    fn seek(&mut self, seconds: f64);
}

/// Event name from the page title and URL path.
///
/// The site suffix is removed from the title, and the last path segment
/// (letters, digits, `_`) is appended so that the parts of a multi-day
/// event get distinct names.
pub fn derive_event_name(title: &str, path: &str) -> String {
    static LAST_SEGMENT: OnceLock<Regex> = OnceLock::new();
    let last_segment = LAST_SEGMENT
        .get_or_init(|| Regex::new(r"/([a-zA-Z0-9_]+)/?$").expect("valid regex"));

    let mut name = title.replace(TITLE_SUFFIX, "");
    if let Some(caps) = last_segment.captures(path) {
        name.push(' ');
        name.push_str(&caps[1]);
    }
    name
}

/// Produces `COMMENTS_RECEIVED` from the comment list.
#[derive(Debug, Default)]
pub struct CommentPoller {
    event_name: Option<String>,
}

impl CommentPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the event name after the page changed.
    pub fn set_page(&mut self, title: &str, path: &str) {
        self.event_name = Some(derive_event_name(title, path));
    }

    pub fn event_name(&self) -> Option<&str> {
        self.event_name.as_deref()
    }

    /// Read the page once; nothing is sent while the list is empty.
    pub fn tick(&self, source: &dyn CommentSource, clock: &dyn PlayerClock) -> Option<BridgeEvent> {
        let comments = source.produce_latest_comments();
        if comments.is_empty() {
            return None;
        }

        Some(BridgeEvent::CommentsReceived {
            event_name: self.event_name.clone(),
            comments,
            current_time_seconds: clock.current_time(),
        })
    }
}

/// Produces `PLAYER_CURRENT_TIME_CHANGED` when the position moves.
#[derive(Debug, Default)]
pub struct PlayerTimePoller {
    last: Option<f64>,
}

impl PlayerTimePoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self, clock: &dyn PlayerClock) -> Option<BridgeEvent> {
        // A zero position means the player has not started
        let current = clock.current_time().filter(|t| t.is_finite() && *t != 0.0)?;
        if self.last == Some(current) {
            return None;
        }

        self.last = Some(current);
        Some(BridgeEvent::PlayerCurrentTimeChanged {
            current_time_seconds: current,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakePage {
        comments: Vec<RawComment>,
        time: Option<f64>,
    }

    impl CommentSource for FakePage {
        fn produce_latest_comments(&self) -> Vec<RawComment> {
            self.comments.clone()
        }
    }

    impl PlayerClock for FakePage {
        fn current_time(&self) -> Option<f64> {
            self.time
        }

        fn seek(&mut self, seconds: f64) {
            self.time = Some(seconds);
        }
    }

    #[test]
    fn test_derive_event_name() {
        assert_eq!(
            derive_event_name(
                "THE IDOLM@STER LIVE | ASOBISTAGE | アソビストア",
                "/event/idolmaster_live/day1"
            ),
            "THE IDOLM@STER LIVE day1"
        );
        assert_eq!(
            derive_event_name("Show | ASOBISTAGE | アソビストア", "/event/show_2022/"),
            "Show show_2022"
        );
        assert_eq!(derive_event_name("Plain", "/"), "Plain");
    }

    #[test]
    fn test_comment_poller() {
        let mut poller = CommentPoller::new();
        poller.set_page("Show | ASOBISTAGE | アソビストア", "/event/day1");

        let empty = FakePage {
            comments: vec![],
            time: None,
        };
        assert!(poller.tick(&empty, &empty).is_none());

        let page = FakePage {
            comments: vec![RawComment::new("A", "hi")],
            time: Some(12.0),
        };
        assert_eq!(
            poller.tick(&page, &page),
            Some(BridgeEvent::CommentsReceived {
                event_name: Some("Show day1".into()),
                comments: vec![RawComment::new("A", "hi")],
                current_time_seconds: Some(12.0),
            })
        );
    }

    #[test]
    fn test_player_poller_reports_changes_only() {
        let mut poller = PlayerTimePoller::new();
        let mut page = FakePage {
            comments: vec![],
            time: None,
        };

        assert!(poller.tick(&page).is_none());

        page.seek(10.0);
        assert!(poller.tick(&page).is_some());
        assert!(poller.tick(&page).is_none());

        page.seek(10.5);
        assert_eq!(
            poller.tick(&page),
            Some(BridgeEvent::PlayerCurrentTimeChanged {
                current_time_seconds: 10.5
            })
        );
    }
}
