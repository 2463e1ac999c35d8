//! Comment volume per minute of playback

use serde::{Deserialize, Serialize};

use crate::timecode::format_hh_mm;
use crate::types::Comment;

/// Number of comments posted during one minute of the archive video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinuteBucket {
    pub minute_start_seconds: i64,
    /// `HH:MM` of the minute start
    pub label: String,
    pub count: usize,
}

/// Count comments with a known position per minute, in playback order.
///
/// Minutes without comments are not included.
pub fn comments_per_minute(comments: &[Comment]) -> Vec<MinuteBucket> {
    let mut minutes: Vec<i64> = comments
        .iter()
        .filter(|c| c.has_known_time())
        .map(|c| c.time_seconds.div_euclid(60) * 60)
        .collect();
    minutes.sort_unstable();

    let mut buckets: Vec<MinuteBucket> = Vec::new();
    for minute in minutes {
        match buckets.last_mut() {
            Some(last) if last.minute_start_seconds == minute => last.count += 1,
            _ => buckets.push(MinuteBucket {
                minute_start_seconds: minute,
                label: format_hh_mm(minute),
                count: 1,
            }),
        }
    }

    buckets
}

/// The busiest minute, earliest first on ties.
pub fn peak_minute(buckets: &[MinuteBucket]) -> Option<&MinuteBucket> {
    buckets
        .iter()
        .fold(None, |best: Option<&MinuteBucket>, b| match best {
            Some(best) if best.count >= b.count => Some(best),
            _ => Some(b),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TIME_UNKNOWN;
    use chrono::{TimeZone, Utc};

    fn at(text: &str, time_seconds: i64) -> Comment {
        Comment::new(
            "EventA",
            "A",
            "#000000",
            text,
            time_seconds,
            Utc.with_ymd_and_hms(2022, 3, 1, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_comments_per_minute() {
        let comments = vec![
            at("a", 130),
            at("b", 5),
            at("c", 59),
            at("d", 3605),
            at("e", TIME_UNKNOWN),
        ];

        let buckets = comments_per_minute(&comments);
        assert_eq!(
            buckets,
            vec![
                MinuteBucket {
                    minute_start_seconds: 0,
                    label: "00:00".into(),
                    count: 2
                },
                MinuteBucket {
                    minute_start_seconds: 120,
                    label: "00:02".into(),
                    count: 1
                },
                MinuteBucket {
                    minute_start_seconds: 3600,
                    label: "01:00".into(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn test_peak_minute() {
        let buckets = comments_per_minute(&[at("a", 0), at("b", 61), at("c", 62)]);
        assert_eq!(peak_minute(&buckets).unwrap().minute_start_seconds, 60);
        assert!(peak_minute(&[]).is_none());
    }
}
