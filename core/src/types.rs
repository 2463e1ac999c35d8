//! Core data types for as-playground
//!
//! These types are shared between the bridge, the host daemon, and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::comment_id;

/// Playback position of a comment captured during a live broadcast.
pub const TIME_UNKNOWN: i64 = -1;

/// Playback position of a comment known to precede the start of the archive video.
pub const TIME_PRE_BROADCAST: i64 = -2;

/// Nickname color used when the scraped record carries none.
pub const DEFAULT_NICKNAME_COLOR: &str = "#000000";

/// A captured comment, as stored and as exported.
///
/// # Fields
/// - `id`: Identity digest of (event name, nickname, comment text).
/// - `event_name`: Broadcast the comment belongs to.
/// - `nickname`: Poster nickname.
/// - `nickname_color`: CSS color of the nickname.
/// - `comment`: Comment text.
/// - `time_seconds`: Offset into the archive video, or a sentinel
///   (`TIME_UNKNOWN`, `TIME_PRE_BROADCAST`).
/// - `registered_date`: Wall-clock time the comment was first captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub event_name: String,
    pub nickname: String,
    pub nickname_color: String,
    pub comment: String,
    pub time_seconds: i64,
    #[serde(with = "flexible_date")]
    pub registered_date: DateTime<Utc>,
}

impl Comment {
    /// Build a comment, deriving its identity from the content.
    pub fn new(
        event_name: impl Into<String>,
        nickname: impl Into<String>,
        nickname_color: impl Into<String>,
        comment: impl Into<String>,
        time_seconds: i64,
        registered_date: DateTime<Utc>,
    ) -> Self {
        let event_name = event_name.into();
        let nickname = nickname.into();
        let comment = comment.into();
        Self {
            id: comment_id(&event_name, &nickname, &comment),
            event_name,
            nickname,
            nickname_color: nickname_color.into(),
            comment,
            time_seconds,
            registered_date,
        }
    }

    /// Whether the comment carries a real video-relative position.
    pub fn has_known_time(&self) -> bool {
        self.time_seconds >= 0
    }

    /// Whether two comments are the same utterance (nickname and text).
    pub fn same_utterance(&self, other: &Comment) -> bool {
        self.nickname == other.nickname && self.comment == other.comment
    }
}

/// One record produced by the comment source (the scraped comment list).
///
/// Any field may be missing; records without a nickname or text are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawComment {
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub nickname_color: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default, with = "flexible_date::option")]
    pub registered_date: Option<DateTime<Utc>>,
}

impl RawComment {
    /// Convenience constructor used by sources and tests.
    pub fn new(nickname: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            nickname: Some(nickname.into()),
            comment: Some(comment.into()),
            ..Default::default()
        }
    }

    /// Attach a capture date.
    pub fn at(mut self, registered_date: DateTime<Utc>) -> Self {
        self.registered_date = Some(registered_date);
        self
    }

    /// Attach a nickname color.
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.nickname_color = Some(color.into());
        self
    }

    /// Nickname and text, if both are present and non-empty.
    pub fn content(&self) -> Option<(&str, &str)> {
        let nickname = self.nickname.as_deref().filter(|s| !s.is_empty())?;
        let comment = self.comment.as_deref().filter(|s| !s.is_empty())?;
        Some((nickname, comment))
    }
}

/// Kind of page the bridge is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageType {
    RealtimePlayPage,
    ArchivePlayPage,
    Unknown,
}

impl PageType {
    /// Archive pages expose a playback position, live pages do not.
    pub fn from_current_time(current_time_seconds: Option<f64>) -> Self {
        match current_time_seconds {
            Some(t) if t.is_finite() => PageType::ArchivePlayPage,
            _ => PageType::RealtimePlayPage,
        }
    }

    /// Return the string representation used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::RealtimePlayPage => "REALTIME_PLAY_PAGE",
            PageType::ArchivePlayPage => "ARCHIVE_PLAY_PAGE",
            PageType::Unknown => "UNKNOWN",
        }
    }
}

/// Dates arrive either as RFC 3339 strings or as epoch milliseconds.
pub(crate) mod flexible_date {
    use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DateRepr {
        Millis(i64),
        FloatMillis(f64),
        Text(String),
    }

    fn from_repr<E: de::Error>(repr: DateRepr) -> Result<DateTime<Utc>, E> {
        match repr {
            DateRepr::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| E::custom(format!("timestamp out of range: {}", ms))),
            DateRepr::FloatMillis(ms) => Utc
                .timestamp_millis_opt(ms.floor() as i64)
                .single()
                .ok_or_else(|| E::custom(format!("timestamp out of range: {}", ms))),
            DateRepr::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| E::custom(format!("invalid date {:?}: {}", text, e))),
        }
    }

    pub fn serialize<S: Serializer>(date: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&date.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        from_repr(DateRepr::deserialize(d)?)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            date: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match date {
                Some(date) => super::serialize(date, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<DateRepr>::deserialize(d)? {
                Some(repr) => from_repr(repr).map(Some),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_comment_json_shape() {
        let date = Utc.with_ymd_and_hms(2022, 3, 1, 12, 0, 0).unwrap();
        let comment = Comment::new("EventA", "Alice", "#ff0000", "hi", 42, date);

        let value = serde_json::to_value(&comment).unwrap();
        assert_eq!(value["eventName"], "EventA");
        assert_eq!(value["nicknameColor"], "#ff0000");
        assert_eq!(value["timeSeconds"], 42);
        assert_eq!(value["registeredDate"], "2022-03-01T12:00:00.000Z");
    }

    #[test]
    fn test_registered_date_accepts_millis() {
        let json = r##"{
            "id": "x", "eventName": "E", "nickname": "n", "nicknameColor": "#000000",
            "comment": "c", "timeSeconds": -1, "registeredDate": 1646136000000
        }"##;
        let comment: Comment = serde_json::from_str(json).unwrap();
        assert_eq!(
            comment.registered_date,
            Utc.with_ymd_and_hms(2022, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_raw_comment_content() {
        assert!(RawComment::new("A", "hello").content().is_some());
        assert!(RawComment::new("", "hello").content().is_none());
        assert!(RawComment {
            nickname: Some("A".into()),
            ..Default::default()
        }
        .content()
        .is_none());
    }

    #[test]
    fn test_page_type_from_current_time() {
        assert_eq!(PageType::from_current_time(Some(12.5)), PageType::ArchivePlayPage);
        assert_eq!(PageType::from_current_time(None), PageType::RealtimePlayPage);
        assert_eq!(PageType::from_current_time(Some(f64::NAN)), PageType::RealtimePlayPage);
    }
}
