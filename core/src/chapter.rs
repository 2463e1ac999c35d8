//! Chapter extraction from song announcement comments
//!
//! During a broadcast an operator account with the nickname `♪` posts the
//! title and credits of each song as it starts, e.g.
//! `「Song」 作詞：... 作曲：...`. Those comments, with their playback
//! position, make a chapter list for the archive.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::Comment;

/// How far before the announcement a chapter seeks when songs are close together.
pub const SEEK_OFFSET_SECONDS: i64 = 4 * 60;

/// Announcements at most this far apart get the earlier seek position.
pub const CLOSE_GAP_SECONDS: i64 = 2 * 60;

/// Lead-in applied when jumping to a chapter.
pub const SEEK_LEAD_IN_SECONDS: i64 = 20;

/// A song chapter of an archive video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub name: String,
    pub time_seconds: i64,
    pub seek_time_seconds: i64,
}

impl Chapter {
    /// Player position to seek to when this chapter is chosen.
    pub fn seek_target(&self) -> i64 {
        (self.seek_time_seconds - SEEK_LEAD_IN_SECONDS).max(0)
    }
}

struct Patterns {
    nickname: Regex,
    from_work: Regex,
    title_only: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        nickname: Regex::new(r"^\s*♪\s*$").expect("valid regex"),
        // 「Work」 より 「Song」 作詞
        from_work: Regex::new(r"^\s*「.+」.*より\s*「(.+)」\s*作詞").expect("valid regex"),
        title_only: Regex::new(r"^\s*「(.+)」\s*作詞").expect("valid regex"),
    })
}

/// Song title announced by a comment, if it is an announcement.
pub fn song_title(comment: &Comment) -> Option<String> {
    let patterns = patterns();
    if !patterns.nickname.is_match(&comment.nickname) {
        return None;
    }
    // Tracklist posts name several songs at once
    if comment.comment.contains("収録曲") {
        return None;
    }

    patterns
        .from_work
        .captures(&comment.comment)
        .or_else(|| patterns.title_only.captures(&comment.comment))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Build the chapter list of an event from its comments.
///
/// Comments without a playback position are ignored. Each title appears
/// once, at its first announcement.
pub fn extract_chapters(comments: &[Comment]) -> Vec<Chapter> {
    let mut sorted: Vec<&Comment> = comments.iter().filter(|c| c.has_known_time()).collect();
    sorted.sort_by_key(|c| c.time_seconds);

    let mut chapters: Vec<Chapter> = Vec::new();
    for comment in sorted {
        let Some(name) = song_title(comment) else {
            continue;
        };
        if chapters.iter().any(|c| c.name == name) {
            continue;
        }
        chapters.push(Chapter {
            name,
            time_seconds: comment.time_seconds,
            seek_time_seconds: comment.time_seconds,
        });
    }

    let next_times: Vec<Option<i64>> = chapters
        .iter()
        .skip(1)
        .map(|c| Some(c.time_seconds))
        .chain(std::iter::once(None))
        .collect();

    for (chapter, next) in chapters.iter_mut().zip(next_times) {
        chapter.seek_time_seconds = match next {
            None => chapter.time_seconds.div_euclid(60) * 60,
            Some(next) if next - chapter.time_seconds <= CLOSE_GAP_SECONDS => {
                (chapter.time_seconds - SEEK_OFFSET_SECONDS).max(0)
            }
            Some(_) => chapter.time_seconds,
        };
    }

    chapters
}
