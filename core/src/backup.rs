//! Per-event JSON backup (export and import)
//!
//! A backup document holds the comments of one event:
//!
//! ```json
//! { "eventName": "...", "comments": [ { "nickname": "...", ... } ] }
//! ```
//!
//! Import validates the whole document before touching the store, then
//! replaces the event's comments in a single transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::error::Result;
use crate::identity::comment_id;
use crate::store::CommentStore;
use crate::types::{flexible_date, Comment, DEFAULT_NICKNAME_COLOR, TIME_UNKNOWN};

/// Why a backup document was rejected. Field paths look like `comments[3].nickname`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImportError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Invalid field {field}: {message}")]
    InvalidField { field: String, message: String },
}

/// The comments of one event, as exported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBackup {
    pub event_name: String,
    pub comments: Vec<Comment>,
}

/// What an import did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub event_name: String,
    pub imported: usize,
    pub replaced: usize,
}

/// A comment as it may appear in a backup; everything but the content is optional.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupComment {
    id: Option<String>,
    event_name: Option<String>,
    nickname: Option<String>,
    nickname_color: Option<String>,
    comment: Option<String>,
    time_seconds: Option<i64>,
    #[serde(default, with = "flexible_date::option")]
    registered_date: Option<DateTime<Utc>>,
}

/// Export all stored comments of an event.
pub fn export_event(store: &dyn CommentStore, event_name: &str) -> Result<EventBackup> {
    Ok(EventBackup {
        event_name: event_name.to_string(),
        comments: store.comments_by_event(event_name)?,
    })
}

/// Serialize a backup as pretty-printed JSON.
pub fn to_json(backup: &EventBackup) -> Result<String> {
    Ok(serde_json::to_string_pretty(backup)?)
}

/// Parse and validate a backup document.
///
/// Every comment is assigned to the document's event. Comments missing an
/// `id`, or moved from another event, get one computed. A missing `timeSeconds` means unknown position and
/// a missing `registeredDate` means now.
pub fn parse_backup(json: &str) -> std::result::Result<EventBackup, ImportError> {
    parse_backup_at(json, Utc::now())
}

/// `parse_backup` with an explicit import time.
pub fn parse_backup_at(
    json: &str,
    now: DateTime<Utc>,
) -> std::result::Result<EventBackup, ImportError> {
    let document: Value =
        serde_json::from_str(json).map_err(|e| ImportError::InvalidJson(e.to_string()))?;

    let event_name = match document.get("eventName") {
        Some(Value::String(name)) if !name.is_empty() => name.clone(),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            return Err(ImportError::MissingField("eventName".to_string()))
        }
        Some(_) => {
            return Err(ImportError::InvalidField {
                field: "eventName".to_string(),
                message: "expected a string".to_string(),
            })
        }
    };

    let entries = match document.get("comments") {
        Some(Value::Array(entries)) => entries,
        None | Some(Value::Null) => {
            return Err(ImportError::MissingField("comments".to_string()))
        }
        Some(_) => {
            return Err(ImportError::InvalidField {
                field: "comments".to_string(),
                message: "expected an array".to_string(),
            })
        }
    };

    let mut comments = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let field = |name: &str| format!("comments[{}].{}", index, name);

        let raw: BackupComment =
            serde_json::from_value(entry.clone()).map_err(|e| ImportError::InvalidField {
                field: format!("comments[{}]", index),
                message: e.to_string(),
            })?;

        let nickname = raw
            .nickname
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ImportError::MissingField(field("nickname")))?;
        let text = raw
            .comment
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ImportError::MissingField(field("comment")))?;

        let moved = raw.event_name.as_deref().is_some_and(|other| other != event_name);
        if moved {
            tracing::warn!(
                "Comment {} belongs to {:?}, importing into {:?}",
                index,
                raw.event_name,
                event_name
            );
        }

        // A moved comment gets the id of its new event
        let id = raw
            .id
            .filter(|s| !s.is_empty() && !moved)
            .unwrap_or_else(|| comment_id(&event_name, &nickname, &text));

        comments.push(Comment {
            id,
            event_name: event_name.clone(),
            nickname,
            nickname_color: raw
                .nickname_color
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_NICKNAME_COLOR.to_string()),
            comment: text,
            time_seconds: raw.time_seconds.unwrap_or(TIME_UNKNOWN),
            registered_date: raw.registered_date.unwrap_or(now),
        });
    }

    Ok(EventBackup {
        event_name,
        comments,
    })
}

/// Replace the stored comments of the backup's event with its contents.
pub fn import_backup(store: &dyn CommentStore, backup: &EventBackup) -> Result<ImportSummary> {
    let replaced = store.comments_by_event(&backup.event_name)?.len();
    store.replace_event(&backup.event_name, &backup.comments)?;

    let imported = store.comments_by_event(&backup.event_name)?.len();
    info!(
        "Imported {} comments into {:?} (replaced {})",
        imported, backup.event_name, replaced
    );

    Ok(ImportSummary {
        event_name: backup.event_name.clone(),
        imported,
        replaced,
    })
}
