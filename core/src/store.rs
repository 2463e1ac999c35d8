//! Comment store
//!
//! `CommentStore` is the interface the rest of the system uses for persisted
//! comments: a keyed table (by comment id) queried per event. The SQLite
//! implementation below is the one the host and the CLI use.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::debug;

use crate::error::{Error, Result};
use crate::schema::init_schema;
use crate::types::{Comment, TIME_UNKNOWN};

/// Persistent storage of comments keyed by id.
pub trait CommentStore: Send + Sync {
    /// Insert or replace a comment by id.
    fn upsert(&self, comment: &Comment) -> Result<()>;

    /// Insert or replace several comments in one transaction.
    fn upsert_many(&self, comments: &[Comment]) -> Result<usize>;

    /// Fetch a single comment by id.
    fn get(&self, id: &str) -> Result<Option<Comment>>;

    /// All comments for an event, ordered by playback position then capture date.
    fn comments_by_event(&self, event_name: &str) -> Result<Vec<Comment>>;

    /// Comments for an event captured without a playback position.
    fn unknown_time_comments(&self, event_name: &str) -> Result<Vec<Comment>>;

    /// Comments for an event whose position lies in `[from_seconds, to_seconds]`.
    fn comments_in_time_range(
        &self,
        event_name: &str,
        from_seconds: i64,
        to_seconds: i64,
    ) -> Result<Vec<Comment>>;

    /// Distinct event names, sorted.
    fn event_names(&self) -> Result<Vec<String>>;

    /// Delete all comments of an event, returning how many were removed.
    fn clear_event(&self, event_name: &str) -> Result<usize>;

    /// Atomically replace all comments of an event.
    fn replace_event(&self, event_name: &str, comments: &[Comment]) -> Result<usize>;

    /// Total number of stored comments.
    fn count(&self) -> Result<u64>;
}

const SELECT_COLUMNS: &str =
    "SELECT id, event_name, nickname, nickname_color, comment, time_seconds, registered_date
     FROM comments";

const UPSERT_SQL: &str = "INSERT INTO comments (
        id, event_name, nickname, nickname_color, comment, time_seconds, registered_date
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT(id) DO UPDATE SET
        event_name = excluded.event_name,
        nickname = excluded.nickname,
        nickname_color = excluded.nickname_color,
        comment = excluded.comment,
        time_seconds = excluded.time_seconds,
        registered_date = excluded.registered_date";

/// SQLite-backed comment store.
pub struct SqliteCommentStore {
    conn: Mutex<Connection>,
}

impl SqliteCommentStore {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        debug!("Comment store opened at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (tests, dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Other("Comment store lock poisoned".to_string()))
    }

    fn query(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Comment>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let comments = stmt
            .query_map(params, comment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(comments)
    }
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    let registered_ms: i64 = row.get(6)?;
    Ok(Comment {
        id: row.get(0)?,
        event_name: row.get(1)?,
        nickname: row.get(2)?,
        nickname_color: row.get(3)?,
        comment: row.get(4)?,
        time_seconds: row.get(5)?,
        registered_date: DateTime::<Utc>::from_timestamp_millis(registered_ms).unwrap_or_default(),
    })
}

fn upsert_with(conn: &Connection, comment: &Comment) -> rusqlite::Result<usize> {
    conn.execute(
        UPSERT_SQL,
        params![
            comment.id,
            comment.event_name,
            comment.nickname,
            comment.nickname_color,
            comment.comment,
            comment.time_seconds,
            comment.registered_date.timestamp_millis(),
        ],
    )
}

impl CommentStore for SqliteCommentStore {
    fn upsert(&self, comment: &Comment) -> Result<()> {
        let conn = self.lock()?;
        upsert_with(&conn, comment)?;
        Ok(())
    }

    fn upsert_many(&self, comments: &[Comment]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for comment in comments {
            upsert_with(&tx, comment)?;
        }
        tx.commit()?;
        Ok(comments.len())
    }

    fn get(&self, id: &str) -> Result<Option<Comment>> {
        let sql = format!("{} WHERE id = ?1", SELECT_COLUMNS);
        Ok(self.query(&sql, &[&id])?.into_iter().next())
    }

    fn comments_by_event(&self, event_name: &str) -> Result<Vec<Comment>> {
        let sql = format!(
            "{} WHERE event_name = ?1 ORDER BY time_seconds ASC, registered_date ASC",
            SELECT_COLUMNS
        );
        self.query(&sql, &[&event_name])
    }

    fn unknown_time_comments(&self, event_name: &str) -> Result<Vec<Comment>> {
        let sql = format!(
            "{} WHERE event_name = ?1 AND time_seconds = ?2 ORDER BY registered_date ASC",
            SELECT_COLUMNS
        );
        self.query(&sql, &[&event_name, &TIME_UNKNOWN])
    }

    fn comments_in_time_range(
        &self,
        event_name: &str,
        from_seconds: i64,
        to_seconds: i64,
    ) -> Result<Vec<Comment>> {
        let sql = format!(
            "{} WHERE event_name = ?1 AND time_seconds BETWEEN ?2 AND ?3
             ORDER BY time_seconds ASC, registered_date ASC",
            SELECT_COLUMNS
        );
        self.query(&sql, &[&event_name, &from_seconds, &to_seconds])
    }

    fn event_names(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT event_name FROM comments ORDER BY event_name ASC")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn clear_event(&self, event_name: &str) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM comments WHERE event_name = ?1", [event_name])?;
        debug!("Cleared {} comments of {:?}", removed, event_name);
        Ok(removed)
    }

    fn replace_event(&self, event_name: &str, comments: &[Comment]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM comments WHERE event_name = ?1", [event_name])?;
        for comment in comments {
            upsert_with(&tx, comment)?;
        }
        tx.commit()?;
        Ok(comments.len())
    }

    fn count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM comments", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
