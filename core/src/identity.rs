//! Comment identity
//!
//! A comment is identified by the SHA256 of its event name, nickname and
//! text. The same triple always yields the same id, which is what lets a
//! rescraped comment list collapse onto already-captured comments and lets
//! an imported backup upsert onto existing rows.

use sha2::{Digest, Sha256};

/// Separator between hashed fields (ASCII unit separator).
const FIELD_SEPARATOR: &[u8] = b"\x1f";

/// Compute the identity of a comment.
///
/// # Arguments
///
/// * `event_name` - Broadcast the comment belongs to
/// * `nickname` - Poster nickname
/// * `comment` - Comment text
///
/// # Returns
///
/// Lowercase hex SHA256 digest (64 characters)
pub fn comment_id(event_name: &str, nickname: &str, comment: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event_name.as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(nickname.as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(comment.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comment_id_deterministic() {
        let id1 = comment_id("EventA", "Alice", "hi");
        let id2 = comment_id("EventA", "Alice", "hi");

        assert_eq!(id1, id2);
        assert_eq!(id1.len(), 64);
    }

    #[test]
    fn test_comment_id_different_content() {
        assert_ne!(comment_id("EventA", "Alice", "hi"), comment_id("EventA", "Alice", "hi!"));
        assert_ne!(comment_id("EventA", "Alice", "hi"), comment_id("EventB", "Alice", "hi"));
        assert_ne!(comment_id("EventA", "Alice", "hi"), comment_id("EventA", "Bob", "hi"));
    }

    #[test]
    fn test_comment_id_field_boundaries() {
        // Shifting text across the field boundary must not collide
        assert_ne!(comment_id("E", "ab", "c"), comment_id("E", "a", "bc"));
    }

    #[test]
    fn test_comment_id_empty_fields() {
        let id = comment_id("", "", "");
        assert_eq!(id.len(), 64);
        assert_ne!(id, comment_id("", "", " "));
    }
}
