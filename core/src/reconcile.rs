//! Timestamp reconciliation for archive playback
//!
//! During archive playback the same comment can be observed several times:
//! after a seek, when the list is rescraped, or before the player position
//! has settled. Each observation carries the playback position at the time
//! it was seen. The stored position only moves when a new observation is
//! plausibly the same moment seen slightly differently:
//!
//! | difference        | result                       |
//! |-------------------|------------------------------|
//! | `<= 5` seconds    | keep stored (noise)          |
//! | `>= 300` seconds  | keep stored (anomaly)        |
//! | otherwise         | average of stored and new    |
//!
//! A stored sentinel (unknown, or before the broadcast) takes the first
//! known position as is.
//!
//! Repeated observations of nearby values therefore converge and then stop
//! changing the record.

use crate::types::{Comment, TIME_UNKNOWN};

/// Differences up to this many seconds are treated as noise.
pub const NOISE_THRESHOLD_SECONDS: i64 = 5;

/// Differences of at least this many seconds are treated as unrelated.
pub const ANOMALY_THRESHOLD_SECONDS: i64 = 300;

/// Decide the playback position to store for a re-observed comment.
///
/// # Arguments
///
/// * `existing` - The stored record with the same id, if any
/// * `observed` - The comment as just observed
///
/// # Returns
///
/// The `time_seconds` value to persist
pub fn reconcile(existing: Option<&Comment>, observed: &Comment) -> i64 {
    let stored = match existing {
        Some(existing) if existing.time_seconds != TIME_UNKNOWN => existing.time_seconds,
        _ => return observed.time_seconds,
    };

    // An observation without a position never replaces a stored one
    if observed.time_seconds < 0 {
        return stored;
    }

    // A pre-broadcast estimate is replaced by the first real position
    if stored < 0 {
        return observed.time_seconds;
    }

    let diff = (stored - observed.time_seconds).abs();
    if diff <= NOISE_THRESHOLD_SECONDS || diff >= ANOMALY_THRESHOLD_SECONDS {
        return stored;
    }

    (stored + observed.time_seconds).div_euclid(2)
}

/// Build the record to upsert for a re-observed comment.
///
/// Content comes from the observation; the capture date stays that of the
/// first capture, which is what the realtime/archive merge anchors on.
pub fn reconcile_comment(existing: Option<&Comment>, observed: &Comment) -> Comment {
    let mut merged = observed.clone();
    merged.time_seconds = reconcile(existing, observed);
    if let Some(existing) = existing {
        merged.registered_date = existing.registered_date;
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TIME_PRE_BROADCAST;
    use chrono::{TimeZone, Utc};

    fn at(time_seconds: i64) -> Comment {
        Comment::new(
            "EventA",
            "Alice",
            "#000000",
            "hi",
            time_seconds,
            Utc.with_ymd_and_hms(2022, 3, 1, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_first_observation_accepted() {
        assert_eq!(reconcile(None, &at(42)), 42);
    }

    #[test]
    fn test_unknown_stored_accepts_observed() {
        assert_eq!(reconcile(Some(&at(TIME_UNKNOWN)), &at(42)), 42);
    }

    #[test]
    fn test_noise_rejected() {
        assert_eq!(reconcile(Some(&at(100)), &at(103)), 100);
        assert_eq!(reconcile(Some(&at(100)), &at(95)), 100);
    }

    #[test]
    fn test_nearby_values_averaged() {
        assert_eq!(reconcile(Some(&at(100)), &at(140)), 120);
        assert_eq!(reconcile(Some(&at(100)), &at(107)), 103);
    }

    #[test]
    fn test_anomaly_rejected() {
        assert_eq!(reconcile(Some(&at(100)), &at(500)), 100);
        assert_eq!(reconcile(Some(&at(100)), &at(400)), 100);
    }

    #[test]
    fn test_unknown_observation_keeps_known() {
        assert_eq!(reconcile(Some(&at(100)), &at(TIME_UNKNOWN)), 100);
        assert_eq!(reconcile(Some(&at(TIME_PRE_BROADCAST)), &at(TIME_UNKNOWN)), TIME_PRE_BROADCAST);
    }

    #[test]
    fn test_pre_broadcast_stored_accepts_observed() {
        assert_eq!(reconcile(Some(&at(TIME_PRE_BROADCAST)), &at(42)), 42);
        assert_eq!(reconcile(Some(&at(TIME_PRE_BROADCAST)), &at(3)), 3);
    }

    #[test]
    fn test_repeated_reconciliation_converges() {
        let mut stored = at(100);
        for _ in 0..10 {
            stored.time_seconds = reconcile(Some(&stored), &at(140));
        }
        let settled = stored.time_seconds;
        assert!((settled - 140).abs() <= NOISE_THRESHOLD_SECONDS);
        assert_eq!(reconcile(Some(&stored), &at(140)), settled);
    }

    #[test]
    fn test_reconcile_comment_keeps_first_capture_date() {
        let existing = at(100);
        let mut observed = at(140);
        observed.registered_date = Utc.with_ymd_and_hms(2022, 3, 2, 0, 0, 0).unwrap();

        let merged = reconcile_comment(Some(&existing), &observed);
        assert_eq!(merged.time_seconds, 120);
        assert_eq!(merged.registered_date, existing.registered_date);
    }
}
