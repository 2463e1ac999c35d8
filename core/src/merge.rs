//! Realtime/archive merge: backfilling positions of live-captured comments
//!
//! Comments captured while an event was broadcast live have no playback
//! position (`TIME_UNKNOWN`), only the wall-clock time they were captured.
//! When the archive of the same event is watched later, the same comments
//! reappear with a position. Matching the two sets gives a clock reference:
//!
//! # Algorithm
//!
//! 1. **Match**: each archive candidate takes the first unmatched realtime
//!    comment with the same nickname and text.
//! 2. **Gate**: at least `MIN_MATCH_RATE` of the candidates must match,
//!    otherwise the sessions are not trusted to be the same broadcast.
//! 3. **Anchor**: the first matched pair maps wall-clock time to position.
//! 4. **Backfill**: every realtime comment gets
//!    `anchor.position + floor((captured - anchor.captured) / 1s)`;
//!    records 12 hours or more after the anchor are left alone, and
//!    negative results become `TIME_PRE_BROADCAST`.
//!
//! Only one merge runs at a time per engine; a call made while another is
//! in progress returns `MergeOutcome::Skipped` straight away.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::store::CommentStore;
use crate::types::{Comment, TIME_PRE_BROADCAST};

/// Minimum share of archive candidates that must match realtime comments.
pub const MIN_MATCH_RATE: f64 = 0.7;

/// `MIN_MATCH_RATE` as a fraction, for the exact comparison.
const MIN_MATCH_NUMERATOR: usize = 7;
const MIN_MATCH_DENOMINATOR: usize = 10;

/// Whether `matched` of `candidates` reaches `MIN_MATCH_RATE`.
fn match_rate_reached(matched: usize, candidates: usize) -> bool {
    matched * MIN_MATCH_DENOMINATOR >= candidates * MIN_MATCH_NUMERATOR
}

/// Realtime comments this far (seconds) after the anchor are treated as strays.
pub const STRAY_THRESHOLD_SECONDS: i64 = 12 * 60 * 60;

/// A realtime comment and the archive comment judged to be the same utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedPair {
    pub archive: Comment,
    pub realtime: Comment,
}

/// Why a merge did not happen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NotMergedReason {
    /// No stored realtime comments with unknown position
    NoRealtimeComments,
    /// No archive comments to match against
    NoCandidates,
    /// Too few candidates matched
    LowMatchRate { matched: usize, candidates: usize },
}

impl std::fmt::Display for NotMergedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotMergedReason::NoRealtimeComments => write!(f, "no realtime comments to backfill"),
            NotMergedReason::NoCandidates => write!(f, "no archive comments to match"),
            NotMergedReason::LowMatchRate {
                matched,
                candidates,
            } => write!(
                f,
                "match rate too low ({}/{} matched, need {:.0}%)",
                matched,
                candidates,
                MIN_MATCH_RATE * 100.0
            ),
        }
    }
}

/// Result of planning a merge without touching storage.
#[derive(Debug, Clone, PartialEq)]
pub enum MergePlan {
    /// Realtime comments with their backfilled positions
    Backfill {
        pairs: Vec<MatchedPair>,
        updated: Vec<Comment>,
        strays: usize,
    },
    /// Nothing to do
    NotMerged(NotMergedReason),
}

/// Outcome of `MergeEngine::merge`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MergeOutcome {
    Merged {
        matched: usize,
        updated: usize,
        pre_broadcast: usize,
        strays: usize,
    },
    NotMerged(NotMergedReason),
    /// Another merge was already running
    Skipped,
}

/// Persisting the backfill failed part way; some records may be updated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to save merged comments: {message}")]
pub struct MergeError {
    pub message: String,
}

/// Pair archive candidates with realtime comments (first match wins).
pub fn match_comments(realtime: &[Comment], candidates: &[Comment]) -> Vec<MatchedPair> {
    let mut taken = vec![false; realtime.len()];
    let mut pairs = Vec::new();

    for archive in candidates {
        let found = realtime
            .iter()
            .enumerate()
            .find(|(i, rt)| !taken[*i] && rt.same_utterance(archive));

        if let Some((i, rt)) = found {
            taken[i] = true;
            pairs.push(MatchedPair {
                archive: archive.clone(),
                realtime: rt.clone(),
            });
        }
    }

    pairs
}

/// Compute the backfill for `realtime` using `candidates` as the clock reference.
///
/// # Arguments
///
/// * `realtime` - Stored comments captured live (unknown position)
/// * `candidates` - Archive comments with known positions
///
/// # Returns
///
/// The records to persist, or the reason nothing should change
pub fn plan(realtime: &[Comment], candidates: &[Comment]) -> MergePlan {
    if realtime.is_empty() {
        return MergePlan::NotMerged(NotMergedReason::NoRealtimeComments);
    }
    if candidates.is_empty() {
        return MergePlan::NotMerged(NotMergedReason::NoCandidates);
    }

    let pairs = match_comments(realtime, candidates);
    let match_rate = pairs.len() as f64 / candidates.len() as f64;
    debug!(
        "Merge matched {}/{} candidates (rate {:.2})",
        pairs.len(),
        candidates.len(),
        match_rate
    );

    let accepted = match_rate_reached(pairs.len(), candidates.len());
    let Some(anchor) = pairs.first().filter(|_| accepted) else {
        return MergePlan::NotMerged(NotMergedReason::LowMatchRate {
            matched: pairs.len(),
            candidates: candidates.len(),
        });
    };

    let anchor_ms = anchor.realtime.registered_date.timestamp_millis();
    let anchor_position = anchor.archive.time_seconds;

    let mut updated = Vec::with_capacity(realtime.len());
    let mut strays = 0;
    for comment in realtime {
        let diff_seconds =
            (comment.registered_date.timestamp_millis() - anchor_ms).div_euclid(1000);
        if diff_seconds >= STRAY_THRESHOLD_SECONDS {
            strays += 1;
            continue;
        }

        let position = anchor_position + diff_seconds;
        let mut backfilled = comment.clone();
        backfilled.time_seconds = if position < 0 {
            TIME_PRE_BROADCAST
        } else {
            position
        };
        updated.push(backfilled);
    }

    MergePlan::Backfill {
        pairs,
        updated,
        strays,
    }
}

/// Runs merges against a store, one at a time.
#[derive(Debug, Default)]
pub struct MergeEngine {
    running: AtomicBool,
}

/// Clears the running flag when the merge finishes, however it finishes.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MergeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a merge is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn try_start(&self) -> Option<RunningGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(&self.running))
    }

    /// Backfill the stored realtime comments of `event_name`.
    ///
    /// # Errors
    /// Returns `MergeError` if loading or saving comments fails. Records
    /// saved before the failure stay saved.
    pub fn merge(
        &self,
        store: &dyn CommentStore,
        event_name: &str,
        candidates: &[Comment],
    ) -> Result<MergeOutcome, MergeError> {
        let Some(_guard) = self.try_start() else {
            debug!("Merge already running, skipping");
            return Ok(MergeOutcome::Skipped);
        };

        let realtime = store
            .unknown_time_comments(event_name)
            .map_err(|e| MergeError {
                message: e.to_string(),
            })?;

        match plan(&realtime, candidates) {
            MergePlan::NotMerged(reason) => {
                info!("Not merging {:?}: {}", event_name, reason);
                Ok(MergeOutcome::NotMerged(reason))
            }
            MergePlan::Backfill {
                pairs,
                updated,
                strays,
            } => {
                for comment in &updated {
                    store.upsert(comment).map_err(|e| MergeError {
                        message: e.to_string(),
                    })?;
                }

                let pre_broadcast = updated
                    .iter()
                    .filter(|c| c.time_seconds == TIME_PRE_BROADCAST)
                    .count();
                info!(
                    "Merged {:?}: {} pairs matched, {} comments backfilled ({} pre-broadcast, {} strays)",
                    event_name,
                    pairs.len(),
                    updated.len(),
                    pre_broadcast,
                    strays
                );

                Ok(MergeOutcome::Merged {
                    matched: pairs.len(),
                    updated: updated.len(),
                    pre_broadcast,
                    strays,
                })
            }
        }
    }
}
