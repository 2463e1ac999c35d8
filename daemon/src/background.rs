//! Background tasks for the host
//!
//! Runs periodic checks:
//! - Viewer liveness (heartbeat expiry)
//! - Expiry of posted comments that never showed up

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tracing::{debug, info, warn};

use asplay_core::ViewerMessage;

use crate::handlers::viewer_disconnected;
use crate::{lock, HostState};

/// Interval between viewer heartbeat checks
const HEARTBEAT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Interval between pending post checks
const POST_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Drop the viewer once its heartbeat has lapsed.
pub async fn viewer_heartbeat_task(state: Arc<HostState>) {
    let mut ticker = interval(HEARTBEAT_CHECK_INTERVAL);
    info!("Viewer heartbeat task started");

    loop {
        ticker.tick().await;

        if state.should_shutdown() {
            info!("Viewer heartbeat task stopping due to shutdown");
            break;
        }

        check_viewer_heartbeat(&state, Instant::now());
    }
}

/// Disconnect the viewer if its heartbeat expired or its link closed.
///
/// # Returns
/// True if the viewer was dropped.
pub fn check_viewer_heartbeat(state: &HostState, now: Instant) -> bool {
    let lapsed = state.with_viewer(|v| {
        let gone = v.heartbeat.is_expired(now) || !v.sink.is_open();
        (v.id, gone, v.heartbeat.since_last_beat(now))
    });

    match lapsed {
        Some((id, true, silence)) => {
            info!("Viewer connection lost ({}s without heartbeat)", silence.as_secs());
            viewer_disconnected(id, state);
            true
        }
        _ => false,
    }
}

/// Report posts that were never seen in the comment stream.
pub async fn post_verification_task(state: Arc<HostState>) {
    let mut ticker = interval(POST_CHECK_INTERVAL);
    info!("Post verification task started");

    loop {
        ticker.tick().await;

        if state.should_shutdown() {
            info!("Post verification task stopping due to shutdown");
            break;
        }

        expire_pending_posts(&state, Instant::now());
    }
}

/// Expire unconfirmed posts and tell the viewer about each.
///
/// # Returns
/// Number of posts expired.
pub fn expire_pending_posts(state: &HostState, now: Instant) -> usize {
    let expired = lock(&state.pending_posts).expire(now);
    for post in &expired {
        warn!("Posted comment not seen: {:?}", post.comment);
        state.send_to_viewer(ViewerMessage::error(format!(
            "Could not confirm the posted comment: {}",
            post.comment
        )));
    }
    if expired.is_empty() {
        debug!("No expired posts");
    }
    expired.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::viewer_connected;
    use crate::link::ChannelSink;
    use asplay_core::{BridgeCommand, HostConfig, SqliteCommentStore};
    use std::path::PathBuf;

    fn state() -> HostState {
        let store = SqliteCommentStore::open_in_memory().unwrap();
        HostState::with_parts(PathBuf::from("/tmp/asplay-test"), HostConfig::default(), Box::new(store))
    }

    #[test]
    fn test_heartbeat_expiry_drops_viewer() {
        let state = state();
        let (bridge_sink, mut bridge) = ChannelSink::<BridgeCommand>::channel();
        state.attach_bridge(Box::new(bridge_sink));

        let start = Instant::now();
        let (sink, _viewer) = ChannelSink::<ViewerMessage>::channel();
        viewer_connected(Box::new(sink), &state, start).unwrap();
        bridge.try_recv().unwrap();

        assert!(!check_viewer_heartbeat(&state, start + Duration::from_secs(5)));
        assert!(check_viewer_heartbeat(&state, start + Duration::from_secs(10)));
        assert!(!state.viewer_connected());
        assert_eq!(
            bridge.try_recv().unwrap(),
            BridgeCommand::SetIframeVisibility { value: true }
        );
    }

    #[test]
    fn test_closed_viewer_link_dropped() {
        let state = state();
        let start = Instant::now();
        let (sink, viewer) = ChannelSink::<ViewerMessage>::channel();
        viewer_connected(Box::new(sink), &state, start).unwrap();

        drop(viewer);
        assert!(check_viewer_heartbeat(&state, start));
    }

    #[test]
    fn test_expired_posts_reported() {
        let state = state();
        let start = Instant::now();
        let (sink, mut viewer) = ChannelSink::<ViewerMessage>::channel();
        viewer_connected(Box::new(sink), &state, start).unwrap();
        viewer.try_recv().unwrap();

        lock(&state.pending_posts).register("me", "lost", start);
        assert_eq!(expire_pending_posts(&state, start + Duration::from_secs(5)), 0);
        assert_eq!(expire_pending_posts(&state, start + Duration::from_secs(11)), 1);
        assert!(matches!(
            viewer.try_recv().unwrap(),
            ViewerMessage::ErrorOccurred { .. }
        ));
    }
}
