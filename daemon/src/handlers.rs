//! Message handlers for the host

use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use asplay_core::merge::{MergeOutcome, NotMergedReason};
use asplay_core::reconcile::reconcile_comment;
use asplay_core::relay::MessageSink;
use asplay_core::{
    BridgeCommand, BridgeEvent, Comment, HostRequest, HostResponse, PageType, RawComment,
    ViewerMessage, ViewerRequest, TIME_UNKNOWN,
};

use crate::{lock, HostState};

/// Handle a message from the page bridge.
pub fn handle_bridge_event(event: BridgeEvent, state: &HostState) {
    match event {
        BridgeEvent::CommentsReceived {
            event_name,
            comments,
            current_time_seconds,
        } => handle_comments(event_name, &comments, current_time_seconds, state),

        BridgeEvent::PlayerCurrentTimeChanged {
            current_time_seconds,
        } => {
            debug!("Player time: {}", current_time_seconds);
            lock(&state.session).observe_player_time(current_time_seconds);
        }

        BridgeEvent::ErrorOccurred { error_message } => {
            warn!("Bridge error: {}", error_message);
            state.send_to_viewer(ViewerMessage::error(error_message));
        }
    }
}

fn handle_comments(
    event_name: Option<String>,
    raw_comments: &[RawComment],
    current_time_seconds: Option<f64>,
    state: &HostState,
) {
    let page_type = PageType::from_current_time(current_time_seconds);

    let (new_comments, run_merge) = {
        let mut session = lock(&state.session);
        let Some(event_name) = event_name.or_else(|| session.event_name().map(str::to_string))
        else {
            warn!("Dropping {} comments without an event name", raw_comments.len());
            return;
        };

        if session.switch_event(&event_name) {
            info!("Watching {:?} ({})", event_name, page_type.as_str());
        }

        let new_comments =
            session.ingest(raw_comments, &event_name, current_time_seconds, Utc::now());
        let run_merge = page_type == PageType::ArchivePlayPage && !session.is_merged();
        (new_comments, run_merge)
    };

    if new_comments.is_empty() {
        return;
    }
    debug!("{} new comments", new_comments.len());
    state.add_comments_received(new_comments.len());

    state.send_to_viewer(ViewerMessage::CommentsReceived {
        comments: new_comments.clone(),
    });

    if state.config.overlay_enabled(page_type) {
        state.send_to_bridge(BridgeCommand::ShowOverlayComments {
            comments: new_comments.clone(),
        });
    }

    // Merge before storing: storing an archive observation fixes the
    // position of the matching live record and takes it out of the merge
    let merged_now = run_merge && run_archive_merge(&new_comments[0].event_name, state);
    let merged = lock(&state.session).is_merged();

    // Observations held back by earlier failed merges are stored now
    let to_store = if merged_now {
        lock(&state.session).known_time_comments()
    } else {
        new_comments.clone()
    };

    if let Err(e) = persist(&to_store, page_type, merged, state) {
        error!("Failed to save comments: {}", e);
        state.send_to_viewer(ViewerMessage::error(format!(
            "Failed to save comments: {}",
            e
        )));
    }

    for post in lock(&state.pending_posts).observe(&new_comments) {
        info!("Posted comment confirmed: {:?}", post.comment);
    }
}

/// Store new comments: live ones as first seen, archive ones reconciled.
///
/// Until the event is merged, archive observations of live records with an
/// unknown position are not stored, so those records stay in the merge.
fn persist(
    comments: &[Comment],
    page_type: PageType,
    merged: bool,
    state: &HostState,
) -> asplay_core::Result<()> {
    let mut held_back = 0;
    for comment in comments {
        let existing = state.store.get(&comment.id)?;
        match page_type {
            PageType::ArchivePlayPage => {
                let awaiting_merge = existing
                    .as_ref()
                    .is_some_and(|e| e.time_seconds == TIME_UNKNOWN);
                if !merged && awaiting_merge {
                    held_back += 1;
                    continue;
                }
                state.store.upsert(&reconcile_comment(existing.as_ref(), comment))?;
            }
            _ => {
                if existing.is_none() {
                    state.store.upsert(comment)?;
                }
            }
        }
    }
    if held_back > 0 {
        debug!("Holding back {} live comments until the merge succeeds", held_back);
    }
    Ok(())
}

/// Try the realtime/archive merge; returns whether it completed now.
fn run_archive_merge(event_name: &str, state: &HostState) -> bool {
    let candidates = lock(&state.session).known_time_comments();

    match state
        .merge_engine
        .merge(state.store.as_ref(), event_name, &candidates)
    {
        Ok(MergeOutcome::Merged { updated, .. }) => {
            info!("Backfilled {} live comments of {:?}", updated, event_name);
            lock(&state.session).mark_merged();
            true
        }
        Ok(MergeOutcome::NotMerged(NotMergedReason::NoRealtimeComments)) => {
            // Nothing was recorded live, so there is nothing to wait for
            lock(&state.session).mark_merged();
            true
        }
        Ok(MergeOutcome::NotMerged(reason)) => {
            debug!("Merge deferred: {}", reason);
            false
        }
        Ok(MergeOutcome::Skipped) => false,
        Err(e) => {
            error!("Merge failed: {}", e);
            state.send_to_viewer(ViewerMessage::error(e.to_string()));
            false
        }
    }
}

/// Attach a newly connected viewer.
///
/// # Returns
/// The link id, or `None` if another viewer is already attached.
pub fn viewer_connected(
    sink: Box<dyn MessageSink<ViewerMessage>>,
    state: &HostState,
    now: Instant,
) -> Option<u64> {
    let Some(id) = state.attach_viewer(sink, now) else {
        warn!("Rejecting viewer: another viewer is already connected");
        return None;
    };

    info!("Viewer connected (link {})", id);
    let latest = lock(&state.session).latest().to_vec();
    state.send_to_viewer(ViewerMessage::Greeting {
        comments: latest,
        available_functions: state.config.available_functions(),
        host_loader: state.config.general.host_loader,
    });
    state.send_to_bridge(BridgeCommand::SetIframeVisibility { value: false });

    Some(id)
}

/// Detach the viewer `id` and show the host frame again.
pub fn viewer_disconnected(id: u64, state: &HostState) {
    if state.detach_viewer(id) {
        info!("Viewer disconnected (link {})", id);
        state.send_to_bridge(BridgeCommand::SetIframeVisibility { value: true });
    }
}

/// Handle a message from the viewer `id`.
pub fn handle_viewer_request(id: u64, request: ViewerRequest, state: &HostState, now: Instant) {
    match request {
        ViewerRequest::Heartbeat => {
            debug!("Heartbeat from viewer {}", id);
            state.with_viewer(|v| {
                if v.id == id {
                    v.heartbeat.beat(now);
                }
            });
        }

        ViewerRequest::PostComment { nickname, comment } => {
            info!("Post requested by viewer: {:?}", comment);
            if !state.config.available_functions().post_comment {
                state.send_to_viewer(ViewerMessage::error("Posting comments is not available"));
                return;
            }

            let sent = state.send_to_bridge(BridgeCommand::PostComment {
                nickname: nickname.clone(),
                comment: comment.clone(),
            });
            if !sent {
                state.send_to_viewer(ViewerMessage::error("Bridge is not connected"));
                return;
            }
            lock(&state.pending_posts).register(&nickname, &comment, now);
        }
    }
}

/// Handle a control request from the CLI.
pub fn handle_control_request(request: HostRequest, state: &HostState) -> HostResponse {
    match request {
        HostRequest::Ping => {
            debug!("Ping received");
            HostResponse::Pong {
                uptime_secs: state.uptime_secs(),
                comments_received: state.comments_received(),
            }
        }

        HostRequest::Status => HostResponse::Status(state.status()),

        HostRequest::Seek { seconds } => {
            info!("Seek to {}s requested", seconds);
            if state.send_to_bridge(BridgeCommand::SetPlayerCurrentTime { seconds }) {
                HostResponse::Ok
            } else {
                HostResponse::Error("Bridge is not connected".to_string())
            }
        }

        HostRequest::Shutdown => {
            info!("Shutdown requested via control socket");
            state.request_shutdown();
            HostResponse::Ok
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::ChannelSink;
    use asplay_core::{HostConfig, SqliteCommentStore};
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn state_with(config: HostConfig) -> HostState {
        let store = SqliteCommentStore::open_in_memory().unwrap();
        HostState::with_parts(PathBuf::from("/tmp/asplay-test"), config, Box::new(store))
    }

    fn attach_bridge(state: &HostState) -> UnboundedReceiver<BridgeCommand> {
        let (sink, rx) = ChannelSink::channel();
        state.attach_bridge(Box::new(sink));
        rx
    }

    fn attach_viewer(state: &HostState) -> (u64, UnboundedReceiver<ViewerMessage>) {
        let (sink, rx) = ChannelSink::channel();
        let id = viewer_connected(Box::new(sink), state, Instant::now()).unwrap();
        (id, rx)
    }

    fn drain<M>(rx: &mut UnboundedReceiver<M>) -> Vec<M> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn comments_received(texts: &[&str], current_time_seconds: Option<f64>) -> BridgeEvent {
        BridgeEvent::CommentsReceived {
            event_name: Some("Show day1".into()),
            comments: texts.iter().map(|t| RawComment::new("A", *t)).collect(),
            current_time_seconds,
        }
    }

    #[tokio::test]
    async fn test_live_comments_relayed_and_stored() {
        let state = state_with(HostConfig::default());
        let mut bridge = attach_bridge(&state);
        let (_id, mut viewer) = attach_viewer(&state);
        drain(&mut viewer);
        drain(&mut bridge);

        handle_bridge_event(comments_received(&["two", "one"], None), &state);
        handle_bridge_event(comments_received(&["two", "one"], None), &state);

        let messages = drain(&mut viewer);
        assert_eq!(messages.len(), 1);
        let ViewerMessage::CommentsReceived { comments } = &messages[0] else {
            panic!("expected comments");
        };
        assert_eq!(comments[0].comment, "one");

        // Overlay is off for live pages by default
        assert!(drain(&mut bridge).is_empty());

        let stored = state.store.comments_by_event("Show day1").unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|c| c.time_seconds == TIME_UNKNOWN));
    }

    #[tokio::test]
    async fn test_archive_comments_overlaid_and_reconciled() {
        let state = state_with(HostConfig::default());
        let mut bridge = attach_bridge(&state);

        handle_bridge_event(
            BridgeEvent::PlayerCurrentTimeChanged {
                current_time_seconds: 100.0,
            },
            &state,
        );
        handle_bridge_event(comments_received(&["wow"], Some(100.0)), &state);
        assert!(matches!(
            drain(&mut bridge).as_slice(),
            [BridgeCommand::ShowOverlayComments { .. }]
        ));

        // Seek and see the comment again further on
        handle_bridge_event(
            BridgeEvent::PlayerCurrentTimeChanged {
                current_time_seconds: 140.0,
            },
            &state,
        );
        handle_bridge_event(comments_received(&["wow"], Some(140.0)), &state);

        let stored = state.store.comments_by_event("Show day1").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].time_seconds, 120);
    }

    #[tokio::test]
    async fn test_archive_playback_merges_live_recording() {
        let state = state_with(HostConfig::default());
        let t0 = Utc::now() - chrono::Duration::days(1);
        let live = |text: &str, offset: i64| {
            asplay_core::Comment::new(
                "Show day1",
                "A",
                "#000000",
                text,
                TIME_UNKNOWN,
                t0 + chrono::Duration::seconds(offset),
            )
        };
        state
            .store
            .upsert_many(&[live("anchor", 0), live("later", 30)])
            .unwrap();

        handle_bridge_event(comments_received(&["anchor"], Some(600.0)), &state);

        let stored = state.store.comments_by_event("Show day1").unwrap();
        let later = stored.iter().find(|c| c.comment == "later").unwrap();
        assert_eq!(later.time_seconds, 630);
        assert!(lock(&state.session).is_merged());
    }

    #[tokio::test]
    async fn test_merge_retried_on_later_batch() {
        let state = state_with(HostConfig::default());
        let t0 = Utc::now() - chrono::Duration::days(1);
        let live: Vec<Comment> = (0..10)
            .map(|i| {
                Comment::new(
                    "Show day1",
                    "A",
                    "#000000",
                    format!("c{}", i),
                    TIME_UNKNOWN,
                    t0 + chrono::Duration::seconds(i * 10),
                )
            })
            .collect();
        state.store.upsert_many(&live).unwrap();

        // 3 of 5 match: below the required rate
        handle_bridge_event(
            comments_received(&["c0", "c1", "c2", "x1", "x2"], Some(100.0)),
            &state,
        );
        assert!(!lock(&state.session).is_merged());
        assert_eq!(state.store.unknown_time_comments("Show day1").unwrap().len(), 10);

        // 8 of 10 match overall
        handle_bridge_event(
            comments_received(&["c3", "c4", "c5", "c6", "c7"], Some(100.0)),
            &state,
        );
        assert!(lock(&state.session).is_merged());
        assert!(state.store.unknown_time_comments("Show day1").unwrap().is_empty());

        let stored = state.store.comments_by_event("Show day1").unwrap();
        assert_eq!(stored.len(), 12);
        assert!(stored.iter().all(|c| c.time_seconds >= 0));
    }

    #[tokio::test]
    async fn test_second_viewer_rejected() {
        let state = state_with(HostConfig::default());
        let mut bridge = attach_bridge(&state);
        let (id, mut viewer) = attach_viewer(&state);

        assert!(matches!(
            drain(&mut viewer).as_slice(),
            [ViewerMessage::Greeting { .. }]
        ));
        assert_eq!(
            drain(&mut bridge),
            vec![BridgeCommand::SetIframeVisibility { value: false }]
        );

        let (sink, _rx) = ChannelSink::<ViewerMessage>::channel();
        assert!(viewer_connected(Box::new(sink), &state, Instant::now()).is_none());

        viewer_disconnected(id, &state);
        assert_eq!(
            drain(&mut bridge),
            vec![BridgeCommand::SetIframeVisibility { value: true }]
        );
        assert!(!state.viewer_connected());
    }

    #[tokio::test]
    async fn test_greeting_carries_latest_batch() {
        let state = state_with(HostConfig::default());
        handle_bridge_event(comments_received(&["hello"], None), &state);

        let (_id, mut viewer) = attach_viewer(&state);
        let messages = drain(&mut viewer);
        let ViewerMessage::Greeting { comments, .. } = &messages[0] else {
            panic!("expected greeting");
        };
        assert_eq!(comments.len(), 1);
    }

    #[tokio::test]
    async fn test_post_comment_requires_feature() {
        let state = state_with(HostConfig::default());
        let mut bridge = attach_bridge(&state);
        let (id, mut viewer) = attach_viewer(&state);
        drain(&mut viewer);
        drain(&mut bridge);

        let request = ViewerRequest::PostComment {
            nickname: "me".into(),
            comment: "hi".into(),
        };
        handle_viewer_request(id, request, &state, Instant::now());

        assert!(matches!(
            drain(&mut viewer).as_slice(),
            [ViewerMessage::ErrorOccurred { .. }]
        ));
        assert!(drain(&mut bridge).is_empty());
    }

    #[tokio::test]
    async fn test_post_comment_forwarded_and_confirmed() {
        let mut config = HostConfig::default();
        config.general.post_comment = true;
        let state = state_with(config);
        let mut bridge = attach_bridge(&state);
        let (id, _viewer) = attach_viewer(&state);
        drain(&mut bridge);

        let request = ViewerRequest::PostComment {
            nickname: "A".into(),
            comment: "mine".into(),
        };
        handle_viewer_request(id, request, &state, Instant::now());
        assert!(matches!(
            drain(&mut bridge).as_slice(),
            [BridgeCommand::PostComment { .. }]
        ));
        assert_eq!(lock(&state.pending_posts).len(), 1);

        handle_bridge_event(comments_received(&["mine"], None), &state);
        assert!(lock(&state.pending_posts).is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_only_for_current_viewer() {
        let state = state_with(HostConfig::default());
        let start = Instant::now();
        let (id, _viewer) = attach_viewer(&state);

        handle_viewer_request(id + 100, ViewerRequest::Heartbeat, &state, start + Duration::from_secs(8));
        let expired = state
            .with_viewer(|v| v.heartbeat.is_expired(start + Duration::from_secs(12)))
            .unwrap();
        assert!(expired);

        handle_viewer_request(id, ViewerRequest::Heartbeat, &state, start + Duration::from_secs(8));
        let expired = state
            .with_viewer(|v| v.heartbeat.is_expired(start + Duration::from_secs(12)))
            .unwrap();
        assert!(!expired);
    }

    #[tokio::test]
    async fn test_bridge_error_forwarded() {
        let state = state_with(HostConfig::default());
        let (_id, mut viewer) = attach_viewer(&state);
        drain(&mut viewer);

        handle_bridge_event(
            BridgeEvent::ErrorOccurred {
                error_message: "scrape failed".into(),
            },
            &state,
        );
        assert_eq!(
            drain(&mut viewer),
            vec![ViewerMessage::error("scrape failed")]
        );
    }

    #[tokio::test]
    async fn test_control_seek() {
        let state = state_with(HostConfig::default());
        assert!(matches!(
            handle_control_request(HostRequest::Seek { seconds: 90 }, &state),
            HostResponse::Error(_)
        ));

        let mut bridge = attach_bridge(&state);
        assert_eq!(
            handle_control_request(HostRequest::Seek { seconds: 90 }, &state),
            HostResponse::Ok
        );
        assert_eq!(
            drain(&mut bridge),
            vec![BridgeCommand::SetPlayerCurrentTime { seconds: 90 }]
        );
    }
}
