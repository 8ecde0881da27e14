//! Likes and subscriptions.

use axum::extract::{Path, Query, State};
use serde_json::{Value, json};

use super::extract::{Authenticated, Caller, PageQuery, parse_id};
use super::{ApiResponse, AppState, Reply};
use crate::identity::Viewer;
use crate::models::{ChannelSummary, VideoCard};
use crate::pagination::Page;
use crate::toggle::{ToggleKind, ToggleOutcome};

async fn toggle(
    state: &AppState,
    kind: ToggleKind,
    raw_id: &str,
    what: &str,
    viewer: &Viewer,
) -> Reply<ToggleOutcome> {
    let subject = parse_id(raw_id, what)?;
    let outcome = state.platform.toggles.toggle(kind, subject, viewer).await?;
    let message = match (kind, outcome.is_active()) {
        (ToggleKind::Subscription, true) => "subscribed successfully".to_string(),
        (ToggleKind::Subscription, false) => "unsubscribed successfully".to_string(),
        (_, true) => format!("{what} liked successfully"),
        (_, false) => format!("{what} unliked successfully"),
    };
    Ok(ApiResponse::ok(outcome, message))
}

pub(super) async fn toggle_video_like(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path(video_id): Path<String>,
) -> Reply<ToggleOutcome> {
    toggle(&state, ToggleKind::VideoLike, &video_id, "video", &viewer).await
}

pub(super) async fn toggle_comment_like(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path(comment_id): Path<String>,
) -> Reply<ToggleOutcome> {
    toggle(&state, ToggleKind::CommentLike, &comment_id, "comment", &viewer).await
}

pub(super) async fn toggle_post_like(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path(post_id): Path<String>,
) -> Reply<ToggleOutcome> {
    toggle(&state, ToggleKind::PostLike, &post_id, "post", &viewer).await
}

pub(super) async fn liked_videos(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Query(query): Query<PageQuery>,
) -> Reply<Page<VideoCard>> {
    let videos = state
        .platform
        .feed
        .liked_videos(&viewer, query.request())
        .await?;
    Ok(ApiResponse::ok(videos, "liked videos fetched successfully"))
}

pub(super) async fn toggle_subscription(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path(channel_id): Path<String>,
) -> Reply<ToggleOutcome> {
    toggle(&state, ToggleKind::Subscription, &channel_id, "channel", &viewer).await
}

pub(super) async fn channel_subscribers(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Path(channel_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Reply<Page<ChannelSummary>> {
    let channel_id = parse_id(&channel_id, "channel")?;
    let subscribers = state
        .platform
        .feed
        .channel_subscribers(channel_id, &viewer, query.request())
        .await?;
    Ok(ApiResponse::ok(subscribers, "subscribers fetched successfully"))
}

pub(super) async fn subscribed_channels(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Query(query): Query<PageQuery>,
) -> Reply<Page<ChannelSummary>> {
    let channels = state
        .platform
        .feed
        .subscribed_channels(&viewer, query.request())
        .await?;
    Ok(ApiResponse::ok(channels, "subscribed channels fetched successfully"))
}

pub(super) async fn subscription_status(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Path(channel_id): Path<String>,
) -> Reply<Value> {
    let channel_id = parse_id(&channel_id, "channel")?;
    let subscribed = state
        .platform
        .toggles
        .is_subscribed(channel_id, &viewer)
        .await?;
    Ok(ApiResponse::ok(
        json!({ "isSubscribed": subscribed }),
        "subscription status fetched successfully",
    ))
}
