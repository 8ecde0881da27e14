use axum::extract::{Query, State};

use super::extract::{Authenticated, PageQuery};
use super::{ApiResponse, AppState, Reply};
use crate::pagination::Page;
use crate::stats::{ChannelStats, DashboardVideo};

pub(super) async fn channel_stats(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
) -> Reply<ChannelStats> {
    let owner = viewer.require()?;
    let stats = state.platform.stats.channel_stats(owner).await?;
    Ok(ApiResponse::ok(stats, "channel stats fetched successfully"))
}

pub(super) async fn channel_videos(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Query(query): Query<PageQuery>,
) -> Reply<Page<DashboardVideo>> {
    let videos = state
        .platform
        .stats
        .channel_videos(&viewer, query.request())
        .await?;
    Ok(ApiResponse::ok(videos, "channel videos fetched successfully"))
}
