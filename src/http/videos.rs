use axum::extract::{Multipart, Path, Query, State};
use serde::Deserialize;

use super::extract::{Authenticated, Caller, UploadForm, page_request, parse_id};
use super::{ApiResponse, AppState, Reply};
use crate::error::ServiceResult;
use crate::feed::{FeedPage, FeedQuery, FeedSort, VideoDetail, VideoFilter};
use crate::models::Video;
use crate::videos::{PublishVideo, UpdateVideo};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ListVideosQuery {
    page: Option<String>,
    limit: Option<String>,
    user: Option<String>,
    search: Option<String>,
    sort_by: Option<String>,
    sort_type: Option<String>,
}

impl ListVideosQuery {
    fn feed_query(&self) -> ServiceResult<FeedQuery> {
        Ok(FeedQuery {
            filter: VideoFilter::from_query(self.user.as_deref(), self.search.as_deref()),
            sort: FeedSort::from_query(self.sort_by.as_deref(), self.sort_type.as_deref())?,
            page: page_request(self.page.as_deref(), self.limit.as_deref()),
        })
    }
}

pub(super) async fn list_videos(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Query(query): Query<ListVideosQuery>,
) -> Reply<FeedPage> {
    let feed = state
        .platform
        .feed
        .list_videos(&query.feed_query()?, &viewer)
        .await?;
    Ok(ApiResponse::ok(feed, "videos fetched successfully"))
}

pub(super) async fn publish_video(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    multipart: Multipart,
) -> Reply<Video> {
    let mut form = UploadForm::read(multipart).await?;
    let input = PublishVideo {
        title: form.text("title"),
        description: form.text("description"),
        is_published: form.flag("isPublished"),
        tags: form.tags(),
        video_file: form.take_file("videoFile").or_else(|| form.take_file("video")),
        thumbnail: form.take_file("thumbnail"),
    };
    let video = state.platform.videos.publish_video(&viewer, input).await?;
    Ok(ApiResponse::created(video, "video published successfully"))
}

pub(super) async fn get_video(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Path(video_id): Path<String>,
) -> Reply<VideoDetail> {
    let video_id = parse_id(&video_id, "video")?;
    let detail = state.platform.feed.get_video(video_id, &viewer).await?;
    Ok(ApiResponse::ok(detail, "video fetched successfully"))
}

pub(super) async fn get_video_preview(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path(video_id): Path<String>,
) -> Reply<VideoDetail> {
    let video_id = parse_id(&video_id, "video")?;
    let detail = state
        .platform
        .feed
        .get_video_preview(video_id, &viewer)
        .await?;
    Ok(ApiResponse::ok(detail, "video preview fetched successfully"))
}

pub(super) async fn update_video(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path(video_id): Path<String>,
    multipart: Multipart,
) -> Reply<Video> {
    let video_id = parse_id(&video_id, "video")?;
    let mut form = UploadForm::read(multipart).await?;
    let input = UpdateVideo {
        title: form.text("title"),
        description: form.text("description"),
        tags: form.tags(),
        thumbnail: form.take_file("thumbnail"),
    };
    let video = state
        .platform
        .videos
        .update_video(video_id, &viewer, input)
        .await?;
    Ok(ApiResponse::ok(video, "video updated successfully"))
}

pub(super) async fn delete_video(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path(video_id): Path<String>,
) -> Reply<Video> {
    let video_id = parse_id(&video_id, "video")?;
    let video = state.platform.videos.delete_video(video_id, &viewer).await?;
    Ok(ApiResponse::ok(video, "video deleted successfully"))
}

pub(super) async fn toggle_publish(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path(video_id): Path<String>,
) -> Reply<Video> {
    let video_id = parse_id(&video_id, "video")?;
    let video = state.platform.videos.toggle_publish(video_id, &viewer).await?;
    let message = if video.is_published {
        "video published"
    } else {
        "video unpublished"
    };
    Ok(ApiResponse::ok(video, message))
}
