//! HTTP surface over [`Platform`].
//!
//! Handlers only translate requests into component calls. Every answer,
//! success or failure, is wrapped in the `{ statusCode, data, message,
//! success }` envelope; locally stored media is the one exception and is
//! streamed as raw bytes with range support.

mod comments;
mod dashboard;
mod engagement;
mod extract;
mod media;
mod playlists;
mod posts;
mod users;
mod videos;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::blob::LocalBlobStorage;
use crate::error::ServiceError;
use crate::platform::Platform;

pub use extract::{ACCESS_COOKIE, Authenticated, Caller, REFRESH_COOKIE};

#[derive(Clone)]
pub struct AppState {
    pub platform: Platform,
    media: LocalBlobStorage,
}

impl AppState {
    /// `media` is the directory served under its public prefix; it is usually
    /// the same storage the platform uploads into.
    pub fn new(platform: Platform, media: LocalBlobStorage) -> Self {
        Self { platform, media }
    }
}

/// Success envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    status_code: u16,
    data: T,
    message: String,
    success: bool,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::OK, data, message)
    }

    pub fn created(data: T, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::CREATED, data, message)
    }

    fn with_status(status: StatusCode, data: T, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            data,
            message: message.into(),
            success: true,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

/// Server-side failures are logged with their full cause chain and reported
/// to the client without detail.
impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = err.status();
        let message = match &err {
            ServiceError::Persistence(cause) => {
                error!("request failed: {cause:#}");
                "something went wrong while processing the request".to_string()
            }
            other => other.to_string(),
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "statusCode": self.status.as_u16(),
            "data": null,
            "message": self.message,
            "success": false,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

type Reply<T> = ApiResult<ApiResponse<T>>;

/// Builds the complete router: the JSON API under `/api/v1`, media under the
/// storage's public prefix and an enveloped 404 for everything else.
pub fn router(state: AppState, upload_limit_bytes: usize) -> Router {
    let api = Router::new()
        .route("/healthcheck", get(healthcheck))
        // Accounts
        .route("/users/register", post(users::register))
        .route("/users/login", post(users::login))
        .route("/users/logout", post(users::logout))
        .route("/users/refresh-token", post(users::refresh_token))
        .route("/users/change-password", post(users::change_password))
        .route("/users/current-user", get(users::current_user))
        .route("/users/update-account", patch(users::update_account))
        .route("/users/avatar", patch(users::update_avatar))
        .route("/users/cover-image", patch(users::update_cover_image))
        .route("/users/c/{username}", get(users::channel_profile))
        .route(
            "/users/history",
            get(users::watch_history).post(users::record_watch),
        )
        // Videos
        .route("/videos", get(videos::list_videos).post(videos::publish_video))
        .route(
            "/videos/{video_id}",
            get(videos::get_video)
                .patch(videos::update_video)
                .delete(videos::delete_video),
        )
        .route("/videos/{video_id}/preview", get(videos::get_video_preview))
        .route(
            "/videos/toggle/publish/{video_id}",
            patch(videos::toggle_publish),
        )
        // Comments
        .route(
            "/comments/v/{video_id}",
            get(comments::list_video_comments).post(comments::add_video_comment),
        )
        .route(
            "/comments/p/{post_id}",
            get(comments::list_post_comments).post(comments::add_post_comment),
        )
        .route(
            "/comments/c/{comment_id}",
            patch(comments::update_comment).delete(comments::delete_comment),
        )
        .route("/comments/r/{parent_id}", get(comments::list_replies))
        .route(
            "/comments/r/{parent_id}/{replying_to}",
            post(comments::add_reply),
        )
        // Likes and subscriptions
        .route("/likes/toggle/v/{video_id}", post(engagement::toggle_video_like))
        .route(
            "/likes/toggle/c/{comment_id}",
            post(engagement::toggle_comment_like),
        )
        .route("/likes/toggle/p/{post_id}", post(engagement::toggle_post_like))
        .route("/likes/videos", get(engagement::liked_videos))
        .route(
            "/subscriptions/c/{channel_id}",
            get(engagement::channel_subscribers).post(engagement::toggle_subscription),
        )
        .route("/subscriptions/u", get(engagement::subscribed_channels))
        .route(
            "/subscriptions/status/{channel_id}",
            get(engagement::subscription_status),
        )
        // Posts
        .route("/posts", post(posts::create_post))
        .route("/posts/user/{user_id}", get(posts::user_posts))
        .route("/posts/p/{post_id}", get(posts::get_post))
        .route(
            "/posts/{post_id}",
            patch(posts::update_post).delete(posts::delete_post),
        )
        // Playlists
        .route("/playlists", post(playlists::create_playlist))
        .route("/playlists/user/{user_id}", get(playlists::user_playlists))
        .route(
            "/playlists/{playlist_id}",
            get(playlists::get_playlist)
                .patch(playlists::update_playlist)
                .delete(playlists::delete_playlist),
        )
        .route(
            "/playlists/add/{video_id}/{playlist_id}",
            patch(playlists::add_video),
        )
        .route(
            "/playlists/remove/{video_id}/{playlist_id}",
            patch(playlists::remove_video),
        )
        // Dashboard
        .route("/dashboard/stats", get(dashboard::channel_stats))
        .route("/dashboard/videos", get(dashboard::channel_videos));

    let media_route = format!("{}/{{file}}", state.media.public_prefix());
    Router::new()
        .nest("/api/v1", api)
        .route(&media_route, get(media::serve_media))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(upload_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthcheck() -> ApiResponse<serde_json::Value> {
    ApiResponse::ok(json!({ "status": "ok" }), "service is healthy")
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found(format!("no route for {}", uri.path()))
}
