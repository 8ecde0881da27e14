use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, header},
    response::{AppendHeaders, IntoResponse, Response},
};
use chrono::Duration;
use serde::Deserialize;
use serde_json::{Value, json};

use super::extract::{
    ACCESS_COOKIE, Authenticated, Caller, REFRESH_COOKIE, UploadForm, cookie, number,
    page_request, parse_id,
};
use super::{ApiResponse, ApiResult, AppState, Reply};
use crate::accounts::{Credentials, Registration};
use crate::error::ServiceError;
use crate::feed::ChannelProfile;
use crate::models::{User, WatchEntry};
use crate::security::SessionTokens;
use crate::stats::{TimezoneOffset, WatchHistory};

fn session_cookie(name: &str, value: &str, ttl: Duration) -> String {
    format!(
        "{name}={value}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        ttl.num_seconds().max(0)
    )
}

fn session_cookies(state: &AppState, tokens: &SessionTokens) -> AppendHeaders<[(header::HeaderName, String); 2]> {
    let keys = state.platform.accounts.keys();
    AppendHeaders([
        (
            header::SET_COOKIE,
            session_cookie(ACCESS_COOKIE, &tokens.access_token, keys.access_ttl()),
        ),
        (
            header::SET_COOKIE,
            session_cookie(REFRESH_COOKIE, &tokens.refresh_token, keys.refresh_ttl()),
        ),
    ])
}

fn cleared_cookies() -> AppendHeaders<[(header::HeaderName, String); 2]> {
    AppendHeaders([
        (header::SET_COOKIE, session_cookie(ACCESS_COOKIE, "", Duration::zero())),
        (header::SET_COOKIE, session_cookie(REFRESH_COOKIE, "", Duration::zero())),
    ])
}

pub(super) async fn register(State(state): State<AppState>, multipart: Multipart) -> Reply<User> {
    let mut form = UploadForm::read(multipart).await?;
    let user = state
        .platform
        .accounts
        .register(Registration {
            full_name: form.text("fullName"),
            email: form.text("email"),
            username: form.text("username"),
            password: form.text("password"),
            avatar: form.take_file("avatar"),
            cover_image: form.take_file("coverImage"),
        })
        .await?;
    Ok(ApiResponse::created(user, "user registered successfully"))
}

pub(super) async fn login(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> ApiResult<Response> {
    let session = state.platform.accounts.login(credentials).await?;
    let cookies = session_cookies(&state, &session.tokens);
    Ok((cookies, ApiResponse::ok(session, "user logged in successfully")).into_response())
}

pub(super) async fn logout(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
) -> ApiResult<Response> {
    state.platform.accounts.logout(&viewer).await?;
    Ok((cleared_cookies(), ApiResponse::ok(json!({}), "user logged out")).into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: Option<String>,
}

/// The refresh token comes from its cookie or, failing that, the JSON body.
pub(super) async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let token = cookie(&headers, REFRESH_COOKIE).or_else(|| {
        serde_json::from_slice::<RefreshRequest>(&body)
            .ok()
            .and_then(|request| request.refresh_token)
    });
    let tokens = state
        .platform
        .accounts
        .refresh_session(token.as_deref())
        .await?;
    let cookies = session_cookies(&state, &tokens);
    Ok((cookies, ApiResponse::ok(tokens, "access token refreshed")).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PasswordChange {
    old_password: Option<String>,
    new_password: Option<String>,
}

pub(super) async fn change_password(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Json(body): Json<PasswordChange>,
) -> Reply<Value> {
    state
        .platform
        .accounts
        .change_password(
            &viewer,
            body.old_password.as_deref(),
            body.new_password.as_deref(),
        )
        .await?;
    Ok(ApiResponse::ok(json!({}), "password changed successfully"))
}

pub(super) async fn current_user(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
) -> Reply<User> {
    let user = state.platform.accounts.current_user(&viewer).await?;
    Ok(ApiResponse::ok(user, "current user fetched successfully"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AccountUpdate {
    full_name: Option<String>,
    email: Option<String>,
}

pub(super) async fn update_account(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Json(body): Json<AccountUpdate>,
) -> Reply<User> {
    let user = state
        .platform
        .accounts
        .update_account(&viewer, body.full_name.as_deref(), body.email.as_deref())
        .await?;
    Ok(ApiResponse::ok(user, "account details updated successfully"))
}

pub(super) async fn update_avatar(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    multipart: Multipart,
) -> Reply<User> {
    let mut form = UploadForm::read(multipart).await?;
    let user = state
        .platform
        .accounts
        .update_avatar(&viewer, form.take_file("avatar"))
        .await?;
    Ok(ApiResponse::ok(user, "avatar updated successfully"))
}

pub(super) async fn update_cover_image(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    multipart: Multipart,
) -> Reply<User> {
    let mut form = UploadForm::read(multipart).await?;
    let user = state
        .platform
        .accounts
        .update_cover_image(&viewer, form.take_file("coverImage"))
        .await?;
    Ok(ApiResponse::ok(user, "cover image updated successfully"))
}

pub(super) async fn channel_profile(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Path(username): Path<String>,
) -> Reply<ChannelProfile> {
    let profile = state.platform.feed.channel_profile(&username, &viewer).await?;
    Ok(ApiResponse::ok(profile, "channel fetched successfully"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct HistoryQuery {
    page: Option<String>,
    limit: Option<String>,
    tz_offset: Option<String>,
}

/// Offsets are minutes as returned by `Date.getTimezoneOffset()`; absent means
/// UTC.
fn timezone(minutes: Option<i64>) -> Result<TimezoneOffset, ServiceError> {
    minutes.map_or(Ok(TimezoneOffset::UTC), TimezoneOffset::new)
}

pub(super) async fn watch_history(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Query(query): Query<HistoryQuery>,
) -> Reply<WatchHistory> {
    let offset = timezone(number(query.tz_offset.as_deref()))?;
    let page = page_request(query.page.as_deref(), query.limit.as_deref());
    let history = state
        .platform
        .stats
        .watch_history(&viewer, offset, page)
        .await?;
    Ok(ApiResponse::ok(history, "watch history fetched successfully"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WatchRequest {
    video_id: Option<String>,
    user_time_zone_offset: Option<i64>,
}

pub(super) async fn record_watch(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Json(body): Json<WatchRequest>,
) -> Reply<WatchEntry> {
    let raw = body
        .video_id
        .ok_or_else(|| ServiceError::validation("video id is required"))?;
    let video_id = parse_id(&raw, "video")?;
    let offset = timezone(body.user_time_zone_offset)?;
    let entry = state
        .platform
        .stats
        .record_watch(video_id, &viewer, offset)
        .await?;
    Ok(ApiResponse::ok(entry, "watch history updated"))
}
