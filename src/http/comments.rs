use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use super::extract::{Authenticated, Caller, PageQuery, parse_id};
use super::{ApiResponse, AppState, Reply};
use crate::models::Comment;
use crate::pagination::Page;
use crate::threads::CommentView;

#[derive(Debug, Deserialize)]
pub(super) struct CommentBody {
    content: Option<String>,
}

pub(super) async fn list_video_comments(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Path(video_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Reply<Page<CommentView>> {
    let video_id = parse_id(&video_id, "video")?;
    let comments = state
        .platform
        .threads
        .list_video_comments(video_id, &viewer, query.request())
        .await?;
    Ok(ApiResponse::ok(comments, "comments fetched successfully"))
}

pub(super) async fn add_video_comment(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path(video_id): Path<String>,
    Json(body): Json<CommentBody>,
) -> Reply<Comment> {
    let video_id = parse_id(&video_id, "video")?;
    let comment = state
        .platform
        .threads
        .add_video_comment(video_id, &viewer, body.content.as_deref())
        .await?;
    Ok(ApiResponse::created(comment, "comment added successfully"))
}

pub(super) async fn list_post_comments(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Path(post_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Reply<Page<CommentView>> {
    let post_id = parse_id(&post_id, "post")?;
    let comments = state
        .platform
        .threads
        .list_post_comments(post_id, &viewer, query.request())
        .await?;
    Ok(ApiResponse::ok(comments, "comments fetched successfully"))
}

pub(super) async fn add_post_comment(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path(post_id): Path<String>,
    Json(body): Json<CommentBody>,
) -> Reply<Comment> {
    let post_id = parse_id(&post_id, "post")?;
    let comment = state
        .platform
        .threads
        .add_post_comment(post_id, &viewer, body.content.as_deref())
        .await?;
    Ok(ApiResponse::created(comment, "comment added successfully"))
}

pub(super) async fn update_comment(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path(comment_id): Path<String>,
    Json(body): Json<CommentBody>,
) -> Reply<Comment> {
    let comment_id = parse_id(&comment_id, "comment")?;
    let comment = state
        .platform
        .threads
        .update_comment(comment_id, &viewer, body.content.as_deref())
        .await?;
    Ok(ApiResponse::ok(comment, "comment updated successfully"))
}

pub(super) async fn delete_comment(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path(comment_id): Path<String>,
) -> Reply<Comment> {
    let comment_id = parse_id(&comment_id, "comment")?;
    let comment = state
        .platform
        .threads
        .delete_comment(comment_id, &viewer)
        .await?;
    Ok(ApiResponse::ok(comment, "comment deleted successfully"))
}

pub(super) async fn list_replies(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Path(parent_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Reply<Page<CommentView>> {
    let parent_id = parse_id(&parent_id, "comment")?;
    let replies = state
        .platform
        .threads
        .list_replies(parent_id, &viewer, query.request())
        .await?;
    Ok(ApiResponse::ok(replies, "replies fetched successfully"))
}

pub(super) async fn add_reply(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path((parent_id, replying_to)): Path<(String, String)>,
    Json(body): Json<CommentBody>,
) -> Reply<Comment> {
    let parent_id = parse_id(&parent_id, "comment")?;
    let replying_to = parse_id(&replying_to, "comment")?;
    let reply = state
        .platform
        .threads
        .add_reply(parent_id, replying_to, &viewer, body.content.as_deref())
        .await?;
    Ok(ApiResponse::created(reply, "reply added successfully"))
}
