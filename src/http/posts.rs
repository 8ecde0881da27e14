use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use super::extract::{Authenticated, Caller, PageQuery, parse_id};
use super::{ApiResponse, AppState, Reply};
use crate::models::Post;
use crate::pagination::Page;
use crate::posts::PostDetail;

#[derive(Debug, Deserialize)]
pub(super) struct PostBody {
    content: Option<String>,
}

pub(super) async fn create_post(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Json(body): Json<PostBody>,
) -> Reply<Post> {
    let post = state
        .platform
        .posts
        .create_post(&viewer, body.content.as_deref())
        .await?;
    Ok(ApiResponse::created(post, "post created successfully"))
}

pub(super) async fn user_posts(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Reply<Page<Post>> {
    let user_id = parse_id(&user_id, "user")?;
    let posts = state
        .platform
        .posts
        .user_posts(user_id, query.request())
        .await?;
    Ok(ApiResponse::ok(posts, "posts fetched successfully"))
}

pub(super) async fn get_post(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Path(post_id): Path<String>,
) -> Reply<PostDetail> {
    let post_id = parse_id(&post_id, "post")?;
    let post = state.platform.posts.get_post(post_id, &viewer).await?;
    Ok(ApiResponse::ok(post, "post fetched successfully"))
}

pub(super) async fn update_post(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path(post_id): Path<String>,
    Json(body): Json<PostBody>,
) -> Reply<Post> {
    let post_id = parse_id(&post_id, "post")?;
    let post = state
        .platform
        .posts
        .update_post(post_id, &viewer, body.content.as_deref())
        .await?;
    Ok(ApiResponse::ok(post, "post updated successfully"))
}

pub(super) async fn delete_post(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path(post_id): Path<String>,
) -> Reply<Post> {
    let post_id = parse_id(&post_id, "post")?;
    let post = state.platform.posts.delete_post(post_id, &viewer).await?;
    Ok(ApiResponse::ok(post, "post deleted successfully"))
}
