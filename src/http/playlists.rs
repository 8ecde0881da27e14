use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;

use super::extract::{Authenticated, Caller, parse_id};
use super::{ApiResponse, AppState, Reply};
use crate::models::Playlist;
use crate::playlists::{PlaylistDetail, PlaylistSummary};

#[derive(Debug, Deserialize)]
pub(super) struct PlaylistBody {
    name: Option<String>,
    description: Option<String>,
}

pub(super) async fn create_playlist(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Json(body): Json<PlaylistBody>,
) -> Reply<Playlist> {
    let playlist = state
        .platform
        .playlists
        .create_playlist(&viewer, body.name.as_deref(), body.description.as_deref())
        .await?;
    Ok(ApiResponse::created(playlist, "playlist created successfully"))
}

pub(super) async fn user_playlists(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Reply<Vec<PlaylistSummary>> {
    let user_id = parse_id(&user_id, "user")?;
    let playlists = state.platform.playlists.user_playlists(user_id).await?;
    Ok(ApiResponse::ok(playlists, "playlists fetched successfully"))
}

pub(super) async fn get_playlist(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Path(playlist_id): Path<String>,
) -> Reply<PlaylistDetail> {
    let playlist_id = parse_id(&playlist_id, "playlist")?;
    let playlist = state
        .platform
        .playlists
        .get_playlist(playlist_id, &viewer)
        .await?;
    Ok(ApiResponse::ok(playlist, "playlist fetched successfully"))
}

pub(super) async fn update_playlist(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path(playlist_id): Path<String>,
    Json(body): Json<PlaylistBody>,
) -> Reply<Playlist> {
    let playlist_id = parse_id(&playlist_id, "playlist")?;
    let playlist = state
        .platform
        .playlists
        .update_playlist(
            playlist_id,
            &viewer,
            body.name.as_deref(),
            body.description.as_deref(),
        )
        .await?;
    Ok(ApiResponse::ok(playlist, "playlist updated successfully"))
}

pub(super) async fn delete_playlist(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path(playlist_id): Path<String>,
) -> Reply<Playlist> {
    let playlist_id = parse_id(&playlist_id, "playlist")?;
    let playlist = state
        .platform
        .playlists
        .delete_playlist(playlist_id, &viewer)
        .await?;
    Ok(ApiResponse::ok(playlist, "playlist deleted successfully"))
}

pub(super) async fn add_video(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path((video_id, playlist_id)): Path<(String, String)>,
) -> Reply<PlaylistDetail> {
    let video_id = parse_id(&video_id, "video")?;
    let playlist_id = parse_id(&playlist_id, "playlist")?;
    let playlist = state
        .platform
        .playlists
        .add_video(video_id, playlist_id, &viewer)
        .await?;
    Ok(ApiResponse::ok(playlist, "video added to playlist"))
}

pub(super) async fn remove_video(
    State(state): State<AppState>,
    Authenticated(viewer): Authenticated,
    Path((video_id, playlist_id)): Path<(String, String)>,
) -> Reply<PlaylistDetail> {
    let video_id = parse_id(&video_id, "video")?;
    let playlist_id = parse_id(&playlist_id, "playlist")?;
    let playlist = state
        .platform
        .playlists
        .remove_video(video_id, playlist_id, &viewer)
        .await?;
    Ok(ApiResponse::ok(playlist, "video removed from playlist"))
}
