//! Video commands: publish, edit, delete and the publish switch.

use std::sync::Arc;

use anyhow::Context;
use libsql::{Connection, Value, params::Params};
use tracing::{info, warn};

use crate::blob::{BlobStorage, StoredObject, UploadedFile, delete_best_effort};
use crate::error::{ServiceError, ServiceResult, require_text};
use crate::identity::Viewer;
use crate::ids::ObjectId;
use crate::models::{TagsInput, Video, find_video, row_to_video, tags_json};
use crate::store::{Store, id_value, millis_value, now};

/// Unqualified column list for `RETURNING`, in `row_to_video` order.
const RETURNING_VIDEO: &str = "id, owner_id, video_file, thumbnail, title, description, \
    tags_json, duration, views, is_published, created_at, updated_at";

#[derive(Debug, Default)]
pub struct PublishVideo {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_published: Option<bool>,
    pub tags: Option<TagsInput>,
    pub video_file: Option<UploadedFile>,
    pub thumbnail: Option<UploadedFile>,
}

#[derive(Debug, Default)]
pub struct UpdateVideo {
    pub title: Option<String>,
    /// Blank keeps the current description.
    pub description: Option<String>,
    pub tags: Option<TagsInput>,
    pub thumbnail: Option<UploadedFile>,
}

#[derive(Clone)]
pub struct VideoCommands {
    store: Store,
    blobs: Arc<dyn BlobStorage>,
}

impl VideoCommands {
    pub fn new(store: Store, blobs: Arc<dyn BlobStorage>) -> Self {
        Self { store, blobs }
    }

    /// Validates every field, uploads both files and only then writes the
    /// record. Blobs already uploaded are removed if a later step fails.
    pub async fn publish_video(&self, viewer: &Viewer, input: PublishVideo) -> ServiceResult<Video> {
        let caller = viewer.require()?;
        let title = require_text(input.title.as_deref(), "title, description and isPublished are required")?;
        let description = require_text(
            input.description.as_deref(),
            "title, description and isPublished are required",
        )?;
        let is_published = input
            .is_published
            .ok_or_else(|| ServiceError::validation("title, description and isPublished are required"))?;
        let (Some(video_file), Some(thumbnail)) = (&input.video_file, &input.thumbnail) else {
            return Err(ServiceError::validation("video and thumbnail files are required"));
        };
        if !video_file.is_mp4() {
            return Err(ServiceError::validation("only MP4 files are allowed for video"));
        }
        if !thumbnail.is_image() {
            return Err(ServiceError::validation("only image files are allowed for thumbnail"));
        }
        let tags = input.tags.map(TagsInput::into_tags).unwrap_or_default();

        let stored_video = self
            .blobs
            .upload(video_file)
            .await
            .context("uploading video file")?;
        let stored_thumbnail = match self.blobs.upload(thumbnail).await {
            Ok(stored) => stored,
            Err(err) => {
                self.discard(&[&stored_video]).await;
                return Err(ServiceError::Persistence(err.context("uploading thumbnail")));
            }
        };

        let record = Video {
            id: ObjectId::new(),
            owner_id: caller,
            video_file: stored_video.url.clone(),
            thumbnail: stored_thumbnail.url.clone(),
            title,
            description,
            tags,
            duration: stored_video.duration.unwrap_or(0.0).round() as i64,
            views: 0,
            is_published,
            created_at: now(),
            updated_at: now(),
        };
        let inserted = match self.insert(&record).await {
            Ok(video) => video,
            Err(err) => {
                self.discard(&[&stored_video, &stored_thumbnail]).await;
                return Err(err);
            }
        };
        info!(video_id = %inserted.id, owner = %caller, "published video");
        Ok(inserted)
    }

    pub async fn update_video(
        &self,
        video_id: ObjectId,
        viewer: &Viewer,
        input: UpdateVideo,
    ) -> ServiceResult<Video> {
        viewer.require()?;
        let conn = self.store.connect().await?;
        let current = owned_video(&conn, video_id, viewer).await?;

        let title = require_text(input.title.as_deref(), "a valid title is required")?;
        let description = input
            .description
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| current.description.clone());
        let tags = input
            .tags
            .map(TagsInput::into_tags)
            .unwrap_or_else(|| current.tags.clone());

        let tags_text = tags_json(&tags)?;

        let new_thumbnail = match &input.thumbnail {
            Some(file) if !file.is_image() || file.is_gif() => {
                return Err(ServiceError::validation(
                    "only non-GIF image files are allowed for thumbnails",
                ));
            }
            Some(file) => Some(
                self.blobs
                    .upload(file)
                    .await
                    .context("uploading thumbnail")?,
            ),
            None => None,
        };
        let thumbnail = new_thumbnail
            .as_ref()
            .map(|stored| stored.url.clone())
            .unwrap_or_else(|| current.thumbnail.clone());

        let video = match write_update(&conn, current.id, title, description, tags_text, thumbnail)
            .await
        {
            Ok(video) => video,
            Err(err) => {
                self.discard(&new_thumbnail.iter().collect::<Vec<_>>()).await;
                return Err(err);
            }
        };

        if new_thumbnail.is_some() {
            delete_best_effort(self.blobs.as_ref(), &current.thumbnail).await;
        }
        Ok(video)
    }

    /// Removes the video with its likes, comments, playlist entries and
    /// history rows, then its stored media.
    pub async fn delete_video(&self, video_id: ObjectId, viewer: &Viewer) -> ServiceResult<Video> {
        viewer.require()?;
        let conn = self.store.connect().await?;
        let video = owned_video(&conn, video_id, viewer).await?;
        conn.execute("DELETE FROM videos WHERE id = ?1", [video.id.to_string()])
            .await?;

        delete_best_effort(self.blobs.as_ref(), &video.video_file).await;
        delete_best_effort(self.blobs.as_ref(), &video.thumbnail).await;
        info!(%video_id, "deleted video");
        Ok(video)
    }

    pub async fn toggle_publish(&self, video_id: ObjectId, viewer: &Viewer) -> ServiceResult<Video> {
        let caller = viewer.require()?;
        let conn = self.store.connect().await?;
        owned_video(&conn, video_id, viewer).await?;

        let mut rows = conn
            .query(
                &format!(
                    r#"
                    UPDATE videos SET is_published = 1 - is_published, updated_at = ?3
                    WHERE id = ?1 AND owner_id = ?2
                    RETURNING {RETURNING_VIDEO}
                    "#
                ),
                Params::Positional(vec![id_value(video_id), id_value(caller), millis_value(now())]),
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| ServiceError::not_found("video not found"))?;
        Ok(row_to_video(&row, 0)?)
    }

    async fn insert(&self, video: &Video) -> ServiceResult<Video> {
        let conn = self.store.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    r#"
                    INSERT INTO videos (id, owner_id, video_file, thumbnail, title, description,
                                        tags_json, duration, views, is_published, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?10)
                    RETURNING {RETURNING_VIDEO}
                    "#
                ),
                Params::Positional(vec![
                    id_value(video.id),
                    id_value(video.owner_id),
                    Value::Text(video.video_file.clone()),
                    Value::Text(video.thumbnail.clone()),
                    Value::Text(video.title.clone()),
                    Value::Text(video.description.clone()),
                    Value::Text(tags_json(&video.tags)?),
                    Value::Integer(video.duration),
                    Value::Integer(video.is_published as i64),
                    millis_value(video.created_at),
                ]),
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| ServiceError::Persistence(anyhow::anyhow!("insert returned no row")))?;
        Ok(row_to_video(&row, 0)?)
    }

    async fn discard(&self, stored: &[&StoredObject]) {
        for object in stored {
            warn!(url = %object.url, "removing orphaned upload");
            delete_best_effort(self.blobs.as_ref(), &object.url).await;
        }
    }
}

async fn write_update(
    conn: &Connection,
    video_id: ObjectId,
    title: String,
    description: String,
    tags_text: String,
    thumbnail: String,
) -> ServiceResult<Video> {
    let mut rows = conn
        .query(
            &format!(
                r#"
                UPDATE videos
                SET title = ?2, description = ?3, tags_json = ?4, thumbnail = ?5, updated_at = ?6
                WHERE id = ?1
                RETURNING {RETURNING_VIDEO}
                "#
            ),
            Params::Positional(vec![
                id_value(video_id),
                Value::Text(title),
                Value::Text(description),
                Value::Text(tags_text),
                Value::Text(thumbnail),
                millis_value(now()),
            ]),
        )
        .await?;
    let row = rows
        .next()
        .await?
        .ok_or_else(|| ServiceError::not_found("video not found"))?;
    Ok(row_to_video(&row, 0)?)
}

async fn owned_video(conn: &Connection, video_id: ObjectId, viewer: &Viewer) -> ServiceResult<Video> {
    let video = find_video(conn, video_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("video not found"))?;
    viewer.ensure_owner(video.owner_id, "video")?;
    Ok(video)
}
