//! Fixtures shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use libsql::params;
use parking_lot::Mutex;
use tempfile::TempDir;

use crate::blob::{BlobStorage, StoredObject, UploadedFile};
use crate::ids::ObjectId;
use crate::store::Store;

pub(crate) async fn create_store() -> Result<(TempDir, Store)> {
    let dir = tempfile::tempdir()?;
    let store = Store::open(&dir.path().join("socialtube.db")).await?;
    Ok((dir, store))
}

/// Fixed reference instant so ordering tests do not depend on the clock.
pub(crate) fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
}

pub(crate) async fn insert_user(store: &Store, username: &str) -> Result<ObjectId> {
    let id = ObjectId::new();
    let now = Utc::now().timestamp_millis();
    store
        .connect()
        .await?
        .execute(
            r#"
            INSERT INTO users (id, username, email, full_name, avatar, cover_image,
                               password_hash, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, '', 'not-a-hash', ?6, ?6)
            "#,
            params![
                id.to_string(),
                username,
                format!("{username}@example.test"),
                format!("{username} Example"),
                format!("/media/{username}.png"),
                now
            ],
        )
        .await?;
    Ok(id)
}

#[derive(Debug, Clone)]
pub(crate) struct VideoSeed {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub duration: i64,
    pub views: i64,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
}

impl VideoSeed {
    pub(crate) fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            description: format!("about {title}"),
            tags: Vec::new(),
            duration: 60,
            views: 0,
            is_published: true,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn unpublished(mut self) -> Self {
        self.is_published = false;
        self
    }

    pub(crate) fn views(mut self, views: i64) -> Self {
        self.views = views;
        self
    }

    pub(crate) fn duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub(crate) fn tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|tag| tag.to_string()).collect();
        self
    }

    pub(crate) fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Places the video `minutes` after [`base_time`].
    pub(crate) fn at_minute(mut self, minutes: i64) -> Self {
        self.created_at = base_time() + Duration::minutes(minutes);
        self
    }
}

pub(crate) async fn insert_video(store: &Store, owner: ObjectId, seed: VideoSeed) -> Result<ObjectId> {
    let id = ObjectId::new();
    let at = seed.created_at.timestamp_millis();
    store
        .connect()
        .await?
        .execute(
            r#"
            INSERT INTO videos (id, owner_id, video_file, thumbnail, title, description,
                                tags_json, duration, views, is_published, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
            "#,
            params![
                id.to_string(),
                owner.to_string(),
                format!("/media/{id}.mp4"),
                format!("/media/{id}.png"),
                seed.title,
                seed.description,
                serde_json::to_string(&seed.tags)?,
                seed.duration,
                seed.views,
                seed.is_published as i64,
                at
            ],
        )
        .await?;
    Ok(id)
}

pub(crate) async fn insert_post(store: &Store, owner: ObjectId, content: &str) -> Result<ObjectId> {
    let id = ObjectId::new();
    let now = Utc::now().timestamp_millis();
    store
        .connect()
        .await?
        .execute(
            "INSERT INTO posts (id, owner_id, content, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
            params![id.to_string(), owner.to_string(), content, now],
        )
        .await?;
    Ok(id)
}

pub(crate) async fn subscribe(store: &Store, subscriber: ObjectId, channel: ObjectId) -> Result<()> {
    store
        .connect()
        .await?
        .execute(
            "INSERT INTO subscriptions (id, subscriber_id, channel_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                ObjectId::new().to_string(),
                subscriber.to_string(),
                channel.to_string(),
                Utc::now().timestamp_millis()
            ],
        )
        .await?;
    Ok(())
}

pub(crate) async fn table_count(store: &Store, table: &str) -> Result<u64> {
    let conn = store.connect().await?;
    crate::store::count(&conn, &format!("SELECT COUNT(*) FROM {table}"), params![]).await
}

pub(crate) async fn image_upload() -> Result<UploadedFile> {
    UploadedFile::from_bytes(b"\x89PNG fake", Some("image.png"), Some("image/png")).await
}

pub(crate) async fn mp4_upload() -> Result<UploadedFile> {
    UploadedFile::from_bytes(b"fake mp4", Some("clip.mp4"), Some("video/mp4")).await
}

/// In-memory storage that records every call and can be told to fail the
/// n-th upload.
#[derive(Default)]
pub(crate) struct MemoryBlobStorage {
    uploads: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    upload_calls: AtomicUsize,
    fail_on_upload: Option<usize>,
    duration: Option<f64>,
}

impl MemoryBlobStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Upload number `n` (1-based) fails.
    pub(crate) fn failing_on_upload(n: usize) -> Self {
        Self {
            fail_on_upload: Some(n),
            ..Self::default()
        }
    }

    pub(crate) fn with_duration(seconds: f64) -> Self {
        Self {
            duration: Some(seconds),
            ..Self::default()
        }
    }

    pub(crate) fn uploaded(&self) -> Vec<String> {
        self.uploads.lock().clone()
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deletes.lock().clone()
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn upload(&self, file: &UploadedFile) -> Result<StoredObject> {
        let call = self.upload_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_upload == Some(call) {
            return Err(anyhow!("storage unavailable"));
        }
        if !file.path().exists() {
            return Err(anyhow!("upload temp file vanished"));
        }
        let url = format!(
            "memory://{}.{}",
            ObjectId::new(),
            file.extension().unwrap_or_else(|| "bin".into())
        );
        self.uploads.lock().push(url.clone());
        Ok(StoredObject {
            url,
            duration: self.duration,
        })
    }

    async fn delete(&self, url: &str) -> Result<()> {
        self.deletes.lock().push(url.to_string());
        Ok(())
    }
}
