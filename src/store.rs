//! Persistence layer. A single libsql database holds every collection.
//!
//! The [`Store`] handle is opened once at startup, cloned into each component
//! and closed at shutdown. Every operation asks it for a fresh, configured
//! connection so concurrent requests never share transaction state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database, Row, Value, params::IntoParams};

use crate::ids::ObjectId;

/// Milliseconds SQLite waits on a locked database before giving up.
const BUSY_TIMEOUT_MS: u32 = 5_000;

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        r#"
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        PRAGMA busy_timeout={BUSY_TIMEOUT_MS};
        "#
    ))
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            avatar TEXT NOT NULL,
            cover_image TEXT NOT NULL DEFAULT '',
            password_hash TEXT NOT NULL,
            refresh_token_digest TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS videos (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            video_file TEXT NOT NULL,
            thumbnail TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            tags_json TEXT NOT NULL DEFAULT '[]',
            duration INTEGER NOT NULL DEFAULT 0,
            views INTEGER NOT NULL DEFAULT 0,
            is_published INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS posts (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS comments (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            video_id TEXT REFERENCES videos(id) ON DELETE CASCADE,
            post_id TEXT REFERENCES posts(id) ON DELETE CASCADE,
            owner_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            parent_id TEXT REFERENCES comments(id) ON DELETE CASCADE,
            replying_to_id TEXT REFERENCES comments(id) ON DELETE SET NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            CHECK ((video_id IS NULL) <> (post_id IS NULL))
        );

        CREATE TABLE IF NOT EXISTS likes (
            id TEXT PRIMARY KEY,
            video_id TEXT REFERENCES videos(id) ON DELETE CASCADE,
            comment_id TEXT REFERENCES comments(id) ON DELETE CASCADE,
            post_id TEXT REFERENCES posts(id) ON DELETE CASCADE,
            liked_by TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at INTEGER NOT NULL,
            CHECK ((video_id IS NOT NULL) + (comment_id IS NOT NULL) + (post_id IS NOT NULL) = 1),
            UNIQUE (video_id, liked_by),
            UNIQUE (comment_id, liked_by),
            UNIQUE (post_id, liked_by)
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            subscriber_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            channel_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at INTEGER NOT NULL,
            CHECK (subscriber_id <> channel_id),
            UNIQUE (subscriber_id, channel_id)
        );

        CREATE TABLE IF NOT EXISTS playlists (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS playlist_videos (
            playlist_id TEXT NOT NULL REFERENCES playlists(id) ON DELETE CASCADE,
            video_id TEXT NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            PRIMARY KEY (playlist_id, video_id)
        );

        CREATE TABLE IF NOT EXISTS watch_history (
            id TEXT PRIMARY KEY,
            video_id TEXT NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
            watched_by TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_videos_owner ON videos(owner_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_videos_published ON videos(is_published, created_at);
        CREATE INDEX IF NOT EXISTS idx_posts_owner ON posts(owner_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_comments_video ON comments(video_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_comments_parent ON comments(parent_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_likes_liked_by ON likes(liked_by, created_at);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_channel ON subscriptions(channel_id);
        CREATE INDEX IF NOT EXISTS idx_playlists_owner ON playlists(owner_id);
        CREATE INDEX IF NOT EXISTS idx_watch_history_viewer ON watch_history(watched_by, created_at);
        "#,
    )
    .await?;
    Ok(())
}

/// Process-wide handle to the database. Cloning is cheap.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    path: PathBuf,
}

impl Store {
    /// Opens (and if necessary creates) the database file and provisions the
    /// schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening database {}", path.display()))?;

        let conn = db.connect()?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").await?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await.context("creating schema")?;

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Hands out a connection with foreign keys and busy waiting enabled.
    pub async fn connect(&self) -> Result<Connection> {
        let conn = self
            .db
            .connect()
            .with_context(|| format!("connecting to {}", self.path.display()))?;
        configure_connection(&conn).await?;
        Ok(conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes the write-ahead log back into the main file before the
    /// handle is dropped.
    pub async fn close(self) -> Result<()> {
        let conn = self.connect().await?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            .await
            .context("checkpointing WAL")?;
        Ok(())
    }
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

pub(crate) fn id_value(id: ObjectId) -> Value {
    Value::Text(id.to_string())
}

pub(crate) fn opt_id_value(id: Option<ObjectId>) -> Value {
    id.map(id_value).unwrap_or(Value::Null)
}

pub(crate) fn millis_value(at: DateTime<Utc>) -> Value {
    Value::Integer(at.timestamp_millis())
}

pub(crate) fn get_id(row: &Row, idx: i32) -> Result<ObjectId> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .with_context(|| format!("malformed identifier in column {idx}: {raw}"))
}

pub(crate) fn get_opt_id(row: &Row, idx: i32) -> Result<Option<ObjectId>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| {
        value
            .parse()
            .with_context(|| format!("malformed identifier in column {idx}: {value}"))
    })
    .transpose()
}

pub(crate) fn get_time(row: &Row, idx: i32) -> Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| anyhow!("timestamp out of range in column {idx}: {millis}"))
}

pub(crate) fn get_bool(row: &Row, idx: i32) -> Result<bool> {
    Ok(row.get::<i64>(idx)? != 0)
}

pub(crate) fn get_count(row: &Row, idx: i32) -> Result<u64> {
    let value: i64 = row.get(idx)?;
    Ok(value.max(0) as u64)
}

/// Runs a single-column `COUNT(*)` style query.
pub(crate) async fn count(conn: &Connection, sql: &str, params: impl IntoParams) -> Result<u64> {
    let mut rows = conn.query(sql, params).await?;
    let row = rows.next().await?.context("count query returned no row")?;
    get_count(&row, 0)
}

/// Returns whether the query yields at least one row.
pub(crate) async fn exists(conn: &Connection, sql: &str, params: impl IntoParams) -> Result<bool> {
    let mut rows = conn.query(sql, params).await?;
    Ok(rows.next().await?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::params;
    use tempfile::tempdir;

    #[tokio::test]
    async fn opens_store_and_creates_schema() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested/socialtube.db");
        let store = Store::open(&path).await?;
        assert!(path.exists(), "database file should be created");

        let conn = store.connect().await?;
        let mut rows = conn.query("PRAGMA journal_mode", params![]).await?;
        let journal: String = rows.next().await?.context("missing journal row")?.get(0)?;
        assert_eq!(journal.to_lowercase(), "wal");

        for table in [
            "users",
            "videos",
            "posts",
            "comments",
            "likes",
            "subscriptions",
            "playlists",
            "playlist_videos",
            "watch_history",
        ] {
            let found = exists(
                &conn,
                "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                [table],
            )
            .await?;
            assert!(found, "missing table {table}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn connections_enforce_foreign_keys() -> Result<()> {
        let dir = tempdir()?;
        let store = Store::open(&dir.path().join("fk.db")).await?;
        let conn = store.connect().await?;
        let mut rows = conn.query("PRAGMA foreign_keys", params![]).await?;
        let flag: i64 = rows.next().await?.context("missing row")?.get(0)?;
        assert_eq!(flag, 1);

        let orphan = conn
            .execute(
                "INSERT INTO posts (id, owner_id, content, created_at, updated_at) VALUES (?1, ?2, 'x', 0, 0)",
                params![ObjectId::new().to_string(), ObjectId::new().to_string()],
            )
            .await;
        assert!(orphan.is_err(), "post without owner must be rejected");
        Ok(())
    }

    #[tokio::test]
    async fn reopening_keeps_existing_rows() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("reopen.db");
        let store = Store::open(&path).await?;
        let conn = store.connect().await?;
        conn.execute(
            r#"
            INSERT INTO users (id, username, email, full_name, avatar, password_hash, created_at, updated_at)
            VALUES (?1, 'ann', 'ann@example.test', 'Ann', '/a.png', 'hash', 0, 0)
            "#,
            params![ObjectId::new().to_string()],
        )
        .await?;
        drop(conn);
        store.close().await?;

        let reopened = Store::open(&path).await?;
        let conn = reopened.connect().await?;
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM users", params![]).await?, 1);
        Ok(())
    }
}
