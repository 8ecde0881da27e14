//! Community posts: short text updates on a channel.

use chrono::{DateTime, Utc};
use libsql::{Value, params::Params};
use serde::Serialize;

use crate::error::{ServiceError, ServiceResult, require_text};
use crate::identity::Viewer;
use crate::ids::ObjectId;
use crate::models::{
    OWNER_COLUMN_COUNT, OwnerSnippet, POST_COLUMNS, Post, find_post, find_user, owner_columns,
    row_to_owner, row_to_post,
};
use crate::pagination::{Page, PageRequest};
use crate::store::{Store, count, get_bool, get_count, get_time, id_value, millis_value, now};

const RETURNING_POST: &str = "id, owner_id, content, created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDetail {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner: OwnerSnippet,
    pub total_likes: u64,
    pub total_comments: u64,
    pub is_liked: bool,
    pub is_post_owner: bool,
}

#[derive(Clone)]
pub struct PostCommands {
    store: Store,
}

impl PostCommands {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn create_post(&self, viewer: &Viewer, content: Option<&str>) -> ServiceResult<Post> {
        let caller = viewer.require()?;
        let content = require_text(content, "post content should not be empty")?;
        let conn = self.store.connect().await?;
        let at = now();
        let mut rows = conn
            .query(
                &format!(
                    r#"
                    INSERT INTO posts (id, owner_id, content, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?4)
                    RETURNING {RETURNING_POST}
                    "#
                ),
                Params::Positional(vec![
                    id_value(ObjectId::new()),
                    id_value(caller),
                    Value::Text(content),
                    millis_value(at),
                ]),
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| ServiceError::Persistence(anyhow::anyhow!("insert returned no row")))?;
        Ok(row_to_post(&row)?)
    }

    /// The user's posts, newest first. A user without posts gets an empty page.
    pub async fn user_posts(&self, user_id: ObjectId, page: PageRequest) -> ServiceResult<Page<Post>> {
        let conn = self.store.connect().await?;
        if find_user(&conn, user_id).await?.is_none() {
            return Err(ServiceError::not_found("user not found"));
        }
        let total = count(
            &conn,
            "SELECT COUNT(*) FROM posts WHERE owner_id = ?1",
            [user_id.to_string()],
        )
        .await?;
        let mut rows = conn
            .query(
                &format!(
                    r#"
                    SELECT {POST_COLUMNS} FROM posts p
                    WHERE p.owner_id = ?1
                    ORDER BY p.created_at DESC, p.rowid DESC
                    LIMIT ?2 OFFSET ?3
                    "#
                ),
                Params::Positional(vec![
                    id_value(user_id),
                    Value::Integer(page.sql_limit()),
                    Value::Integer(page.sql_offset()),
                ]),
            )
            .await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(row_to_post(&row)?);
        }
        Ok(Page::new(items, total, page))
    }

    pub async fn get_post(&self, post_id: ObjectId, viewer: &Viewer) -> ServiceResult<PostDetail> {
        let conn = self.store.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    r#"
                    SELECT p.id, p.content, p.created_at, p.updated_at, {owner},
                        (SELECT COUNT(*) FROM likes l WHERE l.post_id = p.id),
                        (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id),
                        EXISTS (SELECT 1 FROM likes l WHERE l.post_id = p.id AND l.liked_by = ?2),
                        p.owner_id IS ?2
                    FROM posts p
                    JOIN users o ON o.id = p.owner_id
                    WHERE p.id = ?1
                    "#,
                    owner = owner_columns("o"),
                ),
                Params::Positional(vec![id_value(post_id), viewer.sql()]),
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| ServiceError::not_found("post not found"))?;
        let after_owner = 4 + OWNER_COLUMN_COUNT;
        Ok(PostDetail {
            id: post_id,
            content: row.get(1)?,
            created_at: get_time(&row, 2)?,
            updated_at: get_time(&row, 3)?,
            owner: row_to_owner(&row, 4)?,
            total_likes: get_count(&row, after_owner)?,
            total_comments: get_count(&row, after_owner + 1)?,
            is_liked: get_bool(&row, after_owner + 2)?,
            is_post_owner: get_bool(&row, after_owner + 3)?,
        })
    }

    pub async fn update_post(
        &self,
        post_id: ObjectId,
        viewer: &Viewer,
        content: Option<&str>,
    ) -> ServiceResult<Post> {
        viewer.require()?;
        let content = require_text(content, "post content should not be empty")?;
        let conn = self.store.connect().await?;
        let post = find_post(&conn, post_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("post not found"))?;
        viewer.ensure_owner(post.owner_id, "post")?;

        let mut rows = conn
            .query(
                &format!(
                    "UPDATE posts SET content = ?2, updated_at = ?3 WHERE id = ?1 RETURNING {RETURNING_POST}"
                ),
                Params::Positional(vec![
                    id_value(post.id),
                    Value::Text(content),
                    millis_value(now()),
                ]),
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| ServiceError::not_found("post not found"))?;
        Ok(row_to_post(&row)?)
    }

    /// Deletes the post together with its likes and comments.
    pub async fn delete_post(&self, post_id: ObjectId, viewer: &Viewer) -> ServiceResult<Post> {
        viewer.require()?;
        let conn = self.store.connect().await?;
        let post = find_post(&conn, post_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("post not found"))?;
        viewer.ensure_owner(post.owner_id, "post")?;
        conn.execute("DELETE FROM posts WHERE id = ?1", [post.id.to_string()])
            .await?;
        Ok(post)
    }
}
