//! Thread Builder: comment listings and the commands that grow them.
//!
//! Threads are two levels deep. Top-level comments hang off a video or a
//! post; every reply points at the thread root through `parent` and at the
//! specific comment it answers through `replyingTo`. Listings always run
//! oldest first.

use chrono::{DateTime, Utc};
use libsql::{Connection, Value, params::Params};
use serde::Serialize;

use crate::error::{ServiceError, ServiceResult, require_text};
use crate::identity::{Viewer, visible_video};
use crate::ids::ObjectId;
use crate::models::{
    Comment, OWNER_COLUMN_COUNT, OwnerSnippet, find_comment, find_post, find_user,
    owner_columns, row_to_comment, row_to_owner,
};
use crate::pagination::{Page, PageRequest};
use crate::store::{
    Store, count, get_bool, get_count, get_id, get_opt_id, get_time, id_value, millis_value, now,
    opt_id_value,
};

/// The discussion a top-level comment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSubject {
    Video(ObjectId),
    Post(ObjectId),
}

impl ThreadSubject {
    fn column(self) -> &'static str {
        match self {
            Self::Video(_) => "c.video_id",
            Self::Post(_) => "c.post_id",
        }
    }

    fn id(self) -> ObjectId {
        match self {
            Self::Video(id) | Self::Post(id) => id,
        }
    }
}

/// The comment a reply answers, with its author.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyTarget {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub content: String,
    pub owner: OwnerSnippet,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner: OwnerSnippet,
    pub likes_count: u64,
    pub replies_count: u64,
    pub is_liked: bool,
    pub is_comment_owner: bool,
    pub is_subject_owner: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replying_to: Option<ReplyTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_owner: Option<OwnerSnippet>,
}

const VIEW_COLUMNS_BEFORE_OWNER: i32 = 4;

fn view_columns() -> String {
    format!(
        "c.id, c.content, c.created_at, c.updated_at, {owner}, \
         (SELECT COUNT(*) FROM likes l WHERE l.comment_id = c.id), \
         (SELECT COUNT(*) FROM comments r WHERE r.parent_id = c.id), \
         EXISTS(SELECT 1 FROM likes l WHERE l.comment_id = c.id AND l.liked_by = ?2)",
        owner = owner_columns("o"),
    )
}

const VIEW_COLUMN_COUNT: i32 = VIEW_COLUMNS_BEFORE_OWNER + OWNER_COLUMN_COUNT + 3;

fn row_to_view(row: &libsql::Row, viewer: &Viewer, subject_owner: ObjectId) -> ServiceResult<CommentView> {
    // Column order must match view_columns.
    let owner = row_to_owner(row, VIEW_COLUMNS_BEFORE_OWNER)?;
    let counts = VIEW_COLUMNS_BEFORE_OWNER + OWNER_COLUMN_COUNT;
    Ok(CommentView {
        id: get_id(row, 0)?,
        content: row.get(1)?,
        created_at: get_time(row, 2)?,
        updated_at: get_time(row, 3)?,
        is_comment_owner: viewer.is(owner.id),
        is_subject_owner: viewer.is(subject_owner),
        owner,
        likes_count: get_count(row, counts)?,
        replies_count: get_count(row, counts + 1)?,
        is_liked: get_bool(row, counts + 2)?,
        replying_to: None,
        parent_owner: None,
    })
}

#[derive(Clone)]
pub struct ThreadBuilder {
    store: Store,
}

impl ThreadBuilder {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn list_video_comments(
        &self,
        video_id: ObjectId,
        viewer: &Viewer,
        page: PageRequest,
    ) -> ServiceResult<Page<CommentView>> {
        self.list_top_level(ThreadSubject::Video(video_id), viewer, page)
            .await
    }

    pub async fn list_post_comments(
        &self,
        post_id: ObjectId,
        viewer: &Viewer,
        page: PageRequest,
    ) -> ServiceResult<Page<CommentView>> {
        self.list_top_level(ThreadSubject::Post(post_id), viewer, page)
            .await
    }

    async fn list_top_level(
        &self,
        subject: ThreadSubject,
        viewer: &Viewer,
        page: PageRequest,
    ) -> ServiceResult<Page<CommentView>> {
        let conn = self.store.connect().await?;
        let subject_owner = subject_owner(&conn, subject, viewer).await?;
        let filter = format!("{} = ?1 AND c.parent_id IS NULL", subject.column());

        let total = count(
            &conn,
            &format!("SELECT COUNT(*) FROM comments c WHERE {filter}"),
            [subject.id().to_string()],
        )
        .await?;

        let mut rows = conn
            .query(
                &format!(
                    r#"
                    SELECT {columns}
                    FROM comments c
                    JOIN users o ON o.id = c.owner_id
                    WHERE {filter}
                    ORDER BY c.created_at ASC, c.rowid ASC
                    LIMIT ?3 OFFSET ?4
                    "#,
                    columns = view_columns(),
                ),
                paged_params(subject.id(), viewer, page),
            )
            .await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(row_to_view(&row, viewer, subject_owner)?);
        }
        Ok(Page::new(items, total, page))
    }

    /// Replies under `parent_id`, each carrying the comment it answers.
    pub async fn list_replies(
        &self,
        parent_id: ObjectId,
        viewer: &Viewer,
        page: PageRequest,
    ) -> ServiceResult<Page<CommentView>> {
        let conn = self.store.connect().await?;
        let parent = find_comment(&conn, parent_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("comment not found"))?;
        let subject_owner = subject_owner(&conn, subject_of(&parent)?, viewer).await?;
        let parent_owner = find_user(&conn, parent.owner_id)
            .await?
            .map(|user| OwnerSnippet {
                id: user.id,
                username: user.username,
                full_name: user.full_name,
                avatar: user.avatar,
                created_at: user.created_at,
            });

        let total = count(
            &conn,
            "SELECT COUNT(*) FROM comments c WHERE c.parent_id = ?1",
            [parent.id.to_string()],
        )
        .await?;

        let mut rows = conn
            .query(
                &format!(
                    r#"
                    SELECT {columns}, rt.id, rt.content, {target_owner}
                    FROM comments c
                    JOIN users o ON o.id = c.owner_id
                    LEFT JOIN comments rt ON rt.id = c.replying_to_id
                    LEFT JOIN users rto ON rto.id = rt.owner_id
                    WHERE c.parent_id = ?1
                    ORDER BY c.created_at ASC, c.rowid ASC
                    LIMIT ?3 OFFSET ?4
                    "#,
                    columns = view_columns(),
                    target_owner = owner_columns("rto"),
                ),
                paged_params(parent.id, viewer, page),
            )
            .await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            let mut view = row_to_view(&row, viewer, subject_owner)?;
            view.replying_to = match get_opt_id(&row, VIEW_COLUMN_COUNT)? {
                Some(id) => Some(ReplyTarget {
                    id,
                    content: row.get(VIEW_COLUMN_COUNT + 1)?,
                    owner: row_to_owner(&row, VIEW_COLUMN_COUNT + 2)?,
                }),
                None => None,
            };
            view.parent_owner = parent_owner.clone();
            items.push(view);
        }
        Ok(Page::new(items, total, page))
    }

    pub async fn add_video_comment(
        &self,
        video_id: ObjectId,
        viewer: &Viewer,
        content: Option<&str>,
    ) -> ServiceResult<Comment> {
        let caller = viewer.require()?;
        let content = require_text(content, "comment content is required")?;
        let conn = self.store.connect().await?;
        let video = visible_video(&conn, video_id, viewer).await?;
        insert_comment(&conn, caller, content, ThreadSubject::Video(video.id), None, None).await
    }

    pub async fn add_post_comment(
        &self,
        post_id: ObjectId,
        viewer: &Viewer,
        content: Option<&str>,
    ) -> ServiceResult<Comment> {
        let caller = viewer.require()?;
        let content = require_text(content, "comment content is required")?;
        let conn = self.store.connect().await?;
        let post = find_post(&conn, post_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("post not found"))?;
        insert_comment(&conn, caller, content, ThreadSubject::Post(post.id), None, None).await
    }

    /// Answers `replying_to_id` inside the thread of `parent_id`. Replying to
    /// a reply attaches the new comment to that reply's root.
    pub async fn add_reply(
        &self,
        parent_id: ObjectId,
        replying_to_id: ObjectId,
        viewer: &Viewer,
        content: Option<&str>,
    ) -> ServiceResult<Comment> {
        let caller = viewer.require()?;
        let content = require_text(content, "reply content is required")?;
        let conn = self.store.connect().await?;

        let parent = find_comment(&conn, parent_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("comment not found"))?;
        let root = match parent.parent_id {
            Some(root_id) => find_comment(&conn, root_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("comment not found"))?,
            None => parent,
        };
        let subject = subject_of(&root)?;
        subject_owner(&conn, subject, viewer).await?;

        let target = find_comment(&conn, replying_to_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("reply target not found"))?;
        if target.id != root.id && target.parent_id != Some(root.id) {
            return Err(ServiceError::validation(
                "reply target does not belong to this thread",
            ));
        }

        insert_comment(&conn, caller, content, subject, Some(root.id), Some(target.id)).await
    }

    pub async fn update_comment(
        &self,
        comment_id: ObjectId,
        viewer: &Viewer,
        content: Option<&str>,
    ) -> ServiceResult<Comment> {
        viewer.require()?;
        let content = require_text(content, "comment content is required")?;
        let conn = self.store.connect().await?;
        let comment = find_comment(&conn, comment_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("comment not found"))?;
        viewer.ensure_owner(comment.owner_id, "comment")?;

        let mut rows = conn
            .query(
                r#"
                UPDATE comments SET content = ?2, updated_at = ?3
                WHERE id = ?1
                RETURNING id, content, video_id, post_id, owner_id, parent_id,
                          replying_to_id, created_at, updated_at
                "#,
                Params::Positional(vec![
                    id_value(comment.id),
                    Value::Text(content),
                    millis_value(now()),
                ]),
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| ServiceError::not_found("comment not found"))?;
        Ok(row_to_comment(&row, 0)?)
    }

    /// Deletes the comment. Replies and likes go with it.
    pub async fn delete_comment(&self, comment_id: ObjectId, viewer: &Viewer) -> ServiceResult<Comment> {
        viewer.require()?;
        let conn = self.store.connect().await?;
        let comment = find_comment(&conn, comment_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("comment not found"))?;
        viewer.ensure_owner(comment.owner_id, "comment")?;
        conn.execute("DELETE FROM comments WHERE id = ?1", [comment.id.to_string()])
            .await?;
        Ok(comment)
    }
}

fn paged_params(id: ObjectId, viewer: &Viewer, page: PageRequest) -> Params {
    Params::Positional(vec![
        id_value(id),
        viewer.sql(),
        Value::Integer(page.sql_limit()),
        Value::Integer(page.sql_offset()),
    ])
}

fn subject_of(comment: &Comment) -> ServiceResult<ThreadSubject> {
    match (comment.video_id, comment.post_id) {
        (Some(video), _) => Ok(ThreadSubject::Video(video)),
        (None, Some(post)) => Ok(ThreadSubject::Post(post)),
        (None, None) => Err(ServiceError::not_found("comment not found")),
    }
}

/// Resolves the subject's owner, applying the video publish gate.
async fn subject_owner(conn: &Connection, subject: ThreadSubject, viewer: &Viewer) -> ServiceResult<ObjectId> {
    match subject {
        ThreadSubject::Video(id) => Ok(visible_video(conn, id, viewer).await?.owner_id),
        ThreadSubject::Post(id) => find_post(conn, id)
            .await?
            .map(|post| post.owner_id)
            .ok_or_else(|| ServiceError::not_found("post not found")),
    }
}

async fn insert_comment(
    conn: &Connection,
    owner: ObjectId,
    content: String,
    subject: ThreadSubject,
    parent: Option<ObjectId>,
    replying_to: Option<ObjectId>,
) -> ServiceResult<Comment> {
    let (video_id, post_id) = match subject {
        ThreadSubject::Video(id) => (Some(id), None),
        ThreadSubject::Post(id) => (None, Some(id)),
    };
    let created_at = now();
    let comment = Comment {
        id: ObjectId::new(),
        content,
        video_id,
        post_id,
        owner_id: owner,
        parent_id: parent,
        replying_to_id: replying_to,
        created_at,
        updated_at: created_at,
    };
    conn.execute(
        r#"
        INSERT INTO comments (id, content, video_id, post_id, owner_id, parent_id,
                              replying_to_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
        "#,
        Params::Positional(vec![
            id_value(comment.id),
            Value::Text(comment.content.clone()),
            opt_id_value(video_id),
            opt_id_value(post_id),
            id_value(owner),
            opt_id_value(parent),
            opt_id_value(replying_to),
            millis_value(created_at),
        ]),
    )
    .await?;
    // Stored timestamps are millisecond precision.
    Ok(Comment {
        created_at: truncate_millis(created_at),
        updated_at: truncate_millis(created_at),
        ..comment
    })
}

fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{VideoSeed, create_store, insert_post, insert_user, insert_video};
    use anyhow::Result;
    use libsql::params;

    async fn like_comment(store: &Store, comment: ObjectId, user: ObjectId) -> Result<()> {
        store
            .connect()
            .await?
            .execute(
                "INSERT INTO likes (id, comment_id, liked_by, created_at) VALUES (?1, ?2, ?3, 0)",
                params![ObjectId::new().to_string(), comment.to_string(), user.to_string()],
            )
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn thread_counts_replies_per_comment() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let bob = insert_user(&store, "bob").await?;
        let video = insert_video(&store, ann, VideoSeed::new("clip")).await?;
        let threads = ThreadBuilder::new(store);
        let as_bob = Viewer::user(bob);

        let first = threads.add_video_comment(video, &as_bob, Some("first")).await?;
        let second = threads.add_video_comment(video, &as_bob, Some("second")).await?;
        let third = threads.add_video_comment(video, &as_bob, Some("third")).await?;
        let reply_a = threads
            .add_reply(second.id, second.id, &Viewer::user(ann), Some("a"))
            .await?;
        let reply_b = threads.add_reply(second.id, reply_a.id, &as_bob, Some("b")).await?;

        let page = threads
            .list_video_comments(video, &Viewer::anonymous(), PageRequest::default())
            .await?;
        let ids: Vec<_> = page.items.iter().map(|view| view.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
        let replies: Vec<_> = page.items.iter().map(|view| view.replies_count).collect();
        assert_eq!(replies, vec![0, 2, 0]);
        assert_eq!(page.total, 3);

        let replies = threads
            .list_replies(second.id, &Viewer::anonymous(), PageRequest::default())
            .await?;
        let ids: Vec<_> = replies.items.iter().map(|view| view.id).collect();
        assert_eq!(ids, vec![reply_a.id, reply_b.id]);
        Ok(())
    }

    #[tokio::test]
    async fn replies_carry_target_and_parent_owner() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let bob = insert_user(&store, "bob").await?;
        let video = insert_video(&store, ann, VideoSeed::new("clip")).await?;
        let threads = ThreadBuilder::new(store);

        let root = threads.add_video_comment(video, &Viewer::user(ann), Some("root")).await?;
        let answer = threads.add_reply(root.id, root.id, &Viewer::user(bob), Some("hi")).await?;
        // Replying to a reply still lands under the root.
        let nested = threads
            .add_reply(answer.id, answer.id, &Viewer::user(ann), Some("hey bob"))
            .await?;
        assert_eq!(nested.parent_id, Some(root.id));
        assert_eq!(nested.replying_to_id, Some(answer.id));

        let replies = threads
            .list_replies(root.id, &Viewer::user(bob), PageRequest::default())
            .await?;
        let last = replies.items.last().expect("two replies");
        let target = last.replying_to.as_ref().expect("reply target");
        assert_eq!(target.id, answer.id);
        assert_eq!(target.owner.username, "bob");
        assert_eq!(last.parent_owner.as_ref().map(|o| o.id), Some(ann));
        assert!(!last.is_comment_owner);
        assert!(!last.is_subject_owner);
        assert!(replies.items[0].is_comment_owner);
        Ok(())
    }

    #[tokio::test]
    async fn reply_target_must_share_the_thread() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let video = insert_video(&store, ann, VideoSeed::new("clip")).await?;
        let threads = ThreadBuilder::new(store);
        let viewer = Viewer::user(ann);

        let one = threads.add_video_comment(video, &viewer, Some("one")).await?;
        let two = threads.add_video_comment(video, &viewer, Some("two")).await?;
        let err = threads
            .add_reply(one.id, two.id, &viewer, Some("crossed"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        Ok(())
    }

    #[tokio::test]
    async fn comment_flags_are_viewer_relative() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let bob = insert_user(&store, "bob").await?;
        let video = insert_video(&store, ann, VideoSeed::new("clip")).await?;
        let threads = ThreadBuilder::new(store.clone());
        let comment = threads
            .add_video_comment(video, &Viewer::user(bob), Some("nice"))
            .await?;
        like_comment(&store, comment.id, ann).await?;

        let as_ann = threads
            .list_video_comments(video, &Viewer::user(ann), PageRequest::default())
            .await?;
        let view = &as_ann.items[0];
        assert!(view.is_subject_owner);
        assert!(!view.is_comment_owner);
        assert!(view.is_liked);
        assert_eq!(view.likes_count, 1);
        assert_eq!(view.owner.username, "bob");

        let as_bob = threads
            .list_video_comments(video, &Viewer::user(bob), PageRequest::default())
            .await?;
        assert!(as_bob.items[0].is_comment_owner);
        assert!(!as_bob.items[0].is_subject_owner);
        assert!(!as_bob.items[0].is_liked);
        Ok(())
    }

    #[tokio::test]
    async fn empty_thread_is_success_but_missing_subject_is_not() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let video = insert_video(&store, ann, VideoSeed::new("quiet")).await?;
        let post = insert_post(&store, ann, "hello").await?;
        let threads = ThreadBuilder::new(store);

        let empty = threads
            .list_video_comments(video, &Viewer::anonymous(), PageRequest::default())
            .await?;
        assert!(empty.items.is_empty());
        assert_eq!(empty.total_pages, 0);
        let empty_post = threads
            .list_post_comments(post, &Viewer::anonymous(), PageRequest::default())
            .await?;
        assert!(empty_post.items.is_empty());

        assert!(matches!(
            threads
                .list_video_comments(ObjectId::new(), &Viewer::anonymous(), PageRequest::default())
                .await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            threads
                .list_post_comments(ObjectId::new(), &Viewer::anonymous(), PageRequest::default())
                .await,
            Err(ServiceError::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn draft_threads_are_gated() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let bob = insert_user(&store, "bob").await?;
        let draft = insert_video(&store, ann, VideoSeed::new("draft").unpublished()).await?;
        let threads = ThreadBuilder::new(store);

        assert!(matches!(
            threads
                .list_video_comments(draft, &Viewer::user(bob), PageRequest::default())
                .await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            threads.add_video_comment(draft, &Viewer::user(bob), Some("hi")).await,
            Err(ServiceError::NotFound(_))
        ));
        threads
            .list_video_comments(draft, &Viewer::user(ann), PageRequest::default())
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn post_threads_work_like_video_threads() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let bob = insert_user(&store, "bob").await?;
        let post = insert_post(&store, ann, "news").await?;
        let threads = ThreadBuilder::new(store);

        let comment = threads.add_post_comment(post, &Viewer::user(bob), Some(" cool ")).await?;
        assert_eq!(comment.content, "cool");
        assert_eq!(comment.post_id, Some(post));
        threads.add_reply(comment.id, comment.id, &Viewer::user(ann), Some("thanks")).await?;

        let page = threads
            .list_post_comments(post, &Viewer::user(ann), PageRequest::default())
            .await?;
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].replies_count, 1);
        assert!(page.items[0].is_subject_owner);
        Ok(())
    }

    #[tokio::test]
    async fn commands_validate_input_and_identity() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let video = insert_video(&store, ann, VideoSeed::new("clip")).await?;
        let threads = ThreadBuilder::new(store);

        assert!(matches!(
            threads.add_video_comment(video, &Viewer::anonymous(), Some("hi")).await,
            Err(ServiceError::Unauthenticated(_))
        ));
        assert!(matches!(
            threads.add_video_comment(video, &Viewer::user(ann), Some("   ")).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            threads.add_video_comment(video, &Viewer::user(ann), None).await,
            Err(ServiceError::Validation(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn only_owner_updates_or_deletes() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let bob = insert_user(&store, "bob").await?;
        let video = insert_video(&store, ann, VideoSeed::new("clip")).await?;
        let threads = ThreadBuilder::new(store);

        let comment = threads.add_video_comment(video, &Viewer::user(ann), Some("v1")).await?;
        assert!(matches!(
            threads.update_comment(comment.id, &Viewer::user(bob), Some("hijack")).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            threads.delete_comment(comment.id, &Viewer::user(bob)).await,
            Err(ServiceError::Forbidden(_))
        ));

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let updated = threads
            .update_comment(comment.id, &Viewer::user(ann), Some("v2"))
            .await?;
        assert_eq!(updated.content, "v2");
        assert!(updated.updated_at > comment.updated_at);

        assert!(matches!(
            threads.update_comment(ObjectId::new(), &Viewer::user(ann), Some("x")).await,
            Err(ServiceError::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn deleting_a_root_removes_its_replies() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let video = insert_video(&store, ann, VideoSeed::new("clip")).await?;
        let threads = ThreadBuilder::new(store.clone());
        let viewer = Viewer::user(ann);

        let root = threads.add_video_comment(video, &viewer, Some("root")).await?;
        threads.add_reply(root.id, root.id, &viewer, Some("child")).await?;
        like_comment(&store, root.id, ann).await?;

        let deleted = threads.delete_comment(root.id, &viewer).await?;
        assert_eq!(deleted.id, root.id);
        assert_eq!(crate::testing::table_count(&store, "comments").await?, 0);
        assert_eq!(crate::testing::table_count(&store, "likes").await?, 0);
        Ok(())
    }
}
