//! Toggle Engine: flips likes and subscriptions.
//!
//! A toggle never reads before it writes. Inside one IMMEDIATE transaction it
//! first tries to delete the relation row and, if nothing was deleted, inserts
//! it with `ON CONFLICT DO NOTHING`. Exactly one of the two statements reports
//! a row per successful call, and the unique constraints in the schema keep at
//! most one relation per (subject, caller) pair however calls interleave.

use libsql::{Connection, Row, TransactionBehavior, Value, params::Params};
use serde::Serialize;
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};
use crate::identity::{Viewer, visible_video};
use crate::ids::ObjectId;
use crate::models::{
    LIKE_COLUMNS, Like, SUBSCRIPTION_COLUMNS, Subscription, find_comment, find_post, find_user,
    row_to_like, row_to_subscription,
};
use crate::store::{Store, exists, id_value, millis_value, now};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleKind {
    VideoLike,
    CommentLike,
    PostLike,
    Subscription,
}

impl ToggleKind {
    fn like_column(self) -> Option<&'static str> {
        match self {
            Self::VideoLike => Some("video_id"),
            Self::CommentLike => Some("comment_id"),
            Self::PostLike => Some("post_id"),
            Self::Subscription => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleStatus {
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Relation {
    Like(Like),
    Subscription(Subscription),
}

/// The relation row as it was created or as it was before deletion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToggleOutcome {
    pub status: ToggleStatus,
    pub relation: Relation,
}

impl ToggleOutcome {
    /// Whether the relation exists after the toggle.
    pub fn is_active(&self) -> bool {
        self.status == ToggleStatus::Added
    }
}

struct Statements {
    delete: String,
    insert: String,
}

impl Statements {
    fn for_kind(kind: ToggleKind) -> Self {
        match kind.like_column() {
            Some(column) => Self {
                delete: format!(
                    "DELETE FROM likes WHERE {column} = ?1 AND liked_by = ?2 RETURNING {LIKE_COLUMNS}"
                ),
                insert: format!(
                    "INSERT INTO likes (id, {column}, liked_by, created_at) VALUES (?3, ?1, ?2, ?4) \
                     ON CONFLICT DO NOTHING RETURNING {LIKE_COLUMNS}"
                ),
            },
            None => Self {
                delete: format!(
                    "DELETE FROM subscriptions WHERE channel_id = ?1 AND subscriber_id = ?2 \
                     RETURNING {SUBSCRIPTION_COLUMNS}"
                ),
                insert: format!(
                    "INSERT INTO subscriptions (id, channel_id, subscriber_id, created_at) \
                     VALUES (?3, ?1, ?2, ?4) ON CONFLICT DO NOTHING RETURNING {SUBSCRIPTION_COLUMNS}"
                ),
            },
        }
    }
}

#[derive(Clone)]
pub struct ToggleEngine {
    store: Store,
}

impl ToggleEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn toggle(
        &self,
        kind: ToggleKind,
        subject_id: ObjectId,
        viewer: &Viewer,
    ) -> ServiceResult<ToggleOutcome> {
        let caller = viewer.require()?;
        if kind == ToggleKind::Subscription && subject_id == caller {
            return Err(ServiceError::validation(
                "you cannot subscribe to your own channel",
            ));
        }

        let conn = self.store.connect().await?;
        ensure_subject(&conn, kind, subject_id, viewer).await?;

        let statements = Statements::for_kind(kind);
        // IMMEDIATE takes the write lock up front, so the delete and the
        // insert observe the same state.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await?;

        let removed = flip(
            &tx,
            kind,
            &statements.delete,
            vec![id_value(subject_id), id_value(caller)],
        )
        .await?;
        let outcome = match removed {
            Some(relation) => Some(ToggleOutcome {
                status: ToggleStatus::Removed,
                relation,
            }),
            None => flip(
                &tx,
                kind,
                &statements.insert,
                vec![
                    id_value(subject_id),
                    id_value(caller),
                    id_value(ObjectId::new()),
                    millis_value(now()),
                ],
            )
            .await?
            .map(|relation| ToggleOutcome {
                status: ToggleStatus::Added,
                relation,
            }),
        };

        match outcome {
            Some(outcome) => {
                tx.commit().await?;
                debug!(?kind, %subject_id, status = ?outcome.status, "toggled relation");
                Ok(outcome)
            }
            None => {
                tx.rollback().await?;
                Err(ServiceError::conflict(
                    "relation changed concurrently, please retry",
                ))
            }
        }
    }

    /// Anonymous callers are never subscribed.
    pub async fn is_subscribed(&self, channel_id: ObjectId, viewer: &Viewer) -> ServiceResult<bool> {
        let Some(caller) = viewer.id() else {
            return Ok(false);
        };
        let conn = self.store.connect().await?;
        Ok(exists(
            &conn,
            "SELECT 1 FROM subscriptions WHERE channel_id = ?1 AND subscriber_id = ?2",
            [channel_id.to_string(), caller.to_string()],
        )
        .await?)
    }
}

async fn ensure_subject(
    conn: &Connection,
    kind: ToggleKind,
    subject_id: ObjectId,
    viewer: &Viewer,
) -> ServiceResult<()> {
    match kind {
        ToggleKind::VideoLike => {
            visible_video(conn, subject_id, viewer).await?;
        }
        ToggleKind::CommentLike => {
            let comment = find_comment(conn, subject_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("comment not found"))?;
            if let Some(video_id) = comment.video_id {
                visible_video(conn, video_id, viewer)
                    .await
                    .map_err(|_| ServiceError::not_found("comment not found"))?;
            }
        }
        ToggleKind::PostLike => {
            find_post(conn, subject_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("post not found"))?;
        }
        ToggleKind::Subscription => {
            find_user(conn, subject_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("channel not found"))?;
        }
    }
    Ok(())
}

/// Runs one half of a toggle and decodes the row it reports, if any.
async fn flip(
    conn: &Connection,
    kind: ToggleKind,
    sql: &str,
    params: Vec<Value>,
) -> ServiceResult<Option<Relation>> {
    let mut rows = conn.query(sql, Params::Positional(params)).await?;
    match rows.next().await? {
        Some(row) => Ok(Some(relation_from_row(kind, &row)?)),
        None => Ok(None),
    }
}

fn relation_from_row(kind: ToggleKind, row: &Row) -> ServiceResult<Relation> {
    Ok(match kind {
        ToggleKind::Subscription => Relation::Subscription(row_to_subscription(row)?),
        _ => Relation::Like(row_to_like(row)?),
    })
}
