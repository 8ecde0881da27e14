//! Records persisted by the store and the projections shared by several
//! query builders.
//!
//! Each struct mirrors the JSON exposed by the API. Row converters live next
//! to the column lists they decode so the two never drift apart.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use libsql::{Connection, Row};
use serde::{Deserialize, Serialize};

use crate::ids::ObjectId;
use crate::store::{get_bool, get_count, get_id, get_opt_id, get_time};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cover_image: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const USER_COLUMNS: &str =
    "u.id, u.username, u.email, u.full_name, u.avatar, u.cover_image, u.created_at, u.updated_at";

pub(crate) fn row_to_user(row: &Row) -> Result<User> {
    // Column order must match USER_COLUMNS.
    Ok(User {
        id: get_id(row, 0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        full_name: row.get(3)?,
        avatar: row.get(4)?,
        cover_image: row.get(5)?,
        created_at: get_time(row, 6)?,
        updated_at: get_time(row, 7)?,
    })
}

/// The public face of a user embedded in other records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerSnippet {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub username: String,
    pub full_name: String,
    pub avatar: String,
    pub created_at: DateTime<Utc>,
}

pub(crate) fn owner_columns(alias: &str) -> String {
    format!(
        "{alias}.id, {alias}.username, {alias}.full_name, {alias}.avatar, {alias}.created_at"
    )
}

pub(crate) const OWNER_COLUMN_COUNT: i32 = 5;

pub(crate) fn row_to_owner(row: &Row, start: i32) -> Result<OwnerSnippet> {
    Ok(OwnerSnippet {
        id: get_id(row, start)?,
        username: row.get(start + 1)?,
        full_name: row.get(start + 2)?,
        avatar: row.get(start + 3)?,
        created_at: get_time(row, start + 4)?,
    })
}

/// A user acting as a channel, with viewer-relative subscription state.
///
/// Counts are computed from the `subscriptions` table on every read, so they
/// always agree with the current relation rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
    #[serde(flatten)]
    pub profile: OwnerSnippet,
    pub subscribers: u64,
    pub is_subscribed: bool,
}

/// Selects a channel summary for the user aliased `alias`. `viewer` is the SQL
/// placeholder bound to the caller id (or NULL for anonymous callers).
pub(crate) fn channel_columns(alias: &str, viewer: &str) -> String {
    format!(
        "{owner}, \
         (SELECT COUNT(*) FROM subscriptions sc WHERE sc.channel_id = {alias}.id), \
         EXISTS(SELECT 1 FROM subscriptions sv WHERE sv.channel_id = {alias}.id AND sv.subscriber_id = {viewer})",
        owner = owner_columns(alias),
    )
}

pub(crate) const CHANNEL_COLUMN_COUNT: i32 = OWNER_COLUMN_COUNT + 2;

pub(crate) fn row_to_channel(row: &Row, start: i32) -> Result<ChannelSummary> {
    Ok(ChannelSummary {
        profile: row_to_owner(row, start)?,
        subscribers: get_count(row, start + OWNER_COLUMN_COUNT)?,
        is_subscribed: get_bool(row, start + OWNER_COLUMN_COUNT + 1)?,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "owner")]
    pub owner_id: ObjectId,
    pub video_file: String,
    pub thumbnail: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    /// Whole seconds.
    pub duration: i64,
    pub views: i64,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn video_columns(alias: &str) -> String {
    format!(
        "{alias}.id, {alias}.owner_id, {alias}.video_file, {alias}.thumbnail, {alias}.title, \
         {alias}.description, {alias}.tags_json, {alias}.duration, {alias}.views, \
         {alias}.is_published, {alias}.created_at, {alias}.updated_at"
    )
}

pub(crate) const VIDEO_COLUMN_COUNT: i32 = 12;

pub(crate) fn row_to_video(row: &Row, start: i32) -> Result<Video> {
    // Column order must match video_columns.
    let tags_json: String = row.get(start + 6)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).context("parsing stored tags JSON")?;
    Ok(Video {
        id: get_id(row, start)?,
        owner_id: get_id(row, start + 1)?,
        video_file: row.get(start + 2)?,
        thumbnail: row.get(start + 3)?,
        title: row.get(start + 4)?,
        description: row.get(start + 5)?,
        tags,
        duration: row.get(start + 7)?,
        views: row.get(start + 8)?,
        is_published: get_bool(row, start + 9)?,
        created_at: get_time(row, start + 10)?,
        updated_at: get_time(row, start + 11)?,
    })
}

/// A video as it appears in listings: the record plus its owner as a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoCard {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub title: String,
    pub description: String,
    pub thumbnail: String,
    pub duration: i64,
    pub views: i64,
    pub tags: Vec<String>,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub owner: ChannelSummary,
}

impl VideoCard {
    pub(crate) fn from_parts(video: Video, owner: ChannelSummary) -> Self {
        Self {
            id: video.id,
            title: video.title,
            description: video.description,
            thumbnail: video.thumbnail,
            duration: video.duration,
            views: video.views,
            tags: video.tags,
            is_published: video.is_published,
            created_at: video.created_at,
            owner,
        }
    }
}

/// Column list for a [`VideoCard`]; expects `videos v JOIN users u`.
pub(crate) fn video_card_columns(viewer: &str) -> String {
    format!("{}, {}", video_columns("v"), channel_columns("u", viewer))
}

pub(crate) const VIDEO_CARD_COLUMN_COUNT: i32 = VIDEO_COLUMN_COUNT + CHANNEL_COLUMN_COUNT;

pub(crate) fn row_to_video_card(row: &Row, start: i32) -> Result<VideoCard> {
    let video = row_to_video(row, start)?;
    let owner = row_to_channel(row, start + VIDEO_COLUMN_COUNT)?;
    Ok(VideoCard::from_parts(video, owner))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "owner")]
    pub owner_id: ObjectId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const POST_COLUMNS: &str = "p.id, p.owner_id, p.content, p.created_at, p.updated_at";

pub(crate) fn row_to_post(row: &Row) -> Result<Post> {
    Ok(Post {
        id: get_id(row, 0)?,
        owner_id: get_id(row, 1)?,
        content: row.get(2)?,
        created_at: get_time(row, 3)?,
        updated_at: get_time(row, 4)?,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub content: String,
    #[serde(rename = "video", skip_serializing_if = "Option::is_none")]
    pub video_id: Option<ObjectId>,
    #[serde(rename = "post", skip_serializing_if = "Option::is_none")]
    pub post_id: Option<ObjectId>,
    #[serde(rename = "owner")]
    pub owner_id: ObjectId,
    #[serde(rename = "parent", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ObjectId>,
    #[serde(rename = "replyingTo", skip_serializing_if = "Option::is_none")]
    pub replying_to_id: Option<ObjectId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn comment_columns(alias: &str) -> String {
    format!(
        "{alias}.id, {alias}.content, {alias}.video_id, {alias}.post_id, {alias}.owner_id, \
         {alias}.parent_id, {alias}.replying_to_id, {alias}.created_at, {alias}.updated_at"
    )
}

pub(crate) fn row_to_comment(row: &Row, start: i32) -> Result<Comment> {
    Ok(Comment {
        id: get_id(row, start)?,
        content: row.get(start + 1)?,
        video_id: get_opt_id(row, start + 2)?,
        post_id: get_opt_id(row, start + 3)?,
        owner_id: get_id(row, start + 4)?,
        parent_id: get_opt_id(row, start + 5)?,
        replying_to_id: get_opt_id(row, start + 6)?,
        created_at: get_time(row, start + 7)?,
        updated_at: get_time(row, start + 8)?,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "video", skip_serializing_if = "Option::is_none")]
    pub video_id: Option<ObjectId>,
    #[serde(rename = "comment", skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<ObjectId>,
    #[serde(rename = "post", skip_serializing_if = "Option::is_none")]
    pub post_id: Option<ObjectId>,
    pub liked_by: ObjectId,
    pub created_at: DateTime<Utc>,
}

pub(crate) const LIKE_COLUMNS: &str = "id, video_id, comment_id, post_id, liked_by, created_at";

pub(crate) fn row_to_like(row: &Row) -> Result<Like> {
    Ok(Like {
        id: get_id(row, 0)?,
        video_id: get_opt_id(row, 1)?,
        comment_id: get_opt_id(row, 2)?,
        post_id: get_opt_id(row, 3)?,
        liked_by: get_id(row, 4)?,
        created_at: get_time(row, 5)?,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "subscriber")]
    pub subscriber_id: ObjectId,
    #[serde(rename = "channel")]
    pub channel_id: ObjectId,
    pub created_at: DateTime<Utc>,
}

pub(crate) const SUBSCRIPTION_COLUMNS: &str = "id, subscriber_id, channel_id, created_at";

pub(crate) fn row_to_subscription(row: &Row) -> Result<Subscription> {
    Ok(Subscription {
        id: get_id(row, 0)?,
        subscriber_id: get_id(row, 1)?,
        channel_id: get_id(row, 2)?,
        created_at: get_time(row, 3)?,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "owner")]
    pub owner_id: ObjectId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const PLAYLIST_COLUMNS: &str =
    "pl.id, pl.owner_id, pl.name, pl.description, pl.created_at, pl.updated_at";

pub(crate) fn row_to_playlist(row: &Row) -> Result<Playlist> {
    Ok(Playlist {
        id: get_id(row, 0)?,
        owner_id: get_id(row, 1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: get_time(row, 4)?,
        updated_at: get_time(row, 5)?,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEntry {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub video_id: ObjectId,
    pub watched_by: ObjectId,
    pub created_at: DateTime<Utc>,
}

/// Tags as clients send them: a JSON list or one comma separated string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TagsInput {
    List(Vec<String>),
    Delimited(String),
}

impl TagsInput {
    /// Normalizes into an ordered list of trimmed, non-empty tags.
    pub fn into_tags(self) -> Vec<String> {
        let raw: Vec<String> = match self {
            Self::List(items) => items,
            Self::Delimited(text) => text.split(',').map(str::to_string).collect(),
        };
        raw.into_iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect()
    }
}

impl From<&str> for TagsInput {
    fn from(value: &str) -> Self {
        Self::Delimited(value.to_string())
    }
}

pub(crate) fn tags_json(tags: &[String]) -> Result<String> {
    serde_json::to_string(tags).context("serializing tags")
}

pub(crate) async fn find_user(conn: &Connection, id: ObjectId) -> Result<Option<User>> {
    let mut rows = conn
        .query(
            &format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1"),
            [id.to_string()],
        )
        .await?;
    rows.next().await?.as_ref().map(row_to_user).transpose()
}

/// Looks a user up by handle. Handles are stored lowercase.
pub(crate) async fn find_user_by_handle(conn: &Connection, handle: &str) -> Result<Option<User>> {
    let mut rows = conn
        .query(
            &format!("SELECT {USER_COLUMNS} FROM users u WHERE u.username = ?1"),
            [handle.trim().to_lowercase()],
        )
        .await?;
    rows.next().await?.as_ref().map(row_to_user).transpose()
}

pub(crate) async fn find_video(conn: &Connection, id: ObjectId) -> Result<Option<Video>> {
    let mut rows = conn
        .query(
            &format!("SELECT {} FROM videos v WHERE v.id = ?1", video_columns("v")),
            [id.to_string()],
        )
        .await?;
    rows.next()
        .await?
        .as_ref()
        .map(|row| row_to_video(row, 0))
        .transpose()
}

pub(crate) async fn find_post(conn: &Connection, id: ObjectId) -> Result<Option<Post>> {
    let mut rows = conn
        .query(
            &format!("SELECT {POST_COLUMNS} FROM posts p WHERE p.id = ?1"),
            [id.to_string()],
        )
        .await?;
    rows.next().await?.as_ref().map(row_to_post).transpose()
}

pub(crate) async fn find_comment(conn: &Connection, id: ObjectId) -> Result<Option<Comment>> {
    let mut rows = conn
        .query(
            &format!("SELECT {} FROM comments c WHERE c.id = ?1", comment_columns("c")),
            [id.to_string()],
        )
        .await?;
    rows.next()
        .await?
        .as_ref()
        .map(|row| row_to_comment(row, 0))
        .transpose()
}

pub(crate) async fn find_playlist(conn: &Connection, id: ObjectId) -> Result<Option<Playlist>> {
    let mut rows = conn
        .query(
            &format!("SELECT {PLAYLIST_COLUMNS} FROM playlists pl WHERE pl.id = ?1"),
            [id.to_string()],
        )
        .await?;
    rows.next().await?.as_ref().map(row_to_playlist).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimited_tags_are_split_and_trimmed() {
        let tags = TagsInput::from(" rust, ,async ,  web").into_tags();
        assert_eq!(tags, vec!["rust", "async", "web"]);
    }

    #[test]
    fn list_tags_keep_order_and_drop_blanks() {
        let input: TagsInput = serde_json::from_str(r#"["b", "  a ", ""]"#).unwrap();
        assert_eq!(input.into_tags(), vec!["b", "a"]);
    }

    #[test]
    fn tags_input_accepts_a_plain_string() {
        let input: TagsInput = serde_json::from_str(r#""one,two""#).unwrap();
        assert_eq!(input, TagsInput::Delimited("one,two".into()));
    }

    #[test]
    fn channel_summary_flattens_owner_fields() {
        let summary = ChannelSummary {
            profile: OwnerSnippet {
                id: ObjectId::new(),
                username: "ann".into(),
                full_name: "Ann Example".into(),
                avatar: "/media/a.png".into(),
                created_at: Utc::now(),
            },
            subscribers: 3,
            is_subscribed: true,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["username"], "ann");
        assert_eq!(json["fullName"], "Ann Example");
        assert_eq!(json["subscribers"], 3);
        assert_eq!(json["isSubscribed"], true);
        assert!(json.get("profile").is_none());
    }
}
