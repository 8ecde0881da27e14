//! Feed Builder: paginated video and channel listings.
//!
//! Every listing joins the owner as a [`ChannelSummary`], so subscriber counts
//! and `isSubscribed` are read from the relation rows at query time rather
//! than from a stored counter. Only published videos are ever listed here;
//! [`FeedBuilder::get_video_preview`] is the one path that returns a draft.

use chrono::{DateTime, Utc};
use libsql::{Connection, Value, params::Params};
use serde::Serialize;
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};
use crate::identity::{Viewer, visible_video};
use crate::ids::ObjectId;
use crate::models::{
    ChannelSummary, VIDEO_CARD_COLUMN_COUNT, VIDEO_COLUMN_COUNT, VideoCard,
    channel_columns, find_user, find_user_by_handle, find_video, row_to_channel,
    row_to_video, row_to_video_card, video_card_columns,
};
use crate::pagination::{Page, PageRequest};
use crate::store::{Store, count, get_bool, get_count, get_id, get_time, id_value};

/// Upper bound on channels returned next to a keyword search.
pub const MAX_CHANNEL_MATCHES: i64 = 20;

const KEYWORD_PREDICATE: &str = "v.is_published = 1 AND (\
    instr(lower(v.title), lower(?1)) > 0 \
    OR instr(lower(v.description), lower(?1)) > 0 \
    OR EXISTS (SELECT 1 FROM json_each(v.tags_json) t WHERE instr(lower(t.value), lower(?1)) > 0))";

/// Which videos a feed request covers. Exactly one mode applies per call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VideoFilter {
    #[default]
    Unfiltered,
    ByOwner(String),
    ByKeyword(String),
}

impl VideoFilter {
    /// Builds the filter from raw query values. `+` decodes to a space, blank
    /// values count as absent and an owner handle wins over a keyword.
    pub fn from_query(user: Option<&str>, search: Option<&str>) -> Self {
        let clean = |raw: Option<&str>| {
            raw.map(|value| value.replace('+', " ").trim().to_string())
                .filter(|value| !value.is_empty())
        };
        if let Some(handle) = clean(user) {
            return Self::ByOwner(handle);
        }
        if let Some(keyword) = clean(search) {
            return Self::ByKeyword(keyword);
        }
        Self::Unfiltered
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    CreatedAt,
    Views,
    Duration,
    Title,
}

impl SortKey {
    pub fn parse(raw: &str) -> ServiceResult<Self> {
        match raw.trim() {
            value if value.eq_ignore_ascii_case("createdAt") => Ok(Self::CreatedAt),
            value if value.eq_ignore_ascii_case("views") => Ok(Self::Views),
            value if value.eq_ignore_ascii_case("duration") => Ok(Self::Duration),
            value if value.eq_ignore_ascii_case("title") => Ok(Self::Title),
            other => Err(ServiceError::validation(format!("cannot sort by {other}"))),
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "v.created_at",
            Self::Views => "v.views",
            Self::Duration => "v.duration",
            Self::Title => "v.title",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn parse(raw: &str) -> ServiceResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" | "1" => Ok(Self::Asc),
            "desc" | "descending" | "-1" => Ok(Self::Desc),
            other => Err(ServiceError::validation(format!(
                "unknown sort direction {other}"
            ))),
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedSort {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl FeedSort {
    pub fn from_query(sort_by: Option<&str>, sort_type: Option<&str>) -> ServiceResult<Self> {
        fn present(raw: Option<&str>) -> Option<&str> {
            raw.map(str::trim).filter(|value| !value.is_empty())
        }
        Ok(Self {
            key: present(sort_by).map(SortKey::parse).transpose()?.unwrap_or_default(),
            direction: present(sort_type)
                .map(SortDirection::parse)
                .transpose()?
                .unwrap_or_default(),
        })
    }

    /// Identifier tie-break keeps page boundaries deterministic.
    fn order_by(self) -> String {
        let dir = self.direction.sql();
        format!("{} {dir}, v.id {dir}", self.key.column())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedQuery {
    pub filter: VideoFilter,
    pub sort: FeedSort,
    pub page: PageRequest,
}

/// A channel whose handle or display name matched a keyword search.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMatch {
    pub channel: ChannelSummary,
    pub preview: Option<VideoCard>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedPage {
    #[serde(flatten)]
    pub videos: Page<VideoCard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<ChannelMatch>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeSummary {
    pub total_likes: u64,
    pub is_liked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetail {
    #[serde(flatten)]
    pub card: VideoCard,
    pub video_file: String,
    pub updated_at: DateTime<Utc>,
    pub likes: LikeSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProfile {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub username: String,
    pub full_name: String,
    pub avatar: String,
    pub cover_image: String,
    pub created_at: DateTime<Utc>,
    pub subscribers_count: u64,
    pub channels_subscribed_to_count: u64,
    pub is_subscribed: bool,
}

#[derive(Clone)]
pub struct FeedBuilder {
    store: Store,
}

impl FeedBuilder {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn list_videos(&self, query: &FeedQuery, viewer: &Viewer) -> ServiceResult<FeedPage> {
        let conn = self.store.connect().await?;

        let (predicate, filter_params) = match &query.filter {
            VideoFilter::Unfiltered => ("v.is_published = 1", Vec::new()),
            VideoFilter::ByOwner(handle) => {
                let owner = find_user_by_handle(&conn, handle)
                    .await?
                    .ok_or_else(|| ServiceError::not_found("channel not found"))?;
                (
                    "v.is_published = 1 AND v.owner_id = ?1",
                    vec![id_value(owner.id)],
                )
            }
            VideoFilter::ByKeyword(keyword) => {
                (KEYWORD_PREDICATE, vec![Value::Text(keyword.clone())])
            }
        };
        debug!(filter = ?query.filter, sort = ?query.sort, "building video feed");

        let total = count(
            &conn,
            &format!("SELECT COUNT(*) FROM videos v WHERE {predicate}"),
            Params::Positional(filter_params.clone()),
        )
        .await?;
        let items = fetch_cards(
            &conn,
            predicate,
            filter_params,
            query.sort,
            query.page.sql_limit(),
            query.page.sql_offset(),
            viewer,
        )
        .await?;

        let channels = match &query.filter {
            VideoFilter::ByKeyword(keyword) => {
                Some(matching_channels(&conn, keyword, query.sort, viewer).await?)
            }
            _ => None,
        };

        Ok(FeedPage {
            videos: Page::new(items, total, query.page),
            channels,
        })
    }

    /// A published video (or the caller's own draft) with like totals.
    pub async fn get_video(&self, video_id: ObjectId, viewer: &Viewer) -> ServiceResult<VideoDetail> {
        let conn = self.store.connect().await?;
        let video = visible_video(&conn, video_id, viewer).await?;
        load_detail(&conn, video.id, viewer).await
    }

    /// Owner-only view used by the editor. Everyone else sees `NotFound`.
    pub async fn get_video_preview(
        &self,
        video_id: ObjectId,
        viewer: &Viewer,
    ) -> ServiceResult<VideoDetail> {
        let conn = self.store.connect().await?;
        match find_video(&conn, video_id).await? {
            Some(video) if viewer.is(video.owner_id) => load_detail(&conn, video.id, viewer).await,
            _ => Err(ServiceError::not_found("video not found")),
        }
    }

    /// Videos the caller liked, most recent like first.
    pub async fn liked_videos(&self, viewer: &Viewer, page: PageRequest) -> ServiceResult<Page<VideoCard>> {
        let caller = viewer.require()?;
        let conn = self.store.connect().await?;
        let filter = "l.liked_by = ?1 AND (v.is_published = 1 OR v.owner_id = ?1)";

        let total = count(
            &conn,
            &format!(
                "SELECT COUNT(*) FROM likes l JOIN videos v ON v.id = l.video_id WHERE {filter}"
            ),
            [caller.to_string()],
        )
        .await?;

        let mut rows = conn
            .query(
                &format!(
                    r#"
                    SELECT {columns}
                    FROM likes l
                    JOIN videos v ON v.id = l.video_id
                    JOIN users u ON u.id = v.owner_id
                    WHERE {filter}
                    ORDER BY l.created_at DESC, l.rowid DESC
                    LIMIT ?2 OFFSET ?3
                    "#,
                    columns = video_card_columns("?1"),
                ),
                Params::Positional(vec![
                    id_value(caller),
                    Value::Integer(page.sql_limit()),
                    Value::Integer(page.sql_offset()),
                ]),
            )
            .await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(row_to_video_card(&row, 0)?);
        }
        Ok(Page::new(items, total, page))
    }

    pub async fn channel_profile(&self, handle: &str, viewer: &Viewer) -> ServiceResult<ChannelProfile> {
        let handle = handle.trim().to_lowercase();
        if handle.is_empty() {
            return Err(ServiceError::validation("username is missing"));
        }
        let conn = self.store.connect().await?;
        let mut rows = conn
            .query(
                r#"
                SELECT u.id, u.username, u.full_name, u.avatar, u.cover_image, u.created_at,
                       (SELECT COUNT(*) FROM subscriptions s WHERE s.channel_id = u.id),
                       (SELECT COUNT(*) FROM subscriptions s WHERE s.subscriber_id = u.id),
                       EXISTS(SELECT 1 FROM subscriptions s
                              WHERE s.channel_id = u.id AND s.subscriber_id = ?2)
                FROM users u
                WHERE u.username = ?1
                "#,
                Params::Positional(vec![Value::Text(handle), viewer.sql()]),
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| ServiceError::not_found("channel does not exist"))?;
        Ok(ChannelProfile {
            id: get_id(&row, 0)?,
            username: row.get(1)?,
            full_name: row.get(2)?,
            avatar: row.get(3)?,
            cover_image: row.get(4)?,
            created_at: get_time(&row, 5)?,
            subscribers_count: get_count(&row, 6)?,
            channels_subscribed_to_count: get_count(&row, 7)?,
            is_subscribed: get_bool(&row, 8)?,
        })
    }

    /// Users subscribed to `channel_id`, newest subscription first.
    pub async fn channel_subscribers(
        &self,
        channel_id: ObjectId,
        viewer: &Viewer,
        page: PageRequest,
    ) -> ServiceResult<Page<ChannelSummary>> {
        let conn = self.store.connect().await?;
        if find_user(&conn, channel_id).await?.is_none() {
            return Err(ServiceError::not_found("channel not found"));
        }
        list_channels(&conn, "s.channel_id", "s.subscriber_id", channel_id, viewer, page).await
    }

    /// Channels the caller follows, newest subscription first.
    pub async fn subscribed_channels(
        &self,
        viewer: &Viewer,
        page: PageRequest,
    ) -> ServiceResult<Page<ChannelSummary>> {
        let caller = viewer.require()?;
        let conn = self.store.connect().await?;
        list_channels(&conn, "s.subscriber_id", "s.channel_id", caller, viewer, page).await
    }
}

/// Shared card query. `predicate` may reference `filter_params` as `?1..?n`;
/// the viewer, limit and offset are appended after them.
pub(crate) async fn fetch_cards(
    conn: &Connection,
    predicate: &str,
    mut params: Vec<Value>,
    sort: FeedSort,
    limit: i64,
    offset: i64,
    viewer: &Viewer,
) -> ServiceResult<Vec<VideoCard>> {
    let next = params.len();
    let sql = format!(
        r#"
        SELECT {columns}
        FROM videos v
        JOIN users u ON u.id = v.owner_id
        WHERE {predicate}
        ORDER BY {order}
        LIMIT ?{limit_idx} OFFSET ?{offset_idx}
        "#,
        columns = video_card_columns(&format!("?{}", next + 1)),
        order = sort.order_by(),
        limit_idx = next + 2,
        offset_idx = next + 3,
    );
    params.push(viewer.sql());
    params.push(Value::Integer(limit));
    params.push(Value::Integer(offset));

    let mut rows = conn.query(&sql, Params::Positional(params)).await?;
    let mut cards = Vec::new();
    while let Some(row) = rows.next().await? {
        cards.push(row_to_video_card(&row, 0)?);
    }
    Ok(cards)
}

async fn matching_channels(
    conn: &Connection,
    keyword: &str,
    sort: FeedSort,
    viewer: &Viewer,
) -> ServiceResult<Vec<ChannelMatch>> {
    let mut rows = conn
        .query(
            &format!(
                r#"
                SELECT {columns}
                FROM users u
                WHERE instr(lower(u.username), lower(?1)) > 0
                   OR instr(lower(u.full_name), lower(?1)) > 0
                ORDER BY u.username ASC
                LIMIT ?3
                "#,
                columns = channel_columns("u", "?2"),
            ),
            Params::Positional(vec![
                Value::Text(keyword.to_string()),
                viewer.sql(),
                Value::Integer(MAX_CHANNEL_MATCHES),
            ]),
        )
        .await?;
    let mut channels = Vec::new();
    while let Some(row) = rows.next().await? {
        channels.push(row_to_channel(&row, 0)?);
    }

    let mut matches = Vec::with_capacity(channels.len());
    for channel in channels {
        let preview = fetch_cards(
            conn,
            "v.is_published = 1 AND v.owner_id = ?1",
            vec![id_value(channel.profile.id)],
            sort,
            1,
            0,
            viewer,
        )
        .await?
        .into_iter()
        .next();
        matches.push(ChannelMatch { channel, preview });
    }
    Ok(matches)
}

async fn load_detail(conn: &Connection, video_id: ObjectId, viewer: &Viewer) -> ServiceResult<VideoDetail> {
    let mut rows = conn
        .query(
            &format!(
                r#"
                SELECT {columns},
                       (SELECT COUNT(*) FROM likes l WHERE l.video_id = v.id),
                       EXISTS(SELECT 1 FROM likes l WHERE l.video_id = v.id AND l.liked_by = ?2)
                FROM videos v
                JOIN users u ON u.id = v.owner_id
                WHERE v.id = ?1
                "#,
                columns = video_card_columns("?2"),
            ),
            Params::Positional(vec![id_value(video_id), viewer.sql()]),
        )
        .await?;
    let row = rows
        .next()
        .await?
        .ok_or_else(|| ServiceError::not_found("video not found"))?;

    let video = row_to_video(&row, 0)?;
    let owner = row_to_channel(&row, VIDEO_COLUMN_COUNT)?;
    let video_file = video.video_file.clone();
    let updated_at = video.updated_at;
    Ok(VideoDetail {
        card: VideoCard::from_parts(video, owner),
        video_file,
        updated_at,
        likes: LikeSummary {
            total_likes: get_count(&row, VIDEO_CARD_COLUMN_COUNT)?,
            is_liked: get_bool(&row, VIDEO_CARD_COLUMN_COUNT + 1)?,
        },
    })
}

/// Lists one side of the subscription relation. `key` is matched against
/// `id`; `other` names the user shown in each row.
async fn list_channels(
    conn: &Connection,
    key: &str,
    other: &str,
    id: ObjectId,
    viewer: &Viewer,
    page: PageRequest,
) -> ServiceResult<Page<ChannelSummary>> {
    let total = count(
        conn,
        &format!("SELECT COUNT(*) FROM subscriptions s WHERE {key} = ?1"),
        [id.to_string()],
    )
    .await?;

    let mut rows = conn
        .query(
            &format!(
                r#"
                SELECT {columns}
                FROM subscriptions s
                JOIN users u ON u.id = {other}
                WHERE {key} = ?1
                ORDER BY s.created_at DESC, s.rowid DESC
                LIMIT ?3 OFFSET ?4
                "#,
                columns = channel_columns("u", "?2"),
            ),
            Params::Positional(vec![
                id_value(id),
                viewer.sql(),
                Value::Integer(page.sql_limit()),
                Value::Integer(page.sql_offset()),
            ]),
        )
        .await?;
    let mut items = Vec::new();
    while let Some(row) = rows.next().await? {
        items.push(row_to_channel(&row, 0)?);
    }
    Ok(Page::new(items, total, page))
}
