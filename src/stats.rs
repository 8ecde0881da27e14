//! Stats Aggregator: channel rollups and watch history.
//!
//! History rows are stored in UTC. Grouping and same-day collapsing happen in
//! the viewer's local calendar, described by a [`TimezoneOffset`].

use chrono::{DateTime, Duration, NaiveDate, Utc};
use libsql::{TransactionBehavior, Value, params::Params};
use serde::Serialize;
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};
use crate::identity::Viewer;
use crate::ids::ObjectId;
use crate::models::{
    VIDEO_CARD_COLUMN_COUNT, VIDEO_COLUMN_COUNT, Video, VideoCard, WatchEntry, find_video,
    row_to_video, row_to_video_card, video_card_columns, video_columns,
};
use crate::pagination::{Page, PageRequest};
use crate::store::{Store, count, get_count, get_time, id_value, millis_value, now};

/// Minutes to add to local time to reach UTC, as reported by
/// `Date.prototype.getTimezoneOffset()` in browsers. UTC+2 is `-120`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimezoneOffset(i32);

impl TimezoneOffset {
    pub const UTC: Self = Self(0);

    pub fn new(minutes: i64) -> ServiceResult<Self> {
        if !(-840..=720).contains(&minutes) {
            return Err(ServiceError::validation("timezone offset out of range"));
        }
        Ok(Self(minutes as i32))
    }

    pub fn minutes(self) -> i32 {
        self.0
    }

    /// Calendar date of `at` on the viewer's wall clock.
    pub fn local_date(self, at: DateTime<Utc>) -> NaiveDate {
        (at - Duration::minutes(self.0 as i64)).date_naive()
    }

    /// UTC instants bounding the viewer's local day containing `at`,
    /// half-open.
    pub fn local_day_bounds(self, at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let local_midnight = self.local_date(at).and_time(chrono::NaiveTime::MIN).and_utc();
        let start = local_midnight + Duration::minutes(self.0 as i64);
        (start, start + Duration::days(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    pub total_videos: u64,
    pub total_subscribers: u64,
    pub total_views: u64,
    pub total_video_likes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedVideo {
    pub watched_at: DateTime<Utc>,
    pub video: VideoCard,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryDay {
    pub date: NaiveDate,
    pub videos: Vec<WatchedVideo>,
}

/// One page of history rows, bucketed by local day. Buckets are built after
/// paging, so a single day can continue on the next page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchHistory {
    pub days: Vec<HistoryDay>,
    pub total: u64,
    pub current_page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardVideo {
    #[serde(flatten)]
    pub video: Video,
    pub likes_count: u64,
}

#[derive(Clone)]
pub struct StatsAggregator {
    store: Store,
}

impl StatsAggregator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Rollup over every video the owner has, published or not.
    pub async fn channel_stats(&self, owner_id: ObjectId) -> ServiceResult<ChannelStats> {
        let conn = self.store.connect().await?;
        let mut rows = conn
            .query(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM videos WHERE owner_id = ?1),
                    (SELECT COUNT(*) FROM subscriptions WHERE channel_id = ?1),
                    (SELECT COALESCE(SUM(views), 0) FROM videos WHERE owner_id = ?1),
                    (SELECT COUNT(*) FROM likes
                     WHERE video_id IN (SELECT id FROM videos WHERE owner_id = ?1))
                "#,
                [owner_id.to_string()],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| ServiceError::Persistence(anyhow::anyhow!("stats query returned no row")))?;
        Ok(ChannelStats {
            total_videos: get_count(&row, 0)?,
            total_subscribers: get_count(&row, 1)?,
            total_views: get_count(&row, 2)?,
            total_video_likes: get_count(&row, 3)?,
        })
    }

    /// Every video the caller owns, newest first, with like counts.
    pub async fn channel_videos(
        &self,
        viewer: &Viewer,
        page: PageRequest,
    ) -> ServiceResult<Page<DashboardVideo>> {
        let owner = viewer.require()?;
        let conn = self.store.connect().await?;
        let total = count(
            &conn,
            "SELECT COUNT(*) FROM videos WHERE owner_id = ?1",
            [owner.to_string()],
        )
        .await?;

        let mut rows = conn
            .query(
                &format!(
                    r#"
                    SELECT {columns}, (SELECT COUNT(*) FROM likes l WHERE l.video_id = v.id)
                    FROM videos v
                    WHERE v.owner_id = ?1
                    ORDER BY v.created_at DESC, v.id DESC
                    LIMIT ?2 OFFSET ?3
                    "#,
                    columns = video_columns("v"),
                ),
                Params::Positional(vec![
                    id_value(owner),
                    Value::Integer(page.sql_limit()),
                    Value::Integer(page.sql_offset()),
                ]),
            )
            .await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(DashboardVideo {
                video: row_to_video(&row, 0)?,
                likes_count: get_count(&row, VIDEO_COLUMN_COUNT)?,
            });
        }
        Ok(Page::new(items, total, page))
    }

    pub async fn watch_history(
        &self,
        viewer: &Viewer,
        offset: TimezoneOffset,
        page: PageRequest,
    ) -> ServiceResult<WatchHistory> {
        let caller = viewer.require()?;
        let conn = self.store.connect().await?;
        let filter = "w.watched_by = ?1 AND v.is_published = 1";

        let total = count(
            &conn,
            &format!(
                "SELECT COUNT(*) FROM watch_history w JOIN videos v ON v.id = w.video_id WHERE {filter}"
            ),
            [caller.to_string()],
        )
        .await?;

        let mut rows = conn
            .query(
                &format!(
                    r#"
                    SELECT {columns}, w.created_at
                    FROM watch_history w
                    JOIN videos v ON v.id = w.video_id
                    JOIN users u ON u.id = v.owner_id
                    WHERE {filter}
                    ORDER BY w.created_at DESC, w.rowid DESC
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
        let mut watched = Vec::new();
        while let Some(row) = rows.next().await? {
            watched.push(WatchedVideo {
                video: row_to_video_card(&row, 0)?,
                watched_at: get_time(&row, VIDEO_CARD_COLUMN_COUNT)?,
            });
        }

        let page = Page::new(watched, total, page);
        Ok(WatchHistory {
            days: group_by_local_day(page.items, offset),
            total: page.total,
            current_page: page.current_page,
            page_size: page.page_size,
            total_pages: page.total_pages,
        })
    }

    /// Records that the caller watched `video_id`. A re-watch on the same
    /// local day replaces the earlier entry; every call counts a view.
    pub async fn record_watch(
        &self,
        video_id: ObjectId,
        viewer: &Viewer,
        offset: TimezoneOffset,
    ) -> ServiceResult<WatchEntry> {
        self.record_watch_at(video_id, viewer, offset, now()).await
    }

    async fn record_watch_at(
        &self,
        video_id: ObjectId,
        viewer: &Viewer,
        offset: TimezoneOffset,
        at: DateTime<Utc>,
    ) -> ServiceResult<WatchEntry> {
        let caller = viewer.require()?;
        let conn = self.store.connect().await?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await?;

        if !matches!(find_video(&tx, video_id).await?, Some(video) if video.is_published) {
            tx.rollback().await?;
            return Err(ServiceError::not_found("video not found"));
        }

        let (start, end) = offset.local_day_bounds(at);
        let replaced = tx
            .execute(
                r#"
                DELETE FROM watch_history
                WHERE video_id = ?1 AND watched_by = ?2 AND created_at >= ?3 AND created_at < ?4
                "#,
                Params::Positional(vec![
                    id_value(video_id),
                    id_value(caller),
                    millis_value(start),
                    millis_value(end),
                ]),
            )
            .await?;

        let entry = WatchEntry {
            id: ObjectId::new(),
            video_id,
            watched_by: caller,
            created_at: DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at),
        };
        tx.execute(
            "INSERT INTO watch_history (id, video_id, watched_by, created_at) VALUES (?1, ?2, ?3, ?4)",
            Params::Positional(vec![
                id_value(entry.id),
                id_value(video_id),
                id_value(caller),
                millis_value(entry.created_at),
            ]),
        )
        .await?;
        tx.execute(
            "UPDATE videos SET views = views + 1 WHERE id = ?1",
            [video_id.to_string()],
        )
        .await?;
        tx.commit().await?;

        debug!(%video_id, %caller, replaced, "recorded watch");
        Ok(entry)
    }
}

/// Rows arrive newest first, so each local day forms one contiguous run.
fn group_by_local_day(watched: Vec<WatchedVideo>, offset: TimezoneOffset) -> Vec<HistoryDay> {
    let mut days: Vec<HistoryDay> = Vec::new();
    for item in watched {
        let date = offset.local_date(item.watched_at);
        match days.last_mut() {
            Some(day) if day.date == date => day.videos.push(item),
            _ => days.push(HistoryDay {
                date,
                videos: vec![item],
            }),
        }
    }
    days
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{VideoSeed, create_store, insert_user, insert_video, subscribe};
    use anyhow::Result;
    use chrono::TimeZone;
    use libsql::{Connection, params};

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    async fn history_rows(conn: &Connection, video: ObjectId, user: ObjectId) -> Result<u64> {
        count(
            conn,
            "SELECT COUNT(*) FROM watch_history WHERE video_id = ?1 AND watched_by = ?2",
            [video.to_string(), user.to_string()],
        )
        .await
    }

    async fn views_of(store: &Store, video: ObjectId) -> Result<i64> {
        let conn = store.connect().await?;
        let mut rows = conn
            .query("SELECT views FROM videos WHERE id = ?1", [video.to_string()])
            .await?;
        Ok(rows.next().await?.expect("video row").get(0)?)
    }

    #[test]
    fn offsets_follow_browser_convention() {
        let offset = TimezoneOffset::new(-120).unwrap();
        let late = utc(2024, 3, 10, 21, 30);
        let after_midnight = utc(2024, 3, 10, 22, 30);
        assert_eq!(offset.local_date(late), NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
        assert_eq!(
            offset.local_date(after_midnight),
            NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()
        );

        let (start, end) = offset.local_day_bounds(late);
        assert_eq!(start, utc(2024, 3, 9, 22, 0));
        assert_eq!(end, utc(2024, 3, 10, 22, 0));

        assert!(TimezoneOffset::new(721).is_err());
        assert!(TimezoneOffset::new(-841).is_err());
        assert_eq!(TimezoneOffset::new(300).unwrap().minutes(), 300);
    }

    #[tokio::test]
    async fn channel_stats_roll_up_owner_videos() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let bob = insert_user(&store, "bob").await?;
        let cyd = insert_user(&store, "cyd").await?;
        let first = insert_video(&store, ann, VideoSeed::new("one").views(5)).await?;
        let second = insert_video(&store, ann, VideoSeed::new("two").views(7).unpublished()).await?;
        let foreign = insert_video(&store, bob, VideoSeed::new("bob's").views(100)).await?;
        subscribe(&store, bob, ann).await?;
        subscribe(&store, cyd, ann).await?;

        let conn = store.connect().await?;
        for (video, user) in [(first, bob), (first, cyd), (second, bob), (foreign, ann)] {
            conn.execute(
                "INSERT INTO likes (id, video_id, liked_by, created_at) VALUES (?1, ?2, ?3, 0)",
                params![ObjectId::new().to_string(), video.to_string(), user.to_string()],
            )
            .await?;
        }

        let stats = StatsAggregator::new(store.clone());
        assert_eq!(
            stats.channel_stats(ann).await?,
            ChannelStats {
                total_videos: 2,
                total_subscribers: 2,
                total_views: 12,
                total_video_likes: 3,
            }
        );
        assert_eq!(
            stats.channel_stats(cyd).await?,
            ChannelStats {
                total_videos: 0,
                total_subscribers: 0,
                total_views: 0,
                total_video_likes: 0,
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn same_day_rewatch_collapses_but_counts_views() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let bob = insert_user(&store, "bob").await?;
        let video = insert_video(&store, ann, VideoSeed::new("clip")).await?;
        let stats = StatsAggregator::new(store.clone());
        let viewer = Viewer::user(bob);
        let offset = TimezoneOffset::new(-60)?;

        stats
            .record_watch_at(video, &viewer, offset, utc(2024, 5, 1, 8, 0))
            .await?;
        let later = stats
            .record_watch_at(video, &viewer, offset, utc(2024, 5, 1, 18, 0))
            .await?;

        let conn = store.connect().await?;
        assert_eq!(history_rows(&conn, video, bob).await?, 1);
        let mut rows = conn
            .query("SELECT id, created_at FROM watch_history", params![])
            .await?;
        let row = rows.next().await?.expect("history row");
        assert_eq!(row.get::<String>(0)?, later.id.to_string());
        assert_eq!(get_time(&row, 1)?, utc(2024, 5, 1, 18, 0));
        assert_eq!(views_of(&store, video).await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn rewatch_after_local_midnight_is_a_new_entry() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let video = insert_video(&store, ann, VideoSeed::new("clip")).await?;
        let stats = StatsAggregator::new(store.clone());
        let viewer = Viewer::user(ann);

        // UTC+2: 21:30Z and 22:30Z fall on different local days.
        let offset = TimezoneOffset::new(-120)?;
        stats
            .record_watch_at(video, &viewer, offset, utc(2024, 3, 10, 21, 30))
            .await?;
        stats
            .record_watch_at(video, &viewer, offset, utc(2024, 3, 10, 22, 30))
            .await?;
        let conn = store.connect().await?;
        assert_eq!(history_rows(&conn, video, ann).await?, 2);

        // In UTC the same two instants share a day, so a third watch at
        // 23:00Z replaces the 22:30Z entry only.
        stats
            .record_watch_at(video, &viewer, TimezoneOffset::UTC, utc(2024, 3, 10, 23, 0))
            .await?;
        assert_eq!(history_rows(&conn, video, ann).await?, 1);
        assert_eq!(views_of(&store, video).await?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn record_watch_requires_a_published_video() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let draft = insert_video(&store, ann, VideoSeed::new("draft").unpublished()).await?;
        let stats = StatsAggregator::new(store.clone());

        assert!(matches!(
            stats.record_watch(draft, &Viewer::user(ann), TimezoneOffset::UTC).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            stats
                .record_watch(ObjectId::new(), &Viewer::user(ann), TimezoneOffset::UTC)
                .await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            stats.record_watch(draft, &Viewer::anonymous(), TimezoneOffset::UTC).await,
            Err(ServiceError::Unauthenticated(_))
        ));
        assert_eq!(views_of(&store, draft).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn history_groups_page_rows_by_local_day() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let bob = insert_user(&store, "bob").await?;
        let a = insert_video(&store, ann, VideoSeed::new("a")).await?;
        let b = insert_video(&store, ann, VideoSeed::new("b")).await?;
        let c = insert_video(&store, ann, VideoSeed::new("c")).await?;
        let stats = StatsAggregator::new(store);
        let viewer = Viewer::user(bob);
        let offset = TimezoneOffset::UTC;

        stats.record_watch_at(a, &viewer, offset, utc(2024, 6, 1, 9, 0)).await?;
        stats.record_watch_at(b, &viewer, offset, utc(2024, 6, 2, 9, 0)).await?;
        stats.record_watch_at(c, &viewer, offset, utc(2024, 6, 2, 10, 0)).await?;

        let history = stats
            .watch_history(&viewer, offset, PageRequest::new(1, 10))
            .await?;
        assert_eq!(history.total, 3);
        assert_eq!(history.days.len(), 2);
        assert_eq!(history.days[0].date, NaiveDate::from_ymd_opt(2024, 6, 2).unwrap());
        let newest: Vec<_> = history.days[0].videos.iter().map(|w| w.video.id).collect();
        assert_eq!(newest, vec![c, b]);
        assert_eq!(history.days[1].videos[0].video.id, a);

        // Paging happens before grouping, so 2 June spans both pages here.
        let first = stats
            .watch_history(&viewer, offset, PageRequest::new(1, 1))
            .await?;
        let second = stats
            .watch_history(&viewer, offset, PageRequest::new(2, 1))
            .await?;
        assert_eq!(first.days[0].date, second.days[0].date);
        assert_eq!(first.total_pages, 3);
        Ok(())
    }

    #[tokio::test]
    async fn history_hides_unpublished_videos() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let bob = insert_user(&store, "bob").await?;
        let video = insert_video(&store, ann, VideoSeed::new("clip")).await?;
        let stats = StatsAggregator::new(store.clone());
        let viewer = Viewer::user(bob);
        stats.record_watch(video, &viewer, TimezoneOffset::UTC).await?;

        store
            .connect()
            .await?
            .execute("UPDATE videos SET is_published = 0", params![])
            .await?;
        let history = stats
            .watch_history(&viewer, TimezoneOffset::UTC, PageRequest::default())
            .await?;
        assert!(history.days.is_empty());
        assert_eq!(history.total, 0);
        Ok(())
    }

    #[tokio::test]
    async fn dashboard_lists_every_owned_video_with_likes() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let bob = insert_user(&store, "bob").await?;
        let live = insert_video(&store, ann, VideoSeed::new("live").at_minute(1)).await?;
        let draft = insert_video(&store, ann, VideoSeed::new("draft").unpublished().at_minute(2)).await?;
        insert_video(&store, bob, VideoSeed::new("other")).await?;
        store
            .connect()
            .await?
            .execute(
                "INSERT INTO likes (id, video_id, liked_by, created_at) VALUES (?1, ?2, ?3, 0)",
                params![ObjectId::new().to_string(), live.to_string(), bob.to_string()],
            )
            .await?;
        let stats = StatsAggregator::new(store);

        let page = stats
            .channel_videos(&Viewer::user(ann), PageRequest::default())
            .await?;
        let listed: Vec<_> = page.items.iter().map(|item| (item.video.id, item.likes_count)).collect();
        assert_eq!(listed, vec![(draft, 0), (live, 1)]);
        assert!(matches!(
            stats.channel_videos(&Viewer::anonymous(), PageRequest::default()).await,
            Err(ServiceError::Unauthenticated(_))
        ));
        Ok(())
    }
}
