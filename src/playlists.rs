//! Playlists: owner-curated, ordered video collections.
//!
//! Entries live in `playlist_videos` with an explicit position. Reads filter
//! out videos the caller may not see, so a playlist never exposes someone
//! else's draft.

use libsql::{Connection, TransactionBehavior, Value, params::Params};
use serde::Serialize;

use crate::error::{ServiceError, ServiceResult, require_text};
use crate::identity::{Viewer, visible_video};
use crate::ids::ObjectId;
use crate::models::{
    PLAYLIST_COLUMNS, Playlist, VideoCard, find_playlist, find_user, row_to_playlist,
    row_to_video_card, video_card_columns,
};
use crate::store::{Store, get_count, id_value, millis_value, now};

const RETURNING_PLAYLIST: &str = "id, owner_id, name, description, created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSummary {
    #[serde(flatten)]
    pub playlist: Playlist,
    pub total_videos: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistDetail {
    #[serde(flatten)]
    pub playlist: Playlist,
    pub videos: Vec<VideoCard>,
}

#[derive(Clone)]
pub struct PlaylistCommands {
    store: Store,
}

impl PlaylistCommands {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn create_playlist(
        &self,
        viewer: &Viewer,
        name: Option<&str>,
        description: Option<&str>,
    ) -> ServiceResult<Playlist> {
        let caller = viewer.require()?;
        let name = require_text(name, "playlist name and description are required")?;
        let description = require_text(description, "playlist name and description are required")?;
        let conn = self.store.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    r#"
                    INSERT INTO playlists (id, owner_id, name, description, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                    RETURNING {RETURNING_PLAYLIST}
                    "#
                ),
                Params::Positional(vec![
                    id_value(ObjectId::new()),
                    id_value(caller),
                    Value::Text(name),
                    Value::Text(description),
                    millis_value(now()),
                ]),
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| ServiceError::Persistence(anyhow::anyhow!("insert returned no row")))?;
        Ok(row_to_playlist(&row)?)
    }

    /// All of a user's playlists in creation order, with entry counts.
    pub async fn user_playlists(&self, user_id: ObjectId) -> ServiceResult<Vec<PlaylistSummary>> {
        let conn = self.store.connect().await?;
        if find_user(&conn, user_id).await?.is_none() {
            return Err(ServiceError::not_found("user not found"));
        }
        let mut rows = conn
            .query(
                &format!(
                    r#"
                    SELECT {PLAYLIST_COLUMNS},
                        (SELECT COUNT(*) FROM playlist_videos pv WHERE pv.playlist_id = pl.id)
                    FROM playlists pl
                    WHERE pl.owner_id = ?1
                    ORDER BY pl.created_at, pl.rowid
                    "#
                ),
                [user_id.to_string()],
            )
            .await?;
        let mut playlists = Vec::new();
        while let Some(row) = rows.next().await? {
            playlists.push(PlaylistSummary {
                playlist: row_to_playlist(&row)?,
                total_videos: get_count(&row, 6)?,
            });
        }
        Ok(playlists)
    }

    pub async fn get_playlist(&self, playlist_id: ObjectId, viewer: &Viewer) -> ServiceResult<PlaylistDetail> {
        let conn = self.store.connect().await?;
        let playlist = find_playlist(&conn, playlist_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("playlist not found"))?;
        let videos = playlist_cards(&conn, playlist.id, viewer).await?;
        Ok(PlaylistDetail { playlist, videos })
    }

    pub async fn update_playlist(
        &self,
        playlist_id: ObjectId,
        viewer: &Viewer,
        name: Option<&str>,
        description: Option<&str>,
    ) -> ServiceResult<Playlist> {
        viewer.require()?;
        let name = require_text(name, "name or description cannot be empty")?;
        let description = require_text(description, "name or description cannot be empty")?;
        let conn = self.store.connect().await?;
        let playlist = owned_playlist(&conn, playlist_id, viewer).await?;

        let mut rows = conn
            .query(
                &format!(
                    r#"
                    UPDATE playlists SET name = ?2, description = ?3, updated_at = ?4
                    WHERE id = ?1
                    RETURNING {RETURNING_PLAYLIST}
                    "#
                ),
                Params::Positional(vec![
                    id_value(playlist.id),
                    Value::Text(name),
                    Value::Text(description),
                    millis_value(now()),
                ]),
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| ServiceError::not_found("playlist not found"))?;
        Ok(row_to_playlist(&row)?)
    }

    pub async fn delete_playlist(&self, playlist_id: ObjectId, viewer: &Viewer) -> ServiceResult<Playlist> {
        viewer.require()?;
        let conn = self.store.connect().await?;
        let playlist = owned_playlist(&conn, playlist_id, viewer).await?;
        conn.execute("DELETE FROM playlists WHERE id = ?1", [playlist.id.to_string()])
            .await?;
        Ok(playlist)
    }

    /// Appends the video at the next position. The insert is conditional on
    /// the pair being absent, so a concurrent duplicate loses cleanly.
    pub async fn add_video(
        &self,
        video_id: ObjectId,
        playlist_id: ObjectId,
        viewer: &Viewer,
    ) -> ServiceResult<PlaylistDetail> {
        viewer.require()?;
        let conn = self.store.connect().await?;
        let playlist = owned_playlist(&conn, playlist_id, viewer).await?;
        let video = visible_video(&conn, video_id, viewer).await?;

        // IMMEDIATE serializes concurrent appends, so each gets its own position.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await?;
        let inserted = tx
            .execute(
                r#"
                INSERT INTO playlist_videos (playlist_id, video_id, position)
                SELECT ?1, ?2, COALESCE(MAX(position), -1) + 1
                FROM playlist_videos WHERE playlist_id = ?1
                ON CONFLICT (playlist_id, video_id) DO NOTHING
                "#,
                [playlist.id.to_string(), video.id.to_string()],
            )
            .await?;
        if inserted == 0 {
            tx.rollback().await?;
            return Err(ServiceError::validation("video already in playlist"));
        }
        tx.commit().await?;
        self.touch(&conn, playlist).await
    }

    /// Removes the video if present; removing an absent entry is not an error.
    pub async fn remove_video(
        &self,
        video_id: ObjectId,
        playlist_id: ObjectId,
        viewer: &Viewer,
    ) -> ServiceResult<PlaylistDetail> {
        viewer.require()?;
        let conn = self.store.connect().await?;
        let playlist = owned_playlist(&conn, playlist_id, viewer).await?;
        conn.execute(
            "DELETE FROM playlist_videos WHERE playlist_id = ?1 AND video_id = ?2",
            [playlist.id.to_string(), video_id.to_string()],
        )
        .await?;
        self.touch(&conn, playlist).await
    }

    async fn touch(&self, conn: &Connection, mut playlist: Playlist) -> ServiceResult<PlaylistDetail> {
        playlist.updated_at = now();
        conn.execute(
            "UPDATE playlists SET updated_at = ?2 WHERE id = ?1",
            Params::Positional(vec![id_value(playlist.id), millis_value(playlist.updated_at)]),
        )
        .await?;
        let videos = playlist_cards(conn, playlist.id, &Viewer::user(playlist.owner_id)).await?;
        Ok(PlaylistDetail { playlist, videos })
    }
}

async fn owned_playlist(conn: &Connection, playlist_id: ObjectId, viewer: &Viewer) -> ServiceResult<Playlist> {
    let playlist = find_playlist(conn, playlist_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("playlist not found"))?;
    viewer.ensure_owner(playlist.owner_id, "playlist")?;
    Ok(playlist)
}

async fn playlist_cards(conn: &Connection, playlist_id: ObjectId, viewer: &Viewer) -> ServiceResult<Vec<VideoCard>> {
    let mut rows = conn
        .query(
            &format!(
                r#"
                SELECT {columns}
                FROM playlist_videos pv
                JOIN videos v ON v.id = pv.video_id
                JOIN users u ON u.id = v.owner_id
                WHERE pv.playlist_id = ?1 AND (v.is_published = 1 OR v.owner_id IS ?2)
                ORDER BY pv.position, pv.rowid
                "#,
                columns = video_card_columns("?2"),
            ),
            Params::Positional(vec![id_value(playlist_id), viewer.sql()]),
        )
        .await?;
    let mut cards = Vec::new();
    while let Some(row) = rows.next().await? {
        cards.push(row_to_video_card(&row, 0)?);
    }
    Ok(cards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{VideoSeed, create_store, insert_user, insert_video, table_count};
    use anyhow::Result;
    use libsql::params;

    #[tokio::test]
    async fn entries_keep_insertion_order() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let bob = insert_user(&store, "bob").await?;
        let a = insert_video(&store, bob, VideoSeed::new("a")).await?;
        let b = insert_video(&store, bob, VideoSeed::new("b")).await?;
        let c = insert_video(&store, ann, VideoSeed::new("c")).await?;
        let playlists = PlaylistCommands::new(store);
        let viewer = Viewer::user(ann);

        let list = playlists
            .create_playlist(&viewer, Some("mix"), Some("favourites"))
            .await?;
        for video in [b, c, a] {
            playlists.add_video(video, list.id, &viewer).await?;
        }
        let detail = playlists.get_playlist(list.id, &Viewer::anonymous()).await?;
        let order: Vec<_> = detail.videos.iter().map(|card| card.id).collect();
        assert_eq!(order, vec![b, c, a]);

        let removed = playlists.remove_video(c, list.id, &viewer).await?;
        let order: Vec<_> = removed.videos.iter().map(|card| card.id).collect();
        assert_eq!(order, vec![b, a]);

        let again = playlists.add_video(c, list.id, &viewer).await?;
        assert_eq!(again.videos.last().map(|card| card.id), Some(c));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_get_distinct_positions() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let playlists = PlaylistCommands::new(store.clone());
        let viewer = Viewer::user(ann);
        let list = playlists.create_playlist(&viewer, Some("mix"), Some("d")).await?;

        let mut handles = Vec::new();
        for n in 0..6 {
            let video = insert_video(&store, ann, VideoSeed::new(&format!("v{n}"))).await?;
            let playlists = playlists.clone();
            handles.push(tokio::spawn(async move {
                playlists.add_video(video, list.id, &Viewer::user(ann)).await
            }));
        }
        for handle in handles {
            handle.await??;
        }

        let conn = store.connect().await?;
        let positions = crate::store::count(
            &conn,
            "SELECT COUNT(DISTINCT position) FROM playlist_videos WHERE playlist_id = ?1",
            params![list.id.to_string()],
        )
        .await?;
        assert_eq!(positions, 6);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let video = insert_video(&store, ann, VideoSeed::new("a")).await?;
        let playlists = PlaylistCommands::new(store.clone());
        let viewer = Viewer::user(ann);
        let list = playlists.create_playlist(&viewer, Some("mix"), Some("d")).await?;

        playlists.add_video(video, list.id, &viewer).await?;
        assert!(matches!(
            playlists.add_video(video, list.id, &viewer).await,
            Err(ServiceError::Validation(_))
        ));
        assert_eq!(table_count(&store, "playlist_videos").await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn mutations_are_owner_only() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let bob = insert_user(&store, "bob").await?;
        let video = insert_video(&store, bob, VideoSeed::new("a")).await?;
        let playlists = PlaylistCommands::new(store.clone());
        let list = playlists
            .create_playlist(&Viewer::user(ann), Some("mix"), Some("d"))
            .await?;
        let intruder = Viewer::user(bob);

        assert!(matches!(
            playlists.add_video(video, list.id, &intruder).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            playlists
                .update_playlist(list.id, &intruder, Some("x"), Some("y"))
                .await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            playlists.delete_playlist(list.id, &intruder).await,
            Err(ServiceError::Forbidden(_))
        ));

        let renamed = playlists
            .update_playlist(list.id, &Viewer::user(ann), Some("renamed"), Some("new"))
            .await?;
        assert_eq!(renamed.name, "renamed");
        playlists.delete_playlist(list.id, &Viewer::user(ann)).await?;
        assert_eq!(table_count(&store, "playlists").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn drafts_only_show_for_their_owner() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let bob = insert_user(&store, "bob").await?;
        let shown = insert_video(&store, ann, VideoSeed::new("live")).await?;
        let draft = insert_video(&store, ann, VideoSeed::new("draft").unpublished()).await?;
        let playlists = PlaylistCommands::new(store.clone());
        let owner = Viewer::user(ann);
        let list = playlists.create_playlist(&owner, Some("mix"), Some("d")).await?;
        playlists.add_video(shown, list.id, &owner).await?;
        playlists.add_video(draft, list.id, &owner).await?;

        assert_eq!(playlists.get_playlist(list.id, &owner).await?.videos.len(), 2);
        let visitor = playlists.get_playlist(list.id, &Viewer::user(bob)).await?;
        assert_eq!(visitor.videos.iter().map(|c| c.id).collect::<Vec<_>>(), vec![shown]);

        // Deleted videos drop out of the playlist with their entries.
        store
            .connect()
            .await?
            .execute("DELETE FROM videos WHERE id = ?1", params![shown.to_string()])
            .await?;
        assert_eq!(playlists.get_playlist(list.id, &owner).await?.videos.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn user_playlists_counts_entries() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let ann = insert_user(&store, "ann").await?;
        let bob = insert_user(&store, "bob").await?;
        let video = insert_video(&store, ann, VideoSeed::new("a")).await?;
        let playlists = PlaylistCommands::new(store);
        let viewer = Viewer::user(ann);
        let first = playlists.create_playlist(&viewer, Some("one"), Some("d")).await?;
        playlists.create_playlist(&viewer, Some("two"), Some("d")).await?;
        playlists.add_video(video, first.id, &viewer).await?;

        let listed = playlists.user_playlists(ann).await?;
        let summary: Vec<_> = listed
            .iter()
            .map(|item| (item.playlist.name.as_str(), item.total_videos))
            .collect();
        assert_eq!(summary, vec![("one", 1), ("two", 0)]);
        assert!(playlists.user_playlists(bob).await?.is_empty());
        assert!(matches!(
            playlists.user_playlists(ObjectId::new()).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            playlists.create_playlist(&viewer, Some("x"), None).await,
            Err(ServiceError::Validation(_))
        ));
        Ok(())
    }
}
