//! SQLite-backed video catalog.
//!
//! Provides pooled connections, schema bootstrap and the [`VideoCatalog`] queries.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use feed_hub_types::{ShuffleScope, SubscriptionId, VideoId};

use crate::catalog::{PositionUpdate, Video, VideoCatalog, expand_folder};

const SCHEMA_VERSION: i32 = 1;

const VIDEO_COLUMNS: &str =
    "id, subscription_id, title, duration_secs, published_at, watched, playback_position";

#[derive(Clone)]
pub struct SqliteCatalog {
    pool: Pool<SqliteConnectionManager>,
}

fn map_video_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Video> {
    let duration: Option<i64> = row.get(3)?;
    let position: Option<i64> = row.get(6)?;
    Ok(Video {
        id: row.get(0)?,
        subscription_id: row.get(1)?,
        title: row.get(2)?,
        duration_secs: duration.map(clamp_secs),
        published_at: row.get(4)?,
        watched: row.get(5)?,
        playback_position: position.map(clamp_secs),
    })
}

fn clamp_secs(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}

impl SqliteCatalog {
    pub fn new(db_path: &Path, pool_size: u32) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create catalog dir {:?}", parent))?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
            Ok(())
        });
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .context("create catalog db pool")?;

        {
            let conn = pool.get().context("open catalog db")?;
            init_schema(&conn)?;
        }

        Ok(Self { pool })
    }

    /// Run a blocking closure on a pooled connection off the async workers.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().context("get catalog connection")?;
            f(&*conn)
        })
        .await
        .context("catalog task panicked")?
    }
}

/// Seeding helpers for tests; the live catalog is written by the ingest side.
#[cfg(test)]
impl SqliteCatalog {
    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().context("get catalog connection")
    }

    pub fn insert_folder(
        &self,
        user_id: i64,
        name: &str,
        parent_id: Option<feed_hub_types::FolderId>,
    ) -> Result<feed_hub_types::FolderId> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO folders (name, parent_id, user_id) VALUES (?1, ?2, ?3)",
            params![name, parent_id, user_id],
        )
        .context("insert folder")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_subscription(
        &self,
        user_id: i64,
        name: &str,
        folder_id: Option<feed_hub_types::FolderId>,
    ) -> Result<SubscriptionId> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO subscriptions (name, parent_folder_id, user_id) VALUES (?1, ?2, ?3)",
            params![name, folder_id, user_id],
        )
        .context("insert subscription")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_video(
        &self,
        subscription_id: SubscriptionId,
        title: &str,
        duration_secs: Option<u32>,
        published_at: Option<i64>,
    ) -> Result<VideoId> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO videos (subscription_id, title, duration_secs, published_at, watched)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![subscription_id, title, duration_secs, published_at],
        )
        .context("insert video")?;
        Ok(conn.last_insert_rowid())
    }
}

#[async_trait]
impl VideoCatalog for SqliteCatalog {
    async fn earliest_unwatched(
        &self,
        subscription_ids: &[SubscriptionId],
        excluding: &HashSet<VideoId>,
    ) -> Result<Option<Video>> {
        if subscription_ids.is_empty() {
            return Ok(None);
        }
        let subscription_ids = subscription_ids.to_vec();
        let excluding: Vec<VideoId> = excluding.iter().copied().collect();
        self.with_conn(move |conn| earliest_unwatched(conn, &subscription_ids, &excluding))
            .await
    }

    async fn mark_watched(&self, video_id: VideoId) -> Result<bool> {
        self.with_conn(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE videos SET watched = 1, watched_at = strftime('%s','now') WHERE id = ?1",
                    params![video_id],
                )
                .context("mark video watched")?;
            Ok(updated > 0)
        })
        .await
    }

    async fn resolve_video(&self, video_id: VideoId) -> Result<Option<Video>> {
        self.with_conn(move |conn| video_by_id(conn, video_id)).await
    }

    async fn subscription_ids_for_scope(
        &self,
        user_id: i64,
        scope: ShuffleScope,
    ) -> Result<Vec<SubscriptionId>> {
        self.with_conn(move |conn| subscription_ids_for_scope(conn, user_id, scope))
            .await
    }

    async fn save_playback_position(
        &self,
        video_id: VideoId,
        position_secs: u32,
    ) -> Result<PositionUpdate> {
        self.with_conn(move |conn| {
            let Some(video) = video_by_id(conn, video_id)? else {
                return Ok(PositionUpdate::NotFound);
            };
            if let Some(duration_secs) = video.duration_secs {
                if position_secs > duration_secs {
                    return Ok(PositionUpdate::OutOfRange { duration_secs });
                }
            }
            conn.execute(
                "UPDATE videos SET playback_position = ?1 WHERE id = ?2",
                params![position_secs, video_id],
            )
            .context("save playback position")?;
            Ok(PositionUpdate::Saved)
        })
        .await
    }
}

fn video_by_id(conn: &Connection, video_id: VideoId) -> Result<Option<Video>> {
    conn.query_row(
        &format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?1"),
        params![video_id],
        map_video_row,
    )
    .optional()
    .context("resolve video")
}

fn earliest_unwatched(
    conn: &Connection,
    subscription_ids: &[SubscriptionId],
    excluding: &[VideoId],
) -> Result<Option<Video>> {
    let sub_marks = placeholders(1, subscription_ids.len());
    let mut sql = format!(
        "SELECT {VIDEO_COLUMNS} FROM videos WHERE watched = 0 AND subscription_id IN ({sub_marks})"
    );
    if !excluding.is_empty() {
        let ex_marks = placeholders(subscription_ids.len() + 1, excluding.len());
        sql.push_str(&format!(" AND id NOT IN ({ex_marks})"));
    }
    sql.push_str(" ORDER BY published_at IS NULL, published_at ASC, id ASC LIMIT 1");

    let values = subscription_ids.iter().chain(excluding.iter());
    conn.query_row(&sql, params_from_iter(values), map_video_row)
        .optional()
        .context("query earliest unwatched video")
}

fn subscription_ids_for_scope(
    conn: &Connection,
    user_id: i64,
    scope: ShuffleScope,
) -> Result<Vec<SubscriptionId>> {
    match scope {
        ShuffleScope::All => collect_ids(
            conn,
            "SELECT id FROM subscriptions WHERE user_id = ?1 ORDER BY id",
            &[user_id],
        ),
        ShuffleScope::Subscription { id } => collect_ids(
            conn,
            "SELECT id FROM subscriptions WHERE user_id = ?1 AND id = ?2",
            &[user_id, id],
        ),
        ShuffleScope::Folder { id } => {
            let owned: Option<i64> = conn
                .query_row(
                    "SELECT id FROM folders WHERE id = ?1 AND user_id = ?2",
                    params![id, user_id],
                    |row| row.get(0),
                )
                .optional()
                .context("lookup folder")?;
            if owned.is_none() {
                return Ok(Vec::new());
            }
            let folders = expand_folder(id, |parent| {
                collect_ids(
                    conn,
                    "SELECT id FROM folders WHERE parent_id = ?1 AND user_id = ?2 ORDER BY id",
                    &[parent, user_id],
                )
            })?;
            let marks = placeholders(2, folders.len());
            let sql = format!(
                "SELECT id FROM subscriptions WHERE user_id = ?1 AND parent_folder_id IN ({marks}) ORDER BY id"
            );
            let mut values = vec![user_id];
            values.extend(folders);
            collect_ids(conn, &sql, &values)
        }
    }
}

fn collect_ids(conn: &Connection, sql: &str, values: &[i64]) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(sql).context("prepare id query")?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), |row| row.get(0))
        .context("run id query")?;
    let mut ids = Vec::new();
    for id in rows {
        ids.push(id?);
    }
    Ok(ids)
}

/// `?start, ?start+1, ...` with `count` numbered placeholders.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|n| format!("?{n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS folders (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            parent_id INTEGER,
            user_id INTEGER NOT NULL,
            FOREIGN KEY(parent_id) REFERENCES folders(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            parent_folder_id INTEGER,
            user_id INTEGER NOT NULL,
            FOREIGN KEY(parent_folder_id) REFERENCES folders(id) ON DELETE SET NULL
        );

        CREATE TABLE IF NOT EXISTS videos (
            id INTEGER PRIMARY KEY,
            subscription_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            duration_secs INTEGER CHECK (duration_secs IS NULL OR duration_secs >= 0),
            published_at INTEGER,
            watched INTEGER NOT NULL DEFAULT 0,
            watched_at INTEGER,
            playback_position INTEGER,
            FOREIGN KEY(subscription_id) REFERENCES subscriptions(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_folders_parent ON folders(parent_id);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id);
        CREATE INDEX IF NOT EXISTS idx_videos_unwatched
            ON videos(subscription_id, watched, published_at);
        "#,
    )
    .context("create catalog schema")?;

    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if version.is_none() {
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )
        .context("insert schema version")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_catalog(tag: &str) -> SqliteCatalog {
        let path = std::env::temp_dir().join(format!(
            "feed-hub-catalog-{tag}-{}.sqlite",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        SqliteCatalog::new(&path, 2).expect("open catalog")
    }

    #[test]
    fn placeholders_are_numbered_from_start() {
        assert_eq!(placeholders(1, 3), "?1, ?2, ?3");
        assert_eq!(placeholders(4, 1), "?4");
        assert_eq!(placeholders(1, 0), "");
    }

    #[tokio::test]
    async fn earliest_unwatched_orders_and_excludes() {
        let catalog = temp_catalog("earliest");
        let sub = catalog.insert_subscription(1, "talks", None).unwrap();
        let late = catalog.insert_video(sub, "late", Some(60), Some(300)).unwrap();
        let tie_a = catalog.insert_video(sub, "tie a", Some(60), Some(100)).unwrap();
        let tie_b = catalog.insert_video(sub, "tie b", Some(60), Some(100)).unwrap();
        let undated = catalog.insert_video(sub, "undated", None, None).unwrap();

        let first = catalog.earliest_unwatched(&[sub], &HashSet::new()).await.unwrap();
        assert_eq!(first.map(|v| v.id), Some(tie_a));

        let next = catalog
            .earliest_unwatched(&[sub], &HashSet::from([tie_a, tie_b]))
            .await
            .unwrap();
        assert_eq!(next.map(|v| v.id), Some(late));

        let last = catalog
            .earliest_unwatched(&[sub], &HashSet::from([tie_a, tie_b, late]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.id, undated);
        assert_eq!(last.duration_secs, None);

        assert!(catalog.earliest_unwatched(&[], &HashSet::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_watched_hides_video_and_reports_missing() {
        let catalog = temp_catalog("watched");
        let sub = catalog.insert_subscription(1, "news", None).unwrap();
        let id = catalog.insert_video(sub, "a", Some(10), Some(1)).unwrap();

        assert!(catalog.mark_watched(id).await.unwrap());
        assert!(!catalog.mark_watched(id + 100).await.unwrap());
        let video = catalog.resolve_video(id).await.unwrap().unwrap();
        assert!(video.watched);
        assert!(catalog.earliest_unwatched(&[sub], &HashSet::new()).await.unwrap().is_none());
        assert!(catalog.resolve_video(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn folder_scope_expands_descendants_for_owner_only() {
        let catalog = temp_catalog("scope");
        let root = catalog.insert_folder(1, "root", None).unwrap();
        let child = catalog.insert_folder(1, "child", Some(root)).unwrap();
        let other_root = catalog.insert_folder(2, "other", None).unwrap();
        let a = catalog.insert_subscription(1, "a", Some(root)).unwrap();
        let b = catalog.insert_subscription(1, "b", Some(child)).unwrap();
        let loose = catalog.insert_subscription(1, "loose", None).unwrap();
        catalog.insert_subscription(2, "c", Some(other_root)).unwrap();

        let ids = catalog
            .subscription_ids_for_scope(1, ShuffleScope::Folder { id: root })
            .await
            .unwrap();
        assert_eq!(ids, vec![a, b]);

        let foreign = catalog
            .subscription_ids_for_scope(1, ShuffleScope::Folder { id: other_root })
            .await
            .unwrap();
        assert!(foreign.is_empty());

        let all = catalog
            .subscription_ids_for_scope(1, ShuffleScope::All)
            .await
            .unwrap();
        assert_eq!(all, vec![a, b, loose]);

        let single = catalog
            .subscription_ids_for_scope(2, ShuffleScope::Subscription { id: a })
            .await
            .unwrap();
        assert!(single.is_empty());
    }

    #[tokio::test]
    async fn save_playback_position_validates_range() {
        let catalog = temp_catalog("position");
        let sub = catalog.insert_subscription(1, "s", None).unwrap();
        let id = catalog.insert_video(sub, "a", Some(120), Some(1)).unwrap();

        assert_eq!(
            catalog.save_playback_position(id, 60).await.unwrap(),
            PositionUpdate::Saved
        );
        assert_eq!(
            catalog.save_playback_position(id, 121).await.unwrap(),
            PositionUpdate::OutOfRange { duration_secs: 120 }
        );
        assert_eq!(
            catalog.save_playback_position(id + 1, 1).await.unwrap(),
            PositionUpdate::NotFound
        );
        let video = catalog.resolve_video(id).await.unwrap().unwrap();
        assert_eq!(video.playback_position, Some(60));
    }

    #[test]
    fn schema_bootstrap_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open memory db");
        init_schema(&conn).expect("first init");
        init_schema(&conn).expect("second init");
        let version: String = conn
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION.to_string());
    }
}
