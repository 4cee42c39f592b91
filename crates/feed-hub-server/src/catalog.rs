//! Video catalog gateway.
//!
//! The core only talks to storage through [`VideoCatalog`]. [`RetryingCatalog`] wraps any
//! implementation with a per-attempt timeout and exponential backoff.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::Serialize;
use utoipa::ToSchema;

use feed_hub_types::{FolderId, ShuffleScope, SubscriptionId, VideoId};

use crate::config::RetrySettings;

/// Folder expansion stops this many levels below the requested folder.
pub const MAX_FOLDER_DEPTH: usize = 5;

/// Catalog view of a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Video {
    pub id: VideoId,
    pub subscription_id: SubscriptionId,
    pub title: String,
    /// Length in seconds; unknown durations count as zero.
    pub duration_secs: Option<u32>,
    /// Publish time as unix seconds.
    pub published_at: Option<i64>,
    pub watched: bool,
    /// Last stored resume position in seconds.
    pub playback_position: Option<u32>,
}

impl Video {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.duration_secs.unwrap_or(0)))
    }
}

/// Result of storing a resume position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionUpdate {
    Saved,
    NotFound,
    /// Position exceeds the known duration.
    OutOfRange { duration_secs: u32 },
}

/// Read/write access to videos, subscriptions and folders.
///
/// Implementations must be safe for concurrent use; watched-flag writes are
/// last-writer-wins.
#[async_trait]
pub trait VideoCatalog: Send + Sync {
    /// Earliest unwatched video (publish date, then id) across `subscription_ids`,
    /// skipping ids in `excluding`.
    async fn earliest_unwatched(
        &self,
        subscription_ids: &[SubscriptionId],
        excluding: &HashSet<VideoId>,
    ) -> Result<Option<Video>>;

    /// Set the watched flag. `false` when the video does not exist.
    async fn mark_watched(&self, video_id: VideoId) -> Result<bool>;

    async fn resolve_video(&self, video_id: VideoId) -> Result<Option<Video>>;

    /// Subscription ids owned by `user_id` within `scope`, in ascending id order.
    async fn subscription_ids_for_scope(
        &self,
        user_id: i64,
        scope: ShuffleScope,
    ) -> Result<Vec<SubscriptionId>>;

    async fn save_playback_position(
        &self,
        video_id: VideoId,
        position_secs: u32,
    ) -> Result<PositionUpdate>;
}

/// Breadth-first folder expansion bounded by [`MAX_FOLDER_DEPTH`].
///
/// `children` returns the direct subfolders of a folder. Cycles are ignored.
pub fn expand_folder<F>(root: FolderId, mut children: F) -> Result<Vec<FolderId>>
where
    F: FnMut(FolderId) -> Result<Vec<FolderId>>,
{
    let mut seen = HashSet::from([root]);
    let mut ordered = vec![root];
    let mut frontier = VecDeque::from([(root, 0usize)]);
    while let Some((folder, depth)) = frontier.pop_front() {
        if depth >= MAX_FOLDER_DEPTH {
            continue;
        }
        for child in children(folder)? {
            if seen.insert(child) {
                ordered.push(child);
                frontier.push_back((child, depth + 1));
            }
        }
    }
    Ok(ordered)
}

/// Runs `op` with a per-attempt timeout, retrying failures with exponential backoff.
pub async fn with_retry<T, F, Fut>(settings: &RetrySettings, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let timeout = settings.timeout;
    let attempt = || {
        let call = op();
        async move {
            tokio::time::timeout(timeout, call)
                .await
                .map_err(|_| anyhow::anyhow!("{op_name} timed out after {timeout:?}"))?
        }
    };
    let backoff = ExponentialBuilder::default()
        .with_min_delay(settings.min_delay)
        .with_max_delay(settings.max_delay)
        .with_max_times(settings.attempts)
        .with_jitter();

    attempt
        .retry(backoff)
        .sleep(tokio::time::sleep)
        .notify(|err: &anyhow::Error, delay: Duration| {
            tracing::warn!(
                op = op_name,
                error = %err,
                retry_in_ms = delay.as_millis() as u64,
                "catalog call failed"
            );
        })
        .await
        .inspect_err(|err| tracing::warn!(op = op_name, error = %err, "catalog call gave up"))
}

/// Catalog decorator applying [`with_retry`] to every call.
#[derive(Clone)]
pub struct RetryingCatalog {
    inner: Arc<dyn VideoCatalog>,
    settings: RetrySettings,
}

impl RetryingCatalog {
    pub fn new(inner: Arc<dyn VideoCatalog>, settings: RetrySettings) -> Self {
        Self { inner, settings }
    }
}

#[async_trait]
impl VideoCatalog for RetryingCatalog {
    async fn earliest_unwatched(
        &self,
        subscription_ids: &[SubscriptionId],
        excluding: &HashSet<VideoId>,
    ) -> Result<Option<Video>> {
        with_retry(&self.settings, "earliest_unwatched", || {
            self.inner.earliest_unwatched(subscription_ids, excluding)
        })
        .await
    }

    async fn mark_watched(&self, video_id: VideoId) -> Result<bool> {
        with_retry(&self.settings, "mark_watched", || {
            self.inner.mark_watched(video_id)
        })
        .await
    }

    async fn resolve_video(&self, video_id: VideoId) -> Result<Option<Video>> {
        with_retry(&self.settings, "resolve_video", || {
            self.inner.resolve_video(video_id)
        })
        .await
    }

    async fn subscription_ids_for_scope(
        &self,
        user_id: i64,
        scope: ShuffleScope,
    ) -> Result<Vec<SubscriptionId>> {
        with_retry(&self.settings, "subscription_ids_for_scope", || {
            self.inner.subscription_ids_for_scope(user_id, scope)
        })
        .await
    }

    async fn save_playback_position(
        &self,
        video_id: VideoId,
        position_secs: u32,
    ) -> Result<PositionUpdate> {
        with_retry(&self.settings, "save_playback_position", || {
            self.inner.save_playback_position(video_id, position_secs)
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory catalog used by unit tests across the crate.

    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Tables {
        videos: BTreeMap<VideoId, Video>,
        /// subscription id -> (user id, parent folder)
        subscriptions: BTreeMap<SubscriptionId, (i64, Option<FolderId>)>,
        /// folder id -> (user id, parent folder)
        folders: HashMap<FolderId, (i64, Option<FolderId>)>,
    }

    #[derive(Default)]
    pub struct MemoryCatalog {
        tables: Mutex<Tables>,
        failures_left: AtomicUsize,
        pub calls: AtomicUsize,
    }

    impl MemoryCatalog {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_folder(&self, id: FolderId, user_id: i64, parent: Option<FolderId>) {
            self.tables
                .lock()
                .unwrap()
                .folders
                .insert(id, (user_id, parent));
        }

        pub fn add_subscription(&self, id: SubscriptionId, user_id: i64, folder: Option<FolderId>) {
            self.tables
                .lock()
                .unwrap()
                .subscriptions
                .insert(id, (user_id, folder));
        }

        /// Adds an unwatched video; `minutes` of `None` leaves the duration unknown.
        pub fn add_video(
            &self,
            id: VideoId,
            subscription_id: SubscriptionId,
            minutes: Option<u32>,
            published_at: i64,
        ) {
            self.insert(Video {
                id,
                subscription_id,
                title: format!("video {id}"),
                duration_secs: minutes.map(|m| m * 60),
                published_at: Some(published_at),
                watched: false,
                playback_position: None,
            });
        }

        pub fn insert(&self, video: Video) {
            self.tables.lock().unwrap().videos.insert(video.id, video);
        }

        pub fn video(&self, id: VideoId) -> Option<Video> {
            self.tables.lock().unwrap().videos.get(&id).cloned()
        }

        /// Make the next `count` calls fail.
        pub fn fail_next(&self, count: usize) {
            self.failures_left.store(count, Ordering::SeqCst);
        }

        fn enter(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(anyhow::anyhow!("catalog unavailable"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl VideoCatalog for MemoryCatalog {
        async fn earliest_unwatched(
            &self,
            subscription_ids: &[SubscriptionId],
            excluding: &HashSet<VideoId>,
        ) -> Result<Option<Video>> {
            self.enter()?;
            let tables = self.tables.lock().unwrap();
            Ok(tables
                .videos
                .values()
                .filter(|v| !v.watched)
                .filter(|v| subscription_ids.contains(&v.subscription_id))
                .filter(|v| !excluding.contains(&v.id))
                .min_by_key(|v| (v.published_at.is_none(), v.published_at, v.id))
                .cloned())
        }

        async fn mark_watched(&self, video_id: VideoId) -> Result<bool> {
            self.enter()?;
            let mut tables = self.tables.lock().unwrap();
            Ok(match tables.videos.get_mut(&video_id) {
                Some(video) => {
                    video.watched = true;
                    true
                }
                None => false,
            })
        }

        async fn resolve_video(&self, video_id: VideoId) -> Result<Option<Video>> {
            self.enter()?;
            Ok(self.video(video_id))
        }

        async fn subscription_ids_for_scope(
            &self,
            user_id: i64,
            scope: ShuffleScope,
        ) -> Result<Vec<SubscriptionId>> {
            self.enter()?;
            let tables = self.tables.lock().unwrap();
            let owned = tables
                .subscriptions
                .iter()
                .filter(|(_, (owner, _))| *owner == user_id);
            Ok(match scope {
                ShuffleScope::All => owned.map(|(id, _)| *id).collect(),
                ShuffleScope::Subscription { id } => {
                    owned.filter(|(sid, _)| **sid == id).map(|(id, _)| *id).collect()
                }
                ShuffleScope::Folder { id } => {
                    if tables.folders.get(&id).map(|(owner, _)| *owner) != Some(user_id) {
                        return Ok(Vec::new());
                    }
                    let folders: HashSet<FolderId> = expand_folder(id, |parent| {
                        Ok(tables
                            .folders
                            .iter()
                            .filter(|(_, (_, p))| *p == Some(parent))
                            .map(|(id, _)| *id)
                            .collect())
                    })?
                    .into_iter()
                    .collect();
                    owned
                        .filter(|(_, (_, folder))| folder.is_some_and(|f| folders.contains(&f)))
                        .map(|(id, _)| *id)
                        .collect()
                }
            })
        }

        async fn save_playback_position(
            &self,
            video_id: VideoId,
            position_secs: u32,
        ) -> Result<PositionUpdate> {
            self.enter()?;
            let mut tables = self.tables.lock().unwrap();
            let Some(video) = tables.videos.get_mut(&video_id) else {
                return Ok(PositionUpdate::NotFound);
            };
            if let Some(duration_secs) = video.duration_secs {
                if position_secs > duration_secs {
                    return Ok(PositionUpdate::OutOfRange { duration_secs });
                }
            }
            video.playback_position = Some(position_secs);
            Ok(PositionUpdate::Saved)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;

    use super::testing::MemoryCatalog;
    use super::*;

    fn fast_retry(attempts: usize) -> RetrySettings {
        RetrySettings {
            timeout: Duration::from_millis(200),
            attempts,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn expand_folder_stops_at_max_depth() {
        // chain 0 -> 1 -> 2 -> ... -> 7
        let tree: HashMap<FolderId, Vec<FolderId>> = (0..7).map(|id| (id, vec![id + 1])).collect();
        let ids = expand_folder(0, |id| Ok(tree.get(&id).cloned().unwrap_or_default())).unwrap();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn expand_folder_tolerates_cycles() {
        let tree: HashMap<FolderId, Vec<FolderId>> =
            HashMap::from([(1, vec![2, 3]), (2, vec![1]), (3, vec![])]);
        let ids = expand_folder(1, |id| Ok(tree.get(&id).cloned().unwrap_or_default())).unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn video_without_duration_counts_as_zero() {
        let video = Video {
            id: 1,
            subscription_id: 1,
            title: "t".to_string(),
            duration_secs: None,
            published_at: None,
            watched: false,
            playback_position: None,
        };
        assert_eq!(video.duration(), Duration::ZERO);
    }

    #[tokio::test]
    async fn retrying_catalog_recovers_from_transient_failures() {
        let memory = Arc::new(MemoryCatalog::new());
        memory.add_subscription(1, 7, None);
        memory.add_video(10, 1, Some(5), 100);
        memory.fail_next(2);
        let catalog = RetryingCatalog::new(memory.clone(), fast_retry(2));

        let video = catalog.resolve_video(10).await.unwrap();
        assert_eq!(video.map(|v| v.id), Some(10));
        assert_eq!(memory.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retrying_catalog_gives_up_after_attempts() {
        let memory = Arc::new(MemoryCatalog::new());
        memory.fail_next(5);
        let catalog = RetryingCatalog::new(memory.clone(), fast_retry(1));

        let err = catalog.mark_watched(1).await.unwrap_err();
        assert!(err.to_string().contains("catalog unavailable"));
        assert_eq!(memory.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn with_retry_times_out_slow_attempts() {
        let settings = RetrySettings {
            timeout: Duration::from_millis(10),
            attempts: 0,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let err = with_retry(&settings, "slow", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("slow timed out"));
    }

    #[tokio::test]
    async fn memory_catalog_orders_by_publish_date_then_id() {
        let memory = MemoryCatalog::new();
        memory.add_subscription(1, 7, None);
        memory.add_video(3, 1, Some(5), 100);
        memory.add_video(2, 1, Some(5), 100);
        memory.add_video(1, 1, Some(5), 200);
        let first = memory
            .earliest_unwatched(&[1], &HashSet::new())
            .await
            .unwrap();
        assert_eq!(first.map(|v| v.id), Some(2));
        let next = memory
            .earliest_unwatched(&[1], &HashSet::from([2]))
            .await
            .unwrap();
        assert_eq!(next.map(|v| v.id), Some(3));
    }
}
