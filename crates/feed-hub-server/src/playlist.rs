//! Per-session playlist queue.

use std::collections::VecDeque;
use std::time::Duration;

use feed_hub_types::VideoId;

use crate::catalog::Video;

/// FIFO of upcoming videos owned by exactly one session.
///
/// A video id appears at most once unless it was added through [`PlaylistQueue::enqueue`]
/// as an explicit replay.
#[derive(Debug, Default, Clone)]
pub struct PlaylistQueue {
    items: VecDeque<Video>,
}

impl PlaylistQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append videos in order. Returns the number appended.
    pub fn enqueue<I>(&mut self, videos: I) -> usize
    where
        I: IntoIterator<Item = Video>,
    {
        let before = self.items.len();
        self.items.extend(videos);
        self.items.len() - before
    }

    /// Append `video` unless its id is already queued.
    pub fn try_enqueue_if_absent(&mut self, video: Video) -> bool {
        if self.contains(video.id) {
            return false;
        }
        self.items.push_back(video);
        true
    }

    /// Append every video whose id is not queued yet; returns the ids actually added.
    pub fn enqueue_absent<I>(&mut self, videos: I) -> Vec<VideoId>
    where
        I: IntoIterator<Item = Video>,
    {
        videos
            .into_iter()
            .filter_map(|video| {
                let id = video.id;
                self.try_enqueue_if_absent(video).then_some(id)
            })
            .collect()
    }

    pub fn pop_next(&mut self) -> Option<Video> {
        self.items.pop_front()
    }

    /// Remove the first occurrence of `video_id`.
    pub fn remove(&mut self, video_id: VideoId) -> bool {
        match self.items.iter().position(|v| v.id == video_id) {
            Some(index) => self.items.remove(index).is_some(),
            None => false,
        }
    }

    pub fn contains(&self, video_id: VideoId) -> bool {
        self.items.iter().any(|v| v.id == video_id)
    }

    pub fn ids(&self) -> Vec<VideoId> {
        self.items.iter().map(|v| v.id).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of queued durations; unknown durations count as zero.
    pub fn total_duration(&self) -> Duration {
        self.items.iter().map(Video::duration).sum()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
