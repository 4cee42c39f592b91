//! API models and OpenAPI schemas.
//!
//! Request/response bodies for the hub HTTP surface. Wire frames of the playback
//! websocket live in `feed-hub-types`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use feed_hub_types::{FolderId, SessionStatus, ShuffleScope, VideoId};

use crate::catalog::Video;
use crate::session::AdvanceOutcome;

/// Milliseconds since the Unix epoch, `0` if the clock is before it.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Live sessions response.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionsListResponse {
    pub sessions: Vec<SessionStatus>,
}

/// Relative seek request.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SeekRequest {
    /// Seconds to move; negative seeks backwards.
    pub seconds: i32,
}

/// One step up or down for rate and volume commands.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StepRequest {
    pub increase: bool,
}

/// Whether a fire-and-forget command reached the attached client.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CommandResponse {
    pub delivered: bool,
}

/// Mark-watched request; `video_id` must be the session's current video.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct MarkWatchedRequest {
    pub video_id: VideoId,
}

/// Result of moving a session to its next video.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AdvanceResponse {
    /// Video now playing; `None` when the queue was empty and playback paused.
    pub video_id: Option<VideoId>,
    /// Offset in seconds the client was asked to resume from.
    pub resume_at: Option<u32>,
}

impl From<AdvanceOutcome> for AdvanceResponse {
    fn from(outcome: AdvanceOutcome) -> Self {
        match outcome {
            AdvanceOutcome::Playing {
                video_id,
                resume_at,
            } => Self {
                video_id: Some(video_id),
                resume_at,
            },
            AdvanceOutcome::Idle => Self {
                video_id: None,
                resume_at: None,
            },
        }
    }
}

/// Shuffle-on-demand request for a session.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AddVideosRequest {
    /// Minutes of content to add; defaults to the configured shuffle length.
    #[serde(default)]
    pub minutes: Option<u64>,
}

/// Video ids appended to a session queue.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AddVideosResponse {
    pub added: Vec<VideoId>,
}

/// Folder scope used for shuffle-on-demand; `null` clears it.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SelectFolderRequest {
    pub folder_id: Option<FolderId>,
}

/// Session queue contents.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct QueueResponse {
    pub video_ids: Vec<VideoId>,
    pub total_duration_seconds: u64,
}

/// Enqueue request.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct QueueAddRequest {
    pub video_ids: Vec<VideoId>,
    /// Append ids that are already queued (explicit replay).
    #[serde(default)]
    pub allow_duplicates: bool,
}

/// Enqueue result.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct QueueAddResponse {
    pub added: usize,
    /// Requested ids the catalog does not know.
    pub missing: Vec<VideoId>,
}

/// Shuffle request.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ShuffleRequestBody {
    pub user_id: i64,
    pub scope: ShuffleScope,
    /// Time budget; defaults to the configured shuffle length.
    #[serde(default)]
    pub minutes: Option<u64>,
    /// When set, the playlist is appended to this session's queue.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Fixes the random subscription order.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Shuffle result in pick order.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct ShuffleResponse {
    pub videos: Vec<Video>,
    pub total_duration_seconds: u64,
    /// Number of videos appended to the session queue, if a session was given.
    pub enqueued: Option<usize>,
}

/// Stored playback position update.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PositionRequest {
    pub position_seconds: u32,
}

/// Query string of the playback websocket.
#[derive(Clone, Debug, Deserialize)]
pub struct PlaybackWsQuery {
    pub user_id: i64,
}
