use serde::{Deserialize, Deserializer, Serialize};

/// Catalog identity of a video.
pub type VideoId = i64;

/// Catalog identity of a subscription.
pub type SubscriptionId = i64;

/// Catalog identity of a folder.
pub type FolderId = i64;

/// Textual player state reported by a playback client.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    /// Player loaded but nothing started yet.
    #[default]
    Unstarted,
    /// Media is playing.
    Playing,
    /// Media is paused by the user or a command.
    Paused,
    /// Player is waiting for data.
    Buffering,
    /// Current media reached its end.
    Ended,
    /// Player reported a failure for the current media.
    Error,
}

impl PlayerState {
    /// `true` for states after which the session moves on to the next queued video.
    pub fn is_finished(self) -> bool {
        matches!(self, PlayerState::Ended | PlayerState::Error)
    }

    /// Whether `next` is an expected successor of `self`.
    ///
    /// Clients are the source of truth, so unexpected transitions are still applied;
    /// this only feeds diagnostics.
    pub fn is_expected_transition(self, next: PlayerState) -> bool {
        use PlayerState::*;
        match (self, next) {
            (a, b) if a == b => true,
            (_, Error) => !matches!(self, Ended),
            (Unstarted, Playing | Paused | Buffering) => true,
            (Playing | Paused | Buffering, Playing | Paused | Buffering | Ended) => true,
            (Ended | Error, Unstarted | Playing | Buffering) => true,
            _ => false,
        }
    }
}

/// Discriminated action tag carried by every client frame.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    /// Telemetry only.
    #[default]
    None,
    /// Pop the head of the session playlist and reply with it.
    PopNext,
    /// Terminate the session after applying the frame.
    EndSession,
}

/// Client → server telemetry frame.
///
/// Every field except `action` is optional; an absent field leaves the session value
/// untouched. `position_seconds` and `video_id` distinguish "absent" from an explicit
/// `null`, which clears the value.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    #[serde(default)]
    pub action: SessionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Free-form status line shown on monitoring UIs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub position_seconds: Option<Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded_fraction: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_state: Option<PlayerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub video_id: Option<Option<VideoId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitles: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_rate_change: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_volume_change: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_subtitles: Option<bool>,
}

impl ClientFrame {
    /// Frame carrying only an action tag.
    pub fn action(action: SessionAction) -> Self {
        Self {
            action,
            ..Self::default()
        }
    }
}

/// Marks a field as present even when its value is `null`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Server → client command frame.
///
/// Each field is present only when the matching command fired.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ServerFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_play_pause: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_pause: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_skip: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_watch: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_video_id: Option<VideoId>,
    /// Resume offset in whole seconds for `next_video_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_seek_relative_seconds: Option<i32>,
    /// `1` to increase, `-1` to decrease.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_change_rate: Option<i8>,
    /// `1` to increase, `-1` to decrease.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_change_volume: Option<i8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_toggle_subtitles: Option<bool>,
}

impl ServerFrame {
    /// `true` when no command field is set.
    pub fn is_empty(&self) -> bool {
        *self == ServerFrame::default()
    }
}

/// Subscription set selected for a shuffle request.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShuffleScope {
    /// A single subscription.
    Subscription { id: SubscriptionId },
    /// A folder and its descendants (bounded depth).
    Folder { id: FolderId },
    /// Every subscription owned by the user.
    All,
}

/// Snapshot of a live playback session exposed to monitoring UIs.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SessionStatus {
    /// Session id (`sess:<uuid>`).
    pub session_id: String,
    /// Owning user.
    pub user_id: i64,
    /// Page/player title reported by the client.
    pub title: Option<String>,
    /// Last status message reported by the client.
    pub message: Option<String>,
    /// Current video id.
    pub video_id: Option<VideoId>,
    /// Current video title from the catalog.
    pub video_title: Option<String>,
    /// Last reported position in seconds.
    pub position_seconds: Option<f64>,
    /// Fraction of the current media buffered by the client.
    pub loaded_fraction: Option<f32>,
    /// Last reported player state.
    pub player_state: Option<PlayerState>,
    /// Playback rate.
    pub rate: Option<f32>,
    /// Volume (0-100).
    pub volume: Option<u8>,
    /// Quality tag (for example `hd720`).
    pub quality: Option<String>,
    /// Provider tag (for example `youtube`).
    pub provider: Option<String>,
    /// Active subtitle track.
    pub subtitles: Option<String>,
    /// Folder used for shuffle-on-demand.
    pub selected_folder_id: Option<FolderId>,
    /// Client accepts rate change commands.
    pub supports_rate_change: bool,
    /// Client accepts volume change commands.
    pub supports_volume_change: bool,
    /// Client accepts subtitle toggle commands.
    pub supports_subtitles: bool,
    /// Queued video ids in playback order.
    pub queue: Vec<VideoId>,
    /// Sum of queued durations in seconds (missing durations count as zero).
    pub queue_duration_seconds: u64,
}
