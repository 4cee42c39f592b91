//! HTTP API handlers.
//!
//! Defines the Actix routes for session monitoring and control, shuffle, videos,
//! streams and the playback websocket.

pub mod health;
pub mod logs;
pub mod playback_ws;
pub mod sessions;
pub mod shuffle;
pub mod streams;
pub mod videos;

pub use health::HealthResponse;
pub use logs::{LogsClearResponse, logs_clear};
pub use sessions::{
    session_add_videos,
    session_advance,
    session_detach,
    session_get,
    session_mark_watched,
    session_play_pause,
    session_queue_add,
    session_queue_clear,
    session_queue_list,
    session_queue_remove,
    session_rate,
    session_seek,
    session_select_folder,
    session_skip,
    session_subtitles,
    session_volume,
    session_watch,
    sessions_list,
};
pub use shuffle::shuffle_build;
pub use streams::{logs_stream, sessions_stream};
pub use videos::{video_get, video_mark_watched, video_save_position};
