use utoipa::OpenApi;

use crate::api;
use crate::catalog;
use crate::events;
use crate::models;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::health::health,
        api::logs::logs_clear,
        api::streams::logs_stream,
        api::streams::sessions_stream,
        api::sessions::sessions_list,
        api::sessions::session_get,
        api::sessions::session_detach,
        api::sessions::session_play_pause,
        api::sessions::session_seek,
        api::sessions::session_rate,
        api::sessions::session_volume,
        api::sessions::session_subtitles,
        api::sessions::session_watch,
        api::sessions::session_skip,
        api::sessions::session_advance,
        api::sessions::session_mark_watched,
        api::sessions::session_add_videos,
        api::sessions::session_select_folder,
        api::sessions::session_queue_list,
        api::sessions::session_queue_add,
        api::sessions::session_queue_clear,
        api::sessions::session_queue_remove,
        api::shuffle::shuffle_build,
        api::videos::video_get,
        api::videos::video_mark_watched,
        api::videos::video_save_position,
    ),
    components(
        schemas(
            feed_hub_types::SessionStatus,
            feed_hub_types::PlayerState,
            feed_hub_types::ShuffleScope,
            feed_hub_types::ClientFrame,
            feed_hub_types::ServerFrame,
            feed_hub_types::SessionAction,
            catalog::Video,
            events::LogEvent,
            models::SessionsListResponse,
            models::SeekRequest,
            models::StepRequest,
            models::CommandResponse,
            models::MarkWatchedRequest,
            models::AdvanceResponse,
            models::AddVideosRequest,
            models::AddVideosResponse,
            models::SelectFolderRequest,
            models::QueueResponse,
            models::QueueAddRequest,
            models::QueueAddResponse,
            models::ShuffleRequestBody,
            models::ShuffleResponse,
            models::PositionRequest,
            api::HealthResponse,
            api::LogsClearResponse,
        )
    ),
    tags(
        (name = "feed-hub-server", description = "Video playback session hub API")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_session_routes() {
        let doc = ApiDoc::openapi();
        let paths = &doc.paths.paths;
        assert!(paths.contains_key("/sessions/{id}/mark-watched"));
        assert!(paths.contains_key("/shuffle"));
        assert!(paths.contains_key("/videos/{id}/position"));
    }
}
