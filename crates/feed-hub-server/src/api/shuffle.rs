//! Shuffle API handler.

use std::time::Duration;

use actix_web::{HttpResponse, Responder, post, web};

use crate::catalog::Video;
use crate::models::{ShuffleRequestBody, ShuffleResponse};
use crate::shuffle::{ShuffleRequest, build_playlist};
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/shuffle",
    request_body = ShuffleRequestBody,
    responses(
        (status = 200, description = "Playlist built", body = ShuffleResponse),
        (status = 404, description = "Session not found"),
        (status = 503, description = "Catalog unavailable")
    )
)]
#[post("/shuffle")]
/// Build a time-budgeted playlist for a scope, optionally appending it to a session queue.
pub async fn shuffle_build(
    state: web::Data<AppState>,
    body: web::Json<ShuffleRequestBody>,
) -> impl Responder {
    let req = body.into_inner();
    let session = match req.session_id.as_deref() {
        Some(session_id) => match state.registry.get(session_id) {
            Some(handle) => Some(handle),
            None => return HttpResponse::NotFound().body("session not found"),
        },
        None => None,
    };

    // Zero is a valid budget: the earliest unwatched video alone.
    let minutes = req.minutes.unwrap_or(state.default_shuffle_minutes);
    let mut request = ShuffleRequest::new(
        req.user_id,
        req.scope,
        Duration::from_secs(minutes.saturating_mul(60)),
    );
    request.seed = req.seed;
    if let Some(handle) = &session {
        let status = handle.status();
        request.exclude.extend(status.queue);
        request.exclude.extend(status.video_id);
    }

    let videos = match build_playlist(state.catalog.as_ref(), &request).await {
        Ok(videos) => videos,
        Err(err) => {
            tracing::warn!(user_id = req.user_id, error = %err, "shuffle failed");
            return HttpResponse::ServiceUnavailable().body(format!("{err:#}"));
        }
    };

    let enqueued = match &session {
        Some(handle) => match handle.enqueue_absent(videos.clone()).await {
            Ok(added) => Some(added.len()),
            Err(err) => return err.into_response(),
        },
        None => None,
    };
    let total_duration_seconds = videos.iter().map(Video::duration).sum::<Duration>().as_secs();
    HttpResponse::Ok().json(ShuffleResponse {
        videos,
        total_duration_seconds,
        enqueued,
    })
}
