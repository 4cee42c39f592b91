//! Out-of-band video operations.

use actix_web::{HttpResponse, Responder, get, post, web};

use crate::catalog::{PositionUpdate, Video};
use crate::models::PositionRequest;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/videos/{id}",
    params(
        ("id" = i64, Path, description = "Video id")
    ),
    responses(
        (status = 200, description = "Video", body = Video),
        (status = 404, description = "Video not found")
    )
)]
#[get("/videos/{id}")]
pub async fn video_get(state: web::Data<AppState>, id: web::Path<i64>) -> impl Responder {
    match state.catalog.resolve_video(*id).await {
        Ok(Some(video)) => HttpResponse::Ok().json(video),
        Ok(None) => HttpResponse::NotFound().body("video not found"),
        Err(err) => HttpResponse::ServiceUnavailable().body(format!("{err:#}")),
    }
}

#[utoipa::path(
    post,
    path = "/videos/{id}/watched",
    params(
        ("id" = i64, Path, description = "Video id")
    ),
    responses(
        (status = 204, description = "Marked watched"),
        (status = 404, description = "Video not found"),
        (status = 503, description = "Catalog unavailable")
    )
)]
#[post("/videos/{id}/watched")]
/// Mark a video watched without touching any session.
pub async fn video_mark_watched(state: web::Data<AppState>, id: web::Path<i64>) -> impl Responder {
    let video_id = id.into_inner();
    match state.catalog.mark_watched(video_id).await {
        Ok(true) => {
            tracing::info!(video_id, "video marked watched");
            state.events.video_changed(video_id);
            HttpResponse::NoContent().finish()
        }
        Ok(false) => HttpResponse::NotFound().body("video not found"),
        Err(err) => HttpResponse::ServiceUnavailable().body(format!("{err:#}")),
    }
}

#[utoipa::path(
    post,
    path = "/videos/{id}/position",
    params(
        ("id" = i64, Path, description = "Video id")
    ),
    request_body = PositionRequest,
    responses(
        (status = 204, description = "Position stored"),
        (status = 400, description = "Position beyond video duration"),
        (status = 404, description = "Video not found"),
        (status = 503, description = "Catalog unavailable")
    )
)]
#[post("/videos/{id}/position")]
/// Store the resume position of a video.
pub async fn video_save_position(
    state: web::Data<AppState>,
    id: web::Path<i64>,
    body: web::Json<PositionRequest>,
) -> impl Responder {
    let video_id = id.into_inner();
    match state
        .catalog
        .save_playback_position(video_id, body.position_seconds)
        .await
    {
        Ok(PositionUpdate::Saved) => {
            state.events.video_changed(video_id);
            HttpResponse::NoContent().finish()
        }
        Ok(PositionUpdate::NotFound) => HttpResponse::NotFound().body("video not found"),
        Ok(PositionUpdate::OutOfRange { duration_secs }) => HttpResponse::BadRequest().body(
            format!("position exceeds duration of {duration_secs}s"),
        ),
        Err(err) => HttpResponse::ServiceUnavailable().body(format!("{err:#}")),
    }
}
