//! Session monitoring and remote control API handlers.

use actix_web::{HttpResponse, Responder, delete, get, post, web};

use crate::models::{
    AddVideosRequest, AddVideosResponse, AdvanceResponse, CommandResponse, MarkWatchedRequest,
    QueueAddRequest, QueueAddResponse, QueueResponse, SeekRequest, SelectFolderRequest,
    SessionsListResponse, StepRequest,
};
use crate::session::{CommandDelivery, RemoteControl, SessionHandle};
use crate::state::AppState;

fn lookup(state: &AppState, session_id: &str) -> Result<SessionHandle, HttpResponse> {
    state
        .registry
        .get(session_id)
        .ok_or_else(|| HttpResponse::NotFound().body("session not found"))
}

async fn send_control(state: &AppState, session_id: &str, action: RemoteControl) -> HttpResponse {
    let handle = match lookup(state, session_id) {
        Ok(handle) => handle,
        Err(resp) => return resp,
    };
    match handle.control(action).await {
        Ok(delivery) => HttpResponse::Ok().json(CommandResponse {
            delivered: delivery == CommandDelivery::Delivered,
        }),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "Live sessions", body = SessionsListResponse)
    )
)]
#[get("/sessions")]
/// List live playback sessions.
pub async fn sessions_list(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(SessionsListResponse {
        sessions: state.registry.list(),
    })
}

#[utoipa::path(
    get,
    path = "/sessions/{id}",
    params(
        ("id" = String, Path, description = "Session id")
    ),
    responses(
        (status = 200, description = "Session snapshot", body = feed_hub_types::SessionStatus),
        (status = 404, description = "Session not found")
    )
)]
#[get("/sessions/{id}")]
pub async fn session_get(state: web::Data<AppState>, id: web::Path<String>) -> impl Responder {
    match lookup(&state, &id) {
        Ok(handle) => HttpResponse::Ok().json(handle.status()),
        Err(resp) => resp,
    }
}

#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    params(
        ("id" = String, Path, description = "Session id")
    ),
    responses(
        (status = 204, description = "Session detached"),
        (status = 404, description = "Session not found")
    )
)]
#[delete("/sessions/{id}")]
/// Detach a session; its client connection is closed.
pub async fn session_detach(state: web::Data<AppState>, id: web::Path<String>) -> impl Responder {
    if state.registry.remove_session(&id) {
        HttpResponse::NoContent().finish()
    } else {
        HttpResponse::NotFound().body("session not found")
    }
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/play-pause",
    params(
        ("id" = String, Path, description = "Session id")
    ),
    responses(
        (status = 200, description = "Command sent", body = CommandResponse),
        (status = 404, description = "Session not found")
    )
)]
#[post("/sessions/{id}/play-pause")]
/// Toggle play/pause on the attached client.
pub async fn session_play_pause(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> impl Responder {
    send_control(&state, &id, RemoteControl::PlayPause).await
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/seek",
    params(
        ("id" = String, Path, description = "Session id")
    ),
    request_body = SeekRequest,
    responses(
        (status = 200, description = "Command sent", body = CommandResponse),
        (status = 404, description = "Session not found")
    )
)]
#[post("/sessions/{id}/seek")]
pub async fn session_seek(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<SeekRequest>,
) -> impl Responder {
    send_control(&state, &id, RemoteControl::SeekRelative(body.seconds)).await
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/rate",
    params(
        ("id" = String, Path, description = "Session id")
    ),
    request_body = StepRequest,
    responses(
        (status = 200, description = "Command sent", body = CommandResponse),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Client does not support rate changes")
    )
)]
#[post("/sessions/{id}/rate")]
pub async fn session_rate(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<StepRequest>,
) -> impl Responder {
    let action = RemoteControl::ChangeRate {
        increase: body.increase,
    };
    send_control(&state, &id, action).await
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/volume",
    params(
        ("id" = String, Path, description = "Session id")
    ),
    request_body = StepRequest,
    responses(
        (status = 200, description = "Command sent", body = CommandResponse),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Client does not support volume changes")
    )
)]
#[post("/sessions/{id}/volume")]
pub async fn session_volume(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<StepRequest>,
) -> impl Responder {
    let action = RemoteControl::ChangeVolume {
        increase: body.increase,
    };
    send_control(&state, &id, action).await
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/subtitles",
    params(
        ("id" = String, Path, description = "Session id")
    ),
    responses(
        (status = 200, description = "Command sent", body = CommandResponse),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Client does not support subtitles")
    )
)]
#[post("/sessions/{id}/subtitles")]
pub async fn session_subtitles(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> impl Responder {
    send_control(&state, &id, RemoteControl::ToggleSubtitles).await
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/watch",
    params(
        ("id" = String, Path, description = "Session id")
    ),
    responses(
        (status = 200, description = "Command sent", body = CommandResponse),
        (status = 404, description = "Session not found")
    )
)]
#[post("/sessions/{id}/watch")]
/// Ask the client to finish the current video as watched.
pub async fn session_watch(state: web::Data<AppState>, id: web::Path<String>) -> impl Responder {
    send_control(&state, &id, RemoteControl::Watch).await
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/skip",
    params(
        ("id" = String, Path, description = "Session id")
    ),
    responses(
        (status = 200, description = "Command sent", body = CommandResponse),
        (status = 404, description = "Session not found")
    )
)]
#[post("/sessions/{id}/skip")]
pub async fn session_skip(state: web::Data<AppState>, id: web::Path<String>) -> impl Responder {
    send_control(&state, &id, RemoteControl::Skip).await
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/advance",
    params(
        ("id" = String, Path, description = "Session id")
    ),
    responses(
        (status = 200, description = "Advanced", body = AdvanceResponse),
        (status = 404, description = "Session not found"),
        (status = 409, description = "No playback client attached")
    )
)]
#[post("/sessions/{id}/advance")]
/// Start the next queued video, or pause when the queue is empty.
pub async fn session_advance(state: web::Data<AppState>, id: web::Path<String>) -> impl Responder {
    let handle = match lookup(&state, &id) {
        Ok(handle) => handle,
        Err(resp) => return resp,
    };
    match handle.advance_to_next().await {
        Ok(outcome) => HttpResponse::Ok().json(AdvanceResponse::from(outcome)),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/mark-watched",
    params(
        ("id" = String, Path, description = "Session id")
    ),
    request_body = MarkWatchedRequest,
    responses(
        (status = 200, description = "Marked watched and advanced", body = AdvanceResponse),
        (status = 404, description = "Session or video not found"),
        (status = 409, description = "Video is not the current video"),
        (status = 503, description = "Catalog unavailable")
    )
)]
#[post("/sessions/{id}/mark-watched")]
/// Persist the watched flag for the current video and advance.
pub async fn session_mark_watched(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<MarkWatchedRequest>,
) -> impl Responder {
    let handle = match lookup(&state, &id) {
        Ok(handle) => handle,
        Err(resp) => return resp,
    };
    match handle.mark_watched_and_advance(body.video_id).await {
        Ok(outcome) => HttpResponse::Ok().json(AdvanceResponse::from(outcome)),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/add-videos",
    params(
        ("id" = String, Path, description = "Session id")
    ),
    request_body = AddVideosRequest,
    responses(
        (status = 200, description = "Videos appended", body = AddVideosResponse),
        (status = 404, description = "Session not found"),
        (status = 503, description = "Catalog unavailable")
    )
)]
#[post("/sessions/{id}/add-videos")]
/// Shuffle more videos from the session's selected folder into its queue.
pub async fn session_add_videos(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<AddVideosRequest>,
) -> impl Responder {
    let handle = match lookup(&state, &id) {
        Ok(handle) => handle,
        Err(resp) => return resp,
    };
    let minutes = body.minutes.unwrap_or(state.default_shuffle_minutes);
    match handle.add_shuffled(minutes).await {
        Ok(added) => HttpResponse::Ok().json(AddVideosResponse { added }),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/folder",
    params(
        ("id" = String, Path, description = "Session id")
    ),
    request_body = SelectFolderRequest,
    responses(
        (status = 200, description = "Folder selected"),
        (status = 404, description = "Session not found")
    )
)]
#[post("/sessions/{id}/folder")]
pub async fn session_select_folder(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<SelectFolderRequest>,
) -> impl Responder {
    let handle = match lookup(&state, &id) {
        Ok(handle) => handle,
        Err(resp) => return resp,
    };
    match handle.select_folder(body.folder_id).await {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/queue",
    params(
        ("id" = String, Path, description = "Session id")
    ),
    responses(
        (status = 200, description = "Queued videos", body = QueueResponse),
        (status = 404, description = "Session not found")
    )
)]
#[get("/sessions/{id}/queue")]
pub async fn session_queue_list(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> impl Responder {
    match lookup(&state, &id) {
        Ok(handle) => {
            let status = handle.status();
            HttpResponse::Ok().json(QueueResponse {
                video_ids: status.queue,
                total_duration_seconds: status.queue_duration_seconds,
            })
        }
        Err(resp) => resp,
    }
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/queue",
    params(
        ("id" = String, Path, description = "Session id")
    ),
    request_body = QueueAddRequest,
    responses(
        (status = 200, description = "Videos queued", body = QueueAddResponse),
        (status = 404, description = "Session not found"),
        (status = 503, description = "Catalog unavailable")
    )
)]
#[post("/sessions/{id}/queue")]
/// Append catalog videos to the session queue in request order.
pub async fn session_queue_add(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<QueueAddRequest>,
) -> impl Responder {
    let handle = match lookup(&state, &id) {
        Ok(handle) => handle,
        Err(resp) => return resp,
    };
    let req = body.into_inner();
    let mut videos = Vec::with_capacity(req.video_ids.len());
    let mut missing = Vec::new();
    for video_id in req.video_ids {
        match state.catalog.resolve_video(video_id).await {
            Ok(Some(video)) => videos.push(video),
            Ok(None) => missing.push(video_id),
            Err(err) => {
                tracing::warn!(video_id, error = %err, "queue lookup failed");
                return HttpResponse::ServiceUnavailable().body(err.to_string());
            }
        }
    }

    let result = if req.allow_duplicates {
        handle.enqueue_videos(videos).await
    } else {
        let mut added = 0;
        for video in videos {
            match handle.try_enqueue_if_absent(video).await {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(err) => return err.into_response(),
            }
        }
        Ok(added)
    };
    match result {
        Ok(added) => HttpResponse::Ok().json(QueueAddResponse { added, missing }),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/sessions/{id}/queue",
    params(
        ("id" = String, Path, description = "Session id")
    ),
    responses(
        (status = 204, description = "Queue cleared"),
        (status = 404, description = "Session not found")
    )
)]
#[delete("/sessions/{id}/queue")]
pub async fn session_queue_clear(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> impl Responder {
    let handle = match lookup(&state, &id) {
        Ok(handle) => handle,
        Err(resp) => return resp,
    };
    match handle.clear_queue().await {
        Ok(_) => HttpResponse::NoContent().finish(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/sessions/{id}/queue/{video_id}",
    params(
        ("id" = String, Path, description = "Session id"),
        ("video_id" = i64, Path, description = "Queued video id")
    ),
    responses(
        (status = 204, description = "Video removed"),
        (status = 404, description = "Session or queued video not found")
    )
)]
#[delete("/sessions/{id}/queue/{video_id}")]
pub async fn session_queue_remove(
    state: web::Data<AppState>,
    path: web::Path<(String, i64)>,
) -> impl Responder {
    let (session_id, video_id) = path.into_inner();
    let handle = match lookup(&state, &session_id) {
        Ok(handle) => handle,
        Err(resp) => return resp,
    };
    match handle.dequeue(video_id).await {
        Ok(true) => HttpResponse::NoContent().finish(),
        Ok(false) => HttpResponse::NotFound().body("video not queued"),
        Err(err) => err.into_response(),
    }
}
