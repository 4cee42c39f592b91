use actix_web::{HttpResponse, Responder, get, web};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::AppState;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub git_sha: String,
    pub build_date: String,
    /// Number of live playback sessions.
    pub sessions: usize,
}

/// Basic health check for clients and monitors.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Hub server is healthy", body = HealthResponse)
    )
)]
#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_sha: env!("GIT_SHA").to_string(),
        build_date: env!("BUILD_DATE").to_string(),
        sessions: state.registry.len(),
    })
}
