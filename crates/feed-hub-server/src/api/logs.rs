//! Logs-related API handlers.

use actix_web::{HttpResponse, Responder, post, web};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::now_ms;
use crate::state::AppState;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct LogsClearResponse {
    pub cleared_at_ms: i64,
}

#[utoipa::path(
    post,
    path = "/logs/clear",
    responses(
        (status = 200, description = "Log buffer cleared", body = LogsClearResponse)
    )
)]
#[post("/logs/clear")]
/// Clear the in-memory log buffer.
pub async fn logs_clear(state: web::Data<AppState>) -> impl Responder {
    state.log_bus.clear();
    HttpResponse::Ok().json(LogsClearResponse {
        cleared_at_ms: now_ms(),
    })
}
