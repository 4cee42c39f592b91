//! Actix server startup + app wiring.
//!
//! Builds the shared state, routes, middleware, and OpenAPI endpoints.

use std::path::PathBuf;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_cors::Cors;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse};
use actix_web::{App, Error, HttpServer, web};
use anyhow::{Context as _, Result};
use futures_util::future::{LocalBoxFuture, Ready, ok};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api;
use crate::catalog::{RetryingCatalog, VideoCatalog};
use crate::catalog_db::SqliteCatalog;
use crate::config;
use crate::events::{EventBus, LogBus};
use crate::openapi;
use crate::state::AppState;

/// Build server state and start the Actix HTTP server.
pub(crate) async fn run(args: crate::Args, log_bus: Arc<LogBus>) -> Result<()> {
    let cfg = load_config(args.config.as_ref())?;
    let bind = resolve_bind(args.bind, &cfg)?;
    let db_path = resolve_db_path(args.db_path, &cfg)?;
    let session_settings = config::session_settings_from_config(&cfg);
    let retry_settings = config::retry_settings_from_config(&cfg);
    let default_minutes = config::shuffle_minutes_from_config(&cfg);

    tracing::info!(
        bind = %bind,
        db_path = %db_path.display(),
        default_shuffle_minutes = default_minutes,
        poll_interval_ms = session_settings.poll_interval.as_millis() as u64,
        "starting feed-hub-server"
    );

    let store = SqliteCatalog::new(&db_path, config::pool_size_from_config(&cfg))
        .with_context(|| format!("open catalog {}", db_path.display()))?;
    let catalog: Arc<dyn VideoCatalog> =
        Arc::new(RetryingCatalog::new(Arc::new(store), retry_settings));

    let state = web::Data::new(AppState::new(
        catalog,
        EventBus::new(),
        log_bus,
        session_settings,
        default_minutes,
    ));

    let server_state = state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin("http://localhost:5173")
            .allowed_origin("http://127.0.0.1:5173")
            .allowed_methods(vec!["GET", "POST", "DELETE", "HEAD"])
            .allowed_headers(vec![actix_web::http::header::CONTENT_TYPE])
            .max_age(3600);
        App::new()
            .app_data(server_state.clone())
            .wrap(cors)
            .wrap(FilteredLogger)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", openapi::ApiDoc::openapi()),
            )
            .service(api::health::health)
            .service(api::logs_clear)
            .service(api::logs_stream)
            .service(api::playback_ws::playback_ws)
            // before /sessions/{id} so "stream" is not taken as an id
            .service(api::sessions_stream)
            .service(api::sessions_list)
            .service(api::session_get)
            .service(api::session_detach)
            .service(api::session_play_pause)
            .service(api::session_seek)
            .service(api::session_rate)
            .service(api::session_volume)
            .service(api::session_subtitles)
            .service(api::session_watch)
            .service(api::session_skip)
            .service(api::session_advance)
            .service(api::session_mark_watched)
            .service(api::session_add_videos)
            .service(api::session_select_folder)
            .service(api::session_queue_list)
            .service(api::session_queue_add)
            .service(api::session_queue_clear)
            .service(api::session_queue_remove)
            .service(api::shuffle_build)
            .service(api::video_get)
            .service(api::video_mark_watched)
            .service(api::video_save_position)
    })
    .bind(bind)?
    .run();

    let result = server.await;
    // Ends every playback connection loop and session actor.
    state.shutdown.cancel();
    tracing::info!(sessions = state.registry.len(), "feed-hub-server stopped");
    result?;
    Ok(())
}

/// Return true when the request path should be logged.
fn should_log_path(path: &str) -> bool {
    if path == "/health" || path == "/playback/ws" {
        return false;
    }
    !path.ends_with("/stream")
}

/// Actix middleware that filters noisy paths from logging.
struct FilteredLogger;

impl<S, B> actix_web::dev::Transform<S, ServiceRequest> for FilteredLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = FilteredLoggerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(FilteredLoggerMiddleware { service })
    }
}

/// Service wrapper that applies the logging filter.
struct FilteredLoggerMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for FilteredLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, ctx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let path = req.path().to_string();
        let should_log = should_log_path(&path);
        let method = req.method().clone();
        let peer = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("-")
            .to_string();
        let start = std::time::Instant::now();
        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            if should_log {
                tracing::info!(
                    method = %method,
                    path = %path,
                    status = %res.status().as_u16(),
                    peer = %peer,
                    elapsed_ms = %start.elapsed().as_millis(),
                    "http request"
                );
            }
            Ok(res)
        })
    }
}

/// Load server config from `--config`, or `config.toml` next to the executable.
fn load_config(path: Option<&PathBuf>) -> Result<config::ServerConfig> {
    if let Some(path) = path {
        return config::ServerConfig::load(path);
    }
    let auto_path = std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join("config.toml")));
    match auto_path {
        Some(path) if path.exists() => config::ServerConfig::load(&path),
        _ => Err(anyhow::anyhow!("config file is required; use --config")),
    }
}

/// Resolve the final bind address from args + config.
fn resolve_bind(
    bind: Option<std::net::SocketAddr>,
    cfg: &config::ServerConfig,
) -> Result<std::net::SocketAddr> {
    match bind {
        Some(addr) => Ok(addr),
        None => Ok(config::bind_from_config(cfg)?
            .unwrap_or_else(|| std::net::SocketAddr::from(([0, 0, 0, 0], 8080)))),
    }
}

/// Resolve the catalog database path from args + config.
fn resolve_db_path(path: Option<PathBuf>, cfg: &config::ServerConfig) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path),
        None => config::db_path_from_config(cfg),
    }
}
