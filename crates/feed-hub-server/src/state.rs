//! Shared application state.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::catalog::VideoCatalog;
use crate::config::SessionSettings;
use crate::events::{EventBus, LogBus};
use crate::session_registry::SessionRegistry;

pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub catalog: Arc<dyn VideoCatalog>,
    pub events: EventBus,
    pub log_bus: Arc<LogBus>,
    /// Shuffle length used when a request does not name one.
    pub default_shuffle_minutes: u64,
    /// Cancelled on shutdown; parent of every connection token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        catalog: Arc<dyn VideoCatalog>,
        events: EventBus,
        log_bus: Arc<LogBus>,
        settings: SessionSettings,
        default_shuffle_minutes: u64,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(
            catalog.clone(),
            events.clone(),
            settings,
        ));
        Self {
            registry,
            catalog,
            events,
            log_bus,
            default_shuffle_minutes,
            shutdown: CancellationToken::new(),
        }
    }
}
