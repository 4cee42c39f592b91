//! In-process event buses.
//!
//! `EventBus` carries session/registry notifications for monitoring streams;
//! `LogBus` mirrors tracing output into a bounded buffer for the logs stream.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::Subscriber;
use tracing::field::{Field, Visit};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use utoipa::ToSchema;

use feed_hub_types::VideoId;

/// Notifications published by sessions, the registry and video endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// A session was created or removed.
    SessionsChanged,
    /// Some field of one live session changed.
    SessionChanged { session_id: String },
    /// Watched flag or stored position of a video changed.
    VideoChanged { video_id: VideoId },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HubEvent>,
}

impl EventBus {
    /// Create a new event bus with a bounded broadcast channel.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.sender.subscribe()
    }

    /// Notify subscribers that the set of live sessions changed.
    pub fn sessions_changed(&self) {
        let _ = self.sender.send(HubEvent::SessionsChanged);
    }

    /// Notify subscribers that a session's observable state changed.
    pub fn session_changed(&self, session_id: &str) {
        let _ = self.sender.send(HubEvent::SessionChanged {
            session_id: session_id.to_string(),
        });
    }

    pub fn video_changed(&self, video_id: VideoId) {
        let _ = self.sender.send(HubEvent::VideoChanged { video_id });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogEvent {
    pub level: String,
    pub target: String,
    pub message: String,
    pub timestamp_ms: i64,
}

/// Ring buffer of recent log events plus a live broadcast.
pub struct LogBus {
    sender: broadcast::Sender<LogEvent>,
    buffer: Mutex<VecDeque<LogEvent>>,
    capacity: usize,
}

impl LogBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(16));
        Self {
            sender,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.sender.subscribe()
    }

    pub fn snapshot(&self) -> Vec<LogEvent> {
        self.buffer
            .lock()
            .map(|buf| buf.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn publish(&self, event: LogEvent) {
        if let Ok(mut buffer) = self.buffer.lock() {
            if buffer.len() == self.capacity {
                buffer.pop_front();
            }
            if self.capacity > 0 {
                buffer.push_back(event.clone());
            }
        }
        let _ = self.sender.send(event);
    }

    pub fn clear(&self) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.clear();
        }
    }
}

/// Tracing layer that forwards every event into a [`LogBus`].
pub struct LogLayer {
    log_bus: Arc<LogBus>,
}

impl LogLayer {
    pub fn new(log_bus: Arc<LogBus>) -> Self {
        Self { log_bus }
    }
}

impl<S> Layer<S> for LogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);
        let metadata = event.metadata();
        self.log_bus.publish(LogEvent {
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message: visitor.into_message(),
            timestamp_ms: crate::models::now_ms(),
        });
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: Vec<String>,
}

impl FieldCollector {
    fn into_message(self) -> String {
        let message = self.message.unwrap_or_else(|| "log event".to_string());
        if self.fields.is_empty() {
            message
        } else {
            format!("{message} {}", self.fields.join(" "))
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let formatted = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(formatted.trim_matches('"').to_string());
        } else {
            self.fields.push(format!("{}={}", field.name(), formatted));
        }
    }
}
