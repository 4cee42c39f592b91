//! Live sync protocol handler.
//!
//! One loop per connected playback client: inbound telemetry frames are applied to the
//! session, pop-next requests are answered inline, and session commands are written back
//! down the same connection. The loop owns the session for its whole lifetime; when it
//! exits for any reason the session is removed from the registry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use feed_hub_types::{ClientFrame, ServerFrame, SessionAction};

use crate::session::{SessionCommand, SessionError, SessionHandle};
use crate::session_registry::{SessionGuard, SessionRegistry};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("malformed frame: {0}")]
    Decode(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Why a connection loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Client sent an end-session frame.
    EndSession,
    /// Inbound stream closed.
    ClientClosed,
    /// Connection or session was cancelled.
    Cancelled,
}

/// Inbound half as produced by the transport.
pub type Inbound = mpsc::UnboundedReceiver<Result<ClientFrame, ProtocolError>>;

/// Outbound half of a playback connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: &ServerFrame) -> Result<(), ProtocolError>;

    /// Called once after the loop exits.
    async fn close(&mut self) {}
}

/// A session bound to one client connection.
pub struct Connection {
    handle: SessionHandle,
    commands: mpsc::Receiver<SessionCommand>,
    poll_interval: Duration,
    _guard: SessionGuard,
}

impl Connection {
    /// Create the session for a newly connected client.
    pub fn open(registry: &Arc<SessionRegistry>, user_id: i64, cancel: &CancellationToken) -> Self {
        let (handle, commands) = registry.create_session(user_id, cancel);
        let guard = SessionGuard::new(registry.clone(), handle.id());
        Self {
            handle,
            commands,
            poll_interval: registry.settings().poll_interval,
            _guard: guard,
        }
    }

    pub fn session_id(&self) -> &str {
        self.handle.id()
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Drive the connection until the client ends it, disconnects, or is cancelled.
    pub async fn serve<K: FrameSink>(
        mut self,
        mut inbound: Inbound,
        mut sink: K,
    ) -> Result<ExitReason, ProtocolError> {
        let session_id = self.handle.id().to_string();
        tracing::info!(session_id = %session_id, "playback client attached");
        let result = self.run(&mut inbound, &mut sink).await;
        sink.close().await;
        match &result {
            Ok(reason) => {
                tracing::info!(session_id = %session_id, reason = ?reason, "playback client detached")
            }
            Err(err) => {
                tracing::warn!(session_id = %session_id, error = %err, "playback connection failed")
            }
        }
        result
    }

    async fn run<K: FrameSink>(
        &mut self,
        inbound: &mut Inbound,
        sink: &mut K,
    ) -> Result<ExitReason, ProtocolError> {
        let cancel = self.handle.cancellation().clone();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(ExitReason::Cancelled),
                Some(command) = self.commands.recv() => {
                    tracing::debug!(session_id = %self.handle.id(), ?command, "sending command");
                    sink.send(&command.to_frame()).await?;
                }
                next = tokio::time::timeout(self.poll_interval, inbound.recv()) => match next {
                    // Idle poll; the client just has nothing new to report.
                    Err(_) => continue,
                    Ok(None) => return Ok(ExitReason::ClientClosed),
                    Ok(Some(Err(ProtocolError::Decode(reason)))) => {
                        tracing::warn!(session_id = %self.handle.id(), %reason, "skipping malformed frame");
                    }
                    Ok(Some(Err(err))) => return Err(err),
                    Ok(Some(Ok(frame))) => {
                        if self.on_frame(frame, sink).await? {
                            return Ok(ExitReason::EndSession);
                        }
                    }
                },
            }
        }
    }

    /// Apply one frame. Returns `true` when the client asked to end the session.
    async fn on_frame<K: FrameSink>(
        &mut self,
        frame: ClientFrame,
        sink: &mut K,
    ) -> Result<bool, ProtocolError> {
        let action = frame.action;
        let outcome = match self.handle.apply_frame(frame).await {
            Ok(outcome) => outcome,
            Err(err @ (SessionError::SessionClosed | SessionError::Cancelled)) => {
                return Err(err.into());
            }
            Err(err) => {
                tracing::warn!(session_id = %self.handle.id(), error = %err, "frame rejected");
                return Ok(false);
            }
        };
        if let Some(video_id) = outcome.unknown_video {
            tracing::warn!(session_id = %self.handle.id(), video_id, "client reported unknown video");
        }
        if action == SessionAction::PopNext {
            match outcome.popped {
                Some(next) => sink.send(&next.to_frame()).await?,
                None => tracing::debug!(session_id = %self.handle.id(), "pop requested on empty queue"),
            }
        }
        Ok(outcome.end_session)
    }
}
