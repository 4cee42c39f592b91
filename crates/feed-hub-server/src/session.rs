//! Playback session actor.
//!
//! One task owns all state of a session (current video, playlist queue, player telemetry).
//! Everything else talks to it through a clonable [`SessionHandle`]; requests are processed
//! one at a time, so queue mutations and "advance to next" never interleave. Outbound
//! commands for the attached client go out on a bounded channel without blocking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actix_web::HttpResponse;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use feed_hub_types::{
    ClientFrame, FolderId, PlayerState, ServerFrame, SessionAction, SessionStatus, ShuffleScope,
    VideoId,
};

use crate::catalog::{Video, VideoCatalog};
use crate::config::SessionSettings;
use crate::events::EventBus;
use crate::playlist::PlaylistQueue;
use crate::shuffle::{ShuffleRequest, build_playlist};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("session closed")]
    SessionClosed,
    #[error("no current video")]
    NoCurrentVideo,
    #[error("video {requested} is not the current video ({current})")]
    StaleVideo { current: VideoId, requested: VideoId },
    #[error("no playback listener attached")]
    NoPlaybackListener,
    #[error("video {0} not found")]
    VideoNotFound(VideoId),
    #[error("client does not support {0}")]
    Unsupported(&'static str),
    #[error("catalog error: {0}")]
    Catalog(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl SessionError {
    /// Convert a session error into an HTTP response.
    pub fn into_response(self) -> HttpResponse {
        let message = self.to_string();
        match self {
            SessionError::VideoNotFound(_) => HttpResponse::NotFound().body(message),
            SessionError::NoCurrentVideo
            | SessionError::StaleVideo { .. }
            | SessionError::NoPlaybackListener
            | SessionError::Unsupported(_) => HttpResponse::Conflict().body(message),
            SessionError::Catalog(_) => HttpResponse::ServiceUnavailable().body(message),
            SessionError::SessionClosed | SessionError::Cancelled => {
                HttpResponse::Gone().body(message)
            }
        }
    }
}

/// Command for the attached playback client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Start playing `video_id`, optionally from `resume_at` seconds.
    PlayVideo {
        video_id: VideoId,
        resume_at: Option<u32>,
    },
    /// Nothing left to play.
    Pause,
    PlayPause {
        video_id: Option<VideoId>,
        position: Option<u32>,
    },
    SeekRelative(i32),
    ChangeRate { increase: bool },
    ChangeVolume { increase: bool },
    ToggleSubtitles,
    /// Mark the current video watched and move on.
    Watch,
    /// Move on without marking watched.
    Skip,
}

impl SessionCommand {
    pub fn to_frame(&self) -> ServerFrame {
        let mut frame = ServerFrame::default();
        match *self {
            SessionCommand::PlayVideo {
                video_id,
                resume_at,
            } => {
                frame.next_video_id = Some(video_id);
                frame.playback_position = resume_at;
            }
            SessionCommand::Pause => frame.should_pause = Some(true),
            SessionCommand::PlayPause { video_id, position } => {
                frame.should_play_pause = Some(true);
                frame.next_video_id = video_id;
                frame.playback_position = position;
            }
            SessionCommand::SeekRelative(seconds) => {
                frame.should_seek_relative_seconds = Some(seconds)
            }
            SessionCommand::ChangeRate { increase } => {
                frame.should_change_rate = Some(if increase { 1 } else { -1 })
            }
            SessionCommand::ChangeVolume { increase } => {
                frame.should_change_volume = Some(if increase { 1 } else { -1 })
            }
            SessionCommand::ToggleSubtitles => frame.should_toggle_subtitles = Some(true),
            SessionCommand::Watch => frame.should_watch = Some(true),
            SessionCommand::Skip => frame.should_skip = Some(true),
        }
        frame
    }
}

/// User-triggered remote control action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteControl {
    PlayPause,
    SeekRelative(i32),
    ChangeRate { increase: bool },
    ChangeVolume { increase: bool },
    ToggleSubtitles,
    Watch,
    Skip,
}

/// Whether a command reached the outbound channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandDelivery {
    Delivered,
    /// Channel full or no client attached.
    Dropped,
}

/// Result of moving to the next queued video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Playing {
        video_id: VideoId,
        resume_at: Option<u32>,
    },
    /// Queue was empty; a pause was requested instead.
    Idle,
}

/// Popped playlist head handed back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextVideo {
    pub video_id: VideoId,
    pub resume_at: Option<u32>,
}

impl NextVideo {
    pub fn to_frame(self) -> ServerFrame {
        ServerFrame {
            next_video_id: Some(self.video_id),
            playback_position: self.resume_at,
            ..ServerFrame::default()
        }
    }
}

/// What applying a telemetry frame produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameOutcome {
    /// Set when the frame asked for the next video and the queue was non-empty.
    pub popped: Option<NextVideo>,
    /// Set when a finished player state triggered an automatic advance.
    pub advanced: Option<AdvanceOutcome>,
    /// Video id reported by the client that the catalog does not know.
    pub unknown_video: Option<VideoId>,
    pub end_session: bool,
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum SessionRequest {
    ApplyFrame {
        frame: ClientFrame,
        reply: Reply<FrameOutcome>,
    },
    SetVideo {
        video: Option<Video>,
        reply: Reply<()>,
    },
    Enqueue {
        videos: Vec<Video>,
        reply: Reply<usize>,
    },
    TryEnqueue {
        video: Video,
        reply: Reply<bool>,
    },
    EnqueueAbsent {
        videos: Vec<Video>,
        reply: Reply<Vec<VideoId>>,
    },
    Dequeue {
        video_id: VideoId,
        reply: Reply<bool>,
    },
    ClearQueue {
        reply: Reply<usize>,
    },
    PopNext {
        reply: Reply<Option<Video>>,
    },
    MarkWatchedAndAdvance {
        video_id: VideoId,
        reply: Reply<AdvanceOutcome>,
    },
    AdvanceToNext {
        reply: Reply<AdvanceOutcome>,
    },
    ResumeOffsetFor {
        video: Video,
        reply: Reply<Option<u32>>,
    },
    Control {
        action: RemoteControl,
        reply: Reply<CommandDelivery>,
    },
    AddShuffled {
        minutes: u64,
        reply: Reply<Vec<VideoId>>,
    },
    SelectFolder {
        folder_id: Option<FolderId>,
        reply: Reply<()>,
    },
}

/// Clonable address of a running session actor.
#[derive(Clone)]
pub struct SessionHandle {
    id: Arc<str>,
    user_id: i64,
    requests: mpsc::Sender<SessionRequest>,
    status: watch::Receiver<SessionStatus>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Latest published snapshot.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Receiver that wakes on every published snapshot.
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Token cancelled when the session ends.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop the actor; pending and later requests fail with `SessionClosed`.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.requests.is_closed()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionRequest,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(build(tx))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Apply a sparse telemetry frame reported by the client.
    pub async fn apply_frame(&self, frame: ClientFrame) -> Result<FrameOutcome, SessionError> {
        self.request(|reply| SessionRequest::ApplyFrame { frame, reply })
            .await
    }

    /// Replace the current video; does not touch the watched flag.
    pub async fn set_video(&self, video: Option<Video>) -> Result<(), SessionError> {
        self.request(|reply| SessionRequest::SetVideo { video, reply })
            .await
    }

    pub async fn enqueue_videos(&self, videos: Vec<Video>) -> Result<usize, SessionError> {
        self.request(|reply| SessionRequest::Enqueue { videos, reply })
            .await
    }

    /// Enqueue unless the id is already queued.
    pub async fn try_enqueue_if_absent(&self, video: Video) -> Result<bool, SessionError> {
        self.request(|reply| SessionRequest::TryEnqueue { video, reply })
            .await
    }

    /// Enqueue each video not already queued, in one step; returns the ids added.
    pub async fn enqueue_absent(&self, videos: Vec<Video>) -> Result<Vec<VideoId>, SessionError> {
        self.request(|reply| SessionRequest::EnqueueAbsent { videos, reply })
            .await
    }

    pub async fn dequeue(&self, video_id: VideoId) -> Result<bool, SessionError> {
        self.request(|reply| SessionRequest::Dequeue { video_id, reply })
            .await
    }

    pub async fn clear_queue(&self) -> Result<usize, SessionError> {
        self.request(|reply| SessionRequest::ClearQueue { reply }).await
    }

    pub async fn pop_next(&self) -> Result<Option<Video>, SessionError> {
        self.request(|reply| SessionRequest::PopNext { reply }).await
    }

    /// Persist the watched flag for the current video, then advance.
    ///
    /// Fails without side effects when `video_id` is not the current video.
    pub async fn mark_watched_and_advance(
        &self,
        video_id: VideoId,
    ) -> Result<AdvanceOutcome, SessionError> {
        self.request(|reply| SessionRequest::MarkWatchedAndAdvance { video_id, reply })
            .await
    }

    pub async fn advance_to_next(&self) -> Result<AdvanceOutcome, SessionError> {
        self.request(|reply| SessionRequest::AdvanceToNext { reply })
            .await
    }

    pub async fn resume_offset_for(&self, video: Video) -> Result<Option<u32>, SessionError> {
        self.request(|reply| SessionRequest::ResumeOffsetFor { video, reply })
            .await
    }

    pub async fn control(&self, action: RemoteControl) -> Result<CommandDelivery, SessionError> {
        self.request(|reply| SessionRequest::Control { action, reply })
            .await
    }

    /// Shuffle `minutes` worth of videos from the selected folder into the queue.
    pub async fn add_shuffled(&self, minutes: u64) -> Result<Vec<VideoId>, SessionError> {
        self.request(|reply| SessionRequest::AddShuffled { minutes, reply })
            .await
    }

    pub async fn select_folder(&self, folder_id: Option<FolderId>) -> Result<(), SessionError> {
        self.request(|reply| SessionRequest::SelectFolder { folder_id, reply })
            .await
    }
}

/// Spawn a session actor. Returns its handle and the outbound command receiver, whose
/// single consumer is the protocol handler of the attached connection.
pub fn spawn_session(
    id: String,
    user_id: i64,
    catalog: Arc<dyn VideoCatalog>,
    events: EventBus,
    settings: SessionSettings,
    cancel: CancellationToken,
) -> (SessionHandle, mpsc::Receiver<SessionCommand>) {
    let (request_tx, request_rx) = mpsc::channel(settings.request_buffer);
    let (command_tx, command_rx) = mpsc::channel(settings.command_buffer);
    let initial = SessionStatus {
        session_id: id.clone(),
        user_id,
        ..SessionStatus::default()
    };
    let (status_tx, status_rx) = watch::channel(initial);
    let id: Arc<str> = Arc::from(id);

    let actor = SessionActor {
        id: id.clone(),
        user_id,
        catalog,
        events,
        settings,
        cancel: cancel.clone(),
        commands: command_tx,
        status: status_tx,
        state: SessionState::default(),
    };
    tokio::spawn(actor.run(request_rx));

    let handle = SessionHandle {
        id,
        user_id,
        requests: request_tx,
        status: status_rx,
        cancel,
    };
    (handle, command_rx)
}

#[derive(Default)]
struct SessionState {
    title: Option<String>,
    message: Option<String>,
    current: Option<Video>,
    position_seconds: Option<f64>,
    loaded_fraction: Option<f32>,
    provider: Option<String>,
    quality: Option<String>,
    rate: Option<f32>,
    player_state: Option<PlayerState>,
    volume: Option<u8>,
    subtitles: Option<String>,
    selected_folder_id: Option<FolderId>,
    supports_rate_change: bool,
    supports_volume_change: bool,
    supports_subtitles: bool,
    queue: PlaylistQueue,
    /// Last known position of videos switched away from.
    remembered: HashMap<VideoId, f64>,
}

struct SessionActor {
    id: Arc<str>,
    user_id: i64,
    catalog: Arc<dyn VideoCatalog>,
    events: EventBus,
    settings: SessionSettings,
    cancel: CancellationToken,
    commands: mpsc::Sender<SessionCommand>,
    status: watch::Sender<SessionStatus>,
    state: SessionState,
}

impl SessionActor {
    async fn run(mut self, mut requests: mpsc::Receiver<SessionRequest>) {
        tracing::debug!(session_id = %self.id, "session actor started");
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                request = requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
            }
        }
        tracing::debug!(session_id = %self.id, "session actor stopped");
    }

    async fn handle(&mut self, request: SessionRequest) {
        match request {
            SessionRequest::ApplyFrame { frame, reply } => {
                let _ = reply.send(self.apply_frame(frame).await);
            }
            SessionRequest::SetVideo { video, reply } => {
                self.set_video(video);
                let _ = reply.send(Ok(()));
            }
            SessionRequest::Enqueue { videos, reply } => {
                let added = self.state.queue.enqueue(videos);
                if added > 0 {
                    self.publish();
                }
                let _ = reply.send(Ok(added));
            }
            SessionRequest::TryEnqueue { video, reply } => {
                let added = self.state.queue.try_enqueue_if_absent(video);
                if added {
                    self.publish();
                }
                let _ = reply.send(Ok(added));
            }
            SessionRequest::EnqueueAbsent { videos, reply } => {
                let added = self.state.queue.enqueue_absent(videos);
                if !added.is_empty() {
                    self.publish();
                }
                let _ = reply.send(Ok(added));
            }
            SessionRequest::Dequeue { video_id, reply } => {
                let removed = self.state.queue.remove(video_id);
                if removed {
                    self.publish();
                }
                let _ = reply.send(Ok(removed));
            }
            SessionRequest::ClearQueue { reply } => {
                let cleared = self.state.queue.len();
                self.state.queue.clear();
                self.publish();
                let _ = reply.send(Ok(cleared));
            }
            SessionRequest::PopNext { reply } => {
                let popped = self.state.queue.pop_next();
                if popped.is_some() {
                    self.publish();
                }
                let _ = reply.send(Ok(popped));
            }
            SessionRequest::MarkWatchedAndAdvance { video_id, reply } => {
                let _ = reply.send(self.mark_watched_and_advance(video_id).await);
            }
            SessionRequest::AdvanceToNext { reply } => {
                let _ = reply.send(self.advance_to_next());
            }
            SessionRequest::ResumeOffsetFor { video, reply } => {
                let _ = reply.send(Ok(self.resume_offset_for(&video)));
            }
            SessionRequest::Control { action, reply } => {
                let _ = reply.send(self.control(action));
            }
            SessionRequest::AddShuffled { minutes, reply } => {
                let _ = reply.send(self.add_shuffled(minutes).await);
            }
            SessionRequest::SelectFolder { folder_id, reply } => {
                self.state.selected_folder_id = folder_id;
                self.publish();
                let _ = reply.send(Ok(()));
            }
        }
    }

    /// Await a catalog call unless the session is cancelled first.
    async fn catalog_call<T>(
        &self,
        fut: impl std::future::Future<Output = anyhow::Result<T>>,
    ) -> Result<T, SessionError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(SessionError::Cancelled),
            result = fut => result.map_err(|err| SessionError::Catalog(format!("{err:#}"))),
        }
    }

    async fn apply_frame(&mut self, frame: ClientFrame) -> Result<FrameOutcome, SessionError> {
        let mut outcome = FrameOutcome::default();

        // Resolve before mutating anything so a catalog failure rejects the whole frame.
        let mut video_change = None;
        if let Some(requested) = frame.video_id {
            match requested {
                Some(id) if self.state.current.as_ref().map(|v| v.id) == Some(id) => {}
                Some(id) => {
                    let catalog = self.catalog.clone();
                    match self.catalog_call(catalog.resolve_video(id)).await? {
                        Some(video) => video_change = Some(Some(video)),
                        None => outcome.unknown_video = Some(id),
                    }
                }
                None => video_change = Some(None),
            }
        }

        if frame.action == SessionAction::PopNext {
            if let Some(video) = self.state.queue.pop_next() {
                outcome.popped = Some(NextVideo {
                    video_id: video.id,
                    resume_at: self.resume_offset_for(&video),
                });
            }
        }

        if let Some(video) = video_change {
            self.switch_video(video);
        }
        let previous_state = self.state.player_state;
        let state = &mut self.state;
        if let Some(title) = frame.title {
            state.title = Some(title);
        }
        if let Some(message) = frame.message {
            state.message = Some(message);
        }
        if let Some(position) = frame.position_seconds {
            state.position_seconds = position.filter(|p| p.is_finite() && *p >= 0.0);
        }
        if let Some(loaded) = frame.loaded_fraction {
            state.loaded_fraction = Some(loaded.clamp(0.0, 1.0));
        }
        if let Some(provider) = frame.provider {
            state.provider = Some(provider);
        }
        if let Some(quality) = frame.quality {
            state.quality = Some(quality);
        }
        if let Some(rate) = frame.rate {
            state.rate = Some(rate);
        }
        if let Some(player_state) = frame.player_state {
            state.player_state = Some(player_state);
        }
        if let Some(volume) = frame.volume {
            state.volume = Some(volume.min(100));
        }
        if let Some(subtitles) = frame.subtitles {
            state.subtitles = Some(subtitles);
        }
        if let Some(flag) = frame.supports_rate_change {
            state.supports_rate_change = flag;
        }
        if let Some(flag) = frame.supports_volume_change {
            state.supports_volume_change = flag;
        }
        if let Some(flag) = frame.supports_subtitles {
            state.supports_subtitles = flag;
        }

        if let (Some(from), Some(to)) = (previous_state, frame.player_state) {
            if !from.is_expected_transition(to) {
                tracing::debug!(
                    session_id = %self.id,
                    from = ?from,
                    to = ?to,
                    "unexpected player state transition"
                );
            }
        }
        let finished_now = frame.player_state.is_some_and(PlayerState::is_finished)
            && !previous_state.is_some_and(PlayerState::is_finished);
        if finished_now
            && self.settings.auto_advance_on_end
            && frame.action == SessionAction::None
        {
            match self.advance_to_next() {
                Ok(advanced) => outcome.advanced = Some(advanced),
                Err(err) => {
                    tracing::warn!(session_id = %self.id, error = %err, "auto advance failed");
                }
            }
        }

        outcome.end_session = frame.action == SessionAction::EndSession;
        self.publish();
        Ok(outcome)
    }

    fn set_video(&mut self, video: Option<Video>) {
        self.switch_video(video);
        self.publish();
    }

    /// Replace the current video, remembering where the previous one stopped.
    fn switch_video(&mut self, video: Option<Video>) {
        if let (Some(previous), Some(position)) =
            (self.state.current.take(), self.state.position_seconds)
        {
            if position > 0.0 {
                self.state.remembered.insert(previous.id, position);
            }
        }
        self.state.current = video;
        self.state.position_seconds = None;
    }

    async fn mark_watched_and_advance(
        &mut self,
        video_id: VideoId,
    ) -> Result<AdvanceOutcome, SessionError> {
        let current = self
            .state
            .current
            .as_ref()
            .map(|v| v.id)
            .ok_or(SessionError::NoCurrentVideo)?;
        if current != video_id {
            return Err(SessionError::StaleVideo {
                current,
                requested: video_id,
            });
        }
        let catalog = self.catalog.clone();
        if !self.catalog_call(catalog.mark_watched(video_id)).await? {
            return Err(SessionError::VideoNotFound(video_id));
        }
        tracing::info!(session_id = %self.id, video_id, "video marked watched");
        self.events.video_changed(video_id);
        self.state.remembered.remove(&video_id);
        self.state.position_seconds = None;
        if let Some(video) = self.state.current.as_mut() {
            video.watched = true;
        }
        self.advance_to_next()
    }

    fn advance_to_next(&mut self) -> Result<AdvanceOutcome, SessionError> {
        if !self.state.queue.is_empty() && self.commands.is_closed() {
            return Err(SessionError::NoPlaybackListener);
        }
        let outcome = match self.state.queue.pop_next() {
            Some(video) => {
                let video_id = video.id;
                let resume_at = self.resume_offset_for(&video);
                self.switch_video(Some(video));
                self.emit(SessionCommand::PlayVideo {
                    video_id,
                    resume_at,
                });
                AdvanceOutcome::Playing {
                    video_id,
                    resume_at,
                }
            }
            None => {
                self.emit(SessionCommand::Pause);
                AdvanceOutcome::Idle
            }
        };
        self.publish();
        Ok(outcome)
    }

    /// Stored position of `video` when it is strictly inside `(0, duration - margin)`.
    fn resume_offset_for(&self, video: &Video) -> Option<u32> {
        let stored = self
            .state
            .remembered
            .get(&video.id)
            .copied()
            .or(video.playback_position.map(f64::from))?;
        resume_offset(stored, video.duration(), self.settings.resume_margin)
    }

    fn control(&mut self, action: RemoteControl) -> Result<CommandDelivery, SessionError> {
        let state = &self.state;
        let command = match action {
            RemoteControl::PlayPause => SessionCommand::PlayPause {
                video_id: state.current.as_ref().map(|v| v.id),
                position: state.position_seconds.map(|p| p as u32),
            },
            RemoteControl::SeekRelative(seconds) => SessionCommand::SeekRelative(seconds),
            RemoteControl::ChangeRate { increase } => {
                if !state.supports_rate_change {
                    return Err(SessionError::Unsupported("rate change"));
                }
                SessionCommand::ChangeRate { increase }
            }
            RemoteControl::ChangeVolume { increase } => {
                if !state.supports_volume_change {
                    return Err(SessionError::Unsupported("volume change"));
                }
                SessionCommand::ChangeVolume { increase }
            }
            RemoteControl::ToggleSubtitles => {
                if !state.supports_subtitles {
                    return Err(SessionError::Unsupported("subtitles"));
                }
                SessionCommand::ToggleSubtitles
            }
            RemoteControl::Watch => SessionCommand::Watch,
            RemoteControl::Skip => SessionCommand::Skip,
        };
        Ok(self.emit(command))
    }

    async fn add_shuffled(&mut self, minutes: u64) -> Result<Vec<VideoId>, SessionError> {
        let Some(folder_id) = self.state.selected_folder_id else {
            tracing::info!(session_id = %self.id, "no folder selected; shuffle add ignored");
            return Ok(Vec::new());
        };
        let mut request = ShuffleRequest::new(
            self.user_id,
            ShuffleScope::Folder { id: folder_id },
            Duration::from_secs(minutes.saturating_mul(60)),
        );
        request.exclude.extend(self.state.queue.ids());
        request.exclude.extend(self.state.current.as_ref().map(|v| v.id));

        let catalog = self.catalog.clone();
        let videos = self
            .catalog_call(build_playlist(catalog.as_ref(), &request))
            .await?;
        let added = self.state.queue.enqueue_absent(videos);
        tracing::info!(
            session_id = %self.id,
            folder_id,
            minutes,
            added = added.len(),
            "shuffled videos added to queue"
        );
        self.publish();
        Ok(added)
    }

    fn emit(&self, command: SessionCommand) -> CommandDelivery {
        match self.commands.try_send(command) {
            Ok(()) => CommandDelivery::Delivered,
            Err(TrySendError::Full(command)) => {
                tracing::warn!(session_id = %self.id, ?command, "command channel full; dropping");
                CommandDelivery::Dropped
            }
            Err(TrySendError::Closed(command)) => {
                tracing::debug!(session_id = %self.id, ?command, "no client attached; dropping");
                CommandDelivery::Dropped
            }
        }
    }

    fn snapshot(&self) -> SessionStatus {
        let state = &self.state;
        SessionStatus {
            session_id: self.id.to_string(),
            user_id: self.user_id,
            title: state.title.clone(),
            message: state.message.clone(),
            video_id: state.current.as_ref().map(|v| v.id),
            video_title: state.current.as_ref().map(|v| v.title.clone()),
            position_seconds: state.position_seconds,
            loaded_fraction: state.loaded_fraction,
            player_state: state.player_state,
            rate: state.rate,
            volume: state.volume,
            quality: state.quality.clone(),
            provider: state.provider.clone(),
            subtitles: state.subtitles.clone(),
            selected_folder_id: state.selected_folder_id,
            supports_rate_change: state.supports_rate_change,
            supports_volume_change: state.supports_volume_change,
            supports_subtitles: state.supports_subtitles,
            queue: state.queue.ids(),
            queue_duration_seconds: state.queue.total_duration().as_secs(),
        }
    }

    /// Publish a snapshot and notify listeners when anything observable changed.
    fn publish(&self) {
        let next = self.snapshot();
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            self.events.session_changed(&self.id);
        }
    }
}

/// `stored` rounded down, when `0 < stored < duration - margin`.
pub fn resume_offset(stored: f64, duration: Duration, margin: Duration) -> Option<u32> {
    let limit = duration.as_secs_f64() - margin.as_secs_f64();
    if stored > 0.0 && stored < limit {
        Some(stored as u32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::MemoryCatalog;

    const USER: i64 = 1;

    struct Fixture {
        catalog: Arc<MemoryCatalog>,
        handle: SessionHandle,
        commands: mpsc::Receiver<SessionCommand>,
    }

    fn fixture_with(settings: SessionSettings) -> Fixture {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.add_folder(1, USER, None);
        catalog.add_subscription(1, USER, Some(1));
        for id in 1..=5 {
            catalog.add_video(id, 1, Some(10), id);
        }
        let (handle, commands) = spawn_session(
            "sess:test".to_string(),
            USER,
            catalog.clone(),
            EventBus::new(),
            settings,
            CancellationToken::new(),
        );
        Fixture {
            catalog,
            handle,
            commands,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(SessionSettings::default())
    }

    fn video(fx: &Fixture, id: VideoId) -> Video {
        fx.catalog.video(id).expect("seeded video")
    }

    #[test]
    fn resume_offset_respects_bounds() {
        let duration = Duration::from_secs(100);
        let margin = Duration::from_secs(10);
        assert_eq!(resume_offset(0.0, duration, margin), None);
        assert_eq!(resume_offset(-5.0, duration, margin), None);
        assert_eq!(resume_offset(90.0, duration, margin), None);
        assert_eq!(resume_offset(95.0, duration, margin), None);
        assert_eq!(resume_offset(42.7, duration, margin), Some(42));
        assert_eq!(resume_offset(5.0, Duration::ZERO, margin), None);
    }

    #[test]
    fn command_frames_carry_single_instruction() {
        let frame = SessionCommand::ChangeRate { increase: false }.to_frame();
        assert_eq!(frame.should_change_rate, Some(-1));
        let frame = SessionCommand::PlayVideo {
            video_id: 9,
            resume_at: Some(30),
        }
        .to_frame();
        assert_eq!(frame.next_video_id, Some(9));
        assert_eq!(frame.playback_position, Some(30));
        assert_eq!(SessionCommand::Pause.to_frame().should_pause, Some(true));
    }

    #[tokio::test]
    async fn advance_on_empty_queue_requests_pause() {
        let mut fx = fixture();
        let outcome = fx.handle.advance_to_next().await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Idle);
        assert_eq!(fx.commands.try_recv().unwrap(), SessionCommand::Pause);
        assert!(fx.commands.try_recv().is_err());
        assert_eq!(fx.handle.status().video_id, None);
    }

    #[tokio::test]
    async fn advance_plays_queue_head() {
        let mut fx = fixture();
        fx.handle
            .enqueue_videos(vec![video(&fx, 2), video(&fx, 3)])
            .await
            .unwrap();
        let outcome = fx.handle.advance_to_next().await.unwrap();
        assert_eq!(
            outcome,
            AdvanceOutcome::Playing {
                video_id: 2,
                resume_at: None
            }
        );
        assert_eq!(
            fx.commands.try_recv().unwrap(),
            SessionCommand::PlayVideo {
                video_id: 2,
                resume_at: None
            }
        );
        let status = fx.handle.status();
        assert_eq!(status.video_id, Some(2));
        assert_eq!(status.queue, vec![3]);
    }

    #[tokio::test]
    async fn advance_without_listener_fails_and_keeps_queue() {
        let fx = fixture();
        let Fixture {
            handle, commands, ..
        } = fx;
        drop(commands);
        handle.enqueue_videos(vec![Video {
            id: 77,
            subscription_id: 1,
            title: "x".to_string(),
            duration_secs: Some(60),
            published_at: None,
            watched: false,
            playback_position: None,
        }])
        .await
        .unwrap();
        let err = handle.advance_to_next().await.unwrap_err();
        assert_eq!(err, SessionError::NoPlaybackListener);
        assert_eq!(handle.status().queue, vec![77]);
    }

    #[tokio::test]
    async fn mark_watched_rejects_stale_and_missing_current() {
        let fx = fixture();
        let err = fx.handle.mark_watched_and_advance(1).await.unwrap_err();
        assert_eq!(err, SessionError::NoCurrentVideo);

        fx.handle.set_video(Some(video(&fx, 1))).await.unwrap();
        let err = fx.handle.mark_watched_and_advance(2).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::StaleVideo {
                current: 1,
                requested: 2
            }
        );
        assert!(!fx.catalog.video(2).unwrap().watched);
        assert!(!fx.catalog.video(1).unwrap().watched);
    }

    #[tokio::test]
    async fn mark_watched_persists_and_advances() {
        let mut fx = fixture();
        fx.handle.set_video(Some(video(&fx, 1))).await.unwrap();
        fx.handle.enqueue_videos(vec![video(&fx, 4)]).await.unwrap();

        let outcome = fx.handle.mark_watched_and_advance(1).await.unwrap();
        assert!(matches!(outcome, AdvanceOutcome::Playing { video_id: 4, .. }));
        assert!(fx.catalog.video(1).unwrap().watched);
        assert_eq!(fx.handle.status().video_id, Some(4));
        assert!(matches!(
            fx.commands.try_recv().unwrap(),
            SessionCommand::PlayVideo { video_id: 4, .. }
        ));
    }

    #[tokio::test]
    async fn catalog_failure_surfaces_as_catalog_error() {
        let fx = fixture();
        fx.handle.set_video(Some(video(&fx, 1))).await.unwrap();
        fx.catalog.fail_next(1);
        let err = fx.handle.mark_watched_and_advance(1).await.unwrap_err();
        assert!(matches!(err, SessionError::Catalog(_)));
        assert_eq!(fx.handle.status().video_id, Some(1));
    }

    #[tokio::test]
    async fn frames_apply_only_present_fields() {
        let fx = fixture();
        fx.handle
            .apply_frame(ClientFrame {
                title: Some("Player".to_string()),
                volume: Some(40),
                rate: Some(1.5),
                video_id: Some(Some(3)),
                position_seconds: Some(Some(12.0)),
                ..ClientFrame::default()
            })
            .await
            .unwrap();
        fx.handle
            .apply_frame(ClientFrame {
                quality: Some("hd720".to_string()),
                ..ClientFrame::default()
            })
            .await
            .unwrap();

        let status = fx.handle.status();
        assert_eq!(status.title.as_deref(), Some("Player"));
        assert_eq!(status.volume, Some(40));
        assert_eq!(status.rate, Some(1.5));
        assert_eq!(status.quality.as_deref(), Some("hd720"));
        assert_eq!(status.video_id, Some(3));
        assert_eq!(status.position_seconds, Some(12.0));

        fx.handle
            .apply_frame(ClientFrame {
                video_id: Some(None),
                ..ClientFrame::default()
            })
            .await
            .unwrap();
        let status = fx.handle.status();
        assert_eq!(status.video_id, None);
        assert_eq!(status.position_seconds, None);
    }

    #[tokio::test]
    async fn pop_next_frame_returns_head_with_resume_offset() {
        let fx = fixture();
        let mut resumable = video(&fx, 2);
        resumable.playback_position = Some(120);
        resumable.duration_secs = Some(600);
        fx.handle.enqueue_videos(vec![resumable]).await.unwrap();

        let outcome = fx
            .handle
            .apply_frame(ClientFrame::action(SessionAction::PopNext))
            .await
            .unwrap();
        assert_eq!(
            outcome.popped,
            Some(NextVideo {
                video_id: 2,
                resume_at: Some(120)
            })
        );
        assert!(fx.handle.status().queue.is_empty());

        let outcome = fx
            .handle
            .apply_frame(ClientFrame::action(SessionAction::PopNext))
            .await
            .unwrap();
        assert_eq!(outcome.popped, None);
    }

    #[tokio::test]
    async fn unknown_video_is_reported_without_rejecting_frame() {
        let fx = fixture();
        let outcome = fx
            .handle
            .apply_frame(ClientFrame {
                video_id: Some(Some(999)),
                title: Some("t".to_string()),
                ..ClientFrame::default()
            })
            .await
            .unwrap();
        assert_eq!(outcome.unknown_video, Some(999));
        assert_eq!(fx.handle.status().title.as_deref(), Some("t"));
    }

    #[tokio::test]
    async fn ended_state_auto_advances_once() {
        let mut fx = fixture();
        fx.handle.set_video(Some(video(&fx, 1))).await.unwrap();
        fx.handle.enqueue_videos(vec![video(&fx, 5)]).await.unwrap();

        let ended = ClientFrame {
            player_state: Some(PlayerState::Ended),
            ..ClientFrame::default()
        };
        let outcome = fx.handle.apply_frame(ended.clone()).await.unwrap();
        assert!(matches!(
            outcome.advanced,
            Some(AdvanceOutcome::Playing { video_id: 5, .. })
        ));
        assert!(matches!(
            fx.commands.try_recv().unwrap(),
            SessionCommand::PlayVideo { video_id: 5, .. }
        ));

        // repeated "ended" telemetry is not a new transition
        let outcome = fx.handle.apply_frame(ended).await.unwrap();
        assert_eq!(outcome.advanced, None);
        assert!(fx.commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn auto_advance_can_be_disabled() {
        let mut fx = fixture_with(SessionSettings {
            auto_advance_on_end: false,
            ..SessionSettings::default()
        });
        fx.handle.enqueue_videos(vec![video(&fx, 5)]).await.unwrap();
        let outcome = fx
            .handle
            .apply_frame(ClientFrame {
                player_state: Some(PlayerState::Error),
                ..ClientFrame::default()
            })
            .await
            .unwrap();
        assert_eq!(outcome.advanced, None);
        assert!(fx.commands.try_recv().is_err());
        assert_eq!(fx.handle.status().queue, vec![5]);
    }

    #[tokio::test]
    async fn switching_videos_remembers_position() {
        let fx = fixture();
        fx.handle
            .apply_frame(ClientFrame {
                video_id: Some(Some(1)),
                ..ClientFrame::default()
            })
            .await
            .unwrap();
        fx.handle
            .apply_frame(ClientFrame {
                position_seconds: Some(Some(200.0)),
                ..ClientFrame::default()
            })
            .await
            .unwrap();
        fx.handle.set_video(Some(video(&fx, 2))).await.unwrap();

        let offset = fx.handle.resume_offset_for(video(&fx, 1)).await.unwrap();
        assert_eq!(offset, Some(200));
    }

    #[tokio::test]
    async fn capability_flags_gate_commands() {
        let mut fx = fixture();
        let err = fx
            .handle
            .control(RemoteControl::ChangeVolume { increase: true })
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::Unsupported("volume change"));

        fx.handle
            .apply_frame(ClientFrame {
                supports_volume_change: Some(true),
                ..ClientFrame::default()
            })
            .await
            .unwrap();
        let delivery = fx
            .handle
            .control(RemoteControl::ChangeVolume { increase: true })
            .await
            .unwrap();
        assert_eq!(delivery, CommandDelivery::Delivered);
        assert_eq!(
            fx.commands.try_recv().unwrap(),
            SessionCommand::ChangeVolume { increase: true }
        );
    }

    #[tokio::test]
    async fn commands_without_listener_are_dropped() {
        let fx = fixture();
        let Fixture {
            handle, commands, ..
        } = fx;
        drop(commands);
        let delivery = handle.control(RemoteControl::Skip).await.unwrap();
        assert_eq!(delivery, CommandDelivery::Dropped);
    }

    #[tokio::test]
    async fn full_command_channel_drops_without_blocking() {
        let fx = fixture_with(SessionSettings {
            command_buffer: 1,
            ..SessionSettings::default()
        });
        assert_eq!(
            fx.handle.control(RemoteControl::Watch).await.unwrap(),
            CommandDelivery::Delivered
        );
        assert_eq!(
            fx.handle.control(RemoteControl::Skip).await.unwrap(),
            CommandDelivery::Dropped
        );
    }

    #[tokio::test]
    async fn add_shuffled_uses_selected_folder_and_excludes_queue() {
        let fx = fixture();
        assert!(fx.handle.add_shuffled(30).await.unwrap().is_empty());

        fx.handle.select_folder(Some(1)).await.unwrap();
        fx.handle.set_video(Some(video(&fx, 1))).await.unwrap();
        fx.handle.enqueue_videos(vec![video(&fx, 2)]).await.unwrap();

        let added = fx.handle.add_shuffled(20).await.unwrap();
        assert_eq!(added, vec![3, 4]);
        assert_eq!(fx.handle.status().queue, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn try_enqueue_if_absent_is_idempotent() {
        let fx = fixture();
        assert!(fx.handle.try_enqueue_if_absent(video(&fx, 1)).await.unwrap());
        assert!(!fx.handle.try_enqueue_if_absent(video(&fx, 1)).await.unwrap());
        assert_eq!(fx.handle.status().queue, vec![1]);
        assert!(fx.handle.dequeue(1).await.unwrap());
        assert_eq!(fx.handle.clear_queue().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn enqueue_absent_keeps_ids_unique_under_concurrent_calls() {
        let fx = fixture();
        let batch = vec![video(&fx, 1), video(&fx, 2)];
        let (a, b) = tokio::join!(
            fx.handle.enqueue_absent(batch.clone()),
            fx.handle.enqueue_absent(batch)
        );
        let mut added = a.unwrap();
        added.extend(b.unwrap());
        added.sort_unstable();
        assert_eq!(added, vec![1, 2]);
        assert_eq!(fx.handle.status().queue, vec![1, 2]);
    }

    #[tokio::test]
    async fn closed_session_rejects_requests() {
        let fx = fixture();
        fx.handle.close();
        tokio::task::yield_now().await;
        let err = fx.handle.pop_next().await.unwrap_err();
        assert_eq!(err, SessionError::SessionClosed);
        assert!(fx.handle.is_closed());
    }

    #[tokio::test]
    async fn mutations_publish_session_changed_events() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let catalog = Arc::new(MemoryCatalog::new());
        let (handle, _commands) = spawn_session(
            "sess:events".to_string(),
            USER,
            catalog,
            events,
            SessionSettings::default(),
            CancellationToken::new(),
        );
        handle
            .apply_frame(ClientFrame {
                title: Some("x".to_string()),
                ..ClientFrame::default()
            })
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            crate::events::HubEvent::SessionChanged {
                session_id: "sess:events".to_string()
            }
        );
    }
}
