//! Server-sent event streams.

use std::collections::VecDeque;
use std::time::Instant;

use actix_web::http::header;
use actix_web::web::Bytes;
use actix_web::{Error, HttpResponse, Responder, get, web};
use futures_util::{Stream, stream::unfold};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Duration, Interval, MissedTickBehavior};

use crate::events::{HubEvent, LogEvent};
use crate::models::SessionsListResponse;
use crate::state::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(15);

pub(crate) fn sse_event(event: &str, data: &str) -> Bytes {
    let mut payload = String::new();
    payload.push_str("event: ");
    payload.push_str(event);
    payload.push('\n');
    for line in data.lines() {
        payload.push_str("data: ");
        payload.push_str(line);
        payload.push('\n');
    }
    payload.push('\n');
    Bytes::from(payload)
}

fn push_ping_if_needed(pending: &mut VecDeque<Bytes>, last_ping: &mut Instant) {
    if pending.is_empty() && last_ping.elapsed() >= PING_INTERVAL {
        *last_ping = Instant::now();
        pending.push_back(Bytes::from(": ping\n\n"));
    }
}

enum StreamSignal<E> {
    Tick,
    Event(Result<E, RecvError>),
}

async fn recv_signal<E: Clone>(
    receiver: &mut broadcast::Receiver<E>,
    interval: Option<&mut Interval>,
) -> StreamSignal<E> {
    match interval {
        Some(interval) => {
            tokio::select! {
                _ = interval.tick() => StreamSignal::Tick,
                result = receiver.recv() => StreamSignal::Event(result),
            }
        }
        None => StreamSignal::Event(receiver.recv().await),
    }
}

fn sse_response<S>(stream: S) -> HttpResponse
where
    S: Stream<Item = Result<Bytes, Error>> + 'static,
{
    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::CONNECTION, "keep-alive"))
        .streaming(stream)
}

fn sessions_json(state: &AppState) -> String {
    let body = SessionsListResponse {
        sessions: state.registry.list(),
    };
    serde_json::to_string(&body).unwrap_or_else(|_| "null".to_string())
}

struct SessionsStreamState {
    state: web::Data<AppState>,
    receiver: broadcast::Receiver<HubEvent>,
    interval: Interval,
    pending: VecDeque<Bytes>,
    last_sessions: Option<String>,
    last_ping: Instant,
}

struct LogsStreamState {
    receiver: broadcast::Receiver<LogEvent>,
    pending: VecDeque<Bytes>,
    last_ping: Instant,
}

#[utoipa::path(
    get,
    path = "/sessions/stream",
    responses(
        (status = 200, description = "Live sessions event stream")
    )
)]
#[get("/sessions/stream")]
/// Stream live session snapshots via server-sent events.
///
/// A `sessions` event carries the full list whenever a session is created, removed
/// or changes any observable field.
pub async fn sessions_stream(state: web::Data<AppState>) -> impl Responder {
    let initial_json = sessions_json(&state);
    let mut pending = VecDeque::new();
    pending.push_back(sse_event("sessions", &initial_json));

    let mut interval = tokio::time::interval(Duration::from_secs(5));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let receiver = state.events.subscribe();

    let stream = unfold(
        SessionsStreamState {
            state: state.clone(),
            receiver,
            interval,
            pending,
            last_sessions: Some(initial_json),
            last_ping: Instant::now(),
        },
        |mut ctx| async move {
            loop {
                if let Some(bytes) = ctx.pending.pop_front() {
                    return Some((Ok::<Bytes, Error>(bytes), ctx));
                }

                let mut refresh = false;
                match recv_signal(&mut ctx.receiver, Some(&mut ctx.interval)).await {
                    StreamSignal::Tick => {}
                    StreamSignal::Event(result) => match result {
                        Ok(HubEvent::SessionsChanged) => refresh = true,
                        Ok(HubEvent::SessionChanged { .. }) => refresh = true,
                        Ok(HubEvent::VideoChanged { .. }) => {}
                        Err(RecvError::Lagged(_)) => refresh = true,
                        Err(RecvError::Closed) => return None,
                    },
                }

                if refresh {
                    let json = sessions_json(&ctx.state);
                    if ctx.last_sessions.as_deref() != Some(json.as_str()) {
                        ctx.last_sessions = Some(json.clone());
                        ctx.pending.push_back(sse_event("sessions", &json));
                    }
                }

                push_ping_if_needed(&mut ctx.pending, &mut ctx.last_ping);
            }
        },
    );

    sse_response(stream)
}

#[utoipa::path(
    get,
    path = "/logs/stream",
    responses(
        (status = 200, description = "Server log event stream")
    )
)]
#[get("/logs/stream")]
/// Stream buffered and live log events.
pub async fn logs_stream(state: web::Data<AppState>) -> impl Responder {
    let initial = state.log_bus.snapshot();
    let initial_json = serde_json::to_string(&initial).unwrap_or_else(|_| "[]".to_string());
    let mut pending = VecDeque::new();
    pending.push_back(sse_event("logs", &initial_json));

    let receiver = state.log_bus.subscribe();
    let stream = unfold(
        LogsStreamState {
            receiver,
            pending,
            last_ping: Instant::now(),
        },
        |mut ctx| async move {
            loop {
                if let Some(bytes) = ctx.pending.pop_front() {
                    return Some((Ok::<Bytes, Error>(bytes), ctx));
                }

                match recv_signal(&mut ctx.receiver, None).await {
                    StreamSignal::Tick => {}
                    StreamSignal::Event(result) => match result {
                        Ok(event) => {
                            let json = serde_json::to_string(&event)
                                .unwrap_or_else(|_| "null".to_string());
                            ctx.pending.push_back(sse_event("log", &json));
                        }
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => return None,
                    },
                }

                push_ping_if_needed(&mut ctx.pending, &mut ctx.last_ping);
            }
        },
    );

    sse_response(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_event_prefixes_every_data_line() {
        let bytes = sse_event("sessions", "{\"a\":1}\n{\"b\":2}");
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            "event: sessions\ndata: {\"a\":1}\ndata: {\"b\":2}\n\n"
        );
    }

    #[test]
    fn ping_only_when_idle_and_due() {
        let mut pending = VecDeque::new();
        let mut last_ping = Instant::now();
        push_ping_if_needed(&mut pending, &mut last_ping);
        assert!(pending.is_empty());

        let mut last_ping = Instant::now() - PING_INTERVAL;
        push_ping_if_needed(&mut pending, &mut last_ping);
        assert_eq!(pending.len(), 1);
    }
}
