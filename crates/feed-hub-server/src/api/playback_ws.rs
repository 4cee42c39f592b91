//! Playback client websocket.
//!
//! Each connection gets its own session. Text frames carry JSON [`ClientFrame`]s; replies
//! and commands go back as JSON [`ServerFrame`]s.

use actix::prelude::*;
use actix_web::{Error, HttpRequest, HttpResponse, get, web};
use actix_web_actors::ws;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use feed_hub_types::{ClientFrame, ServerFrame};

use crate::live_sync::{Connection, FrameSink, ProtocolError};
use crate::models::PlaybackWsQuery;
use crate::state::AppState;

/// Outbound messages to a playback websocket.
#[derive(Message)]
#[rtype(result = "()")]
pub enum PlaybackOutbound {
    Frame(String),
    Close,
}

#[async_trait]
impl FrameSink for Recipient<PlaybackOutbound> {
    async fn send(&mut self, frame: &ServerFrame) -> Result<(), ProtocolError> {
        if !self.connected() {
            return Err(ProtocolError::Transport("websocket closed".to_string()));
        }
        let payload = serde_json::to_string(frame)
            .map_err(|err| ProtocolError::Transport(err.to_string()))?;
        self.do_send(PlaybackOutbound::Frame(payload));
        Ok(())
    }

    async fn close(&mut self) {
        if self.connected() {
            self.do_send(PlaybackOutbound::Close);
        }
    }
}

pub struct PlaybackWs {
    state: web::Data<AppState>,
    user_id: i64,
    cancel: CancellationToken,
    inbound: Option<mpsc::UnboundedSender<Result<ClientFrame, ProtocolError>>>,
}

impl PlaybackWs {
    pub fn new(state: web::Data<AppState>, user_id: i64) -> Self {
        let cancel = state.shutdown.child_token();
        Self {
            state,
            user_id,
            cancel,
            inbound: None,
        }
    }

    fn forward(&self, frame: Result<ClientFrame, ProtocolError>) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(frame);
        }
    }
}

impl Actor for PlaybackWs {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inbound = Some(tx);
        let connection = Connection::open(&self.state.registry, self.user_id, &self.cancel);
        let sink = ctx.address().recipient::<PlaybackOutbound>();
        actix_web::rt::spawn(async move {
            let _ = connection.serve(rx, sink).await;
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.inbound.take();
        self.cancel.cancel();
    }
}

impl Handler<PlaybackOutbound> for PlaybackWs {
    type Result = ();

    fn handle(&mut self, msg: PlaybackOutbound, ctx: &mut Self::Context) -> Self::Result {
        match msg {
            PlaybackOutbound::Frame(text) => ctx.text(text),
            PlaybackOutbound::Close => {
                ctx.close(None);
                ctx.stop();
            }
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for PlaybackWs {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match item {
            Ok(msg) => msg,
            Err(err) => {
                tracing::debug!(error = %err, "playback websocket protocol error");
                ctx.stop();
                return;
            }
        };
        match msg {
            ws::Message::Text(text) => {
                let frame = serde_json::from_str::<ClientFrame>(&text)
                    .map_err(|err| ProtocolError::Decode(err.to_string()));
                self.forward(frame);
            }
            ws::Message::Ping(bytes) => ctx.pong(&bytes),
            ws::Message::Pong(_) => {}
            ws::Message::Close(_) => ctx.stop(),
            ws::Message::Binary(_) => {}
            ws::Message::Continuation(_) => ctx.stop(),
            ws::Message::Nop => {}
        }
    }
}

#[get("/playback/ws")]
/// Attach a playback client; the session lives as long as the websocket.
pub async fn playback_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<PlaybackWsQuery>,
) -> Result<HttpResponse, Error> {
    ws::start(PlaybackWs::new(state, query.user_id), &req, stream)
}
