//! # Readaloud WebSocket Handler
//!
//! Serves the Edge readaloud endpoint. Each connection becomes one
//! `ReadaloudWebSocket` actor owning one [`Session`].
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: client upgrades `GET /consumer/speech/synthesize/readaloud/edge/v1?ConnectionId=...`
//! 2. **Handshake**: client sends `Path: speech.config` and `Path: ssml` frames (either order)
//! 3. **Synthesis**: backend fetch + transcoding; no inbound frame is processed meanwhile
//! 4. **Response**: server sends turn.start (text), audio (binary), turn.end (text)
//! 5. **Close**: server closes the connection; one turn per connection
//!
//! Any error closes the connection without a complete response. The client
//! treats the missing turn.end as its failure signal.

use crate::error::{AppError, AppResult, SessionError};
use crate::protocol::{InboundFrame, WireMessage};
use crate::session::{Session, Turn};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{http::header, web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the server pings an idle client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Silence after which a client is considered gone.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Query parameters of the upgrade request. `ConnectionId` only feeds logs;
/// the other parameters real clients send (`TrustedClientToken`,
/// `Sec-MS-GEC`, ...) are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct ReadaloudQuery {
    #[serde(rename = "ConnectionId")]
    pub connection_id: Option<String>,
}

/// WebSocket actor driving one readaloud session.
pub struct ReadaloudWebSocket {
    session: Session,
    app_state: web::Data<AppState>,
    last_heartbeat: Instant,
}

impl ReadaloudWebSocket {
    pub fn new(connection_id: String, app_state: web::Data<AppState>) -> Self {
        Self {
            session: Session::new(connection_id),
            app_state,
            last_heartbeat: Instant::now(),
        }
    }

    fn handle_frame(&mut self, frame: InboundFrame, ctx: &mut ws::WebsocketContext<Self>) {
        match self.session.observe(&frame) {
            Ok(Some(turn)) => self.start_turn(turn, ctx),
            Ok(None) => {}
            Err(err) => self.abort(None, err, ctx),
        }
    }

    /// Run synthesis for the turn.
    ///
    /// `ctx.wait` holds back every other event of this actor (including
    /// inbound frames) until the future resolves, which keeps the session
    /// strictly sequential.
    fn start_turn(&mut self, turn: Turn, ctx: &mut ws::WebsocketContext<Self>) {
        info!(
            connection_id = %self.session.connection_id(),
            request_id = %turn.request_id,
            voice = %turn.speak.voice_name,
            rate = %turn.speak.prosody_rate,
            text = %turn.speak.text,
            "Handshake complete, synthesizing"
        );

        let synthesizer = self.app_state.synthesizer.clone();
        let work = async move {
            let result = synthesizer.render(&turn.speak).await;
            (turn, result)
        };

        ctx.wait(work.into_actor(self).map(|(turn, result), act, ctx| {
            match result.and_then(|audio| turn.encode(audio)) {
                Ok(messages) => act.respond(&turn, messages, ctx),
                Err(err) => act.abort(Some(&turn.request_id), err, ctx),
            }
        }));
    }

    fn respond(&mut self, turn: &Turn, messages: Vec<WireMessage>, ctx: &mut ws::WebsocketContext<Self>) {
        self.session.begin_response();

        let mut audio_bytes = 0;
        for message in messages {
            match message {
                WireMessage::Text(text) => ctx.text(text),
                WireMessage::Binary(bytes) => {
                    audio_bytes = bytes.len();
                    ctx.binary(bytes);
                }
            }
        }

        self.app_state.metrics.turn_completed();
        info!(
            connection_id = %self.session.connection_id(),
            request_id = %turn.request_id,
            audio_frame_bytes = audio_bytes,
            "Turn sent"
        );

        self.session.close();
        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }

    fn abort(&mut self, request_id: Option<&str>, err: SessionError, ctx: &mut ws::WebsocketContext<Self>) {
        error!(
            connection_id = %self.session.connection_id(),
            request_id = request_id.unwrap_or("-"),
            stage = err.stage(),
            error = %err,
            "Session aborted"
        );

        self.app_state.metrics.session_failed();
        self.session.close();
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Error,
            description: Some(err.stage().to_string()),
        }));
        ctx.stop();
    }
}

impl Actor for ReadaloudWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.app_state.metrics.session_opened();
        info!(connection_id = %self.session.connection_id(), "Client connected");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection_id = %act.session.connection_id(), "Heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let state = self.session.state().as_str().to_string();
        if self.session.close() {
            info!(
                connection_id = %self.session.connection_id(),
                state = %state,
                config_received = self.session.config_received(),
                ssml_received = self.session.ssml_received(),
                "Connection ended before a turn completed"
            );
        }

        self.app_state.metrics.session_closed();
        info!(
            connection_id = %self.session.connection_id(),
            duration_ms = (chrono::Utc::now() - self.session.created_at()).num_milliseconds(),
            "Client disconnected"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ReadaloudWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_frame(InboundFrame::parse(&text), ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                match InboundFrame::parse_binary(&data) {
                    Some(frame) => self.handle_frame(frame, ctx),
                    None => debug!(
                        connection_id = %self.session.connection_id(),
                        bytes = data.len(),
                        "Ignoring undecodable binary frame"
                    ),
                }
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.session.connection_id(), reason = ?reason, "Client closed connection");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection_id = %self.session.connection_id(), "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.session.connection_id(), error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// Upgrade handler for the readaloud endpoint.
///
/// Applies the configured origin policy, then hands the connection to a new
/// `ReadaloudWebSocket` actor with the configured inbound frame limit.
/// Failed upgrades never reach a session.
pub async fn readaloud_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let query = web::Query::<ReadaloudQuery>::from_query(req.query_string())
        .map(|query| query.into_inner())
        .unwrap_or_default();

    let connection_id = query
        .connection_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());

    if !app_state.config.upgrade.permits(origin) {
        let origin = origin.unwrap_or_default().to_string();
        warn!(connection_id = %connection_id, origin = %origin, "Rejected websocket upgrade");
        return Err(AppError::OriginRejected(origin));
    }

    info!(
        connection_id = %connection_id,
        peer_addr = ?req.connection_info().peer_addr(),
        "New readaloud connection request"
    );

    let max_frame_bytes = app_state.config.upgrade.max_frame_bytes;
    let websocket = ReadaloudWebSocket::new(connection_id.clone(), app_state);
    ws::WsResponseBuilder::new(websocket, &req, stream)
        .frame_size(max_frame_bytes)
        .start()
        .map_err(|err| {
            warn!(connection_id = %connection_id, error = %err, "Websocket upgrade failed");
            AppError::UpgradeFailed(err.to_string())
        })
}
