//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use axum_extra::{headers::UserAgent, TypedHeader};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{ConnId, GameError, RoomCommand, RoomHandle};
use crate::matchmaking::DeviceClass;
use crate::util::rate_limit::PlayerRateLimiter;
use crate::ws::codec::{Codec, CodecError};
use crate::ws::protocol::ServerEvent;

/// Display names longer than this are truncated
pub const MAX_NAME_CHARS: usize = 24;

/// Per-connection outbound queue depth
const OUTBOUND_QUEUE: usize = 256;

/// How high-frequency events are delivered to a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundFormat {
    #[default]
    Binary,
    Json,
}

/// Query parameters for WebSocket connection
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    pub name: Option<String>,
    /// `mobile` or `pc`
    pub device_type: Option<String>,
    #[serde(default)]
    pub format: OutboundFormat,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    user_agent: Option<TypedHeader<UserAgent>>,
    State(state): State<AppState>,
) -> Response {
    let affinity = DeviceClass::resolve(
        query.device_type.as_deref(),
        user_agent.as_ref().map(|TypedHeader(ua)| ua.as_str()),
    );
    let name = display_name(query.name.as_deref());
    let format = query.format;

    let frame_limit = usize::try_from(state.config.max_frame_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(1);

    ws.max_message_size(frame_limit)
        .on_upgrade(move |socket| handle_socket(socket, name, affinity, format, state))
}

/// Trimmed, length-capped display name
pub fn display_name(raw: Option<&str>) -> String {
    let name: String = raw
        .map(str::trim)
        .unwrap_or_default()
        .chars()
        .take(MAX_NAME_CHARS)
        .collect();

    if name.is_empty() {
        "Unknown".to_string()
    } else {
        name
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    name: String,
    affinity: DeviceClass,
    format: OutboundFormat,
    state: AppState,
) {
    let conn: ConnId = Uuid::new_v4();
    info!(conn_id = %conn, name = %name, affinity = %affinity, "New WebSocket connection");

    let (outbox, events) = mpsc::channel(OUTBOUND_QUEUE);
    let room = match state.rooms.join(conn, affinity, name, outbox) {
        Ok(room) => room,
        Err(e) => {
            error!(conn_id = %conn, error = %e, "Failed to place connection in a room");
            return;
        }
    };
    info!(conn_id = %conn, room_id = %room.id, "Connection assigned to room");

    let (ws_sink, ws_stream) = socket.split();
    let writer = tokio::spawn(write_events(
        conn,
        state.codec.clone(),
        format,
        ws_sink,
        events,
    ));

    read_intents(conn, &state.codec, &room, ws_stream).await;

    state.rooms.remove_member(conn);
    writer.abort();

    info!(conn_id = %conn, "WebSocket connection closed");
}

/// Writer task: room events -> WebSocket
async fn write_events(
    conn: ConnId,
    codec: std::sync::Arc<Codec>,
    format: OutboundFormat,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<ServerEvent>,
) {
    while let Some(event) = events.recv().await {
        let message = match encode_event(&codec, format, &event) {
            Ok(message) => message,
            Err(e) => {
                error!(conn_id = %conn, error = %e, "Failed to encode event");
                continue;
            }
        };

        if let Err(e) = ws_sink.send(message).await {
            debug!(conn_id = %conn, error = %e, "WebSocket send failed");
            break;
        }
    }
    debug!(conn_id = %conn, "Outbound queue closed");
}

/// Reader loop: WebSocket -> room mailbox
async fn read_intents(
    conn: ConnId,
    codec: &Codec,
    room: &RoomHandle,
    mut ws_stream: SplitStream<WebSocket>,
) {
    let rate_limiter = PlayerRateLimiter::new();

    while let Some(result) = ws_stream.next().await {
        let decoded = match result {
            Ok(Message::Text(text)) => codec.decode_text(&text),
            Ok(Message::Binary(data)) => codec.decode_binary(Bytes::from(data)),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                info!(conn_id = %conn, "Client initiated close");
                break;
            }
            Err(e) => {
                debug!(conn_id = %conn, error = %e, "WebSocket error");
                break;
            }
        };

        if !rate_limiter.check_input() {
            debug!(conn_id = %conn, "Rate limited input message");
            continue;
        }

        match decoded {
            Ok(intent) => {
                if room.send(RoomCommand::Intent { conn, intent }).is_err() {
                    warn!(conn_id = %conn, room_id = %room.id, "Room is gone, closing connection");
                    break;
                }
            }
            Err(e) => {
                let e = GameError::from(e);
                warn!(conn_id = %conn, error = %e, "Dropping malformed message");
            }
        }
    }
}

/// Pick the wire form of an event for this connection
pub fn encode_event(
    codec: &Codec,
    format: OutboundFormat,
    event: &ServerEvent,
) -> Result<Message, CodecError> {
    if format == OutboundFormat::Binary {
        if let Some(frame) = codec.encode_event_binary(event) {
            return Ok(Message::Binary(frame?.to_vec()));
        }
    }
    Ok(Message::Text(codec.encode_event_json(event)?))
}
