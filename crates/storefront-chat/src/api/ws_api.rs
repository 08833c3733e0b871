//! WebSocket endpoint for the live chat protocol
//!
//! Each socket gets one reader loop (this handler) and one writer task that
//! drains the connection's outbound channel and pings the peer. `send_message`
//! turns run as their own tasks so a slow model call never blocks typing or
//! join events. A peer that sends nothing, not even a pong, for the idle
//! timeout is disconnected.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::hub::{ConnectionHandle, InboundEvent, OutboundEvent};
use crate::metrics;
use crate::shared_state::{SharedSystemState, UnifiedAppState};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<UnifiedAppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.shared_state))
}

async fn handle_socket(socket: WebSocket, shared: Arc<SharedSystemState>) {
    let (handle, rx) = ConnectionHandle::new();
    let connection_id = handle.id();
    let active = shared.counters.connection_opened();
    metrics::inc_ws_connections();
    info!("WebSocket connection {} opened ({} active)", connection_id, active);

    let liveness = shared.hub.liveness();
    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_events(sink, rx, liveness.ping_interval));

    loop {
        let frame = match tokio::time::timeout(liveness.idle_timeout, stream.next()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(_) => {
                info!(
                    "WebSocket connection {} silent for {:?}, disconnecting",
                    connection_id, liveness.idle_timeout
                );
                break;
            }
        };
        handle.touch();
        match frame {
            Ok(WsMessage::Text(text)) => dispatch_event(&shared, &handle, &text),
            Ok(WsMessage::Binary(_)) => {
                handle.send(OutboundEvent::error("Binary frames are not supported"));
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("WebSocket connection {} read error: {}", connection_id, e);
                break;
            }
        }
    }

    shared.hub.unregister(connection_id);
    // Dropping the receiver marks every outstanding clone of the handle closed.
    writer.abort();
    let active = shared.counters.connection_closed();
    metrics::dec_ws_connections();
    info!("WebSocket connection {} closed ({} active)", connection_id, active);
}

async fn write_events(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut rx: UnboundedReceiver<OutboundEvent>,
    ping_interval: Duration,
) {
    let mut pings = tokio::time::interval(ping_interval);
    pings.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately.
    pings.tick().await;

    loop {
        let frame = tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(text) => WsMessage::Text(text),
                    Err(e) => {
                        warn!("Failed to serialize {} event: {}", event.event_type(), e);
                        continue;
                    }
                }
            }
            _ = pings.tick() => WsMessage::Ping(Vec::new()),
        };
        if sink.send(frame).await.is_err() {
            break;
        }
    }
}

/// Route one inbound text frame from `handle`'s connection.
pub fn dispatch_event(shared: &Arc<SharedSystemState>, handle: &ConnectionHandle, text: &str) {
    let event = match serde_json::from_str::<InboundEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            shared.counters.inc_malformed_events();
            debug!("Malformed event from connection {}: {}", handle.id(), e);
            handle.send(OutboundEvent::error("Invalid message format"));
            return;
        }
    };

    match event {
        InboundEvent::JoinConversation { conversation_id } => {
            shared.hub.register(handle, conversation_id.as_deref().unwrap_or_default());
        }
        InboundEvent::SendMessage { conversation_id, content } => {
            shared.counters.inc_messages_received();
            let orchestrator = Arc::clone(&shared.orchestrator);
            let origin = handle.clone();
            tokio::spawn(async move {
                orchestrator
                    .handle_user_message(
                        &origin,
                        conversation_id.as_deref().unwrap_or_default(),
                        content.as_deref().unwrap_or_default(),
                    )
                    .await;
            });
        }
        InboundEvent::TypingStart { conversation_id } => {
            if let Some(conversation_id) = non_blank(conversation_id) {
                shared.hub.broadcast(
                    &conversation_id,
                    &OutboundEvent::TypingStart { conversation_id: conversation_id.clone() },
                    Some(handle.id()),
                );
            }
        }
        InboundEvent::TypingStop { conversation_id } => {
            if let Some(conversation_id) = non_blank(conversation_id) {
                shared.hub.broadcast(
                    &conversation_id,
                    &OutboundEvent::TypingStop { conversation_id: conversation_id.clone() },
                    Some(handle.id()),
                );
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
