//! Keepalive behaviour of the `/ws` endpoint against a raw TCP client that
//! speaks just enough of the WebSocket framing to join a conversation.
#![cfg(feature = "cli")]

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use storefront_chat::build_router;
use storefront_chat::chat::TurnConfig;
use storefront_chat::gateway::{Generation, GenerationFailed, GenerationRequest, LanguageModel};
use storefront_chat::hub::{LivenessConfig, OutboundEvent};
use storefront_chat::shared_state::{SharedSystemState, UnifiedAppState};
use storefront_chat::store::ChatDatabase;

struct NoModel;

#[async_trait]
impl LanguageModel for NoModel {
    fn model_name(&self) -> &str {
        "none"
    }

    async fn generate(&self, _request: GenerationRequest) -> Result<Generation, GenerationFailed> {
        Err(GenerationFailed::new("not used"))
    }
}

const MASK: [u8; 4] = [0x12, 0x34, 0x56, 0x78];

async fn start_server(liveness: LivenessConfig) -> (Arc<SharedSystemState>, SocketAddr) {
    let database = Arc::new(ChatDatabase::new_in_memory().unwrap());
    let shared = Arc::new(SharedSystemState::with_liveness(
        database,
        Arc::new(NoModel),
        TurnConfig::default(),
        liveness,
    ));
    let router = build_router(UnifiedAppState::new(Arc::clone(&shared)), Duration::from_secs(5));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (shared, addr)
}

async fn open_socket(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /ws HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
        addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    assert!(String::from_utf8_lossy(&head).starts_with("HTTP/1.1 101"));
    stream
}

/// Client frames must be masked; payloads here always fit the 7-bit length.
fn client_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() < 126);
    let mut frame = vec![0x80 | opcode, 0x80 | payload.len() as u8];
    frame.extend_from_slice(&MASK);
    frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ MASK[i % 4]));
    frame
}

async fn join(stream: &mut TcpStream, conversation_id: &str) {
    let event = serde_json::json!({"type": "join_conversation", "conversationId": conversation_id});
    stream
        .write_all(&client_frame(0x1, event.to_string().as_bytes()))
        .await
        .unwrap();
}

async fn wait_for_registrations(shared: &SharedSystemState, expected: usize) {
    for _ in 0..100 {
        if shared.hub.registration_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected {} registration(s), have {}", expected, shared.hub.registration_count());
}

fn typing(conversation_id: &str) -> OutboundEvent {
    OutboundEvent::TypingStart { conversation_id: conversation_id.to_string() }
}

#[tokio::test]
async fn silent_peer_is_disconnected_and_unregistered() {
    let (shared, addr) = start_server(LivenessConfig {
        ping_interval: Duration::from_millis(100),
        idle_timeout: Duration::from_millis(400),
    })
    .await;

    // Kept open but never read from or written to after the join.
    let mut silent = open_socket(addr).await;
    join(&mut silent, "C").await;
    wait_for_registrations(&shared, 1).await;

    tokio::time::sleep(Duration::from_millis(1000)).await;

    assert_eq!(shared.hub.registration_count(), 0);
    assert_eq!(shared.hub.broadcast("C", &typing("C"), None), 0);
    assert_eq!(shared.hub.sweep(), 0);
    drop(silent);
}

#[tokio::test]
async fn peer_that_keeps_answering_stays_registered() {
    let (shared, addr) = start_server(LivenessConfig {
        ping_interval: Duration::from_millis(100),
        idle_timeout: Duration::from_millis(400),
    })
    .await;

    let mut client = open_socket(addr).await;
    join(&mut client, "C").await;
    wait_for_registrations(&shared, 1).await;

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.write_all(&client_frame(0xA, b"")).await.unwrap();
    }

    assert_eq!(shared.hub.sweep(), 0);
    assert_eq!(shared.hub.registration_count(), 1);
    assert_eq!(shared.hub.broadcast("C", &typing("C"), None), 1);
}
