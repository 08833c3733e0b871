//! End-to-end chat turns through the dispatcher, hub, orchestrator and SQLite store,
//! with a scripted language model standing in for the HTTP gateway.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use storefront_chat::api::ws_api::dispatch_event;
use storefront_chat::chat::{TurnConfig, FALLBACK_REPLY};
use storefront_chat::gateway::{Generation, GenerationFailed, GenerationRequest, LanguageModel};
use storefront_chat::hub::{ConnectionHandle, OutboundEvent};
use storefront_chat::shared_state::SharedSystemState;
use storefront_chat::store::{
    CatalogSnapshot, ChatDatabase, Message, MessageRole, NewConversation, Product,
};

#[derive(Clone)]
enum Step {
    Reply(&'static str),
    Fail,
    Hang,
}

struct ScriptedModel {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
    /// Whether the user message was already stored when each call started
    user_message_stored: Mutex<Vec<bool>>,
    database: Arc<ChatDatabase>,
    conversation_id: String,
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationFailed> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stored = self
            .database
            .conversations
            .get_messages(&self.conversation_id)
            .map(|messages| {
                messages
                    .iter()
                    .any(|m| m.role == MessageRole::User && m.content == request.user_text)
            })
            .unwrap_or(false);
        self.user_message_stored.lock().unwrap().push(stored);
        self.requests.lock().unwrap().push(request.clone());

        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Reply("ok"));
        match step {
            Step::Reply(text) => Ok(Generation {
                content: text.to_string(),
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
                latency_ms: 5,
                model: "scripted".to_string(),
                prompt: format!("prompt for {}: {}", request.store_name, request.user_text),
            }),
            Step::Fail => Err(GenerationFailed::new("scripted failure")),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(GenerationFailed::new("should have timed out"))
            }
        }
    }
}

struct Fixture {
    shared: Arc<SharedSystemState>,
    database: Arc<ChatDatabase>,
    model: Arc<ScriptedModel>,
    conversation_id: String,
}

fn fixture(script: Vec<Step>, generation_timeout: Duration) -> Fixture {
    let database = Arc::new(ChatDatabase::new_in_memory().unwrap());
    database
        .catalog
        .import_catalog(
            "s1",
            &CatalogSnapshot {
                shop_domain: "acme.myshopify.com".to_string(),
                name: "Acme Audio".to_string(),
                products: vec![
                    Product {
                        id: "p1".to_string(),
                        handle: "wireless-headphones".to_string(),
                        title: "Wireless Headphones".to_string(),
                        description: "Bluetooth over-ear".to_string(),
                        status: "active".to_string(),
                        price_min: Some(45.0),
                        price_max: Some(45.0),
                        ..Default::default()
                    },
                    Product {
                        id: "p2".to_string(),
                        handle: "studio-speakers".to_string(),
                        title: "Studio Speakers".to_string(),
                        status: "active".to_string(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            },
        )
        .unwrap();
    let conversation = database
        .conversations
        .create_conversation(&NewConversation {
            store_id: "s1".to_string(),
            session_token: "widget-session".to_string(),
            ..Default::default()
        })
        .unwrap();

    let model = Arc::new(ScriptedModel {
        script: Mutex::new(script.into()),
        calls: AtomicUsize::new(0),
        requests: Mutex::new(Vec::new()),
        user_message_stored: Mutex::new(Vec::new()),
        database: Arc::clone(&database),
        conversation_id: conversation.id.clone(),
    });
    let shared = Arc::new(SharedSystemState::new(
        Arc::clone(&database),
        model.clone(),
        TurnConfig { history_limit: 10, generation_timeout },
    ));

    Fixture { shared, database, model, conversation_id: conversation.id }
}

impl Fixture {
    fn connect(&self, conversation_id: &str) -> (ConnectionHandle, UnboundedReceiver<OutboundEvent>) {
        let (handle, mut rx) = ConnectionHandle::new();
        let join = serde_json::json!({"type": "join_conversation", "conversationId": conversation_id});
        dispatch_event(&self.shared, &handle, &join.to_string());
        assert!(matches!(rx.try_recv(), Ok(OutboundEvent::Joined { .. })));
        (handle, rx)
    }

    fn send(&self, handle: &ConnectionHandle, content: &str) {
        let frame = serde_json::json!({
            "type": "send_message",
            "conversationId": self.conversation_id,
            "content": content,
        });
        dispatch_event(&self.shared, handle, &frame.to_string());
    }
}

async fn next_event(rx: &mut UnboundedReceiver<OutboundEvent>) -> OutboundEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within 5s")
        .expect("connection open")
}

async fn next_message(rx: &mut UnboundedReceiver<OutboundEvent>) -> Message {
    match next_event(rx).await {
        OutboundEvent::NewMessage { message, .. } => message,
        other => panic!("expected new_message, got {:?}", other),
    }
}

#[tokio::test]
async fn product_question_is_answered_and_broadcast() {
    let fx = fixture(vec![Step::Reply("Yes! Try [handle: wireless-headphones].")], Duration::from_secs(5));
    let conversation_id = fx.conversation_id.clone();
    let (client, mut rx) = fx.connect(&conversation_id);
    let before = fx.database.conversations.get_conversation(&conversation_id).unwrap().unwrap();

    fx.send(&client, "Do you have wireless headphones under $50?");

    let user = next_message(&mut rx).await;
    assert_eq!(user.role, MessageRole::User);
    assert_eq!(user.content, "Do you have wireless headphones under $50?");

    let reply = next_message(&mut rx).await;
    assert_eq!(reply.role, MessageRole::Assistant);
    assert_eq!(reply.content, "Yes! Try [handle: wireless-headphones].");
    assert_eq!(reply.metadata["intent"], "product_search");
    assert_eq!(reply.metadata["model"], "scripted");
    assert_eq!(reply.metadata["totalTokens"], 120);
    assert_eq!(reply.metadata["productHandles"], serde_json::json!(["wireless-headphones"]));

    let requests = fx.model.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].history.is_empty());
    assert_eq!(requests[0].store_name, "Acme Audio");
    assert_eq!(requests[0].context.product_handles(5), vec!["wireless-headphones"]);

    let stored = fx.database.conversations.get_messages(&conversation_id).unwrap();
    assert_eq!(stored.iter().map(|m| m.role).collect::<Vec<_>>(), vec![MessageRole::User, MessageRole::Assistant]);
    let log = fx.database.conversations.get_interaction_log_for_message(reply.id).unwrap().unwrap();
    assert_eq!(log.prompt, "prompt for Acme Audio: Do you have wireless headphones under $50?");
    assert_eq!(log.context_snapshot["products"], 1);

    let after = fx.database.conversations.get_conversation(&conversation_id).unwrap().unwrap();
    assert!(after.last_message_at > before.last_message_at);
}

#[tokio::test]
async fn timed_out_generation_falls_back_without_retry() {
    let fx = fixture(vec![Step::Hang], Duration::from_millis(200));
    let conversation_id = fx.conversation_id.clone();
    let (client, mut rx) = fx.connect(&conversation_id);

    fx.send(&client, "Do you have wireless headphones under $50?");

    assert_eq!(next_message(&mut rx).await.role, MessageRole::User);
    let reply = next_message(&mut rx).await;
    assert_eq!(reply.role, MessageRole::Assistant);
    assert_eq!(reply.content, FALLBACK_REPLY);
    assert_eq!(reply.metadata["error"], true);
    assert_eq!(reply.metadata["errorType"], "generation_failed");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(fx.model.calls.load(Ordering::SeqCst), 1);
    assert!(fx.database.conversations.get_interaction_log_for_message(reply.id).unwrap().is_none());
    assert_eq!(fx.database.conversations.get_message_count(&conversation_id).unwrap(), 2);
}

#[tokio::test]
async fn user_message_is_durable_before_generation() {
    let fx = fixture(vec![Step::Fail], Duration::from_secs(5));
    let conversation_id = fx.conversation_id.clone();
    let (client, mut rx) = fx.connect(&conversation_id);

    fx.send(&client, "Can I get a refund for my order?");
    next_message(&mut rx).await;
    let reply = next_message(&mut rx).await;

    assert_eq!(reply.content, FALLBACK_REPLY);
    assert_eq!(*fx.model.user_message_stored.lock().unwrap(), vec![true]);
    let stored = fx.database.conversations.get_messages(&conversation_id).unwrap();
    assert_eq!(stored[0].content, "Can I get a refund for my order?");
}

#[tokio::test]
async fn every_user_message_gets_exactly_one_reply() {
    let fx = fixture(
        vec![Step::Reply("first"), Step::Fail, Step::Reply("third")],
        Duration::from_secs(5),
    );
    let conversation_id = fx.conversation_id.clone();
    let (client, mut rx) = fx.connect(&conversation_id);

    for text in ["one", "two", "three"] {
        fx.send(&client, text);
        assert_eq!(next_message(&mut rx).await.content, text);
        assert_eq!(next_message(&mut rx).await.role, MessageRole::Assistant);
    }

    let stored = fx.database.conversations.get_messages(&conversation_id).unwrap();
    let transcript: Vec<(MessageRole, &str)> =
        stored.iter().map(|m| (m.role, m.content.as_str())).collect();
    assert_eq!(
        transcript,
        vec![
            (MessageRole::User, "one"),
            (MessageRole::Assistant, "first"),
            (MessageRole::User, "two"),
            (MessageRole::Assistant, FALLBACK_REPLY),
            (MessageRole::User, "three"),
            (MessageRole::Assistant, "third"),
        ]
    );

    // The third call saw the four earlier messages, fallback included.
    let requests = fx.model.requests.lock().unwrap().clone();
    assert_eq!(requests[2].history.len(), 4);
    assert_eq!(requests[2].history[3], (MessageRole::Assistant, FALLBACK_REPLY.to_string()));
}

#[tokio::test]
async fn messages_fan_out_to_every_connection_of_the_conversation_only() {
    let fx = fixture(vec![Step::Reply("hello all")], Duration::from_secs(5));
    let conversation_id = fx.conversation_id.clone();
    let mut on_c: Vec<_> = (0..3).map(|_| fx.connect(&conversation_id)).collect();
    let (_other, mut rx_d) = fx.connect("conversation-d");

    fx.send(&on_c[0].0, "Looking for running shoes");

    for (_, rx) in on_c.iter_mut() {
        let user = next_message(rx).await;
        let reply = next_message(rx).await;
        assert_eq!(user.role, MessageRole::User);
        assert_eq!(reply.content, "hello all");
    }
    assert!(rx_d.try_recv().is_err());
}

#[tokio::test]
async fn unknown_conversation_gets_targeted_error() {
    let fx = fixture(vec![], Duration::from_secs(5));
    let (client, mut rx) = ConnectionHandle::new();
    let frame = serde_json::json!({"type": "send_message", "conversationId": "missing", "content": "hi"});

    dispatch_event(&fx.shared, &client, &frame.to_string());

    assert_eq!(next_event(&mut rx).await, OutboundEvent::error("Conversation not found"));
    assert_eq!(fx.model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_frames_and_typing_events() {
    let fx = fixture(vec![], Duration::from_secs(5));
    let conversation_id = fx.conversation_id.clone();
    let (typist, mut rx_typist) = fx.connect(&conversation_id);
    let (_agent, mut rx_agent) = fx.connect(&conversation_id);

    dispatch_event(&fx.shared, &typist, "{not json");
    assert_eq!(next_event(&mut rx_typist).await, OutboundEvent::error("Invalid message format"));

    let typing = serde_json::json!({"type": "typing_start", "conversationId": conversation_id});
    dispatch_event(&fx.shared, &typist, &typing.to_string());
    assert_eq!(
        next_event(&mut rx_agent).await,
        OutboundEvent::TypingStart { conversation_id: conversation_id.clone() }
    );
    assert!(rx_typist.try_recv().is_err());
    assert_eq!(fx.shared.counters.malformed_events.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn dropped_connection_is_swept_and_skipped() {
    let fx = fixture(vec![Step::Reply("still here")], Duration::from_secs(5));
    let conversation_id = fx.conversation_id.clone();
    let (client, mut rx) = fx.connect(&conversation_id);
    let (_gone, rx_gone) = fx.connect(&conversation_id);
    drop(rx_gone);

    assert_eq!(fx.shared.hub.sweep(), 1);
    assert_eq!(fx.shared.hub.connections_for(&conversation_id), vec![client.id()]);

    fx.send(&client, "hello");
    next_message(&mut rx).await;
    assert_eq!(next_message(&mut rx).await.content, "still here");
}
