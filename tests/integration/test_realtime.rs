//! Integration tests for the realtime chat channel.
//!
//! Exercises connection, scripted server drops with backoff reconnect,
//! consumer-boundary deduplication, socket sends with the REST fallback, and
//! the terminal give-up after exhausted reconnect attempts.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use trove_api::{
    ApiClient, ChatMessageListResponse, ChatMessageResponse, MemoryTokenStore, RequestOptions,
    SendMessageRequest, TokenPair, TokenStore,
};
use trove_realtime::{ChannelState, MessageEnvelope, MessageLog, RealtimeChannel, RealtimeConfig};

use support::{envelope_frame, spawn_server, ChatScript};

const ROOM: &str = "room-1";
const TOKEN: &str = "access-1";

fn fast_config(ws_url: &str) -> RealtimeConfig {
    let mut config = RealtimeConfig::new(ws_url);
    config.backoff_base = Duration::from_millis(50);
    config
}

async fn recv_envelope(
    messages: &mut tokio::sync::broadcast::Receiver<MessageEnvelope>,
) -> MessageEnvelope {
    timeout(Duration::from_secs(5), messages.recv())
        .await
        .expect("timed out waiting for message")
        .expect("message stream closed")
}

async fn wait_for_state(channel: &RealtimeChannel, wanted: ChannelState) {
    let mut state = channel.state();
    timeout(Duration::from_secs(5), async {
        loop {
            if *state.borrow_and_update() == wanted {
                return;
            }
            state.changed().await.expect("state channel closed");
        }
    })
    .await
    .expect("timed out waiting for channel state");
}

#[tokio::test]
async fn test_connect_delivers_scripted_messages() {
    let server = spawn_server().await;
    server
        .state
        .chat_scripts
        .lock()
        .expect("scripts lock")
        .push_back(ChatScript {
            frames: vec![
                envelope_frame(Some("m1"), ROOM, "hello"),
                envelope_frame(Some("m2"), ROOM, "there"),
            ],
            close_after: false,
        });

    let channel = RealtimeChannel::new(fast_config(&server.ws_url));
    let mut messages = channel.subscribe();
    channel.connect(ROOM, TOKEN);

    let first = recv_envelope(&mut messages).await;
    assert_eq!(first.id.as_deref(), Some("m1"));
    assert_eq!(first.body, "hello");
    let second = recv_envelope(&mut messages).await;
    assert_eq!(second.body, "there");

    channel.disconnect();
    assert_eq!(channel.current_state(), ChannelState::Disconnected);
}

#[tokio::test]
async fn test_reconnect_with_overlap_dedupes_at_the_consumer() {
    let server = spawn_server().await;
    {
        let mut scripts = server.state.chat_scripts.lock().expect("scripts lock");
        // First connection replays m1, m2 and drops; the second overlaps with
        // m2 before continuing.
        scripts.push_back(ChatScript {
            frames: vec![
                envelope_frame(Some("m1"), ROOM, "one"),
                envelope_frame(Some("m2"), ROOM, "two"),
            ],
            close_after: true,
        });
        scripts.push_back(ChatScript {
            frames: vec![
                envelope_frame(Some("m2"), ROOM, "two"),
                envelope_frame(Some("m3"), ROOM, "three"),
            ],
            close_after: false,
        });
    }

    let channel = RealtimeChannel::new(fast_config(&server.ws_url));
    let mut messages = channel.subscribe();
    channel.connect(ROOM, TOKEN);

    let mut log = MessageLog::default();
    let mut delivered = 0;
    while delivered < 4 {
        let envelope = recv_envelope(&mut messages).await;
        log.push(envelope);
        delivered += 1;
    }

    // Four frames arrived, three distinct messages survive.
    let bodies: Vec<&str> = log.messages().iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["one", "two", "three"]);
    assert_eq!(server.state.ws_connections.load(Ordering::SeqCst), 2);

    channel.disconnect();
}

#[tokio::test]
async fn test_messages_without_ids_are_never_deduped() {
    let server = spawn_server().await;
    server
        .state
        .chat_scripts
        .lock()
        .expect("scripts lock")
        .push_back(ChatScript {
            frames: vec![
                envelope_frame(None, ROOM, "typing"),
                envelope_frame(None, ROOM, "typing"),
            ],
            close_after: false,
        });

    let channel = RealtimeChannel::new(fast_config(&server.ws_url));
    let mut messages = channel.subscribe();
    channel.connect(ROOM, TOKEN);

    let mut log = MessageLog::default();
    assert!(log.push(recv_envelope(&mut messages).await));
    assert!(log.push(recv_envelope(&mut messages).await));
    assert_eq!(log.len(), 2);

    channel.disconnect();
}

#[tokio::test]
async fn test_send_over_socket_and_rest_fallback() {
    let server = spawn_server().await;
    let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair::new(
        TOKEN, "refresh-1",
    )));
    let api = ApiClient::new(&server.base_url, store as Arc<dyn TokenStore>);

    let channel = RealtimeChannel::new(fast_config(&server.ws_url));
    let mut messages = channel.subscribe();

    // Not connected yet: the socket send reports failure so the caller can
    // fall back to REST.
    assert!(!channel.send("too early"));
    let sent: ChatMessageResponse = api
        .post(
            &format!("/chat-rooms/{ROOM}/messages"),
            &SendMessageRequest {
                body: "over rest".to_string(),
            },
            RequestOptions::authed(),
        )
        .await
        .expect("REST send");
    assert_eq!(sent.body, "over rest");

    channel.connect(ROOM, TOKEN);
    wait_for_state(&channel, ChannelState::Connected).await;

    assert!(channel.send("over socket"));
    let echoed = recv_envelope(&mut messages).await;
    assert_eq!(echoed.body, "over socket");
    assert_eq!(echoed.sender_id.as_deref(), Some("peer"));
    assert!(echoed.id.is_some());

    // Both messages are in the room history.
    let history: ChatMessageListResponse = api
        .get(
            &format!("/chat-rooms/{ROOM}/messages"),
            RequestOptions::authed(),
        )
        .await
        .expect("history fetch");
    let bodies: Vec<&str> = history.messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["over rest", "over socket"]);

    channel.disconnect();
}

#[tokio::test]
async fn test_gives_up_after_exhausting_reconnect_attempts() {
    // Bind a port and immediately free it so every connect attempt fails.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let dead_url = format!("ws://{}/v1", listener.local_addr().expect("addr"));
    drop(listener);

    let mut config = RealtimeConfig::new(dead_url);
    config.backoff_base = Duration::from_millis(10);
    config.max_reconnect_attempts = 2;

    let channel = RealtimeChannel::new(config);
    let mut state = channel.state();
    channel.connect(ROOM, TOKEN);

    let mut saw_reconnecting = false;
    let outcome = timeout(Duration::from_secs(5), async {
        loop {
            state.changed().await.expect("state channel closed");
            let current = *state.borrow_and_update();
            if current == ChannelState::Reconnecting {
                saw_reconnecting = true;
            }
            if saw_reconnecting && current == ChannelState::Disconnected {
                return;
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "channel never gave up");
    assert_eq!(channel.current_state(), ChannelState::Disconnected);

    // Terminal: no further automatic attempts, but an explicit connect may
    // start a new cycle.
    assert!(!channel.send("nobody home"));
}
