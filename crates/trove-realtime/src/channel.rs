//! The realtime chat channel.
//!
//! One [`RealtimeChannel`] maintains one logical connection to a chat room:
//! a single receive loop, state published through a `watch` channel, inbound
//! frames fanned out through a `broadcast` channel. When the receive loop
//! fails (not a caller-initiated disconnect) the channel reconnects with
//! exponential backoff — `base * 2^(attempt-1)` — up to
//! [`RealtimeConfig::max_reconnect_attempts`] attempts, after which it settles
//! in `Disconnected` and waits for the caller to reconnect explicitly.

use std::sync::Mutex;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use tungstenite::Message;

use crate::message::MessageEnvelope;

/// Connection lifecycle of a [`RealtimeChannel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelState {
    /// No connection and no reconnect pending.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The receive loop is live.
    Connected,
    /// The connection dropped; a backoff delay is pending.
    Reconnecting,
}

/// Tuning for a [`RealtimeChannel`].
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// WebSocket base URL including the version prefix, e.g. `ws://host/v1`.
    pub ws_base_url: String,
    /// Reconnect attempts before giving up. Defaults to 5.
    pub max_reconnect_attempts: u32,
    /// Base unit of the exponential backoff. Defaults to 1 second.
    pub backoff_base: Duration,
}

impl RealtimeConfig {
    /// Creates a config with default reconnect behavior.
    #[must_use]
    pub fn new(ws_base_url: impl Into<String>) -> Self {
        Self {
            ws_base_url: ws_base_url.into(),
            max_reconnect_attempts: 5,
            backoff_base: Duration::from_secs(1),
        }
    }
}

/// Backoff delay before reconnect `attempt` (1-indexed): `base * 2^(attempt-1)`.
#[must_use]
pub fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    base * 2_u32.saturating_pow(attempt.saturating_sub(1))
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A reconnecting WebSocket client for one chat room.
pub struct RealtimeChannel {
    config: RealtimeConfig,
    state_tx: watch::Sender<ChannelState>,
    messages_tx: broadcast::Sender<MessageEnvelope>,
    outbound_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeChannel {
    /// Creates a channel; no connection is made until [`Self::connect`].
    #[must_use]
    pub fn new(config: RealtimeConfig) -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Disconnected);
        let (messages_tx, _) = broadcast::channel(256);
        Self {
            config,
            state_tx,
            messages_tx,
            outbound_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Opens the connection for `room_id`, authenticating with `token`.
    ///
    /// No-op unless the channel is currently `Disconnected`; reconnects while
    /// `Connecting`/`Reconnecting` are driven internally.
    pub fn connect(&self, room_id: &str, token: &str) {
        if *self.state_tx.borrow() != ChannelState::Disconnected {
            return;
        }

        let url = format!(
            "{}/chats/{}?token={}",
            self.config.ws_base_url, room_id, token
        );
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        if let Ok(mut guard) = self.outbound_tx.lock() {
            *guard = Some(outbound_tx);
        }

        let handle = tokio::spawn(run_connection(
            self.config.clone(),
            url,
            self.state_tx.clone(),
            self.messages_tx.clone(),
            outbound_rx,
        ));
        if let Ok(mut guard) = self.task.lock() {
            if let Some(old) = guard.replace(handle) {
                old.abort();
            }
        }
    }

    /// Caller-initiated close: stops the receive loop without reconnecting.
    pub fn disconnect(&self) {
        if let Ok(mut guard) = self.task.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
        if let Ok(mut guard) = self.outbound_tx.lock() {
            *guard = None;
        }
        self.state_tx.send_replace(ChannelState::Disconnected);
    }

    /// Fire-and-forget send over the open socket.
    ///
    /// Returns `false` when the socket is not connected; the caller is
    /// expected to fall back to the REST send endpoint in that case.
    pub fn send(&self, body: &str) -> bool {
        if *self.state_tx.borrow() != ChannelState::Connected {
            return false;
        }
        let payload = serde_json::json!({ "body": body }).to_string();
        match self.outbound_tx.lock() {
            Ok(guard) => guard
                .as_ref()
                .is_some_and(|tx| tx.send(payload).is_ok()),
            Err(_) => false,
        }
    }

    /// Watches connection state transitions.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.state_tx.subscribe()
    }

    /// The current connection state.
    #[must_use]
    pub fn current_state(&self) -> ChannelState {
        *self.state_tx.borrow()
    }

    /// Subscribes to inbound message frames.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MessageEnvelope> {
        self.messages_tx.subscribe()
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.task.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("state", &*self.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

/// Supervisor: connects, drives the socket, reconnects with backoff.
async fn run_connection(
    config: RealtimeConfig,
    url: String,
    state_tx: watch::Sender<ChannelState>,
    messages_tx: broadcast::Sender<MessageEnvelope>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
) {
    let mut attempt: u32 = 0;
    loop {
        state_tx.send_replace(ChannelState::Connecting);
        match connect_async(&url).await {
            Ok((socket, _)) => {
                debug!("realtime channel connected");
                state_tx.send_replace(ChannelState::Connected);
                attempt = 0;
                drive_socket(socket, &messages_tx, &mut outbound_rx).await;
                warn!("realtime receive loop ended");
            }
            Err(err) => {
                warn!(error = %err, "realtime connect failed");
            }
        }

        attempt += 1;
        if attempt > config.max_reconnect_attempts {
            warn!(
                attempts = config.max_reconnect_attempts,
                "reconnect attempts exhausted, giving up"
            );
            state_tx.send_replace(ChannelState::Disconnected);
            return;
        }
        state_tx.send_replace(ChannelState::Reconnecting);
        sleep(reconnect_delay(config.backoff_base, attempt)).await;
    }
}

/// Pumps one live socket until it fails or closes.
async fn drive_socket(
    socket: WsStream,
    messages_tx: &broadcast::Sender<MessageEnvelope>,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
) {
    let (mut sink, mut stream) = socket.split();
    let mut outbound_open = true;
    loop {
        tokio::select! {
            outgoing = outbound_rx.recv(), if outbound_open => {
                match outgoing {
                    Some(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            return;
                        }
                    }
                    None => outbound_open = false,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => deliver(messages_tx, text.as_bytes()),
                    Some(Ok(Message::Binary(bytes))) => deliver(messages_tx, &bytes),
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                }
            }
        }
    }
}

fn deliver(messages_tx: &broadcast::Sender<MessageEnvelope>, raw: &[u8]) {
    match serde_json::from_slice::<MessageEnvelope>(raw) {
        // send() errs only when no subscriber is listening, which is fine
        Ok(envelope) => {
            let _ = messages_tx.send(envelope);
        }
        Err(err) => debug!(error = %err, "ignoring unparseable frame"),
    }
}
