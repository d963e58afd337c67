//! Trove realtime channel
//!
//! Reconnecting WebSocket client for chat rooms, with exponential backoff and
//! consumer-side message de-duplication.

pub mod channel;
pub mod message;

pub use channel::{reconnect_delay, ChannelState, RealtimeChannel, RealtimeConfig};
pub use message::{MessageEnvelope, MessageLog};
