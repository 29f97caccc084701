//! Wire messages exchanged between the client and a touchpad server.
//!
//! Every frame on a session stream is one [`PadMessage`]. The set is
//! deliberately small: the opening token, its only possible negative answer,
//! heartbeats, touch frames, tune settings, and a goodbye.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::touch::TouchBatch;

/// Opening token sent immediately after the transport connects, identifying
/// intent to control the peer.
pub const CONTROL_TOKEN: &str = "touchlink-control/1";

/// Top-level message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum PadMessage {
    /// Opening token; the first message on a new session stream.
    ControlRequest { token: String, device_name: String },

    /// The peer refused the control request. Absence of this message within
    /// the acceptance grace window counts as acceptance.
    Reject { reason: String },

    /// Liveness probe or its answer.
    Heartbeat(Heartbeat),

    /// One frame of touch events.
    Touch(TouchBatch),

    /// Touchpad tuning, forwarded to the peer verbatim.
    Tune(TuneSetting),

    /// Graceful disconnect.
    Bye,
}

/// Direction of a heartbeat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum HeartbeatDirection {
    Ping,
    Pong,
}

/// Opaque value carried by a Ping and echoed unchanged by the matching Pong.
///
/// Wraps a random UUID but serialises as raw bytes for bincode efficiency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct Cookie(#[bincode(with_serde)] Uuid);

impl Cookie {
    /// Generate a fresh random cookie.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Cookie {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Cookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A liveness probe (`Ping`) or its answer (`Pong`).
///
/// `sent_at_ms` is the sender's local clock and is used only for
/// round-trip-time observability — peers' clocks are never assumed to be
/// synchronized, and no correctness decision reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Heartbeat {
    pub direction: HeartbeatDirection,
    pub sent_at_ms: u64,
    /// Monotonic per session; wraps at `u64::MAX`.
    pub seq: u64,
    pub cookie: Cookie,
}

impl Heartbeat {
    /// Build a Ping with a fresh cookie.
    #[must_use]
    pub fn ping(seq: u64, sent_at_ms: u64) -> Self {
        Self {
            direction: HeartbeatDirection::Ping,
            sent_at_ms,
            seq,
            cookie: Cookie::new(),
        }
    }

    /// Build the Pong answering `ping`, echoing its sequence and cookie.
    #[must_use]
    pub fn pong_for(ping: &Heartbeat, sent_at_ms: u64) -> Self {
        Self {
            direction: HeartbeatDirection::Pong,
            sent_at_ms,
            seq: ping.seq,
            cookie: ping.cookie,
        }
    }

    /// Whether this message is the Pong answering `ping`: direction, sequence
    /// number, and cookie must all match.
    #[must_use]
    pub fn answers(&self, ping: &Heartbeat) -> bool {
        self.direction == HeartbeatDirection::Pong
            && self.seq == ping.seq
            && self.cookie == ping.cookie
    }
}

/// Touchpad tuning forwarded to the server. The client core never interprets
/// these values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct TuneSetting {
    pub sensitivity: f32,
    pub invert_x: bool,
    pub invert_y: bool,
}
