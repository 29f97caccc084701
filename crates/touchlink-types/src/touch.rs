//! Touch contact types.
//!
//! Platform-agnostic representations of raw multi-touch samples and the
//! normalized per-frame events derived from them.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Stable identifier for one continuous physical contact.
///
/// Assigned by the originating input hardware; fixed from the contact's
/// `Added` event until its `Removed` event, and only reused afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct TrackingId(pub i32);

impl std::fmt::Display for TrackingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of a contact within one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum TouchPhase {
    /// Contact appeared this frame.
    Added,
    /// Contact persists from the previous frame. Emitted even when the
    /// coordinates are unchanged — the receiver relies on periodic liveness,
    /// not just deltas.
    Moved,
    /// Contact lifted (or the gesture was cancelled) this frame.
    Removed,
}

/// One normalized contact event, in integer device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct TouchPoint {
    pub tracking_id: TrackingId,
    pub phase: TouchPhase,
    pub x: i32,
    pub y: i32,
}

/// A raw hardware contact sample, as reported by the platform input API.
///
/// Coordinates are floating point here; the normalizer truncates them to
/// integer device pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawContact {
    pub id: TrackingId,
    pub x: f64,
    pub y: f64,
}

impl RawContact {
    #[must_use]
    pub fn new(id: i32, x: f64, y: f64) -> Self {
        Self {
            id: TrackingId(id),
            x,
            y,
        }
    }
}

/// One frame's worth of normalized events, transmitted as a unit.
///
/// `seq` and `sent_at_ms` are sender-local and exist so the receiving side
/// can observe latency and loss; they are never used for correctness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct TouchBatch {
    pub seq: u64,
    pub sent_at_ms: u64,
    pub points: Vec<TouchPoint>,
}
