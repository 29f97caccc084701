//! Shared types for touchlink.
//!
//! This crate contains the types shared across the touchlink workspace:
//! raw and normalized touch contacts, the wire message set, and remote
//! device identity.

pub mod device;
pub mod message;
pub mod touch;

pub use device::DeviceKey;
pub use message::{Cookie, Heartbeat, HeartbeatDirection, PadMessage, TuneSetting, CONTROL_TOKEN};
pub use touch::{RawContact, TouchBatch, TouchPhase, TouchPoint, TrackingId};
