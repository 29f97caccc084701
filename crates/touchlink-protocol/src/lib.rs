//! QUIC transport and framed wire protocol for touchlink.
//!
//! This crate handles QUIC connection management (via quinn), the
//! length-prefixed bincode framing for [`touchlink_types::PadMessage`]
//! traffic, and the TLS configuration for the LAN trust model.

pub mod connection;
pub mod error;
pub mod tls;
pub mod transport;
pub mod wire;

pub use connection::{MessageReceiver, MessageSender, PadConnection};
pub use error::ProtocolError;
pub use transport::QuicTransport;
