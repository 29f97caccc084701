//! Session connection and stream framing.

use std::net::SocketAddr;

use bincode::{Decode, Encode};
use quinn::{Connection, RecvStream, SendStream};
use tracing::trace;

use crate::error::ProtocolError;
use crate::wire::{self, MAX_MESSAGE_SIZE};

/// A connection to a touchpad server (or, on the accepting side, to a
/// client).
#[derive(Clone)]
pub struct PadConnection {
    connection: Connection,
}

impl PadConnection {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Get the remote address of this connection.
    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Open the session stream.
    ///
    /// A session uses exactly one bidirectional stream: heartbeats, touch
    /// frames, and tune messages all share it, so a single writer owns the
    /// wire and no two messages ever interleave at the byte level.
    pub async fn open_session_stream(
        &self,
    ) -> Result<(MessageSender, MessageReceiver), ProtocolError> {
        let (send, recv) = self
            .connection
            .open_bi()
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        Ok((MessageSender::new(send), MessageReceiver::new(recv)))
    }

    /// Accept the session stream (peer side of [`open_session_stream`]).
    ///
    /// [`open_session_stream`]: Self::open_session_stream
    pub async fn accept_session_stream(
        &self,
    ) -> Result<(MessageSender, MessageReceiver), ProtocolError> {
        let (send, recv) = self
            .connection
            .accept_bi()
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        Ok((MessageSender::new(send), MessageReceiver::new(recv)))
    }

    /// Close the connection immediately.
    pub fn close(&self) {
        self.connection.close(quinn::VarInt::from_u32(0), b"bye");
    }
}

/// Sends length-prefixed bincode frames over a QUIC send stream.
pub struct MessageSender {
    stream: SendStream,
}

impl MessageSender {
    fn new(stream: SendStream) -> Self {
        Self { stream }
    }

    /// Send one message as one frame, in a single write.
    pub async fn send<T: Encode>(&mut self, msg: &T) -> Result<(), ProtocolError> {
        let buf = wire::encode_message(msg)?;
        self.stream
            .write_all(&buf)
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;

        trace!(len = buf.len(), "sent frame");
        Ok(())
    }

    /// Finish the stream (signal no more data).
    pub fn finish(mut self) -> Result<(), ProtocolError> {
        self.stream
            .finish()
            .map_err(|e| ProtocolError::Connection(e.to_string()))
    }
}

/// Receives length-prefixed bincode frames from a QUIC recv stream.
pub struct MessageReceiver {
    stream: RecvStream,
}

impl MessageReceiver {
    fn new(stream: RecvStream) -> Self {
        Self { stream }
    }

    /// Receive and decode one frame.
    ///
    /// Returns `None` if the stream has been cleanly closed by the peer.
    pub async fn recv<T: Decode<()>>(&mut self) -> Result<Option<T>, ProtocolError> {
        // Read 4-byte length prefix
        let mut len_buf = [0u8; 4];
        match self.stream.read_exact(&mut len_buf).await {
            Ok(()) => {}
            Err(quinn::ReadExactError::FinishedEarly(_)) => return Ok(None),
            Err(quinn::ReadExactError::ReadError(e)) => {
                return Err(ProtocolError::Connection(e.to_string()));
            }
        }

        let len = u32::from_be_bytes(len_buf);
        if len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::Deserialization(format!(
                "message size {len} exceeds maximum {MAX_MESSAGE_SIZE}"
            )));
        }

        let mut payload = vec![0u8; len as usize];
        match self.stream.read_exact(&mut payload).await {
            Ok(()) => {}
            Err(quinn::ReadExactError::FinishedEarly(_)) => {
                return Err(ProtocolError::StreamClosed);
            }
            Err(quinn::ReadExactError::ReadError(e)) => {
                return Err(ProtocolError::Connection(e.to_string()));
            }
        }

        let msg = wire::decode_message(&payload)?;
        trace!(len, "received frame");
        Ok(Some(msg))
    }
}
