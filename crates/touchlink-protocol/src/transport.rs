//! QUIC endpoints: the connect-only client, and a serving endpoint for test
//! peers.

use std::net::{Ipv4Addr, SocketAddr};

use quinn::Endpoint;
use tracing::{debug, info};

use crate::connection::PadConnection;
use crate::error::ProtocolError;
use crate::tls;

/// QUIC endpoint wrapper.
///
/// The product client only ever dials out and presents no certificate;
/// [`QuicTransport::client`] builds that endpoint. [`QuicTransport::bind`]
/// builds a serving endpoint and exists for the in-repo test peers (the
/// integration tests and the CLI echo server).
#[derive(Clone)]
pub struct QuicTransport {
    endpoint: Endpoint,
}

impl QuicTransport {
    /// Build a connect-only client endpoint on an ephemeral local port.
    pub fn client() -> Result<Self, ProtocolError> {
        // Install the default crypto provider if not already done
        let _ = rustls::crypto::ring::default_provider().install_default();

        let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        let mut endpoint =
            Endpoint::client(bind).map_err(|e| ProtocolError::Connection(e.to_string()))?;
        endpoint.set_default_client_config(tls::client_config()?);

        debug!("client QUIC endpoint ready");
        Ok(Self { endpoint })
    }

    /// Bind an endpoint that can both accept and initiate connections.
    pub fn bind(addr: SocketAddr, cert_pem: &str, key_pem: &str) -> Result<Self, ProtocolError> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let server_config = tls::server_config(cert_pem, key_pem)?;
        let mut endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        endpoint.set_default_client_config(tls::client_config()?);

        info!(addr = %addr, "QUIC transport bound");
        Ok(Self { endpoint })
    }

    /// Accept an incoming connection.
    pub async fn accept(&self) -> Result<PadConnection, ProtocolError> {
        let incoming = self
            .endpoint
            .accept()
            .await
            .ok_or_else(|| ProtocolError::Connection("endpoint closed".to_string()))?;

        let connection = incoming
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;

        let remote = connection.remote_address();
        debug!(remote = %remote, "accepted connection");
        Ok(PadConnection::new(connection))
    }

    /// Connect to a touchpad server.
    ///
    /// Unbounded by itself — callers wrap this in their own deadline so the
    /// connect attempt stays cancellable.
    pub async fn connect(&self, addr: SocketAddr) -> Result<PadConnection, ProtocolError> {
        let connection = self
            .endpoint
            .connect(addr, tls::SERVER_NAME)
            .map_err(|e| ProtocolError::Connection(e.to_string()))?
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;

        debug!(remote = %addr, "connected to server");
        Ok(PadConnection::new(connection))
    }

    /// Get the local address this transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ProtocolError> {
        self.endpoint
            .local_addr()
            .map_err(|e| ProtocolError::Connection(e.to_string()))
    }

    /// Gracefully shut down the transport, tearing down open connections.
    pub fn close(&self) {
        self.endpoint.close(quinn::VarInt::from_u32(0), b"shutdown");
        info!("QUIC transport closed");
    }
}
