//! Client errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] touchlink_protocol::ProtocolError),

    #[error("discovery error: {0}")]
    Discovery(#[from] touchlink_discovery::DiscoveryError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
