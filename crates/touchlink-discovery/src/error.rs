//! Discovery subsystem errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery start failed: {0}")]
    Start(String),

    #[error("discovery stop failed: {0}")]
    Stop(String),

    #[error("resolve failed for {0:?}")]
    Resolve(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
