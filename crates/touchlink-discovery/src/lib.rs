//! Local-network touchpad server discovery.
//!
//! Defines the [`ServiceBrowser`] capability implemented by platform
//! backends (found/lost advertisement events plus name resolution), the
//! [`DiscoveryDirectory`] that turns those events into a deduplicated
//! candidate set, and the mdns-sd backend.

use std::net::IpAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use touchlink_types::DeviceKey;

pub mod directory;
pub mod error;
pub mod mdns;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use directory::{DirectoryStatus, DiscoveryDirectory};
pub use error::DiscoveryError;
pub use mdns::MdnsBrowser;

/// A discovered, fully resolved touchpad server advertisement.
///
/// Unresolved advertisements never reach the visible set; they exist only as
/// pending-resolve markers inside the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Instance name; unique key within one discovery run.
    pub service_name: String,
    /// Full advertised service name.
    pub full_name: String,
    /// Resolved network address.
    pub address: IpAddr,
    /// Resolved port.
    pub port: u16,
}

impl Candidate {
    /// Session identity for this candidate.
    #[must_use]
    pub fn device_key(&self) -> DeviceKey {
        DeviceKey {
            address: self.address,
            port: self.port,
            name: self.service_name.clone(),
        }
    }
}

/// Outcome of resolving an advertisement name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub address: IpAddr,
    pub port: u16,
    pub full_name: String,
}

/// Advertisement events delivered by a [`ServiceBrowser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseEvent {
    /// A service with this instance name is being advertised.
    Found(String),
    /// The advertisement disappeared.
    Lost(String),
}

/// Platform capability for service discovery.
///
/// Implementations deliver found/lost events on the channel returned by
/// [`browse`](Self::browse) and resolve instance names to connectable
/// addresses. All methods take `&self`; backends keep their own interior
/// state so resolves can run concurrently with browsing.
#[async_trait]
pub trait ServiceBrowser: Send + Sync + 'static {
    /// Start browsing for the given service type; events arrive on the
    /// returned receiver until [`stop_browsing`](Self::stop_browsing).
    async fn browse(
        &self,
        service_type: &str,
    ) -> Result<mpsc::Receiver<BrowseEvent>, DiscoveryError>;

    /// Stop browsing and end the event stream.
    async fn stop_browsing(&self) -> Result<(), DiscoveryError>;

    /// Resolve an advertisement name to a connectable address and port.
    async fn resolve(&self, service_name: &str) -> Result<ResolvedAddress, DiscoveryError>;
}
