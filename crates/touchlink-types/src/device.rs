//! Remote device identity.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Identity of a remote touchpad server: resolved address, port, and
/// advertised instance name.
///
/// Used as the key for tracked sessions; two candidates that resolve to the
/// same address, port, and name are the same device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceKey {
    pub address: IpAddr,
    pub port: u16,
    pub name: String,
}

impl DeviceKey {
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl std::fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.name, self.address, self.port)
    }
}
