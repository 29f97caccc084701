//! mDNS/DNS-SD discovery backend over mdns-sd.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::DiscoveryError;
use crate::{BrowseEvent, ResolvedAddress, ServiceBrowser};

/// Default time to wait for the daemon to resolve a found service.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(3);

/// [`ServiceBrowser`] backed by mdns-sd.
///
/// The mDNS daemon resolves found services on its own while browsing;
/// `resolve` waits for the matching resolution record to arrive instead of
/// issuing a second query.
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    resolve_timeout: Duration,
    inner: Mutex<Inner>,
    records: Arc<Mutex<HashMap<String, ResolvedAddress>>>,
    resolved: Arc<Notify>,
}

#[derive(Default)]
struct Inner {
    service_type: Option<String>,
    pump: Option<JoinHandle<()>>,
}

impl MdnsBrowser {
    pub fn new() -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Start(e.to_string()))?;
        Ok(Self {
            daemon,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            inner: Mutex::new(Inner::default()),
            records: Arc::new(Mutex::new(HashMap::new())),
            resolved: Arc::new(Notify::new()),
        })
    }

    #[must_use]
    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        let _ = self.daemon.shutdown();
    }
}

/// Instance name of a full service name, e.g. `pad-1` from
/// `pad-1._touchpad._udp.local.` with type domain `_touchpad._udp.local.`.
fn instance_name(full_name: &str, ty_domain: &str) -> String {
    full_name
        .split(&format!(".{ty_domain}"))
        .next()
        .unwrap_or(full_name)
        .to_string()
}

#[async_trait]
impl ServiceBrowser for MdnsBrowser {
    async fn browse(
        &self,
        service_type: &str,
    ) -> Result<mpsc::Receiver<BrowseEvent>, DiscoveryError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.service_type.is_some() {
            return Err(DiscoveryError::Start("already browsing".to_string()));
        }

        let daemon_rx = self
            .daemon
            .browse(service_type)
            .map_err(|e| DiscoveryError::Start(e.to_string()))?;

        let (tx, rx) = mpsc::channel(64);
        let records = Arc::clone(&self.records);
        let resolved = Arc::clone(&self.resolved);
        let ty = service_type.to_string();
        let pump = tokio::spawn(async move {
            while let Ok(event) = daemon_rx.recv_async().await {
                match event {
                    ServiceEvent::SearchStarted(ty_domain) => {
                        debug!(service_type = %ty_domain, "mdns search started");
                    }
                    ServiceEvent::ServiceFound(ty_domain, full_name) => {
                        let name = instance_name(&full_name, &ty_domain);
                        trace!(name = %name, "service found");
                        if tx.send(BrowseEvent::Found(name)).await.is_err() {
                            break;
                        }
                    }
                    ServiceEvent::ServiceResolved(info) => {
                        let name = instance_name(info.get_fullname(), &ty);
                        let Some(address) = info.get_addresses().iter().copied().next() else {
                            warn!(name = %name, "resolved service carries no address");
                            continue;
                        };
                        let record = ResolvedAddress {
                            address,
                            port: info.get_port(),
                            full_name: info.get_fullname().to_string(),
                        };
                        debug!(
                            name = %name,
                            address = %record.address,
                            port = record.port,
                            "service resolved"
                        );
                        records.lock().unwrap().insert(name, record);
                        resolved.notify_waiters();
                    }
                    ServiceEvent::ServiceRemoved(ty_domain, full_name) => {
                        let name = instance_name(&full_name, &ty_domain);
                        records.lock().unwrap().remove(&name);
                        if tx.send(BrowseEvent::Lost(name)).await.is_err() {
                            break;
                        }
                    }
                    ServiceEvent::SearchStopped(ty_domain) => {
                        debug!(service_type = %ty_domain, "mdns search stopped");
                        break;
                    }
                    _ => {}
                }
            }
        });

        inner.service_type = Some(service_type.to_string());
        inner.pump = Some(pump);
        Ok(rx)
    }

    async fn stop_browsing(&self) -> Result<(), DiscoveryError> {
        let (service_type, pump) = {
            let mut inner = self.inner.lock().unwrap();
            (inner.service_type.take(), inner.pump.take())
        };
        if let Some(ty) = service_type {
            self.daemon
                .stop_browse(&ty)
                .map_err(|e| DiscoveryError::Stop(e.to_string()))?;
        }
        if let Some(pump) = pump {
            // SearchStopped ends the pump on its own; abort is the backstop.
            pump.abort();
        }
        self.records.lock().unwrap().clear();
        Ok(())
    }

    async fn resolve(&self, service_name: &str) -> Result<ResolvedAddress, DiscoveryError> {
        let deadline = tokio::time::Instant::now() + self.resolve_timeout;
        loop {
            // Register for the notification before the final check so a
            // record landing in between cannot be missed.
            let notified = self.resolved.notified();
            if let Some(record) = self.records.lock().unwrap().get(service_name).cloned() {
                return Ok(record);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(DiscoveryError::Resolve(service_name.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_name_strips_type_domain() {
        assert_eq!(
            instance_name("pad-1._touchpad._udp.local.", "_touchpad._udp.local."),
            "pad-1"
        );
    }

    #[test]
    fn instance_name_passes_through_unmatched_input() {
        assert_eq!(instance_name("oddball", "_touchpad._udp.local."), "oddball");
    }
}
