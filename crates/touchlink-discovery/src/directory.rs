//! The live set of discovered candidate servers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::DiscoveryError;
use crate::{BrowseEvent, Candidate, ResolvedAddress, ServiceBrowser};

/// Snapshot of the directory, published through a watch channel.
#[derive(Debug, Clone, Default)]
pub struct DirectoryStatus {
    /// Whether a discovery run is active.
    pub searching: bool,
    /// Why the last run ended, if it ended on a failure.
    pub error: Option<String>,
    /// The visible candidate set, keyed by service name.
    pub candidates: HashMap<String, Candidate>,
}

/// Maintains the candidate set for one discovery run at a time.
///
/// All discovery state lives inside a single task; consumers observe it
/// through the watch channel and never mutate it directly. Invariants held
/// by the run loop: at most one resolve in flight per service name, and
/// never two visible candidates with the same name.
pub struct DiscoveryDirectory {
    browser: Arc<dyn ServiceBrowser>,
    status_tx: watch::Sender<DirectoryStatus>,
    run: Option<JoinHandle<()>>,
}

impl DiscoveryDirectory {
    #[must_use]
    pub fn new(browser: Arc<dyn ServiceBrowser>) -> Self {
        let (status_tx, _) = watch::channel(DirectoryStatus::default());
        Self {
            browser,
            status_tx,
            run: None,
        }
    }

    /// Observe the candidate set and searching state.
    pub fn status_receiver(&self) -> watch::Receiver<DirectoryStatus> {
        self.status_tx.subscribe()
    }

    /// Begin a discovery run.
    ///
    /// Calling this while a run is active is a benign no-op. A platform
    /// browse failure leaves the directory stopped (`searching = false` with
    /// the reason in the status) but restartable.
    pub async fn start(&mut self, service_type: &str) -> Result<(), DiscoveryError> {
        if self.run.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!(service_type, "discovery already running");
            return Ok(());
        }

        let events = match self.browser.browse(service_type).await {
            Ok(events) => events,
            Err(e) => {
                self.status_tx.send_modify(|status| {
                    status.searching = false;
                    status.error = Some(e.to_string());
                });
                return Err(e);
            }
        };

        self.status_tx.send_replace(DirectoryStatus {
            searching: true,
            error: None,
            candidates: HashMap::new(),
        });
        info!(service_type, "discovery started");

        let browser = Arc::clone(&self.browser);
        let status_tx = self.status_tx.clone();
        self.run = Some(tokio::spawn(run_directory(browser, events, status_tx)));
        Ok(())
    }

    /// End the discovery run and clear the candidate set.
    pub async fn stop(&mut self) {
        if let Some(task) = self.run.take() {
            if let Err(e) = self.browser.stop_browsing().await {
                warn!(error = %e, "failed to stop browsing");
            }
            task.abort();
            self.status_tx.send_replace(DirectoryStatus::default());
            info!("discovery stopped");
        }
    }
}

/// One discovery run: consumes browse events, issues resolves, maintains the
/// candidate set.
async fn run_directory(
    browser: Arc<dyn ServiceBrowser>,
    mut events: mpsc::Receiver<BrowseEvent>,
    status_tx: watch::Sender<DirectoryStatus>,
) {
    // Names with a resolve in flight. An entry here suppresses further
    // resolves for the same name until the outcome lands.
    let mut resolving: HashSet<String> = HashSet::new();
    let (outcome_tx, mut outcome_rx) =
        mpsc::channel::<(String, Result<ResolvedAddress, DiscoveryError>)>(64);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(BrowseEvent::Found(name)) => {
                    let visible = status_tx.borrow().candidates.contains_key(&name);
                    if visible || resolving.contains(&name) {
                        trace!(name = %name, "ignoring duplicate find");
                        continue;
                    }
                    resolving.insert(name.clone());
                    debug!(name = %name, "resolving");
                    let browser = Arc::clone(&browser);
                    let outcome_tx = outcome_tx.clone();
                    tokio::spawn(async move {
                        let result = browser.resolve(&name).await;
                        let _ = outcome_tx.send((name, result)).await;
                    });
                }
                Some(BrowseEvent::Lost(name)) => {
                    resolving.remove(&name);
                    let mut removed = false;
                    status_tx.send_modify(|status| {
                        removed = status.candidates.remove(&name).is_some();
                    });
                    if removed {
                        info!(name = %name, "candidate lost");
                    }
                }
                None => {
                    // The platform side closed the event stream without a
                    // stop(); report the run as over.
                    status_tx.send_modify(|status| {
                        status.searching = false;
                        status.error = Some("browse event stream closed".to_string());
                    });
                    break;
                }
            },
            Some((name, result)) = outcome_rx.recv() => {
                if !resolving.remove(&name) {
                    // The service was lost while its resolve was in flight.
                    trace!(name = %name, "discarding resolve outcome for lost service");
                    continue;
                }
                match result {
                    Ok(resolved) => {
                        let candidate = Candidate {
                            service_name: name.clone(),
                            full_name: resolved.full_name,
                            address: resolved.address,
                            port: resolved.port,
                        };
                        status_tx.send_modify(|status| {
                            // First resolution for a name wins within a run.
                            status
                                .candidates
                                .entry(name.clone())
                                .or_insert(candidate);
                        });
                        info!(name = %name, "candidate resolved");
                    }
                    Err(e) => {
                        // Retryable: the next Found for this name resolves
                        // again.
                        debug!(name = %name, error = %e, "resolve failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::time::Duration;

    use tokio::sync::watch;

    use super::*;
    use crate::mock::MockBrowser;

    const SERVICE_TYPE: &str = "_touchpad._udp.local.";

    fn resolved(address: &str, port: u16, name: &str) -> ResolvedAddress {
        ResolvedAddress {
            address: address.parse::<IpAddr>().unwrap(),
            port,
            full_name: format!("{name}.{SERVICE_TYPE}"),
        }
    }

    async fn wait_for(
        rx: &mut watch::Receiver<DirectoryStatus>,
        pred: impl Fn(&DirectoryStatus) -> bool,
    ) -> DirectoryStatus {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                {
                    let status = rx.borrow_and_update().clone();
                    if pred(&status) {
                        return status;
                    }
                }
                rx.changed().await.expect("status watch closed");
            }
        })
        .await
        .expect("directory did not reach expected state in time")
    }

    #[tokio::test]
    async fn found_service_resolves_into_candidate_set() {
        let (browser, handle) = MockBrowser::new();
        let mut directory = DiscoveryDirectory::new(browser);
        let mut status = directory.status_receiver();

        handle.set_resolution("dev1", resolved("192.168.1.5", 9000, "dev1"));
        directory.start(SERVICE_TYPE).await.unwrap();
        handle.emit_found("dev1").await;

        let snapshot = wait_for(&mut status, |s| s.candidates.contains_key("dev1")).await;
        let candidate = &snapshot.candidates["dev1"];
        assert_eq!(candidate.address.to_string(), "192.168.1.5");
        assert_eq!(candidate.port, 9000);
        assert!(snapshot.searching);
    }

    #[tokio::test]
    async fn second_find_while_resolving_issues_no_second_resolve() {
        let (browser, handle) = MockBrowser::new();
        let mut directory = DiscoveryDirectory::new(browser);
        let mut status = directory.status_receiver();

        handle.set_resolution("dev1", resolved("192.168.1.5", 9000, "dev1"));
        handle.hold_resolves();
        directory.start(SERVICE_TYPE).await.unwrap();

        handle.emit_found("dev1").await;
        handle.emit_found("dev1").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.resolve_calls("dev1"), 1);

        handle.release_resolves();
        wait_for(&mut status, |s| s.candidates.contains_key("dev1")).await;
        assert_eq!(handle.resolve_calls("dev1"), 1);
    }

    #[tokio::test]
    async fn resolve_failure_clears_marker_so_a_later_find_retries() {
        let (browser, handle) = MockBrowser::new();
        let mut directory = DiscoveryDirectory::new(browser);
        let mut status = directory.status_receiver();

        handle.fail_resolution("dev1", "no address records");
        directory.start(SERVICE_TYPE).await.unwrap();
        handle.emit_found("dev1").await;

        tokio::time::timeout(Duration::from_secs(2), async {
            while handle.resolve_calls("dev1") < 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        // Let the failure outcome land and clear the pending marker.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(status.borrow().candidates.is_empty());

        handle.set_resolution("dev1", resolved("192.168.1.5", 9000, "dev1"));
        handle.emit_found("dev1").await;
        wait_for(&mut status, |s| s.candidates.contains_key("dev1")).await;
        assert_eq!(handle.resolve_calls("dev1"), 2);
    }

    #[tokio::test]
    async fn lost_service_is_removed_and_may_return() {
        let (browser, handle) = MockBrowser::new();
        let mut directory = DiscoveryDirectory::new(browser);
        let mut status = directory.status_receiver();

        handle.set_resolution("dev1", resolved("192.168.1.5", 9000, "dev1"));
        directory.start(SERVICE_TYPE).await.unwrap();
        handle.emit_found("dev1").await;
        wait_for(&mut status, |s| s.candidates.contains_key("dev1")).await;

        handle.emit_lost("dev1").await;
        wait_for(&mut status, |s| s.candidates.is_empty()).await;

        handle.emit_found("dev1").await;
        wait_for(&mut status, |s| s.candidates.contains_key("dev1")).await;
        assert_eq!(handle.resolve_calls("dev1"), 2);
    }

    #[tokio::test]
    async fn lost_during_resolve_discards_the_outcome() {
        let (browser, handle) = MockBrowser::new();
        let mut directory = DiscoveryDirectory::new(browser);
        let status = directory.status_receiver();

        handle.set_resolution("dev1", resolved("192.168.1.5", 9000, "dev1"));
        handle.hold_resolves();
        directory.start(SERVICE_TYPE).await.unwrap();

        handle.emit_found("dev1").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.emit_lost("dev1").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.release_resolves();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(status.borrow().candidates.is_empty());
    }

    #[tokio::test]
    async fn duplicate_start_is_benign() {
        let (browser, handle) = MockBrowser::new();
        let mut directory = DiscoveryDirectory::new(browser);

        directory.start(SERVICE_TYPE).await.unwrap();
        directory.start(SERVICE_TYPE).await.unwrap();
        assert_eq!(handle.browse_calls(), 1);
        assert!(directory.status_receiver().borrow().searching);
    }

    #[tokio::test]
    async fn stop_clears_candidates_and_allows_restart() {
        let (browser, handle) = MockBrowser::new();
        let mut directory = DiscoveryDirectory::new(browser);
        let mut status = directory.status_receiver();

        handle.set_resolution("dev1", resolved("192.168.1.5", 9000, "dev1"));
        directory.start(SERVICE_TYPE).await.unwrap();
        handle.emit_found("dev1").await;
        wait_for(&mut status, |s| s.candidates.contains_key("dev1")).await;

        directory.stop().await;
        let snapshot = status.borrow().clone();
        assert!(!snapshot.searching);
        assert!(snapshot.candidates.is_empty());
        assert!(snapshot.error.is_none());

        directory.start(SERVICE_TYPE).await.unwrap();
        assert_eq!(handle.browse_calls(), 2);
    }

    #[tokio::test]
    async fn browse_failure_surfaces_as_not_searching_with_reason() {
        let (browser, handle) = MockBrowser::new();
        handle.fail_browse("mdns daemon unavailable");
        let mut directory = DiscoveryDirectory::new(browser);

        let err = directory.start(SERVICE_TYPE).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Start(_)));

        let snapshot = directory.status_receiver().borrow().clone();
        assert!(!snapshot.searching);
        assert!(snapshot
            .error
            .as_deref()
            .is_some_and(|e| e.contains("mdns daemon unavailable")));
    }
}
