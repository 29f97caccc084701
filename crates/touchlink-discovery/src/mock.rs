//! Scripted discovery backend for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::DiscoveryError;
use crate::{BrowseEvent, ResolvedAddress, ServiceBrowser};

#[derive(Default)]
struct MockBrowserState {
    event_tx: Option<mpsc::Sender<BrowseEvent>>,
    resolutions: HashMap<String, Result<ResolvedAddress, String>>,
    resolve_calls: HashMap<String, usize>,
    browse_calls: usize,
    fail_browse: Option<String>,
}

/// Scripted [`ServiceBrowser`]: tests inject found/lost events, decide how
/// each name resolves, and can hold resolves open to exercise the in-flight
/// dedup path.
pub struct MockBrowser {
    state: Arc<Mutex<MockBrowserState>>,
    hold_rx: watch::Receiver<bool>,
}

/// Test-side handle for observing and steering a [`MockBrowser`].
#[derive(Clone)]
pub struct MockBrowserHandle {
    state: Arc<Mutex<MockBrowserState>>,
    hold_tx: Arc<watch::Sender<bool>>,
}

impl MockBrowser {
    /// Create a browser and the handle that scripts it.
    #[must_use]
    pub fn new() -> (Arc<Self>, MockBrowserHandle) {
        let state = Arc::new(Mutex::new(MockBrowserState::default()));
        let (hold_tx, hold_rx) = watch::channel(false);
        let browser = Arc::new(Self {
            state: Arc::clone(&state),
            hold_rx,
        });
        let handle = MockBrowserHandle {
            state,
            hold_tx: Arc::new(hold_tx),
        };
        (browser, handle)
    }
}

impl MockBrowserHandle {
    /// Deliver a "service found" event to the active browse stream.
    pub async fn emit_found(&self, name: &str) {
        let tx = self.state.lock().unwrap().event_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.send(BrowseEvent::Found(name.to_string())).await;
        }
    }

    /// Deliver a "service lost" event to the active browse stream.
    pub async fn emit_lost(&self, name: &str) {
        let tx = self.state.lock().unwrap().event_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.send(BrowseEvent::Lost(name.to_string())).await;
        }
    }

    /// Script a successful resolution for `name`.
    pub fn set_resolution(&self, name: &str, address: ResolvedAddress) {
        self.state
            .lock()
            .unwrap()
            .resolutions
            .insert(name.to_string(), Ok(address));
    }

    /// Script a failing resolution for `name`.
    pub fn fail_resolution(&self, name: &str, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .resolutions
            .insert(name.to_string(), Err(reason.to_string()));
    }

    /// Make the next `browse` call fail.
    pub fn fail_browse(&self, reason: &str) {
        self.state.lock().unwrap().fail_browse = Some(reason.to_string());
    }

    /// Block all resolves until [`release_resolves`](Self::release_resolves).
    pub fn hold_resolves(&self) {
        let _ = self.hold_tx.send(true);
    }

    /// Release resolves blocked by [`hold_resolves`](Self::hold_resolves).
    pub fn release_resolves(&self) {
        let _ = self.hold_tx.send(false);
    }

    /// How many times `resolve` was called for `name`.
    #[must_use]
    pub fn resolve_calls(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .resolve_calls
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// How many times `browse` was called.
    #[must_use]
    pub fn browse_calls(&self) -> usize {
        self.state.lock().unwrap().browse_calls
    }
}

#[async_trait]
impl ServiceBrowser for MockBrowser {
    async fn browse(
        &self,
        _service_type: &str,
    ) -> Result<mpsc::Receiver<BrowseEvent>, DiscoveryError> {
        let mut state = self.state.lock().unwrap();
        state.browse_calls += 1;
        if let Some(reason) = state.fail_browse.take() {
            return Err(DiscoveryError::Start(reason));
        }
        let (tx, rx) = mpsc::channel(64);
        state.event_tx = Some(tx);
        Ok(rx)
    }

    async fn stop_browsing(&self) -> Result<(), DiscoveryError> {
        self.state.lock().unwrap().event_tx = None;
        Ok(())
    }

    async fn resolve(&self, service_name: &str) -> Result<ResolvedAddress, DiscoveryError> {
        {
            let mut state = self.state.lock().unwrap();
            *state
                .resolve_calls
                .entry(service_name.to_string())
                .or_insert(0) += 1;
        }

        let mut hold = self.hold_rx.clone();
        while *hold.borrow() {
            if hold.changed().await.is_err() {
                break;
            }
        }

        let state = self.state.lock().unwrap();
        match state.resolutions.get(service_name) {
            Some(Ok(address)) => Ok(address.clone()),
            Some(Err(_)) | None => Err(DiscoveryError::Resolve(service_name.to_string())),
        }
    }
}
