//! Connectivity detection layered over the network backend.
//!
//! The application used to learn about lost connectivity by patching the
//! global fetch function. Here the detection is a decorator around the
//! explicit backend: every observed outcome updates a shared online flag
//! that interested parties watch.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{FetchRequest, FetchResponse, NetError, NetworkBackend};

/// Shared online/offline state.
///
/// Starts online; transitions are driven by observed fetch outcomes.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    /// Create a monitor in the online state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    /// Current online state.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Set the online state. Watchers are only woken on a change.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|state| {
            if *state != online {
                *state = online;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(online, "connectivity changed");
        }
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Backend decorator that feeds the connectivity monitor.
///
/// A failed fetch marks the monitor offline. A completed response below 500
/// marks it online. A 5xx response changes nothing on its own: the server
/// answered, so the network is not conclusively down.
pub struct MonitoredBackend<N> {
    inner: N,
    monitor: ConnectivityMonitor,
}

impl<N: NetworkBackend> MonitoredBackend<N> {
    /// Wrap a backend.
    pub fn new(inner: N, monitor: ConnectivityMonitor) -> Self {
        Self { inner, monitor }
    }

    /// The monitor this decorator feeds.
    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }
}

impl<N: NetworkBackend> NetworkBackend for MonitoredBackend<N> {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, NetError> {
        match self.inner.fetch(request).await {
            Ok(response) => {
                if response.status < 500 {
                    self.monitor.set_online(true);
                }
                Ok(response)
            }
            Err(err) => {
                warn!(url = %request.url, error = %err, "fetch failed, marking offline");
                self.monitor.set_online(false);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResponseKind;
    use bytes::Bytes;
    use hashbrown::HashMap;
    use std::sync::Mutex;
    use url::Url;

    struct ScriptedBackend {
        replies: Mutex<Vec<Result<FetchResponse, NetError>>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<FetchResponse, NetError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
            }
        }
    }

    impl NetworkBackend for ScriptedBackend {
        async fn fetch(&self, _request: &FetchRequest) -> Result<FetchResponse, NetError> {
            self.replies.lock().unwrap().remove(0)
        }
    }

    fn response(status: u16) -> FetchResponse {
        FetchResponse {
            status,
            status_text: String::new(),
            headers: HashMap::new(),
            body: Bytes::new(),
            kind: ResponseKind::Basic,
            redirected: false,
            from_cache: false,
        }
    }

    fn request() -> FetchRequest {
        FetchRequest::get(Url::parse("https://axiom.app/").unwrap())
    }

    #[test]
    fn test_monitor_starts_online() {
        let monitor = ConnectivityMonitor::new();
        assert!(monitor.is_online());
    }

    #[test]
    fn test_monitor_notifies_watchers() {
        let monitor = ConnectivityMonitor::new();
        let rx = monitor.subscribe();

        monitor.set_online(false);
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow());
    }

    #[tokio::test]
    async fn test_failure_marks_offline() {
        let monitor = ConnectivityMonitor::new();
        let backend = MonitoredBackend::new(
            ScriptedBackend::new(vec![Err(NetError::RequestFailed(
                "connection refused".to_string(),
            ))]),
            monitor.clone(),
        );

        assert!(backend.fetch(&request()).await.is_err());
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_success_marks_online_again() {
        let monitor = ConnectivityMonitor::new();
        monitor.set_online(false);

        let backend = MonitoredBackend::new(
            ScriptedBackend::new(vec![Ok(response(200))]),
            monitor.clone(),
        );

        backend.fetch(&request()).await.unwrap();
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_server_error_does_not_flip_state() {
        let monitor = ConnectivityMonitor::new();
        monitor.set_online(false);

        let backend = MonitoredBackend::new(
            ScriptedBackend::new(vec![Ok(response(503))]),
            monitor.clone(),
        );

        backend.fetch(&request()).await.unwrap();
        assert!(!monitor.is_online());
    }
}
