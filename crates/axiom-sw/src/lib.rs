//! # Axiom Service Worker
//!
//! Offline cache controller for the Axiom application.
//!
//! ## Features
//!
//! - **Lifecycle**: install (pre-populate), activate (purge stale
//!   generations, claim clients), supersede (redundant)
//! - **Fetch interception**: cache-first with network fallback for
//!   same-origin GET requests outside `/api/`
//! - **Notifications**: push display and click routing
//! - **Background sync**: recognized tag, no-op extension point
//!
//! ## Architecture
//!
//! ```text
//! OfflineWorker<N: NetworkBackend>
//!     ├── SharedCacheStorage ── Cache "axiom-v1" ── CacheKey → CacheEntry
//!     ├── Clients ───────────── claimed on activate
//!     ├── NotificationCenter ── push / click
//!     └── WorkerEvent channel ─ StateChange, ControllerChange, ...
//!
//! Registration
//!     ├── installing (RegisteredWorker)
//!     ├── waiting
//!     └── active ────────────── superseded worker → Redundant
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, trace, warn};
use url::Url;

use axiom_cache::{CacheEntry, CacheKey, SharedCacheStorage};
use axiom_net::{FetchRequest, FetchResponse, NetError, NetworkBackend, ResponseKind};

// ==================== Constants ====================

/// Current cache generation tag. Bumping this string is the only supported
/// cache-busting mechanism; the build process rewrites it on release.
pub const CACHE_NAME: &str = "axiom-v1";

/// URLs fetched and stored at install time.
pub const STATIC_ASSETS: &[&str] = &["/", "/assets/axiom-logo.png", "/manifest.json"];

/// Reserved path prefix; requests whose path contains it are never
/// intercepted.
pub const API_PREFIX: &str = "/api/";

/// Notification body when a push arrives without a payload.
pub const DEFAULT_PUSH_BODY: &str = "New update available!";

/// Recognized background sync tag.
pub const SYNC_TAG: &str = "background-sync";

/// Title for displayed notifications.
pub const NOTIFICATION_TITLE: &str = "Axiom";

/// Icon and badge for displayed notifications.
pub const NOTIFICATION_ICON: &str = "/assets/axiom-logo.png";

/// Vibration pattern for displayed notifications.
pub const VIBRATION_PATTERN: &[u32] = &[100, 50, 100];

/// Navigation target for the "explore" notification action.
pub const EXPLORE_PATH: &str = "/explore";

// ==================== Errors ====================

/// Errors that can occur in worker operations.
#[derive(Error, Debug)]
pub enum SwError {
    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

// ==================== Types ====================

/// Unique identifier for a worker generation instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Initial state, not yet installing.
    Parsed,
    /// Installing (pre-populating the cache).
    Installing,
    /// Installed but not yet active.
    Installed,
    /// Activating (purging stale generations, claiming clients).
    Activating,
    /// Active and controlling clients.
    Activated,
    /// Superseded by a newer generation. Terminal.
    Redundant,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::Parsed
    }
}

impl WorkerState {
    /// Whether this state allows fetch interception.
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, WorkerState::Activated)
    }

    /// Whether the worker is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Redundant)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        write!(f, "{}", name)
    }
}

// ==================== Worker Events ====================

/// Events emitted by the worker over its channel.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Lifecycle state changed.
    StateChange {
        worker_id: WorkerId,
        new_state: WorkerState,
    },
    /// A client's controlling generation changed.
    ControllerChange { client_id: String },
    /// A notification was displayed.
    NotificationShown { id: NotificationId },
    /// A displayed notification was clicked.
    NotificationClicked {
        id: NotificationId,
        action: Option<NotificationAction>,
    },
}

// ==================== Registration ====================

/// One worker generation as tracked by a registration.
#[derive(Debug, Clone)]
pub struct RegisteredWorker {
    /// Unique ID.
    pub id: WorkerId,

    /// Cache generation tag this worker serves.
    pub cache_name: String,

    /// Current state.
    pub state: WorkerState,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl RegisteredWorker {
    /// Create a record for a new generation.
    pub fn new(cache_name: &str) -> Self {
        Self {
            id: WorkerId::new(),
            cache_name: cache_name.to_string(),
            state: WorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: WorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state.is_terminal()
    }
}

/// A worker registration for one scope.
///
/// Holds the installing/waiting/active generation slots. Install always
/// precedes activate for a generation; the previously active generation
/// becomes redundant the moment its successor is promoted.
#[derive(Debug)]
pub struct Registration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<RegisteredWorker>,

    /// Installed worker waiting for activation.
    pub waiting: Option<RegisteredWorker>,

    /// Active worker.
    pub active: Option<RegisteredWorker>,
}

impl Registration {
    /// Create an empty registration for a scope.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Start installing a new generation.
    pub fn register(&mut self, cache_name: &str) -> WorkerId {
        let mut worker = RegisteredWorker::new(cache_name);
        worker.set_state(WorkerState::Installing);
        let id = worker.id;
        self.installing = Some(worker);
        id
    }

    /// Transition installing to waiting.
    pub fn install_complete(&mut self) {
        if let Some(mut worker) = self.installing.take() {
            worker.set_state(WorkerState::Installed);
            self.waiting = Some(worker);
        }
    }

    /// Promote the waiting worker. Returns the superseded worker, now
    /// redundant, if there was one.
    pub fn activate(&mut self) -> Option<RegisteredWorker> {
        let mut worker = self.waiting.take()?;
        worker.set_state(WorkerState::Activating);

        let superseded = self.active.take().map(|mut old| {
            old.set_state(WorkerState::Redundant);
            old
        });

        worker.set_state(WorkerState::Activated);
        self.active = Some(worker);
        superseded
    }

    /// Skip waiting (force activation of the waiting worker).
    pub fn skip_waiting(&mut self) -> Option<RegisteredWorker> {
        self.activate()
    }

    /// Unregister, marking every slot redundant.
    pub fn unregister(&mut self) {
        for slot in [
            self.installing.take(),
            self.waiting.take(),
            self.active.take(),
        ]
        .into_iter()
        .flatten()
        {
            let mut worker = slot;
            worker.set_state(WorkerState::Redundant);
        }
    }
}

// ==================== Clients ====================

/// An open application instance (tab/window) under this scope.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Whether focused.
    pub focused: bool,

    /// Cache generation controlling this client, if claimed.
    pub controller: Option<String>,
}

/// The set of open clients.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create an empty client set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Number of open clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no clients are open.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Open a new window at a URL.
    pub fn open_window(&mut self, url: Url) -> Client {
        let client = Client {
            id: client_id(),
            url,
            focused: true,
            controller: None,
        };
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Focus an existing client at a URL, or open a new window there.
    pub fn focus_or_open(&mut self, url: &Url) -> Client {
        if let Some(client) = self.clients.values_mut().find(|c| &c.url == url) {
            client.focused = true;
            return client.clone();
        }
        self.open_window(url.clone())
    }

    /// Remove a client (tab closed).
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Claim every client for a generation. Returns the IDs whose
    /// controller changed.
    pub fn claim(&mut self, generation: &str) -> Vec<String> {
        let mut changed = Vec::new();
        for client in self.clients.values_mut() {
            if client.controller.as_deref() != Some(generation) {
                client.controller = Some(generation.to_string());
                changed.push(client.id.clone());
            }
        }
        changed
    }
}

// ==================== Notifications ====================

/// Unique identifier for a displayed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// The two supported notification actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationAction {
    /// Navigate to the explore page.
    Explore,
    /// Dismiss.
    Close,
}

impl NotificationAction {
    /// Parse a wire action identifier.
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "explore" => Some(Self::Explore),
            "close" => Some(Self::Close),
            _ => None,
        }
    }

    /// Wire identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explore => "explore",
            Self::Close => "close",
        }
    }
}

/// An action button on a notification.
#[derive(Debug, Clone)]
pub struct NotificationActionButton {
    /// Action identifier.
    pub action: NotificationAction,

    /// Button label.
    pub title: String,

    /// Button icon.
    pub icon: String,
}

/// Display options for a notification.
#[derive(Debug, Clone)]
pub struct NotificationOptions {
    /// Body text.
    pub body: String,

    /// Icon URL.
    pub icon: String,

    /// Badge URL.
    pub badge: String,

    /// Vibration pattern.
    pub vibrate: Vec<u32>,

    /// Arrival timestamp (ms since epoch).
    pub arrived_at: u64,

    /// Action buttons.
    pub actions: Vec<NotificationActionButton>,
}

impl NotificationOptions {
    /// Standard options for a push notification with the given body.
    pub fn with_body(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            icon: NOTIFICATION_ICON.to_string(),
            badge: NOTIFICATION_ICON.to_string(),
            vibrate: VIBRATION_PATTERN.to_vec(),
            arrived_at: axiom_common::now_millis(),
            actions: vec![
                NotificationActionButton {
                    action: NotificationAction::Explore,
                    title: "Explore".to_string(),
                    icon: NOTIFICATION_ICON.to_string(),
                },
                NotificationActionButton {
                    action: NotificationAction::Close,
                    title: "Close".to_string(),
                    icon: NOTIFICATION_ICON.to_string(),
                },
            ],
        }
    }
}

/// A displayed notification.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Unique ID.
    pub id: NotificationId,

    /// Title.
    pub title: String,

    /// Display options.
    pub options: NotificationOptions,

    /// Whether the notification has been closed.
    pub closed: bool,
}

/// Displayed notifications for this worker.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    shown: HashMap<NotificationId, Notification>,
}

impl NotificationCenter {
    /// Create an empty center.
    pub fn new() -> Self {
        Self::default()
    }

    /// Display a notification.
    pub fn show(&mut self, title: &str, options: NotificationOptions) -> NotificationId {
        let id = NotificationId::new();
        debug!(title, body = %options.body, "showing notification");
        self.shown.insert(
            id,
            Notification {
                id,
                title: title.to_string(),
                options,
                closed: false,
            },
        );
        id
    }

    /// Get a notification by ID.
    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.shown.get(&id)
    }

    /// Close a notification. Returns false if unknown or already closed.
    pub fn close(&mut self, id: NotificationId) -> bool {
        match self.shown.get_mut(&id) {
            Some(notification) if !notification.closed => {
                notification.closed = true;
                true
            }
            _ => false,
        }
    }

    /// Number of notifications still visible.
    pub fn visible_count(&self) -> usize {
        self.shown.values().filter(|n| !n.closed).count()
    }
}

// ==================== Fetch Decision ====================

/// Per-request interception decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDecision {
    /// Hand the request to the network untouched; no cache involvement.
    Passthrough,
    /// Apply the cache-first strategy.
    Intercept,
}

// ==================== Offline Worker ====================

/// The offline cache controller.
///
/// Constructed once per scope with injected dependencies; each supported
/// event has a handler method. Handlers are independent bounded tasks; the
/// cache store handle is the only shared mutable state between them.
pub struct OfflineWorker<N: NetworkBackend> {
    /// Unique ID.
    pub id: WorkerId,

    scope: Url,
    state: WorkerState,
    cache_name: String,
    static_assets: Vec<String>,
    storage: SharedCacheStorage,
    backend: N,
    clients: Arc<RwLock<Clients>>,
    notifications: Arc<RwLock<NotificationCenter>>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
    skip_waiting: bool,
}

impl<N: NetworkBackend> OfflineWorker<N> {
    /// Create a worker with the standard generation tag and asset list.
    pub fn new(
        scope: Url,
        storage: SharedCacheStorage,
        backend: N,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        Self::with_config(scope, storage, backend, CACHE_NAME, STATIC_ASSETS)
    }

    /// Create a worker with a custom generation tag and asset list.
    pub fn with_config(
        scope: Url,
        storage: SharedCacheStorage,
        backend: N,
        cache_name: &str,
        static_assets: &[&str],
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                id: WorkerId::new(),
                scope,
                state: WorkerState::Parsed,
                cache_name: cache_name.to_string(),
                static_assets: static_assets.iter().map(|s| s.to_string()).collect(),
                storage,
                backend,
                clients: Arc::new(RwLock::new(Clients::new())),
                notifications: Arc::new(RwLock::new(NotificationCenter::new())),
                event_tx,
                skip_waiting: false,
            },
            event_rx,
        )
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Scope URL.
    pub fn scope(&self) -> &Url {
        &self.scope
    }

    /// Cache generation tag.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Whether install requested immediate activation.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting
    }

    /// The cache store handle.
    pub fn storage(&self) -> &SharedCacheStorage {
        &self.storage
    }

    /// Handle to the client set.
    pub fn clients(&self) -> Arc<RwLock<Clients>> {
        Arc::clone(&self.clients)
    }

    /// Handle to the notification center.
    pub fn notifications(&self) -> Arc<RwLock<NotificationCenter>> {
        Arc::clone(&self.notifications)
    }

    fn set_state(&mut self, state: WorkerState) {
        trace!(worker = ?self.id, %state, "state change");
        self.state = state;
        let _ = self.event_tx.send(WorkerEvent::StateChange {
            worker_id: self.id,
            new_state: state,
        });
    }

    /// Install: open the current generation and pre-populate the static
    /// asset list. Population is best-effort; a failed asset is logged and
    /// skipped so that one missing file cannot block activation.
    pub async fn handle_install(&mut self) -> Result<(), SwError> {
        self.set_state(WorkerState::Installing);
        info!(generation = %self.cache_name, "installing");

        self.storage.open(&self.cache_name).await;

        for asset in &self.static_assets {
            let url = self.scope.join(asset)?;
            let request = FetchRequest::get(url.clone());
            match self.backend.fetch(&request).await {
                Ok(response) if response.is_cacheable() => {
                    let key = CacheKey::for_get(url.as_str());
                    let entry = entry_from_response(&request, &response);
                    if let Err(err) = self.storage.put(&self.cache_name, key, entry).await {
                        warn!(asset = %asset, error = %err, "cache write failed");
                    }
                }
                Ok(response) => {
                    warn!(asset = %asset, status = response.status, "asset not cacheable");
                }
                Err(err) => {
                    warn!(asset = %asset, error = %err, "asset pre-fetch failed");
                }
            }
        }

        // Become active without waiting for open clients to close.
        self.skip_waiting = true;
        self.set_state(WorkerState::Installed);
        Ok(())
    }

    /// Activate: purge every stale cache generation, then claim all open
    /// clients so in-flight pages use this generation without a reload.
    /// Cleanup is awaited to completion before any client is claimed.
    pub async fn handle_activate(&mut self) {
        self.set_state(WorkerState::Activating);
        info!(generation = %self.cache_name, "activating");

        let removed = self.storage.purge_except(&self.cache_name).await;
        if !removed.is_empty() {
            debug!(count = removed.len(), "purged stale cache generations");
        }

        let claimed = self.clients.write().await.claim(&self.cache_name);
        for client_id in claimed {
            let _ = self.event_tx.send(WorkerEvent::ControllerChange { client_id });
        }

        self.set_state(WorkerState::Activated);
    }

    /// Per-request interception decision, in order: worker must be active;
    /// only GET; never the reserved API prefix; never cross-origin.
    pub fn decide(&self, request: &FetchRequest) -> FetchDecision {
        if !self.state.can_intercept_fetch() {
            return FetchDecision::Passthrough;
        }
        if !request.is_get() {
            return FetchDecision::Passthrough;
        }
        if request.path().contains(API_PREFIX) || !request.same_origin(&self.scope) {
            return FetchDecision::Passthrough;
        }
        FetchDecision::Intercept
    }

    /// Handle an intercepted request: cache-first, network on miss, root
    /// document fallback when the network is unreachable.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<FetchResponse, SwError> {
        if self.decide(request) == FetchDecision::Passthrough {
            trace!(method = %request.method, url = %request.url, "passthrough");
            return Ok(self.backend.fetch(request).await?);
        }

        let key = CacheKey::new(&request.method, request.url.as_str());
        if let Some(entry) = self.storage.match_request(&self.cache_name, &key).await {
            debug!(url = %request.url, "cache hit");
            return Ok(response_from_entry(&entry));
        }

        match self.backend.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    // The caller gets the original; the store gets its own copy.
                    let entry = entry_from_response(request, &response);
                    if let Err(err) = self.storage.put(&self.cache_name, key, entry).await {
                        warn!(url = %request.url, error = %err, "cache write failed");
                    }
                }
                Ok(response)
            }
            Err(err) => {
                warn!(url = %request.url, error = %err, "fetch failed, trying root fallback");
                let root = CacheKey::for_get(self.scope.join("/")?.as_str());
                match self.storage.match_request(&self.cache_name, &root).await {
                    Some(entry) => Ok(response_from_entry(&entry)),
                    None => Err(err.into()),
                }
            }
        }
    }

    /// Handle a push event. The display is awaited; the push counts as
    /// handled only once the notification is up.
    pub async fn handle_push(&self, payload: Option<&str>) -> NotificationId {
        let body = payload.unwrap_or(DEFAULT_PUSH_BODY);
        debug!(body, "push received");

        let options = NotificationOptions::with_body(body);
        let id = self.notifications.write().await.show(NOTIFICATION_TITLE, options);
        let _ = self.event_tx.send(WorkerEvent::NotificationShown { id });
        id
    }

    /// Handle a click on a displayed notification: close it, then open or
    /// focus a window at `/explore` for the explore action, `/` otherwise.
    pub async fn handle_notification_click(
        &self,
        id: NotificationId,
        action: Option<NotificationAction>,
    ) -> Result<Client, SwError> {
        self.notifications.write().await.close(id);

        let target = match action {
            Some(NotificationAction::Explore) => EXPLORE_PATH,
            _ => "/",
        };
        let url = self.scope.join(target)?;
        let client = self.clients.write().await.focus_or_open(&url);

        let _ = self.event_tx.send(WorkerEvent::NotificationClicked { id, action });
        Ok(client)
    }

    /// Handle a background sync event. Recognizes the sync tag and returns;
    /// deferred retry work would be queued here once the product needs it.
    pub fn handle_sync(&self, tag: &str) {
        if tag == SYNC_TAG {
            debug!(tag, "background sync triggered");
        } else {
            trace!(tag, "ignoring unknown sync tag");
        }
    }
}

// ==================== Helpers ====================

/// Generate a client ID.
fn client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!(
        "client-{:x}-{}",
        axiom_common::now_millis(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Build the stored duplicate of a response.
fn entry_from_response(request: &FetchRequest, response: &FetchResponse) -> CacheEntry {
    CacheEntry::new(
        request.url.as_str(),
        response.status,
        response.headers.clone(),
        response.body.clone(),
    )
}

/// Rebuild a response from a stored entry.
fn response_from_entry(entry: &CacheEntry) -> FetchResponse {
    FetchResponse {
        status: entry.status,
        status_text: "OK".to_string(),
        headers: entry.headers.clone(),
        body: entry.body.clone(),
        kind: ResponseKind::Basic,
        redirected: false,
        from_cache: true,
    }
}
