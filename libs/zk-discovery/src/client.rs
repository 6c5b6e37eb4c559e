//! Connection manager.
//!
//! A [`Client`] owns one session with the coordination service. It applies
//! the configured ACL, credentials, timeouts and root payload, tracks the
//! latest session state, and fans every session event out to the registered
//! handlers, off the path that carries session I/O. Once [`Client::stop`]
//! has run the client is closed for good and every operation fails with
//! [`DiscoveryError::ClientClosed`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::entries::{self, EntrySet, EntryWatcher};
use crate::error::{DiscoveryError, DiscoveryResult, ZkError};
use crate::metrics;
use crate::options::{self, ClientConfig, ClientOption, EventHandler};
use crate::path::{self, validate_path};
use crate::session::{Connector, CreateMode, Event, Session, SessionState, format_endpoint};

/// Events waiting for the handlers before new ones are dropped.
const HANDLER_QUEUE: usize = 64;

/// Identifies a registered event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Ordered list of event handlers.
#[derive(Default)]
struct Handlers {
    next: AtomicU64,
    list: RwLock<Vec<(HandlerId, EventHandler)>>,
}

impl Handlers {
    fn add(&self, handler: EventHandler) -> HandlerId {
        let id = HandlerId(self.next.fetch_add(1, Ordering::Relaxed));
        self.list.write().push((id, handler));
        id
    }

    fn remove(&self, id: HandlerId) -> bool {
        let mut list = self.list.write();
        let before = list.len();
        list.retain(|(have, _)| *have != id);
        list.len() != before
    }

    fn dispatch(&self, event: &Event) {
        // handlers may (de)register handlers, don't hold the lock while calling
        let list = self.list.read().clone();
        for (_, handler) in &list {
            handler(event);
        }
    }
}

struct ClientInner {
    session: Arc<dyn Session>,
    config: ClientConfig,
    state: Arc<watch::Sender<SessionState>>,
    handlers: Arc<Handlers>,
    shutdown: CancellationToken,
    stopped: AtomicBool,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if !self.stopped.load(Ordering::Acquire) {
            close_state(&self.state);
        }
    }
}

/// Connection manager for one coordination-service session.
///
/// Cheap to clone; all clones share the session. Dropping the last clone
/// closes the session, as does [`Client::stop`].
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoints", &self.inner.config.endpoints())
            .field("session_id", &self.session_id())
            .field("state", &self.session_state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Client {
    /// Connect to the ensemble behind `endpoints`.
    ///
    /// Options are validated in order and the first invalid one is returned.
    /// Malformed endpoints fail immediately; unreachable ones do not, the
    /// session keeps retrying in the background and reports progress through
    /// events. With credentials configured the digest auth is added before
    /// returning, so an unreachable ensemble then fails with `NoServer`.
    pub async fn new<C, I, S>(
        connector: &C,
        endpoints: I,
        options: Vec<ClientOption>,
    ) -> DiscoveryResult<Self>
    where
        C: Connector + ?Sized,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let endpoints = endpoints
            .into_iter()
            .map(|endpoint| format_endpoint(endpoint.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if endpoints.is_empty() {
            return Err(ZkError::InvalidEndpoint(String::new()).into());
        }
        let (config, user_handlers) = ClientConfig::build(endpoints, options)?;

        let (session, events) = connector.connect(config.endpoints(), config.connect_params())?;
        let (state, _) = watch::channel(SessionState::Unknown);
        let state = Arc::new(state);
        let handlers = Arc::new(Handlers::default());
        for handler in user_handlers {
            handlers.add(handler);
        }
        let shutdown = CancellationToken::new();

        tokio::spawn(dispatch(
            events,
            Arc::clone(&state),
            Arc::clone(&handlers),
            shutdown.clone(),
        ));

        info!(
            endpoints = ?config.endpoints(),
            connect_timeout = ?config.connect_timeout(),
            session_timeout = ?config.session_timeout(),
            "discovery client created"
        );
        let client = Client {
            inner: Arc::new(ClientInner {
                session,
                config,
                state,
                handlers,
                shutdown,
                stopped: AtomicBool::new(false),
            }),
        };

        if let Some(creds) = client.inner.config.credentials() {
            if let Err(err) = client.inner.session.add_auth("digest", &creds.digest()).await {
                warn!(username = creds.username(), error = %err, "failed to add credentials to session");
                client.stop().await;
                return Err(err.into());
            }
            debug!(username = creds.username(), "added digest credentials to session");
        }
        Ok(client)
    }

    /// Connect using settings parsed from a configuration file.
    pub async fn from_config<C>(connector: &C, config: &config::DiscoveryConfig) -> DiscoveryResult<Self>
    where
        C: Connector + ?Sized,
    {
        Self::new(connector, &config.endpoints, options::from_config(config)).await
    }

    /// The validated configuration this client runs with.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Latest session state reported by the service.
    pub fn session_state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Receiver tracking [`Client::session_state`].
    pub fn session_states(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Current session id, `0` while no session is established.
    pub fn session_id(&self) -> i64 {
        self.inner.session.session_id()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Register a callback for every event the client receives. Handlers
    /// run in registration order on a dedicated thread. A slow handler
    /// delays the others and, once the queue fills, makes them miss
    /// events; it never delays session state or requests.
    pub fn register_event_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.handlers.add(Arc::new(handler))
    }

    /// Returns true if the handler was registered.
    pub fn remove_event_handler(&self, id: HandlerId) -> bool {
        self.inner.handlers.remove(id)
    }

    /// Close the session and mark the client closed. Ephemeral nodes owned
    /// by the session are removed by the service. Calling it again is a
    /// no-op.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(session_id = self.session_id(), "stopping discovery client");
        self.inner.shutdown.cancel();
        self.inner.session.close().await;
        close_state(&self.inner.state);
    }

    /// Create every node of `path` that does not exist yet.
    pub async fn create_parent_nodes(&self, path: &str) -> DiscoveryResult<()> {
        self.ensure_open()?;
        validate_path(path)?;
        path::create_parent_nodes(
            self.session(),
            path,
            self.inner.config.acl(),
            self.inner.config.root_payload(),
        )
        .await
        .map_err(|err| self.lift(err))
    }

    /// Payloads of the direct children of `path`, keyed by child name.
    pub async fn get_entries(&self, path: &str) -> DiscoveryResult<EntrySet> {
        self.ensure_open()?;
        validate_path(path)?;
        let (entries, _) = entries::read_entries(self.session(), path)
            .await
            .map_err(|err| self.lift(err))?;
        Ok(entries)
    }

    /// Watch the children of `path`. Nothing is read until the watcher is
    /// first polled.
    pub fn watch_entries(&self, path: &str) -> EntryWatcher {
        EntryWatcher::new(self.clone(), path)
    }

    /// Names of the direct children of `path`.
    pub async fn children(&self, path: &str) -> DiscoveryResult<Vec<String>> {
        self.ensure_open()?;
        validate_path(path)?;
        self.session()
            .children(path)
            .await
            .map_err(|err| self.lift(err))
    }

    /// Create a persistent node with the client's ACL.
    pub async fn create_node(&self, path: &str, data: &[u8]) -> DiscoveryResult<String> {
        self.create(path, data, CreateMode::Persistent).await
    }

    /// Create an ephemeral node owned by the client's session.
    pub async fn create_ephemeral_node(&self, path: &str, data: &[u8]) -> DiscoveryResult<String> {
        self.create(path, data, CreateMode::Ephemeral).await
    }

    /// Create an ephemeral sequential node whose name carries a fresh
    /// `_c_<uuid>-` marker, so the owner can find it again after a lost
    /// reply. `/svc/member-` yields `/svc/_c_<uuid>-member-0000000000`.
    pub async fn create_protected_ephemeral_sequential(
        &self,
        path: &str,
        data: &[u8],
    ) -> DiscoveryResult<String> {
        let protected = path::protected_path(path, &Uuid::new_v4());
        self.create(&protected, data, CreateMode::EphemeralSequential)
            .await
    }

    /// Delete the node at `path`, whatever its version.
    pub async fn delete_node(&self, path: &str) -> DiscoveryResult<()> {
        self.ensure_open()?;
        validate_path(path)?;
        self.session()
            .delete(path, None)
            .await
            .map_err(|err| self.lift(err))?;
        trace!(path, "deleted node");
        Ok(())
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> DiscoveryResult<String> {
        self.ensure_open()?;
        self.session()
            .create(path, data, mode, self.inner.config.acl())
            .await
            .map_err(|err| self.lift(err))
    }

    pub(crate) fn ensure_open(&self) -> DiscoveryResult<()> {
        if self.is_closed() {
            Err(DiscoveryError::ClientClosed)
        } else {
            Ok(())
        }
    }

    /// Service error as seen by callers; anything failing because the
    /// client was stopped mid-call reports `ClientClosed`.
    pub(crate) fn lift(&self, err: ZkError) -> DiscoveryError {
        if self.is_closed() {
            DiscoveryError::ClientClosed
        } else {
            err.into()
        }
    }

    pub(crate) fn session(&self) -> &dyn Session {
        self.inner.session.as_ref()
    }

    /// Resolves once the client is stopped or dropped.
    pub(crate) fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.inner.shutdown.cancelled()
    }

    /// Token cancelled when the client shuts down.
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.inner.shutdown.child_token()
    }
}

/// Record a session transition. A closed client stays closed.
fn track(state: &watch::Sender<SessionState>, next: SessionState) {
    let mut previous = None;
    state.send_if_modified(|current| {
        if *current == SessionState::Closed {
            return false;
        }
        previous = Some(std::mem::replace(current, next));
        true
    });
    let Some(previous) = previous else {
        return;
    };
    metrics::SESSION_EVENTS
        .with_label_values(&[next.as_str()])
        .inc();
    match (
        previous == SessionState::HasSession,
        next == SessionState::HasSession,
    ) {
        (false, true) => metrics::SESSIONS_ACTIVE.inc(),
        (true, false) => metrics::SESSIONS_ACTIVE.dec(),
        _ => {}
    }
    debug!(from = %previous, to = %next, "session state changed");
}

fn close_state(state: &watch::Sender<SessionState>) {
    track(state, SessionState::Closed);
}

/// Pump session events to the state cell and hand them on to the handlers.
///
/// State is tracked here, as events arrive. Handlers run on their own
/// blocking thread behind a bounded queue; when they fall behind, events
/// are dropped for them rather than holding up the session.
async fn dispatch(
    mut events: mpsc::Receiver<Event>,
    state: Arc<watch::Sender<SessionState>>,
    handlers: Arc<Handlers>,
    shutdown: CancellationToken,
) {
    let (queue, pending) = mpsc::channel(HANDLER_QUEUE);
    tokio::task::spawn_blocking(move || run_handlers(pending, handlers));

    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        if event.is_session() {
            track(&state, event.state);
        }
        match queue.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                metrics::HANDLER_EVENTS_DROPPED.inc();
                warn!(kind = ?event.kind, state = %event.state, "event handlers falling behind, dropping event");
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }
    trace!("event dispatch stopped");
}

/// Call every handler for each queued event, in order. Ends once the
/// dispatcher drops the queue.
fn run_handlers(mut pending: mpsc::Receiver<Event>, handlers: Arc<Handlers>) {
    while let Some(event) = pending.blocking_recv() {
        handlers.dispatch(&event);
    }
    trace!("event handlers stopped");
}
