//! Instance publication.
//!
//! A [`Publisher`] announces "this instance is alive" by holding one
//! ephemeral node under a service path. The node lives exactly as long as
//! the client's session: the service reclaims it when the session ends,
//! and the publisher re-creates it once a replacement session is up.
//!
//! Nodes are protected ephemeral sequential nodes named
//! `_c_<uuid>-instance-<sequence>`. The uuid is fixed per publisher, which
//! lets it tell after a reconnect whether its node survived (plain
//! connection loss) or must be created again (session expiry).

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::client::{Client, HandlerId};
use crate::error::{DiscoveryError, DiscoveryResult, ZkError};
use crate::metrics;
use crate::path::{is_protected_by, join, protected_path, split_parent, validate_path};
use crate::session::{CreateMode, SessionState};

/// Error a factory returns for a payload it cannot turn into an endpoint.
pub type FactoryError = Box<dyn Error + Send + Sync>;

/// Name given to publisher nodes, after the protection marker.
const INSTANCE_NAME: &str = "instance-";

/// Registration state of a [`Publisher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublisherState {
    /// Not registered: stopped, or never got that far.
    Unregistered,
    /// Waiting for a session to (re-)create the node in.
    Registering,
    /// The node exists.
    Registered,
    /// The last attempt to create the node failed; the next established
    /// session retries.
    Failed,
}

/// Everything needed to (re-)create the node.
struct Registration {
    id: Uuid,
    /// service path the node lives under
    path: String,
    payload: Vec<u8>,
    node: Mutex<Option<String>>,
    state: watch::Sender<PublisherState>,
}

impl Registration {
    fn set_state(&self, state: PublisherState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            trace!(path = %self.path, from = ?current, to = ?state, "publisher state changed");
            *current = state;
            true
        });
    }

    fn is_unregistered(&self) -> bool {
        *self.state.borrow() == PublisherState::Unregistered
    }

    async fn create(&self, client: &Client) -> DiscoveryResult<String> {
        client.create_parent_nodes(&self.path).await?;
        let prefix = protected_path(&join(&self.path, INSTANCE_NAME), &self.id);
        client
            .session()
            .create(
                &prefix,
                &self.payload,
                CreateMode::EphemeralSequential,
                client.config().acl(),
            )
            .await
            .map_err(|err| client.lift(err))
    }

    /// Node under the service path carrying this registration's marker.
    async fn find(&self, client: &Client) -> DiscoveryResult<Option<String>> {
        let children = match client.children(&self.path).await {
            Ok(children) => children,
            Err(err) if err == ZkError::NoNode => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(children
            .into_iter()
            .find(|name| is_protected_by(name, &self.id))
            .map(|name| join(&self.path, &name)))
    }

    async fn register(&self, client: &Client) -> DiscoveryResult<String> {
        let mut node = self.node.lock().await;
        self.set_state(PublisherState::Registering);
        match self.create(client).await {
            Ok(created) => {
                info!(path = %self.path, node = %created, session_id = client.session_id(), "registered instance");
                metrics::REGISTRATIONS.inc();
                *node = Some(created.clone());
                self.set_state(PublisherState::Registered);
                Ok(created)
            }
            Err(err) => {
                metrics::REGISTRATION_FAILURES.inc();
                self.set_state(PublisherState::Failed);
                Err(err)
            }
        }
    }

    /// Re-create the node if the current session does not hold it.
    async fn ensure_registered(&self, client: &Client) {
        let mut node = self.node.lock().await;
        if self.is_unregistered() {
            return;
        }
        let outcome = match self.find(client).await {
            Ok(Some(existing)) => {
                debug!(path = %self.path, node = %existing, "instance node survived reconnect");
                Ok(existing)
            }
            Ok(None) => self.create(client).await.inspect(|created| {
                metrics::REREGISTRATIONS.inc();
                info!(path = %self.path, node = %created, session_id = client.session_id(), "re-registered instance");
            }),
            Err(err) => Err(err),
        };
        match outcome {
            Ok(current) => {
                *node = Some(current);
                self.set_state(PublisherState::Registered);
            }
            Err(err) if err.is_closed() => {}
            Err(err) => {
                metrics::REGISTRATION_FAILURES.inc();
                warn!(path = %self.path, error = %err, "failed to re-register instance");
                self.set_state(PublisherState::Failed);
            }
        }
    }

    /// Follow session transitions until `shutdown` fires.
    async fn maintain(
        self: Arc<Self>,
        client: Client,
        mut wake: mpsc::Receiver<()>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                woke = wake.recv() => if woke.is_none() {
                    break;
                },
            }
            match client.session_state() {
                SessionState::HasSession => self.ensure_registered(&client).await,
                SessionState::Expired => {
                    if !self.is_unregistered() {
                        debug!(path = %self.path, "session expired, instance node lost");
                        self.set_state(PublisherState::Registering);
                    }
                }
                _ => {}
            }
        }
        trace!(path = %self.path, "publisher maintenance stopped");
    }
}

/// Keeps this instance registered under a service path.
pub struct Publisher<E> {
    registration: Arc<Registration>,
    client: Client,
    endpoint: E,
    handler: HandlerId,
    shutdown: CancellationToken,
    stopped: AtomicBool,
}

impl<E: fmt::Debug> fmt::Debug for Publisher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("path", &self.registration.path)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl<E> Publisher<E> {
    /// Register `payload` under the service `path`.
    ///
    /// `factory` is applied to the payload first and must accept it; the
    /// result is available as [`Publisher::endpoint`]. Missing ancestors of
    /// `path` are created. Errors from the service are returned unchanged
    /// and nothing keeps retrying in the background.
    pub async fn new<F>(
        client: &Client,
        path: &str,
        payload: impl Into<Vec<u8>>,
        factory: F,
    ) -> DiscoveryResult<Self>
    where
        F: Fn(&[u8]) -> Result<E, FactoryError>,
    {
        client.ensure_open()?;
        validate_path(path)?;
        let payload = payload.into();
        let endpoint = factory(&payload).map_err(|err| DiscoveryError::Factory(err.to_string()))?;

        let (state, _) = watch::channel(PublisherState::Unregistered);
        let registration = Arc::new(Registration {
            id: Uuid::new_v4(),
            path: path.to_owned(),
            payload,
            node: Mutex::new(None),
            state,
        });

        // subscribe before registering so no session transition is missed
        let (wake_tx, wake_rx) = mpsc::channel(1);
        let handler = client.register_event_handler(move |event| {
            if event.is_session() {
                let _ = wake_tx.try_send(());
            }
        });

        if let Err(err) = registration.register(client).await {
            client.remove_event_handler(handler);
            warn!(path, error = %err, "failed to register instance");
            return Err(err);
        }
        metrics::PUBLISHERS_ACTIVE.inc();

        let shutdown = client.child_token();
        tokio::spawn(Arc::clone(&registration).maintain(
            client.clone(),
            wake_rx,
            shutdown.clone(),
        ));

        Ok(Self {
            registration,
            client: client.clone(),
            endpoint,
            handler,
            shutdown,
            stopped: AtomicBool::new(false),
        })
    }

    /// The endpoint the factory built from the payload.
    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    /// Service path the instance is registered under.
    pub fn path(&self) -> &str {
        &self.registration.path
    }

    /// Full path of the current node, if registered.
    pub async fn node(&self) -> Option<String> {
        self.registration.node.lock().await.clone()
    }

    /// Name of the current node under the service path.
    pub async fn node_name(&self) -> Option<String> {
        self.node()
            .await
            .map(|node| split_parent(&node).1.to_owned())
    }

    pub fn state(&self) -> PublisherState {
        *self.registration.state.borrow()
    }

    /// Receiver tracking [`Publisher::state`].
    pub fn state_changes(&self) -> watch::Receiver<PublisherState> {
        self.registration.state.subscribe()
    }

    /// Deregister: delete the node and stop following the session. If the
    /// client is already closed the session took the node with it and this
    /// succeeds without contacting the service. Calling it again is a
    /// no-op.
    pub async fn stop(&self) -> DiscoveryResult<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.release();

        let node = {
            let mut node = self.registration.node.lock().await;
            self.registration.set_state(PublisherState::Unregistered);
            node.take()
        };
        let Some(node) = node else {
            return Ok(());
        };
        if self.client.is_closed() {
            debug!(%node, "client closed, instance node already gone");
            return Ok(());
        }
        match self.client.delete_node(&node).await {
            Ok(()) => {
                info!(path = %self.registration.path, %node, "deregistered instance");
                Ok(())
            }
            Err(err) if err == ZkError::NoNode || err.is_closed() => Ok(()),
            Err(err) => {
                warn!(%node, error = %err, "failed to delete instance node");
                Err(err)
            }
        }
    }

    fn release(&self) {
        self.shutdown.cancel();
        self.client.remove_event_handler(self.handler);
        metrics::PUBLISHERS_ACTIVE.dec();
    }
}

impl<E> Drop for Publisher<E> {
    fn drop(&mut self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.release();
            debug!(path = %self.registration.path, "publisher dropped without stop, node lives until the session ends");
        }
    }
}
