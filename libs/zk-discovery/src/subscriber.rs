//! Instance lookup.
//!
//! A [`Subscriber`] keeps the endpoints registered under a service path
//! current: it follows the entry watcher, runs every payload through a
//! factory and publishes the result on a `watch` channel.

use std::fmt;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::{Client, HandlerId};
use crate::entries::{EntrySet, EntryWatcher};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::path::validate_path;
use crate::publisher::FactoryError;
use crate::session::SessionState;

/// Latest endpoints, or the error that interrupted the watch.
pub type Endpoints<E> = DiscoveryResult<Vec<E>>;

/// Live set of endpoints registered under a service path.
pub struct Subscriber<E> {
    client: Client,
    path: String,
    endpoints: watch::Receiver<Endpoints<E>>,
    handler: HandlerId,
    shutdown: CancellationToken,
}

impl<E: fmt::Debug> fmt::Debug for Subscriber<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("path", &self.path)
            .field("endpoints", &*self.endpoints.borrow())
            .finish()
    }
}

impl<E> Subscriber<E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Subscribe to the instances under `path`, creating the path if needed.
    ///
    /// The first read happens before this returns and its error, if any, is
    /// returned. Later errors are published through [`Subscriber::changes`];
    /// the subscriber then waits for the session to come back and resumes.
    pub async fn new<F>(client: &Client, path: &str, factory: F) -> DiscoveryResult<Self>
    where
        F: Fn(&[u8]) -> Result<E, FactoryError> + Send + Sync + 'static,
    {
        client.ensure_open()?;
        validate_path(path)?;
        client.create_parent_nodes(path).await?;

        let mut watcher = client.watch_entries(path);
        let first = watcher
            .next()
            .await
            .unwrap_or(Err(DiscoveryError::ClientClosed))?;
        let (tx, endpoints) = watch::channel(Ok(build(&factory, path, &first)));
        info!(path, instances = first.len(), "subscribed to service");

        let (wake_tx, wake_rx) = mpsc::channel(1);
        let handler = client.register_event_handler(move |event| {
            if event.is_session() && event.state == SessionState::HasSession {
                let _ = wake_tx.try_send(());
            }
        });

        let shutdown = client.child_token();
        let follower = Follower {
            client: client.clone(),
            path: path.to_owned(),
            factory,
            tx,
            wake: wake_rx,
            shutdown: shutdown.clone(),
        };
        tokio::spawn(follower.run(watcher));

        Ok(Self {
            client: client.clone(),
            path: path.to_owned(),
            endpoints,
            handler,
            shutdown,
        })
    }

    /// Latest endpoints, or the error that interrupted the watch.
    pub fn endpoints(&self) -> Endpoints<E> {
        self.endpoints.borrow().clone()
    }

    /// Receiver notified on every refresh.
    pub fn changes(&self) -> watch::Receiver<Endpoints<E>> {
        self.endpoints.clone()
    }
}

impl<E> Subscriber<E> {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Stop following the service path. Calling it again is a no-op.
    pub fn stop(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.client.remove_event_handler(self.handler);
        debug!(path = %self.path, "subscriber stopped");
    }
}

impl<E> Drop for Subscriber<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Map every payload through `factory`, skipping the ones it rejects.
fn build<E, F>(factory: &F, path: &str, entries: &EntrySet) -> Vec<E>
where
    F: Fn(&[u8]) -> Result<E, FactoryError>,
{
    entries
        .iter()
        .filter_map(|(name, payload)| match factory(payload) {
            Ok(endpoint) => Some(endpoint),
            Err(err) => {
                warn!(path, entry = name, error = %err, "factory rejected entry, skipping");
                None
            }
        })
        .collect()
}

/// Background half of a [`Subscriber`].
struct Follower<E, F> {
    client: Client,
    path: String,
    factory: F,
    tx: watch::Sender<Endpoints<E>>,
    wake: mpsc::Receiver<()>,
    shutdown: CancellationToken,
}

impl<E, F> Follower<E, F>
where
    E: Send + Sync + 'static,
    F: Fn(&[u8]) -> Result<E, FactoryError> + Send + Sync + 'static,
{
    async fn run(mut self, mut watcher: EntryWatcher) {
        let mut eager = true;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = watcher.next() => next,
            };
            match next {
                Some(Ok(entries)) => {
                    let endpoints = build(&self.factory, &self.path, &entries);
                    trace!(path = %self.path, instances = endpoints.len(), "service instances refreshed");
                    self.tx.send_replace(Ok(endpoints));
                    eager = true;
                }
                Some(Err(err)) if err.is_closed() => {
                    self.tx.send_replace(Err(err));
                    break;
                }
                Some(Err(err)) => {
                    warn!(path = %self.path, error = %err, "watching service instances failed");
                    self.tx.send_replace(Err(err.clone()));
                    if !self.wait_for_session(&err, eager).await {
                        break;
                    }
                    eager = false;
                    debug!(path = %self.path, "resuming watch on service instances");
                    watcher = self.client.watch_entries(&self.path);
                }
                None => break,
            }
        }
        trace!(path = %self.path, "subscriber follower stopped");
    }

    /// Wait for a fresh session, or one session timeout at most. Returns
    /// false on shutdown.
    ///
    /// A transport failure seen while the session is already back resumes
    /// at once when `eager`, which is cleared after a resume that failed
    /// again.
    async fn wait_for_session(&mut self, err: &DiscoveryError, eager: bool) -> bool {
        // wake-ups queued before the failure are stale
        while self.wake.try_recv().is_ok() {}
        if eager
            && err.is_retryable()
            && self.client.session_state() == SessionState::HasSession
        {
            trace!(path = %self.path, "session already re-established");
            return !self.shutdown.is_cancelled();
        }
        let backoff = self.client.config().session_timeout();
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = self.wake.recv() => true,
            _ = tokio::time::sleep(backoff) => true,
        }
    }
}
