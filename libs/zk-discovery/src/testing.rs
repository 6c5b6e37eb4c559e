//! Scripted session for exercising retry paths the in-memory ensemble
//! cannot trigger on demand.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{ZkError, ZkResult};
use crate::path::split_parent;
use crate::session::{
    Acl, ConnectParams, Connector, CreateMode, Event, EventType, Session, SessionState, Stat,
    WatchReceiver,
};

/// Flat node store. `create` fails with `NoNode` for the first
/// `vanishing_creates` calls, `children_w` hands out an already fired watch
/// for the first `fired_listings` calls.
#[derive(Debug, Default)]
pub(crate) struct ScriptedSession {
    nodes: Mutex<Vec<(String, Vec<u8>)>>,
    vanishing_creates: AtomicUsize,
    fired_listings: AtomicUsize,
    creates: AtomicUsize,
    listings: AtomicUsize,
    watches: Mutex<Vec<oneshot::Sender<Event>>>,
}

impl ScriptedSession {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_node(self, path: &str, data: &[u8]) -> Self {
        self.nodes.lock().push((path.to_owned(), data.to_vec()));
        self
    }

    pub(crate) fn vanishing_creates(self, count: usize) -> Self {
        self.vanishing_creates.store(count, Ordering::SeqCst);
        self
    }

    pub(crate) fn fired_listings(self, count: usize) -> Self {
        self.fired_listings.store(count, Ordering::SeqCst);
        self
    }

    /// Number of `create` calls, failed ones included.
    pub(crate) fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Number of `children_w` calls.
    pub(crate) fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    pub(crate) fn paths(&self) -> Vec<String> {
        self.nodes.lock().iter().map(|(path, _)| path.clone()).collect()
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Session for ScriptedSession {
    fn session_id(&self) -> i64 {
        1
    }

    fn state(&self) -> SessionState {
        SessionState::HasSession
    }

    async fn add_auth(&self, _scheme: &str, _auth: &[u8]) -> ZkResult<()> {
        Ok(())
    }

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        _mode: CreateMode,
        _acl: &[Acl],
    ) -> ZkResult<String> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.vanishing_creates) {
            return Err(ZkError::NoNode);
        }
        let mut nodes = self.nodes.lock();
        if nodes.iter().any(|(have, _)| have == path) {
            return Err(ZkError::NodeExists);
        }
        nodes.push((path.to_owned(), data.to_vec()));
        Ok(path.to_owned())
    }

    async fn exists(&self, path: &str) -> ZkResult<Option<Stat>> {
        let found = self.nodes.lock().iter().any(|(have, _)| have == path);
        Ok(found.then(Stat::default))
    }

    async fn get(&self, path: &str) -> ZkResult<(Vec<u8>, Stat)> {
        self.nodes
            .lock()
            .iter()
            .find(|(have, _)| have == path)
            .map(|(_, data)| (data.clone(), Stat::default()))
            .ok_or(ZkError::NoNode)
    }

    async fn set(&self, _path: &str, _data: &[u8], _version: Option<i32>) -> ZkResult<Stat> {
        Err(ZkError::NoAuth)
    }

    async fn delete(&self, path: &str, _version: Option<i32>) -> ZkResult<()> {
        let mut nodes = self.nodes.lock();
        let before = nodes.len();
        nodes.retain(|(have, _)| have != path);
        if nodes.len() == before {
            Err(ZkError::NoNode)
        } else {
            Ok(())
        }
    }

    async fn children(&self, path: &str) -> ZkResult<Vec<String>> {
        let nodes = self.nodes.lock();
        if path != "/" && !nodes.iter().any(|(have, _)| have == path) {
            return Err(ZkError::NoNode);
        }
        Ok(nodes
            .iter()
            .filter(|(have, _)| have != path && split_parent(have).0 == path)
            .map(|(have, _)| split_parent(have).1.to_owned())
            .collect())
    }

    async fn children_w(&self, path: &str) -> ZkResult<(Vec<String>, Stat, WatchReceiver)> {
        let children = self.children(path).await?;
        self.listings.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        if Self::take(&self.fired_listings) {
            let _ = tx.send(Event::node(EventType::NodeChildrenChanged, path));
        } else {
            self.watches.lock().push(tx);
        }
        Ok((children, Stat::default(), rx))
    }

    async fn close(&self) {}
}

/// Hands out the same scripted session to every client.
#[derive(Debug, Clone)]
pub(crate) struct ScriptedConnector(pub(crate) Arc<ScriptedSession>);

impl Connector for ScriptedConnector {
    fn connect(
        &self,
        _endpoints: &[String],
        _params: ConnectParams,
    ) -> ZkResult<(Arc<dyn Session>, mpsc::Receiver<Event>)> {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(Event::session(SessionState::HasSession));
        Ok((Arc::clone(&self.0) as Arc<dyn Session>, rx))
    }
}
