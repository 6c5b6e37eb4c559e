//! In-process coordination service.
//!
//! [`MemoryEnsemble`] implements [`Connector`] over a node tree held in
//! memory, with the session semantics discovery depends on: endpoints are
//! only reachable once [`MemoryEnsemble::serve`]d, every session gets an id,
//! ephemeral nodes belong to their session and are reclaimed when it closes
//! or expires, child watches are one-shot, and a session whose connection is
//! lost survives until its session timeout runs out.
//!
//! Connection loss and expiry can be injected with
//! [`MemoryEnsemble::drop_connection`] and [`MemoryEnsemble::expire_session`].
//!
//! Digest identities are compared as the raw `user:password` string the
//! session authenticated with.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    ops::Bound,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace};

use crate::error::{ZkError, ZkResult};
use crate::path::{split_parent, validate_path};
use crate::session::{
    Acl, ConnectParams, Connector, CreateMode, Event, EventType, Perms, Session, SessionState,
    Stat, WatchReceiver, format_endpoint,
};

/// Capacity of the session event queue handed to the client.
const EVENT_BUFFER: usize = 64;

/// Upper bound between reconnect attempts when no endpoint is served.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// An in-memory coordination service. Cloning shares the same tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryEnsemble {
    tree: Arc<Mutex<Tree>>,
}

#[derive(Debug)]
struct Tree {
    servers: BTreeSet<String>,
    nodes: BTreeMap<String, Node>,
    sessions: HashMap<i64, SessionSlot>,
    child_watches: HashMap<String, Vec<Watcher>>,
    zxid: i64,
    last_session_id: i64,
}

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    acl: Vec<Acl>,
    stat: Stat,
}

#[derive(Debug)]
struct Watcher {
    session_id: i64,
    tx: oneshot::Sender<Event>,
}

#[derive(Debug)]
struct SessionSlot {
    server: String,
    connected: bool,
    /// bumped on every connect/disconnect so stale expiry timers can tell
    generation: u64,
    timeout: Duration,
    auth: Vec<(String, String)>,
    control: mpsc::UnboundedSender<Control>,
    shared: Arc<Shared>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Drop,
    Expire,
    Close,
}

#[derive(Debug)]
enum AttachError {
    Unreachable,
    Expired,
}

impl MemoryEnsemble {
    /// An ensemble that serves no endpoint yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// An ensemble serving every endpoint in `endpoints`.
    pub fn with_servers<I, S>(endpoints: I) -> ZkResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ensemble = Self::new();
        for endpoint in endpoints {
            ensemble.serve(endpoint.as_ref())?;
        }
        Ok(ensemble)
    }

    /// Start accepting sessions on `endpoint`; returns the normalized
    /// `host:port` form.
    pub fn serve(&self, endpoint: &str) -> ZkResult<String> {
        let endpoint = format_endpoint(endpoint)?;
        self.tree.lock().servers.insert(endpoint.clone());
        info!(%endpoint, "memory ensemble serving endpoint");
        Ok(endpoint)
    }

    /// Stop accepting sessions on `endpoint` and drop the connections going
    /// through it. Those sessions expire unless they reconnect elsewhere
    /// within their session timeout.
    pub fn stop_serving(&self, endpoint: &str) -> ZkResult<()> {
        let endpoint = format_endpoint(endpoint)?;
        let mut tree = self.tree.lock();
        tree.servers.remove(&endpoint);
        let affected = tree
            .sessions
            .iter()
            .filter(|(_, slot)| slot.connected && slot.server == endpoint)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for id in affected {
            self.disconnect(&mut tree, id);
        }
        info!(%endpoint, "memory ensemble stopped serving endpoint");
        Ok(())
    }

    /// Ids of every session the service currently knows about.
    pub fn sessions(&self) -> Vec<i64> {
        let mut ids = self.tree.lock().sessions.keys().copied().collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    /// Expire a session now, as if its timeout had elapsed. Its ephemeral
    /// nodes are removed and the owning client receives an `Expired` event
    /// before it establishes a fresh session.
    pub fn expire_session(&self, session_id: i64) -> bool {
        let mut tree = self.tree.lock();
        let Some(slot) = tree.sessions.get(&session_id) else {
            return false;
        };
        // requests wait for the replacement session instead of failing
        slot.shared.link.send_replace(Link::Connecting);
        let control = slot.control.clone();
        tree.close_session(session_id);
        let _ = control.send(Control::Expire);
        info!(session_id, "expired session");
        true
    }

    /// Sever the connection of a session without expiring it. The client
    /// reconnects and resumes the same session.
    pub fn drop_connection(&self, session_id: i64) -> bool {
        let mut tree = self.tree.lock();
        match tree.sessions.get(&session_id) {
            Some(slot) if slot.connected => {
                self.disconnect(&mut tree, session_id);
                true
            }
            _ => false,
        }
    }

    /// Returns true if a node exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.tree.lock().nodes.contains_key(path)
    }

    /// Data and stat of the node at `path`.
    pub fn node(&self, path: &str) -> Option<(Vec<u8>, Stat)> {
        self.tree
            .lock()
            .nodes
            .get(path)
            .map(|node| (node.data.clone(), node.stat))
    }

    fn disconnect(&self, tree: &mut Tree, session_id: i64) {
        let Some(slot) = tree.sessions.get_mut(&session_id) else {
            return;
        };
        slot.connected = false;
        slot.generation += 1;
        let (generation, timeout) = (slot.generation, slot.timeout);
        slot.shared.link.send_replace(Link::Connecting);
        let _ = slot.control.send(Control::Drop);
        debug!(session_id, ?timeout, "dropped session connection");

        let ensemble = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            ensemble.expire_if_idle(session_id, generation);
        });
    }

    fn expire_if_idle(&self, session_id: i64, generation: u64) {
        let mut tree = self.tree.lock();
        let idle = matches!(
            tree.sessions.get(&session_id),
            Some(slot) if !slot.connected && slot.generation == generation
        );
        if idle {
            info!(session_id, "session timed out while disconnected");
            tree.close_session(session_id);
        }
    }

    fn attach(
        &self,
        endpoints: &[String],
        resume: Option<i64>,
        timeout: Duration,
        auth: Vec<(String, String)>,
        control: &mpsc::UnboundedSender<Control>,
        shared: &Arc<Shared>,
    ) -> Result<(i64, String), AttachError> {
        let mut tree = self.tree.lock();
        let server = endpoints
            .iter()
            .find(|endpoint| tree.servers.contains(*endpoint))
            .cloned()
            .ok_or(AttachError::Unreachable)?;

        match resume {
            Some(id) => {
                let slot = tree.sessions.get_mut(&id).ok_or(AttachError::Expired)?;
                slot.connected = true;
                slot.generation += 1;
                slot.server = server.clone();
                Ok((id, server))
            }
            None => {
                tree.last_session_id += 1;
                let id = tree.last_session_id;
                tree.sessions.insert(
                    id,
                    SessionSlot {
                        server: server.clone(),
                        connected: true,
                        generation: 0,
                        timeout,
                        auth,
                        control: control.clone(),
                        shared: Arc::clone(shared),
                    },
                );
                Ok((id, server))
            }
        }
    }

    fn close(&self, session_id: i64) {
        self.tree.lock().close_session(session_id);
    }
}

impl Default for Tree {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_owned(),
            Node {
                data: Vec::new(),
                acl: Acl::world(Perms::ALL),
                stat: Stat::default(),
            },
        );
        Self {
            servers: BTreeSet::new(),
            nodes,
            sessions: HashMap::new(),
            child_watches: HashMap::new(),
            zxid: 0,
            last_session_id: 0,
        }
    }
}

impl Tree {
    fn live(&self, session_id: i64) -> ZkResult<&SessionSlot> {
        match self.sessions.get(&session_id) {
            None => Err(ZkError::SessionExpired),
            Some(slot) if !slot.connected => Err(ZkError::NoServer),
            Some(slot) => Ok(slot),
        }
    }

    fn check(&self, session_id: i64, acl: &[Acl], perm: Perms) -> ZkResult<()> {
        let slot = self.live(session_id)?;
        let granted = acl.iter().any(|entry| {
            entry.perms.contains(perm)
                && match entry.scheme.as_str() {
                    "world" => entry.id == "anyone",
                    scheme => slot
                        .auth
                        .iter()
                        .any(|(have, id)| have == scheme && *id == entry.id),
                }
        });
        if granted { Ok(()) } else { Err(ZkError::NoAuth) }
    }

    /// Replace `auth:` entries with the identities of the session.
    fn resolve_acl(&self, session_id: i64, acl: &[Acl]) -> ZkResult<Vec<Acl>> {
        if acl.is_empty() {
            return Err(ZkError::InvalidAcl);
        }
        let slot = self.live(session_id)?;
        let mut resolved = Vec::with_capacity(acl.len());
        for entry in acl {
            if entry.scheme == "auth" {
                if slot.auth.is_empty() {
                    return Err(ZkError::InvalidAcl);
                }
                resolved.extend(
                    slot.auth
                        .iter()
                        .map(|(scheme, id)| Acl::new(entry.perms, scheme.clone(), id.clone())),
                );
            } else {
                resolved.push(entry.clone());
            }
        }
        Ok(resolved)
    }

    fn next_zxid(&mut self) -> i64 {
        self.zxid += 1;
        self.zxid
    }

    fn node(&self, path: &str) -> ZkResult<&Node> {
        validate_path(path)?;
        self.nodes.get(path).ok_or(ZkError::NoNode)
    }

    fn fire(&mut self, path: &str, kind: EventType) {
        if let Some(watchers) = self.child_watches.remove(path) {
            trace!(path, ?kind, watchers = watchers.len(), "firing child watches");
            for watcher in watchers {
                let _ = watcher.tx.send(Event::node(kind, path));
            }
        }
    }

    fn create(
        &mut self,
        session_id: i64,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        acl: &[Acl],
    ) -> ZkResult<String> {
        // sequential nodes may end in '/', the counter completes the name
        if mode.is_sequential() {
            validate_path(&format!("{path}0"))?;
        } else {
            validate_path(path)?;
        }
        if path == "/" {
            return Err(ZkError::NodeExists);
        }
        let acl = self.resolve_acl(session_id, acl)?;
        let (parent, _) = split_parent(path);
        let parent_node = self.nodes.get(parent).ok_or(ZkError::NoNode)?;
        self.check(session_id, &parent_node.acl, Perms::CREATE)?;
        if parent_node.stat.ephemeral_owner != 0 {
            return Err(ZkError::NoChildrenForEphemerals);
        }
        let name = if mode.is_sequential() {
            format!("{path}{:010}", parent_node.stat.cversion)
        } else {
            path.to_owned()
        };
        if self.nodes.contains_key(&name) {
            return Err(ZkError::NodeExists);
        }

        let zxid = self.next_zxid();
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.stat.cversion += 1;
            parent_node.stat.num_children += 1;
        }
        self.nodes.insert(
            name.clone(),
            Node {
                data: data.to_vec(),
                acl,
                stat: Stat {
                    czxid: zxid,
                    mzxid: zxid,
                    ephemeral_owner: if mode.is_ephemeral() { session_id } else { 0 },
                    data_length: data.len() as i32,
                    ..Stat::default()
                },
            },
        );
        self.fire(parent, EventType::NodeChildrenChanged);
        trace!(session_id, node = %name, ?mode, "created node");
        Ok(name)
    }

    fn delete(&mut self, session_id: i64, path: &str, version: Option<i32>) -> ZkResult<()> {
        validate_path(path)?;
        if path == "/" {
            return Err(ZkError::InvalidPath);
        }
        let (parent, _) = split_parent(path);
        let parent_node = self.nodes.get(parent).ok_or(ZkError::NoNode)?;
        self.check(session_id, &parent_node.acl, Perms::DELETE)?;
        let node = self.nodes.get(path).ok_or(ZkError::NoNode)?;
        if let Some(version) = version
            && version != node.stat.version
        {
            return Err(ZkError::BadVersion);
        }
        if node.stat.num_children > 0 {
            return Err(ZkError::NotEmpty);
        }
        self.remove_node(path);
        Ok(())
    }

    fn remove_node(&mut self, path: &str) {
        if self.nodes.remove(path).is_none() {
            return;
        }
        self.zxid += 1;
        let (parent, _) = split_parent(path);
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.stat.cversion += 1;
            parent_node.stat.num_children -= 1;
        }
        self.fire(path, EventType::NodeDeleted);
        self.fire(parent, EventType::NodeChildrenChanged);
    }

    fn set(
        &mut self,
        session_id: i64,
        path: &str,
        data: &[u8],
        version: Option<i32>,
    ) -> ZkResult<Stat> {
        let node = self.node(path)?;
        self.check(session_id, &node.acl, Perms::WRITE)?;
        if let Some(version) = version
            && version != node.stat.version
        {
            return Err(ZkError::BadVersion);
        }
        let zxid = self.next_zxid();
        let node = self.nodes.get_mut(path).ok_or(ZkError::NoNode)?;
        node.data = data.to_vec();
        node.stat.version += 1;
        node.stat.mzxid = zxid;
        node.stat.data_length = data.len() as i32;
        Ok(node.stat)
    }

    fn get(&self, session_id: i64, path: &str) -> ZkResult<(Vec<u8>, Stat)> {
        let node = self.node(path)?;
        self.check(session_id, &node.acl, Perms::READ)?;
        Ok((node.data.clone(), node.stat))
    }

    fn exists(&self, session_id: i64, path: &str) -> ZkResult<Option<Stat>> {
        validate_path(path)?;
        self.live(session_id)?;
        Ok(self.nodes.get(path).map(|node| node.stat))
    }

    fn children(&self, session_id: i64, path: &str) -> ZkResult<(Vec<String>, Stat)> {
        let node = self.node(path)?;
        self.check(session_id, &node.acl, Perms::READ)?;
        let prefix = if path == "/" {
            "/".to_owned()
        } else {
            format!("{path}/")
        };
        let children = self
            .nodes
            .range::<str, _>((Bound::Excluded(prefix.as_str()), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let name = &key[prefix.len()..];
                (!name.contains('/')).then(|| name.to_owned())
            })
            .collect();
        Ok((children, node.stat))
    }

    fn watch_children(&mut self, session_id: i64, path: &str) -> WatchReceiver {
        let (tx, rx) = oneshot::channel();
        self.child_watches
            .entry(path.to_owned())
            .or_default()
            .push(Watcher { session_id, tx });
        rx
    }

    fn add_auth(&mut self, session_id: i64, scheme: &str, id: String) -> ZkResult<()> {
        let slot = self
            .sessions
            .get_mut(&session_id)
            .ok_or(ZkError::SessionExpired)?;
        if !slot.auth.iter().any(|(s, have)| s == scheme && *have == id) {
            slot.auth.push((scheme.to_owned(), id));
        }
        Ok(())
    }

    /// Forget a session: its ephemeral nodes are deleted (firing watches) and
    /// the watches it registered are dropped unfired.
    fn close_session(&mut self, session_id: i64) {
        if self.sessions.remove(&session_id).is_none() {
            return;
        }
        let owned = self
            .nodes
            .iter()
            .filter(|(_, node)| node.stat.ephemeral_owner == session_id)
            .map(|(path, _)| path.clone())
            .collect::<Vec<_>>();
        for path in &owned {
            self.remove_node(path);
        }
        for watchers in self.child_watches.values_mut() {
            watchers.retain(|watcher| watcher.session_id != session_id);
        }
        self.child_watches.retain(|_, watchers| !watchers.is_empty());
        debug!(session_id, ephemerals = owned.len(), "session closed");
    }
}

impl Connector for MemoryEnsemble {
    fn connect(
        &self,
        endpoints: &[String],
        params: ConnectParams,
    ) -> ZkResult<(Arc<dyn Session>, mpsc::Receiver<Event>)> {
        if endpoints.is_empty() {
            return Err(ZkError::InvalidEndpoint(String::new()));
        }
        let endpoints = endpoints
            .iter()
            .map(|endpoint| format_endpoint(endpoint))
            .collect::<ZkResult<Vec<_>>>()?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (link, _) = watch::channel(Link::Connecting);
        let shared = Arc::new(Shared {
            link,
            auth: Mutex::new(Vec::new()),
        });

        let task = SessionTask {
            ensemble: self.clone(),
            endpoints,
            params,
            shared: Arc::clone(&shared),
            control: control_tx.clone(),
            events: events_tx,
        };
        tokio::spawn(task.run(control_rx));

        let session = MemorySession {
            ensemble: self.clone(),
            shared,
            control: control_tx,
        };
        Ok((Arc::new(session), events_rx))
    }
}

/// Connection status as seen by requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Connecting,
    Connected(i64),
    Unreachable,
    Closed,
}

#[derive(Debug)]
struct Shared {
    link: watch::Sender<Link>,
    /// re-applied to replacement sessions after expiry
    auth: Mutex<Vec<(String, String)>>,
}

/// Background task driving one client's connection: connects, reconnects
/// after drops, starts over with a new session after expiry.
struct SessionTask {
    ensemble: MemoryEnsemble,
    endpoints: Vec<String>,
    params: ConnectParams,
    shared: Arc<Shared>,
    control: mpsc::UnboundedSender<Control>,
    events: mpsc::Sender<Event>,
}

impl SessionTask {
    async fn emit(&self, event: Event) {
        // receiver gone means the client stopped listening
        let _ = self.events.send(event).await;
    }

    async fn run(self, mut control: mpsc::UnboundedReceiver<Control>) {
        let mut session_id: Option<i64> = None;
        loop {
            self.shared.link.send_replace(Link::Connecting);
            self.emit(Event::session(SessionState::Connecting)).await;

            let auth = self.shared.auth.lock().clone();
            let attached = self.ensemble.attach(
                &self.endpoints,
                session_id,
                self.params.session_timeout,
                auth,
                &self.control,
                &self.shared,
            );
            match attached {
                Ok((id, server)) => {
                    if session_id != Some(id) {
                        debug!(session_id = id, %server, "session established");
                    }
                    session_id = Some(id);
                    self.shared.link.send_replace(Link::Connected(id));
                    self.emit(Event::session_with_server(SessionState::Connected, &server))
                        .await;
                    self.emit(Event::session_with_server(SessionState::HasSession, &server))
                        .await;

                    match control.recv().await {
                        Some(Control::Drop) => {
                            self.shared.link.send_replace(Link::Connecting);
                            self.emit(Event::session(SessionState::Disconnected)).await;
                        }
                        Some(Control::Expire) => {
                            session_id = None;
                            self.emit(Event::session(SessionState::Expired)).await;
                        }
                        Some(Control::Close) | None => break,
                    }
                }
                Err(AttachError::Expired) => {
                    session_id = None;
                    self.emit(Event::session(SessionState::Expired)).await;
                }
                Err(AttachError::Unreachable) => {
                    self.shared.link.send_replace(Link::Unreachable);
                    self.emit(Event::session(SessionState::Disconnected)).await;
                    trace!(endpoints = ?self.endpoints, "no endpoint reachable");

                    let delay = self.params.connect_timeout.min(MAX_RECONNECT_DELAY);
                    let sleep = tokio::time::sleep(delay);
                    tokio::pin!(sleep);
                    let closed = loop {
                        tokio::select! {
                            _ = &mut sleep => break false,
                            ctl = control.recv() => match ctl {
                                Some(Control::Close) | None => break true,
                                Some(_) => continue,
                            },
                        }
                    };
                    if closed {
                        break;
                    }
                }
            }
        }

        if let Some(id) = session_id {
            self.ensemble.close(id);
        }
        self.shared.link.send_replace(Link::Closed);
        let _ = self.events.try_send(Event::session(SessionState::Closed));
    }
}

/// Session handle returned by [`MemoryEnsemble`]'s [`Connector`] impl.
/// Dropping it closes the session.
#[derive(Debug)]
pub struct MemorySession {
    ensemble: MemoryEnsemble,
    shared: Arc<Shared>,
    control: mpsc::UnboundedSender<Control>,
}

impl MemorySession {
    /// Wait for the outcome of the current connection attempt.
    async fn ready(&self) -> ZkResult<i64> {
        let mut link = self.shared.link.subscribe();
        let current = *link
            .wait_for(|link| *link != Link::Connecting)
            .await
            .map_err(|_| ZkError::ConnectionClosed)?;
        match current {
            Link::Connected(id) => Ok(id),
            Link::Unreachable => Err(ZkError::NoServer),
            Link::Connecting | Link::Closed => Err(ZkError::ConnectionClosed),
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    fn session_id(&self) -> i64 {
        match *self.shared.link.borrow() {
            Link::Connected(id) => id,
            _ => 0,
        }
    }

    fn state(&self) -> SessionState {
        match *self.shared.link.borrow() {
            Link::Connecting => SessionState::Connecting,
            Link::Connected(_) => SessionState::HasSession,
            Link::Unreachable => SessionState::Disconnected,
            Link::Closed => SessionState::Closed,
        }
    }

    async fn add_auth(&self, scheme: &str, auth: &[u8]) -> ZkResult<()> {
        let id = self.ready().await?;
        if scheme != "digest" {
            return Err(ZkError::AuthFailed);
        }
        let ident = std::str::from_utf8(auth)
            .map_err(|_| ZkError::AuthFailed)?
            .to_owned();
        {
            let mut known = self.shared.auth.lock();
            if !known.iter().any(|(s, id)| s == scheme && *id == ident) {
                known.push((scheme.to_owned(), ident.clone()));
            }
        }
        self.ensemble.tree.lock().add_auth(id, scheme, ident)
    }

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        acl: &[Acl],
    ) -> ZkResult<String> {
        let id = self.ready().await?;
        self.ensemble.tree.lock().create(id, path, data, mode, acl)
    }

    async fn exists(&self, path: &str) -> ZkResult<Option<Stat>> {
        let id = self.ready().await?;
        self.ensemble.tree.lock().exists(id, path)
    }

    async fn get(&self, path: &str) -> ZkResult<(Vec<u8>, Stat)> {
        let id = self.ready().await?;
        self.ensemble.tree.lock().get(id, path)
    }

    async fn set(&self, path: &str, data: &[u8], version: Option<i32>) -> ZkResult<Stat> {
        let id = self.ready().await?;
        self.ensemble.tree.lock().set(id, path, data, version)
    }

    async fn delete(&self, path: &str, version: Option<i32>) -> ZkResult<()> {
        let id = self.ready().await?;
        self.ensemble.tree.lock().delete(id, path, version)
    }

    async fn children(&self, path: &str) -> ZkResult<Vec<String>> {
        let id = self.ready().await?;
        let (children, _) = self.ensemble.tree.lock().children(id, path)?;
        Ok(children)
    }

    async fn children_w(&self, path: &str) -> ZkResult<(Vec<String>, Stat, WatchReceiver)> {
        let id = self.ready().await?;
        let mut tree = self.ensemble.tree.lock();
        let (children, stat) = tree.children(id, path)?;
        let watch = tree.watch_children(id, path);
        Ok((children, stat, watch))
    }

    async fn close(&self) {
        let _ = self.control.send(Control::Close);
        let mut link = self.shared.link.subscribe();
        let _ = link.wait_for(|link| *link == Link::Closed).await;
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let _ = self.control.send(Control::Close);
    }
}
