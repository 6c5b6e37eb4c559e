//! Entry reader: the children of a service path and their payloads.

use std::collections::{BTreeMap, btree_map};

use futures::Stream;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::{debug, trace};

use crate::client::Client;
use crate::error::{DiscoveryError, DiscoveryResult, ZkError, ZkResult};
use crate::metrics;
use crate::path::{join, validate_path};
use crate::session::{Session, WatchReceiver};

/// How many times a read is repeated when the children change under it.
const MAX_READ_ATTEMPTS: usize = 4;

/// Snapshot of the children of a path, keyed by child name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntrySet {
    entries: BTreeMap<String, Vec<u8>>,
}

impl EntrySet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Payload of the child called `name`.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn payloads(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.values().map(Vec::as_slice)
    }

    pub fn into_payloads(self) -> Vec<Vec<u8>> {
        self.entries.into_values().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries
            .iter()
            .map(|(name, payload)| (name.as_str(), payload.as_slice()))
    }
}

impl IntoIterator for EntrySet {
    type Item = (String, Vec<u8>);
    type IntoIter = btree_map::IntoIter<String, Vec<u8>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(String, Vec<u8>)> for EntrySet {
    fn from_iter<T: IntoIterator<Item = (String, Vec<u8>)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// List the children of `path` with a watch and fetch every payload.
/// Children deleted between the listing and the fetch are skipped.
async fn snapshot(session: &dyn Session, path: &str) -> ZkResult<(EntrySet, WatchReceiver)> {
    let (children, _, watch) = session.children_w(path).await?;
    let mut entries = BTreeMap::new();
    for child in children {
        let node = join(path, &child);
        match session.get(&node).await {
            Ok((payload, _)) => {
                entries.insert(child, payload);
            }
            Err(ZkError::NoNode) => trace!(%node, "entry removed before it was read"),
            Err(err) => return Err(err),
        }
    }
    metrics::ENTRY_REFRESHES.inc();
    Ok((EntrySet { entries }, watch))
}

/// Read the entries under `path`, re-reading while the watch fires during
/// the read. The returned watch is `None` when it already fired on the last
/// permitted attempt, meaning the snapshot is known to be stale.
pub(crate) async fn read_entries(
    session: &dyn Session,
    path: &str,
) -> ZkResult<(EntrySet, Option<WatchReceiver>)> {
    let mut attempt = 1;
    loop {
        let (entries, mut watch) = snapshot(session, path).await?;
        match watch.try_recv() {
            Err(TryRecvError::Empty) => return Ok((entries, Some(watch))),
            _ if attempt >= MAX_READ_ATTEMPTS => {
                debug!(path, attempt, "children kept changing while reading entries");
                return Ok((entries, None));
            }
            _ => {
                trace!(path, attempt, "children changed during read, reading again");
                attempt += 1;
            }
        }
    }
}

/// Live view of the entries under a path.
///
/// Each call to [`EntryWatcher::next`] after the first waits for the child
/// watch to fire and yields a fresh snapshot. The watcher ends after
/// yielding its first error; create a new one with
/// [`Client::watch_entries`] to resume.
#[derive(Debug)]
pub struct EntryWatcher {
    client: Client,
    path: String,
    pending: Option<WatchReceiver>,
    started: bool,
    done: bool,
}

impl EntryWatcher {
    pub(crate) fn new(client: Client, path: &str) -> Self {
        Self {
            client,
            path: path.to_owned(),
            pending: None,
            started: false,
            done: false,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next snapshot, or `None` once an error has been yielded.
    pub async fn next(&mut self) -> Option<DiscoveryResult<EntrySet>> {
        if self.done {
            return None;
        }
        let result = self.advance().await;
        if result.is_err() {
            self.done = true;
            self.pending = None;
        }
        Some(result)
    }

    async fn advance(&mut self) -> DiscoveryResult<EntrySet> {
        self.client.ensure_open()?;
        validate_path(&self.path)?;

        if self.started {
            if let Some(watch) = self.pending.take() {
                tokio::select! {
                    _ = self.client.closed() => return Err(DiscoveryError::ClientClosed),
                    fired = watch => match fired {
                        Ok(event) => trace!(path = %self.path, kind = ?event.kind, "entry watch fired"),
                        // the session that held the watch is gone
                        Err(_) => debug!(path = %self.path, "entry watch dropped, reading again"),
                    },
                }
            }
        }
        self.started = true;

        let (entries, watch) = read_entries(self.client.session(), &self.path)
            .await
            .map_err(|err| self.client.lift(err))?;
        self.pending = watch;
        Ok(entries)
    }

    /// Adapt into a [`Stream`] of snapshots.
    pub fn into_stream(self) -> impl Stream<Item = DiscoveryResult<EntrySet>> + Send {
        futures::stream::unfold(self, |mut watcher| async move {
            watcher.next().await.map(|item| (item, watcher))
        })
    }
}
