//! The coordination-service seam.
//!
//! Everything this crate needs from a ZooKeeper-style service is expressed by
//! two traits: a [`Connector`] that turns an endpoint list into a live
//! [`Session`] plus a stream of session [`Event`]s, and the [`Session`]
//! itself, which exposes node operations and one-shot child watches. The
//! wire protocol behind them is not this crate's concern; [`crate::memory`]
//! provides an in-process implementation.

use std::{
    fmt,
    net::Ipv6Addr,
    ops::{BitOr, BitOrAssign},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::{ZkError, ZkResult};

/// Port assumed when an endpoint does not carry one.
pub const DEFAULT_PORT: u16 = 2181;

/// Permission bits of an [`Acl`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Perms(u32);

impl Perms {
    /// Read node data and list children.
    pub const READ: Perms = Perms(1);
    /// Set node data.
    pub const WRITE: Perms = Perms(1 << 1);
    /// Create children.
    pub const CREATE: Perms = Perms(1 << 2);
    /// Delete children.
    pub const DELETE: Perms = Perms(1 << 3);
    /// Change the ACL.
    pub const ADMIN: Perms = Perms(1 << 4);
    /// Every permission.
    pub const ALL: Perms = Perms(0x1f);

    /// Raw permission bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build from raw bits, dropping unknown ones.
    pub const fn from_bits(bits: u32) -> Self {
        Perms(bits & Self::ALL.0)
    }

    /// Returns true if every bit of `other` is set.
    pub const fn contains(self, other: Perms) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Perms {
    type Output = Perms;

    fn bitor(self, rhs: Perms) -> Perms {
        Perms(self.0 | rhs.0)
    }
}

impl BitOrAssign for Perms {
    fn bitor_assign(&mut self, rhs: Perms) {
        self.0 |= rhs.0;
    }
}

/// One access-control entry: `scheme:id` is granted `perms`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Acl {
    pub perms: Perms,
    pub scheme: String,
    pub id: String,
}

impl Acl {
    pub fn new(perms: Perms, scheme: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            perms,
            scheme: scheme.into(),
            id: id.into(),
        }
    }

    /// ACL granting `perms` to everyone (`world:anyone`).
    pub fn world(perms: Perms) -> Vec<Acl> {
        vec![Acl::new(perms, "world", "anyone")]
    }

    /// ACL granting `perms` to whichever identities the creating session
    /// has authenticated as (`auth:`).
    pub fn creator(perms: Perms) -> Vec<Acl> {
        vec![Acl::new(perms, "auth", "")]
    }
}

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    PersistentSequential,
    EphemeralSequential,
}

impl CreateMode {
    /// Node is owned by the creating session.
    pub fn is_ephemeral(self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    /// Service appends a monotonically increasing counter to the name.
    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Node metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    /// zxid of the change that created the node.
    pub czxid: i64,
    /// zxid of the last data change.
    pub mzxid: i64,
    /// Number of data changes.
    pub version: i32,
    /// Number of changes to the children.
    pub cversion: i32,
    /// Owning session id for ephemeral nodes, `0` otherwise.
    pub ephemeral_owner: i64,
    pub data_length: i32,
    pub num_children: i32,
}

/// State of the session as reported through session events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unknown,
    Disconnected,
    Connecting,
    Connected,
    HasSession,
    Expired,
    AuthFailed,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Unknown => "unknown",
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::HasSession => "has_session",
            SessionState::Expired => "expired",
            SessionState::AuthFailed => "auth_failed",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an [`Event`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Session-level transition; see [`Event::state`].
    Session,
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
    /// A watch was dropped without firing.
    NotWatching,
}

/// Session transition or watch notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventType,
    pub state: SessionState,
    pub path: Option<String>,
    pub server: Option<String>,
}

impl Event {
    /// A session-level transition.
    pub fn session(state: SessionState) -> Self {
        Self {
            kind: EventType::Session,
            state,
            path: None,
            server: None,
        }
    }

    /// A session-level transition involving a specific server.
    pub fn session_with_server(state: SessionState, server: impl Into<String>) -> Self {
        Self {
            server: Some(server.into()),
            ..Self::session(state)
        }
    }

    /// A watch notification for `path`.
    pub fn node(kind: EventType, path: impl Into<String>) -> Self {
        Self {
            kind,
            state: SessionState::HasSession,
            path: Some(path.into()),
            server: None,
        }
    }

    pub fn is_session(&self) -> bool {
        self.kind == EventType::Session
    }
}

/// One-shot child watch. The sender side is dropped, without an event, when
/// the owning session ends.
pub type WatchReceiver = oneshot::Receiver<Event>;

/// Timeouts handed to a [`Connector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectParams {
    pub connect_timeout: Duration,
    pub session_timeout: Duration,
}

/// Establishes sessions against an ensemble.
pub trait Connector: Send + Sync {
    /// Start a session against `endpoints`.
    ///
    /// Only malformed input fails here. Establishing the session happens in
    /// the background; progress and failures are reported through the
    /// returned event receiver, and requests issued before the session is up
    /// wait for the first connection attempt to finish.
    fn connect(
        &self,
        endpoints: &[String],
        params: ConnectParams,
    ) -> ZkResult<(Arc<dyn Session>, mpsc::Receiver<Event>)>;
}

/// A live session with the coordination service.
///
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait Session: Send + Sync + fmt::Debug + 'static {
    /// Current session id, `0` while no session is established.
    fn session_id(&self) -> i64;

    /// Best-effort view of the session state.
    fn state(&self) -> SessionState;

    /// Add an authentication identity to the session.
    async fn add_auth(&self, scheme: &str, auth: &[u8]) -> ZkResult<()>;

    /// Create a node, returning the actual path (which differs from `path`
    /// for sequential nodes).
    async fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        acl: &[Acl],
    ) -> ZkResult<String>;

    async fn exists(&self, path: &str) -> ZkResult<Option<Stat>>;

    async fn get(&self, path: &str) -> ZkResult<(Vec<u8>, Stat)>;

    /// Set node data; `version` of `None` matches any version.
    async fn set(&self, path: &str, data: &[u8], version: Option<i32>) -> ZkResult<Stat>;

    /// Delete a node; `version` of `None` matches any version.
    async fn delete(&self, path: &str, version: Option<i32>) -> ZkResult<()>;

    /// Names (not paths) of the direct children of `path`.
    async fn children(&self, path: &str) -> ZkResult<Vec<String>>;

    /// Like [`Session::children`], and atomically installs a one-shot watch
    /// that fires on the next change to the child list.
    async fn children_w(&self, path: &str) -> ZkResult<(Vec<String>, Stat, WatchReceiver)>;

    /// Close the session. Ephemeral nodes it owns are removed by the service.
    async fn close(&self);
}

/// Normalize an endpoint to `host:port`, adding [`DEFAULT_PORT`] when absent.
///
/// Accepts hostnames, IPv4 addresses and bracketed IPv6 addresses.
pub fn format_endpoint(endpoint: &str) -> ZkResult<String> {
    let endpoint = endpoint.trim();
    let invalid = || ZkError::InvalidEndpoint(endpoint.to_owned());

    let (host, port) = if let Some(rest) = endpoint.strip_prefix('[') {
        let (addr, tail) = rest.split_once(']').ok_or_else(invalid)?;
        addr.parse::<Ipv6Addr>().map_err(|_| invalid())?;
        let port = match tail {
            "" => None,
            tail => Some(tail.strip_prefix(':').ok_or_else(invalid)?),
        };
        (format!("[{addr}]"), port)
    } else {
        let (host, port) = match endpoint.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (endpoint, None),
        };
        if !is_hostname(host) {
            return Err(invalid());
        }
        (host.to_ascii_lowercase(), port)
    };

    let port = match port {
        None => DEFAULT_PORT,
        Some(port) => match port.parse::<u16>() {
            Ok(port) if port != 0 => port,
            _ => return Err(invalid()),
        },
    };
    Ok(format!("{host}:{port}"))
}

fn is_hostname(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_endpoint() {
        assert_eq!(format_endpoint("localhost").unwrap(), "localhost:2181");
        assert_eq!(
            format_endpoint("localhost:65500").unwrap(),
            "localhost:65500"
        );
        assert_eq!(
            format_endpoint(" ZK1.example.com:2182 ").unwrap(),
            "zk1.example.com:2182"
        );
        assert_eq!(format_endpoint("10.0.0.1").unwrap(), "10.0.0.1:2181");
        assert_eq!(format_endpoint("[::1]").unwrap(), "[::1]:2181");
        assert_eq!(format_endpoint("[::1]:3000").unwrap(), "[::1]:3000");
    }

    #[test]
    fn test_format_endpoint_invalid() {
        for bad in [
            "FailThisInvalidHost!!!",
            "",
            "localhost:",
            "localhost:0",
            "localhost:99999",
            "localhost:port",
            "::1",
            "[::1",
            "[not-v6]:2181",
            "host..name",
            "-leading.dash",
        ] {
            assert_eq!(
                format_endpoint(bad),
                Err(ZkError::InvalidEndpoint(bad.trim().to_owned())),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_perms() {
        let rw = Perms::READ | Perms::WRITE;
        assert!(rw.contains(Perms::READ));
        assert!(rw.contains(Perms::WRITE));
        assert!(!rw.contains(Perms::CREATE));
        assert!(Perms::ALL.contains(rw));
        assert_eq!(Perms::from_bits(0xff), Perms::ALL);

        let mut perms = Perms::READ;
        perms |= Perms::DELETE;
        assert_eq!(perms.bits(), 0b1001);
    }

    #[test]
    fn test_create_mode() {
        assert!(CreateMode::EphemeralSequential.is_ephemeral());
        assert!(CreateMode::EphemeralSequential.is_sequential());
        assert!(!CreateMode::Persistent.is_ephemeral());
        assert!(CreateMode::PersistentSequential.is_sequential());
    }
}
