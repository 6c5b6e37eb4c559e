//! Error types for discovery operations.
//!
//! Errors reported by the coordination service itself are kept in [`ZkError`]
//! and surfaced verbatim; the sentinels this crate adds on top (closed client,
//! bad configuration) live in [`DiscoveryError`]. Both are `Clone + Eq` so
//! callers can compare an error against the exact value they expect.

use thiserror::Error;

/// Errors reported by the coordination service or its session layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ZkError {
    /// No server in the endpoint list could be reached.
    #[error("could not connect to a server")]
    NoServer,

    /// The network reported the ensemble as unroutable.
    #[error("no route to server")]
    NoRoute,

    /// The node does not exist.
    #[error("node does not exist")]
    NoNode,

    /// The node already exists.
    #[error("node already exists")]
    NodeExists,

    /// The session lacks the permission required by the node's ACL.
    #[error("not authenticated")]
    NoAuth,

    /// The path is not a well-formed absolute node path.
    #[error("invalid path")]
    InvalidPath,

    /// The ACL is empty or references identities the session does not hold.
    #[error("invalid ACL specified")]
    InvalidAcl,

    /// Conditional write against a stale version.
    #[error("version conflict")]
    BadVersion,

    /// Delete of a node that still has children.
    #[error("node has children")]
    NotEmpty,

    /// Create under an ephemeral parent.
    #[error("ephemeral nodes may not have children")]
    NoChildrenForEphemerals,

    /// The session was expired by the service.
    #[error("session has been expired by the server")]
    SessionExpired,

    /// The session handle has been closed locally.
    #[error("connection closed")]
    ConnectionClosed,

    /// An endpoint could not be parsed as `host[:port]`.
    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),

    /// Adding auth to the session was rejected.
    #[error("authentication failed")]
    AuthFailed,
}

impl ZkError {
    /// Transport-class failures: the request may succeed once the session
    /// is (re-)established.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ZkError::NoServer | ZkError::NoRoute | ZkError::SessionExpired
        )
    }
}

/// Top-level error type for the zk-discovery crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// A username was supplied without a password (or the other way around).
    #[error("invalid credentials provided")]
    InvalidCredentials,

    /// The client has been stopped; every later operation fails with this.
    #[error("client service closed")]
    ClientClosed,

    /// Connect timeout must be greater than zero.
    #[error("invalid connect timeout: must be greater than zero")]
    InvalidConnectTimeout,

    /// Session timeout must be greater than zero.
    #[error("invalid session timeout: must be greater than zero")]
    InvalidSessionTimeout,

    /// The endpoint factory rejected a payload.
    #[error("factory rejected payload: {0}")]
    Factory(String),

    /// Error reported by the coordination service, unchanged.
    #[error(transparent)]
    Zk(#[from] ZkError),
}

impl DiscoveryError {
    /// Returns true if a caller-level retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DiscoveryError::Zk(err) if err.is_transport())
    }

    /// Returns true if this error is the permanent closed-client sentinel.
    pub fn is_closed(&self) -> bool {
        matches!(self, DiscoveryError::ClientClosed)
    }

    /// Returns true if no server could be reached.
    pub fn is_no_server(&self) -> bool {
        matches!(self, DiscoveryError::Zk(ZkError::NoServer))
    }

    /// The coordination-service error, if this is one.
    pub fn zk(&self) -> Option<&ZkError> {
        match self {
            DiscoveryError::Zk(err) => Some(err),
            _ => None,
        }
    }
}

impl PartialEq<ZkError> for DiscoveryError {
    fn eq(&self, other: &ZkError) -> bool {
        self.zk() == Some(other)
    }
}

/// Shorthand result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Result alias for raw coordination-service calls.
pub type ZkResult<T> = Result<T, ZkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let no_server = DiscoveryError::from(ZkError::NoServer);
        assert!(no_server.is_retryable());
        assert!(no_server.is_no_server());
        assert!(!no_server.is_closed());

        let expired = DiscoveryError::from(ZkError::SessionExpired);
        assert!(expired.is_retryable());
        assert!(!expired.is_no_server());

        let closed = DiscoveryError::ClientClosed;
        assert!(!closed.is_retryable());
        assert!(closed.is_closed());

        assert!(!DiscoveryError::InvalidCredentials.is_retryable());
        assert!(!DiscoveryError::from(ZkError::NoNode).is_retryable());
        assert!(!DiscoveryError::from(ZkError::InvalidPath).is_retryable());
    }

    #[test]
    fn test_compare_with_zk_error() {
        let err = DiscoveryError::from(ZkError::InvalidPath);
        assert_eq!(err, ZkError::InvalidPath);
        assert_ne!(err, ZkError::NoServer);
        assert_ne!(DiscoveryError::ClientClosed, ZkError::ConnectionClosed);
    }

    #[test]
    fn test_error_display() {
        let err = DiscoveryError::from(ZkError::InvalidEndpoint("bad!!".into()));
        assert_eq!(err.to_string(), "invalid endpoint \"bad!!\"");
        assert_eq!(
            DiscoveryError::ClientClosed.to_string(),
            "client service closed"
        );
    }
}
