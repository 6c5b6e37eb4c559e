//! Client options and the validated configuration they produce.

use std::{fmt, sync::Arc, time::Duration};

use crate::error::{DiscoveryError, DiscoveryResult, ZkError};
use crate::session::{Acl, ConnectParams, Event, Perms};

/// Default time allowed for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default session timeout negotiated with the service.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(5);

/// Callback invoked for every event the client receives. Runs on the
/// client's handler thread and should return quickly.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// A single client setting. Built with the free functions of this module
/// and validated when the client is created; the first invalid option
/// aborts construction.
pub enum ClientOption {
    Acl(Vec<Acl>),
    ConnectTimeout(Duration),
    SessionTimeout(Duration),
    /// `[description, data]` for nodes created by the path initializer.
    Payload([Vec<u8>; 2]),
    EventHandler(EventHandler),
    Credentials { username: String, password: String },
}

impl fmt::Debug for ClientOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientOption::Acl(acl) => f.debug_tuple("Acl").field(acl).finish(),
            ClientOption::ConnectTimeout(d) => f.debug_tuple("ConnectTimeout").field(d).finish(),
            ClientOption::SessionTimeout(d) => f.debug_tuple("SessionTimeout").field(d).finish(),
            ClientOption::Payload(p) => f.debug_tuple("Payload").field(p).finish(),
            ClientOption::EventHandler(_) => f.write_str("EventHandler(..)"),
            ClientOption::Credentials { username, .. } => f
                .debug_struct("Credentials")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// ACL applied to every node the client creates.
pub fn acl(acl: Vec<Acl>) -> ClientOption {
    ClientOption::Acl(acl)
}

/// How long to wait for a connection before reporting the ensemble
/// unreachable. Must be greater than zero.
pub fn connect_timeout(timeout: Duration) -> ClientOption {
    ClientOption::ConnectTimeout(timeout)
}

/// Session timeout; ephemeral nodes outlive a lost connection by at most
/// this long. Must be greater than zero.
pub fn session_timeout(timeout: Duration) -> ClientOption {
    ClientOption::SessionTimeout(timeout)
}

/// Payload of nodes created by [`crate::Client::create_parent_nodes`]:
/// intermediate nodes get `description`, the node named by the path gets
/// `data`.
pub fn payload(description: impl Into<Vec<u8>>, data: impl Into<Vec<u8>>) -> ClientOption {
    ClientOption::Payload([description.into(), data.into()])
}

/// Callback notified of every session transition.
pub fn event_handler<F>(handler: F) -> ClientOption
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    ClientOption::EventHandler(Arc::new(handler))
}

/// Digest credentials added to the session once connected. Passing two
/// empty strings disables authentication.
pub fn credentials(username: impl Into<String>, password: impl Into<String>) -> ClientOption {
    ClientOption::Credentials {
        username: username.into(),
        password: password.into(),
    }
}

/// Digest identity of the client.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn username(&self) -> &str {
        &self.username
    }

    /// `user:password`, as handed to the `digest` auth scheme.
    pub(crate) fn digest(&self) -> Vec<u8> {
        format!("{}:{}", self.username, self.password).into_bytes()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Validated client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    endpoints: Vec<String>,
    acl: Vec<Acl>,
    connect_timeout: Duration,
    session_timeout: Duration,
    root_payload: [Vec<u8>; 2],
    credentials: Option<Credentials>,
}

impl ClientConfig {
    /// Apply `options` over the defaults. Event handlers are returned
    /// separately, in the order given.
    pub(crate) fn build(
        endpoints: Vec<String>,
        options: Vec<ClientOption>,
    ) -> DiscoveryResult<(Self, Vec<EventHandler>)> {
        let mut config = ClientConfig {
            endpoints,
            acl: Acl::world(Perms::ALL),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            root_payload: [Vec::new(), Vec::new()],
            credentials: None,
        };
        let mut handlers = Vec::new();

        for option in options {
            match option {
                ClientOption::Acl(acl) => {
                    if acl.is_empty() {
                        return Err(ZkError::InvalidAcl.into());
                    }
                    config.acl = acl;
                }
                ClientOption::ConnectTimeout(timeout) => {
                    if timeout.is_zero() {
                        return Err(DiscoveryError::InvalidConnectTimeout);
                    }
                    config.connect_timeout = timeout;
                }
                ClientOption::SessionTimeout(timeout) => {
                    if timeout.is_zero() {
                        return Err(DiscoveryError::InvalidSessionTimeout);
                    }
                    config.session_timeout = timeout;
                }
                ClientOption::Payload(payload) => config.root_payload = payload,
                ClientOption::EventHandler(handler) => handlers.push(handler),
                ClientOption::Credentials { username, password } => {
                    config.credentials = match (username.is_empty(), password.is_empty()) {
                        (true, true) => None,
                        (false, false) => Some(Credentials { username, password }),
                        _ => return Err(DiscoveryError::InvalidCredentials),
                    };
                }
            }
        }
        Ok((config, handlers))
    }

    /// Endpoints in normalized `host:port` form.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn acl(&self) -> &[Acl] {
        &self.acl
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    pub fn root_payload(&self) -> &[Vec<u8>; 2] {
        &self.root_payload
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub(crate) fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            connect_timeout: self.connect_timeout,
            session_timeout: self.session_timeout,
        }
    }
}

/// Options equivalent to a parsed configuration file. Settings the file
/// leaves out keep their defaults.
pub fn from_config(config: &config::DiscoveryConfig) -> Vec<ClientOption> {
    let mut options = Vec::new();
    if !config.acl.is_empty() {
        options.push(acl(config
            .acl
            .iter()
            .map(|entry| Acl::new(Perms::from_bits(entry.perms), &entry.scheme, &entry.id))
            .collect()));
    }
    if let Some(timeout) = config.connect_timeout {
        options.push(connect_timeout(timeout));
    }
    if let Some(timeout) = config.session_timeout {
        options.push(session_timeout(timeout));
    }
    if let Some([description, data]) = &config.payload {
        options.push(payload(description.clone(), data.clone()));
    }
    if let Some(creds) = &config.credentials {
        options.push(credentials(&creds.username, &creds.password));
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(options: Vec<ClientOption>) -> DiscoveryResult<ClientConfig> {
        ClientConfig::build(vec!["localhost:2181".into()], options).map(|(config, _)| config)
    }

    #[test]
    fn test_defaults() {
        let config = build(vec![]).unwrap();
        assert_eq!(config.acl(), Acl::world(Perms::ALL).as_slice());
        assert_eq!(config.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.session_timeout(), DEFAULT_SESSION_TIMEOUT);
        assert_eq!(config.root_payload(), &[Vec::<u8>::new(), Vec::new()]);
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_options_round_trip() {
        let read_only = Acl::world(Perms::READ);
        let config = build(vec![
            acl(read_only.clone()),
            connect_timeout(Duration::from_secs(3)),
            session_timeout(Duration::from_secs(20)),
            payload("I'm a", "test!"),
            credentials("user", "pass"),
        ])
        .unwrap();
        assert_eq!(config.acl(), read_only.as_slice());
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.session_timeout(), Duration::from_secs(20));
        assert_eq!(config.root_payload(), &[b"I'm a".to_vec(), b"test!".to_vec()]);
        assert_eq!(config.credentials().unwrap().username(), "user");
        assert_eq!(config.credentials().unwrap().digest(), b"user:pass");
    }

    #[test]
    fn test_invalid_options() {
        assert_eq!(
            build(vec![connect_timeout(Duration::ZERO)]),
            Err(DiscoveryError::InvalidConnectTimeout)
        );
        assert_eq!(
            build(vec![session_timeout(Duration::ZERO)]),
            Err(DiscoveryError::InvalidSessionTimeout)
        );
        assert_eq!(
            build(vec![credentials("nopass", "")]),
            Err(DiscoveryError::InvalidCredentials)
        );
        assert_eq!(
            build(vec![credentials("", "nouser")]),
            Err(DiscoveryError::InvalidCredentials)
        );
        assert_eq!(
            build(vec![acl(vec![])]),
            Err(DiscoveryError::Zk(ZkError::InvalidAcl))
        );
    }

    #[test]
    fn test_first_invalid_option_wins() {
        assert_eq!(
            build(vec![
                session_timeout(Duration::ZERO),
                connect_timeout(Duration::ZERO),
            ]),
            Err(DiscoveryError::InvalidSessionTimeout)
        );
    }

    #[test]
    fn test_empty_credentials_disable_auth() {
        let config = build(vec![credentials("", "")]).unwrap();
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_event_handlers_kept_in_order() {
        let (_, handlers) = ClientConfig::build(
            vec![],
            vec![event_handler(|_| {}), event_handler(|_| {})],
        )
        .unwrap();
        assert_eq!(handlers.len(), 2);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let config = build(vec![credentials("user", "hunter2")]).unwrap();
        let debug = format!("{:?}", config.credentials().unwrap());
        assert!(debug.contains("user"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_from_config() {
        let file = config::DiscoveryConfig {
            endpoints: vec!["zk1:2181".into()],
            connect_timeout: Some(Duration::from_millis(500)),
            session_timeout: None,
            acl: vec![config::AclEntry {
                scheme: "world".into(),
                id: "anyone".into(),
                perms: Perms::READ.bits(),
            }],
            credentials: Some(config::Credentials {
                username: "svc".into(),
                password: "secret".into(),
            }),
            payload: Some([b"dir".to_vec(), b"leaf".to_vec()]),
        };
        let config = build(from_config(&file)).unwrap();
        assert_eq!(config.acl(), Acl::world(Perms::READ).as_slice());
        assert_eq!(config.connect_timeout(), Duration::from_millis(500));
        assert_eq!(config.session_timeout(), DEFAULT_SESSION_TIMEOUT);
        assert_eq!(config.root_payload()[1], b"leaf");
        assert_eq!(config.credentials().unwrap().username(), "svc");
    }
}
