use std::{
    fmt,
    path::Path,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use env_parser::{ProcessEnv, VarSource};
use tracing::debug;

pub mod wire;

pub use wire::parse_duration;

/// comma separated list replacing `endpoints`
pub const ENDPOINTS_VAR: &str = "ZK_ENDPOINTS";
/// replaces `connect_timeout`, same syntax as the file
pub const CONNECT_TIMEOUT_VAR: &str = "ZK_CONNECT_TIMEOUT";
/// replaces `session_timeout`, same syntax as the file
pub const SESSION_TIMEOUT_VAR: &str = "ZK_SESSION_TIMEOUT";

/// discovery client config
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiscoveryConfig {
    pub endpoints: Vec<String>,
    pub connect_timeout: Option<Duration>,
    pub session_timeout: Option<Duration>,
    pub acl: Vec<AclEntry>,
    pub credentials: Option<Credentials>,
    /// `[intermediate nodes, final node]`
    pub payload: Option<[Vec<u8>; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub scheme: String,
    pub id: String,
    pub perms: u32,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl DiscoveryConfig {
    /// attempts to decode the config first as JSON, then YAML, finally erroring if neither work
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = Self::new(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to find config at {}", &path.display()))?,
        )
        .with_context(|| format!("invalid config at {}", &path.display()))?;
        debug!(?config, path = %path.display());
        Ok(config)
    }

    /// attempts to decode the config first as JSON, then YAML, finally erroring if neither work
    pub fn parse_str<S: AsRef<str>>(s: S) -> Result<Self> {
        let config = Self::new(s.as_ref())?;
        debug!(?config);
        Ok(config)
    }

    fn new(input: impl AsRef<str>) -> Result<Self> {
        match Self::json(input.as_ref()) {
            Ok(r) => Ok(r),
            Err(_err) => Self::yaml(input.as_ref()),
        }
    }

    pub fn yaml<S: AsRef<str>>(input: S) -> Result<Self> {
        Self::try_from(serde_yaml::from_str::<wire::Config>(input.as_ref())?)
    }

    pub fn json<S: AsRef<str>>(input: S) -> Result<Self> {
        Self::try_from(serde_json::from_str::<wire::Config>(input.as_ref())?)
    }

    /// Override settings from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(&ProcessEnv)
    }

    /// Override settings from `vars`. Unset or blank variables leave the
    /// file value alone.
    pub fn apply_vars<V: VarSource + ?Sized>(&mut self, vars: &V) -> Result<()> {
        if let Some(endpoints) = env_parser::parse_list::<String, _>(vars, ENDPOINTS_VAR)? {
            if endpoints.is_empty() {
                bail!("{ENDPOINTS_VAR} does not name any endpoint");
            }
            debug!(?endpoints, "endpoints overridden from environment");
            self.endpoints = endpoints;
        }
        if let Some(timeout) = duration_var(vars, CONNECT_TIMEOUT_VAR)? {
            self.connect_timeout = Some(timeout);
        }
        if let Some(timeout) = duration_var(vars, SESSION_TIMEOUT_VAR)? {
            self.session_timeout = Some(timeout);
        }
        Ok(())
    }
}

fn duration_var<V: VarSource + ?Sized>(vars: &V, name: &str) -> Result<Option<Duration>> {
    env_parser::var_opt(vars, name)
        .map(|s| {
            let d = parse_duration(&s).with_context(|| format!("error parsing env var {name}"))?;
            nonzero(d, name)
        })
        .transpose()
}

fn nonzero(d: Duration, field: &str) -> Result<Duration> {
    if d.is_zero() {
        bail!("{field} cannot be zero");
    }
    Ok(d)
}

impl TryFrom<wire::Config> for DiscoveryConfig {
    type Error = anyhow::Error;

    fn try_from(cfg: wire::Config) -> Result<Self> {
        let endpoints: Vec<String> = cfg
            .endpoints
            .into_vec()
            .into_iter()
            .map(|e| e.trim().to_owned())
            .filter(|e| !e.is_empty())
            .collect();
        if endpoints.is_empty() {
            bail!("at least one endpoint is required");
        }

        let acl = cfg
            .acl
            .into_iter()
            .map(|entry| {
                let perms = entry
                    .perms
                    .into_vec()
                    .into_iter()
                    .fold(0, |bits, perm| bits | perm.bits());
                if perms == 0 {
                    bail!("acl entry {}:{} grants no permissions", entry.scheme, entry.id);
                }
                Ok(AclEntry {
                    scheme: entry.scheme,
                    id: entry.id,
                    perms,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let credentials = match cfg.credentials {
            Some(c) if c.username.is_empty() => bail!("credentials require a username"),
            Some(c) => Some(Credentials {
                username: c.username,
                password: c.password,
            }),
            None => None,
        };

        Ok(Self {
            endpoints,
            connect_timeout: cfg
                .connect_timeout
                .map(|d| nonzero(d, "connect_timeout"))
                .transpose()?,
            session_timeout: cfg
                .session_timeout
                .map(|d| nonzero(d, "session_timeout"))
                .transpose()?,
            acl,
            credentials,
            payload: cfg
                .payload
                .map(|p| [p.description.into_bytes(), p.data.into_bytes()]),
        })
    }
}
