use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, de};

/// top-level config type
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub endpoints: MaybeList<String>,
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_optional_duration")]
    pub connect_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_optional_duration")]
    pub session_timeout: Option<Duration>,
    #[serde(default)]
    pub acl: Vec<AclEntry>,
    pub credentials: Option<Credentials>,
    pub payload: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AclEntry {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_id")]
    pub id: String,
    pub perms: MaybeList<Perm>,
}

fn default_scheme() -> String {
    "world".to_owned()
}

fn default_id() -> String {
    "anyone".to_owned()
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Perm {
    Read,
    Write,
    Create,
    Delete,
    Admin,
    All,
}

impl Perm {
    /// permission bits as understood by the coordination service
    pub fn bits(self) -> u32 {
        match self {
            Perm::Read => 1,
            Perm::Write => 1 << 1,
            Perm::Create => 1 << 2,
            Perm::Delete => 1 << 3,
            Perm::Admin => 1 << 4,
            Perm::All => 0x1f,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// data stored on the nodes created while initializing a service path
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Payload {
    /// stored on every intermediate node
    #[serde(default)]
    pub description: String,
    /// stored on the last node of the path
    #[serde(default)]
    pub data: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum MaybeList<T> {
    Val(T),
    List(Vec<T>),
}

impl<T> MaybeList<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            MaybeList::Val(v) => vec![v],
            MaybeList::List(l) => l,
        }
    }
}

/// Parse `90`, `90s`, `500ms`, `2m` or `1h`. A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("empty duration string");
    }

    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    // split units
    let (num, unit) = s.split_at(end);
    let num = num.parse::<u64>().context("invalid number")?;

    let millis = match unit.trim() {
        "ms" => 1,
        "" | "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        other => anyhow::bail!(
            "unknown time unit '{}', only 'h', 'm', 's' or 'ms' are supported",
            other
        ),
    };

    num.checked_mul(millis)
        .map(Duration::from_millis)
        .context("duration value overflow")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireDuration {
    Seconds(u64),
    String(String),
}

impl WireDuration {
    fn into_duration<E: de::Error>(self) -> Result<Duration, E> {
        match self {
            WireDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
            WireDuration::String(s) => parse_duration(&s).map_err(E::custom),
        }
    }
}

fn deserialize_optional_duration<'de, D>(de: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<WireDuration>::deserialize(de)?
        .map(WireDuration::into_duration)
        .transpose()
}

fn serialize_optional_duration<S>(d: &Option<Duration>, ser: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match d {
        Some(d) => ser.serialize_str(&format!("{}ms", d.as_millis())),
        None => ser.serialize_none(),
    }
}
