//! convenience fns for reading settings out of env vars
#![warn(
    missing_debug_implementations,
    missing_docs,
    missing_copy_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![allow(clippy::cognitive_complexity)]
#![deny(rustdoc::broken_intra_doc_links)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]
use anyhow::Context;

use std::{env, str};

/// Somewhere to look variables up. Implemented for the process environment
/// and for any `Fn(&str) -> Option<String>`, so lookups can be faked in tests.
pub trait VarSource {
    /// Raw value of `name`, if set
    fn get(&self, name: &str) -> Option<String>;
}

/// The environment of the current process
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl VarSource for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        env::var(name).ok()
    }
}

impl<F> VarSource for F
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        self(name)
    }
}

/// Returns the trimmed value of `name`. Unset and blank variables are both
/// `None`.
/// # Examples
/// ```
/// let vars = |name: &str| (name == "HOST").then(|| "  zk1:2181 ".to_owned());
/// assert_eq!(env_parser::var_opt(&vars, "HOST").as_deref(), Some("zk1:2181"));
/// assert_eq!(env_parser::var_opt(&vars, "PORT"), None);
/// ```
pub fn var_opt<V>(vars: &V, name: &str) -> Option<String>
where
    V: VarSource + ?Sized,
{
    let val = vars.get(name)?;
    let val = val.trim();
    (!val.is_empty()).then(|| val.to_owned())
}

/// Parses a comma separated list. Blank items are skipped, so a variable
/// holding only separators yields an empty list.
/// # Examples
/// ```
/// # use std::env;
/// // SAFETY: doc tests run single threaded
/// unsafe { env::set_var("ENDPOINTS", "zk1:2181, zk2:2181,") };
/// let list: Option<Vec<String>> =
///     env_parser::parse_list(&env_parser::ProcessEnv, "ENDPOINTS").unwrap();
/// assert_eq!(list.unwrap(), ["zk1:2181", "zk2:2181"]);
/// unsafe { env::remove_var("ENDPOINTS") };
///
/// let list: Option<Vec<String>> =
///     env_parser::parse_list(&env_parser::ProcessEnv, "ENDPOINTS").unwrap();
/// assert!(list.is_none());
/// ```
pub fn parse_list<T, V>(vars: &V, name: &str) -> anyhow::Result<Option<Vec<T>>>
where
    T: str::FromStr,
    <T as str::FromStr>::Err: std::error::Error + Send + Sync + 'static,
    V: VarSource + ?Sized,
{
    var_opt(vars, name)
        .map(|val| {
            val.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| {
                    item.parse::<T>()
                        .with_context(|| format!("error parsing {item:?} in env var {name}"))
                })
                .collect::<anyhow::Result<Vec<T>>>()
        })
        .transpose()
}
