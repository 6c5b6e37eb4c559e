//! # zk-discovery
//!
//! Service discovery over a ZooKeeper-style coordination service.
//!
//! This library provides:
//! - **Session seam** (`Connector` / `Session`) describing the coordination
//!   service: node operations, one-shot child watches, session events.
//! - **In-memory ensemble** implementing the seam with real session
//!   semantics, for tests and local development.
//! - **Connection manager** (`Client`) that applies ACL, credentials,
//!   timeouts and root payload, tracks session state and fans events out to
//!   handlers.
//! - **Path initializer** creating every missing node of a service path,
//!   safe against concurrent initializers.
//! - **Entry reader** returning the payloads under a service path, one-shot
//!   or as a watch-driven stream.
//! - **Publisher** holding an ephemeral node for this instance and
//!   re-creating it after session loss.
//! - **Subscriber** keeping a factory-mapped endpoint list current.
//!
//! ## Design Principles
//!
//! - Registered instances vanish with their session; no explicit
//!   deregistration is needed after a crash.
//! - Errors from the service are surfaced unchanged and compare with `==`.
//! - A stopped client stays stopped; everything fails with `ClientClosed`.
//!
//! ```no_run
//! use zk_discovery::{Client, MemoryEnsemble, Publisher, options};
//! use std::time::Duration;
//!
//! # async fn run() -> zk_discovery::DiscoveryResult<()> {
//! let ensemble = MemoryEnsemble::with_servers(["localhost:2181"])?;
//! let client = Client::new(
//!     &ensemble,
//!     ["localhost:2181"],
//!     vec![options::session_timeout(Duration::from_secs(10))],
//! )
//! .await?;
//! let publisher = Publisher::new(&client, "/services/api", "10.0.0.1:8080", |p: &[u8]| {
//!     Ok(String::from_utf8(p.to_vec())?)
//! })
//! .await?;
//! let entries = client.get_entries("/services/api").await?;
//! assert_eq!(entries.len(), 1);
//! publisher.stop().await?;
//! client.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod entries;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod options;
pub mod path;
pub mod publisher;
pub mod session;
pub mod subscriber;

#[cfg(test)]
mod testing;

// Re-export key types for convenient access
pub use client::{Client, HandlerId};
pub use entries::{EntrySet, EntryWatcher};
pub use error::{DiscoveryError, DiscoveryResult, ZkError, ZkResult};
pub use memory::{MemoryEnsemble, MemorySession};
pub use options::{ClientConfig, ClientOption, Credentials, EventHandler};
pub use path::validate_path;
pub use publisher::{FactoryError, Publisher, PublisherState};
pub use session::{
    Acl, ConnectParams, Connector, CreateMode, Event, EventType, Perms, Session, SessionState,
    Stat, WatchReceiver,
};
pub use subscriber::{Endpoints, Subscriber};
