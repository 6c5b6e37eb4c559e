//! Discovery metrics.
//!
//! Metrics are lazily initialized on first access via `lazy_static!` and
//! registered in the default prometheus registry.

use lazy_static::lazy_static;
use prometheus::{
    IntCounter, IntCounterVec, IntGauge, register_int_counter, register_int_counter_vec,
    register_int_gauge,
};

lazy_static! {
    /// Session transitions seen by clients, labelled by state
    pub static ref SESSION_EVENTS: IntCounterVec = register_int_counter_vec!(
        "zk_discovery_session_events",
        "count of session state transitions, by state",
        &["state"]
    ).unwrap();

    /// Gauge: clients currently holding a session
    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "zk_discovery_sessions_active",
        "number of clients currently holding a session"
    ).unwrap();

    /// Count of events event handlers never saw because their queue was full
    pub static ref HANDLER_EVENTS_DROPPED: IntCounter = register_int_counter!(
        "zk_discovery_handler_events_dropped",
        "count of events dropped because event handlers fell behind"
    ).unwrap();

    /// Count of entry-set snapshots read
    pub static ref ENTRY_REFRESHES: IntCounter = register_int_counter!(
        "zk_discovery_entry_refreshes",
        "count of entry-set snapshots read from the service"
    ).unwrap();

    /// Count of publisher nodes created on first registration
    pub static ref REGISTRATIONS: IntCounter = register_int_counter!(
        "zk_discovery_registrations",
        "count of publisher nodes created"
    ).unwrap();

    /// Count of publisher nodes re-created after session loss
    pub static ref REREGISTRATIONS: IntCounter = register_int_counter!(
        "zk_discovery_reregistrations",
        "count of publisher nodes re-created after session loss"
    ).unwrap();

    /// Count of failed registration attempts
    pub static ref REGISTRATION_FAILURES: IntCounter = register_int_counter!(
        "zk_discovery_registration_failures",
        "count of failed publisher registration attempts"
    ).unwrap();

    /// Gauge: publishers currently registered
    pub static ref PUBLISHERS_ACTIVE: IntGauge = register_int_gauge!(
        "zk_discovery_publishers_active",
        "number of publishers currently registered"
    ).unwrap();
}
