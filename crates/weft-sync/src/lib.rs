#![forbid(unsafe_code)]

//! Role synchronization for weft communities.
//!
//! Keeps every consumer's view of an actor's effective roles current as the
//! underlying role and membership documents change: live subscription
//! streams over the community directory, a timeout-bounded force refresh for
//! read-your-writes after administrative mutations, and the administrative
//! mutations themselves with their audit trail.

pub mod admin;
mod audit;
mod config;
mod directory;
mod errors;
mod service;
mod snapshot;

pub use audit::{now_unix, AuditEntry};
pub use config::{
    SyncConfig, DEFAULT_OBSERVER_CAPACITY, DEFAULT_REFRESH_TIMEOUT_SECS,
    DEFAULT_UPDATE_QUEUE_DEPTH,
};
pub use directory::{CommunityDirectory, CommunityRecord};
pub use errors::{AdminError, SyncError};
pub use service::{CatalogStream, MemberMapStream, RoleStream, RoleSyncService, RoleUpdate};

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(true)
        .init();
}
