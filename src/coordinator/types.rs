//! Public types for the tenant sync coordinator.

use serde::Serialize;

/// Service lifecycle state.
///
/// Use [`super::TenantSync::state()`] to check the current state or
/// [`super::TenantSync::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceState {
    /// Constructed, background passes not scheduled
    Created,
    /// TTL sweep and session garbage collection scheduled
    Running,
    /// Background passes stopped; reads still work
    Stopped,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Snapshot of the service for `/health`-style diagnostics.
///
/// All fields are cached state; building it performs no I/O.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub state: ServiceState,
    /// Remote client reports itself usable
    pub remote_ready: bool,
    /// A caller identity is signed in
    pub has_identity: bool,
    /// Current tenant, if any
    pub tenant_id: Option<String>,
    pub cache_entries: usize,
    /// Background passes still alive
    pub background_tasks: usize,
}
