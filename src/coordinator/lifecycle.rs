//! Service lifecycle: scheduling and stopping background passes.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::scheduler::{BackgroundTask, TaskControl};
use crate::storage::traits::StorageError;
use crate::tenant::IdentityProvider;
use crate::verify::ReconcileReport;

use super::{ServiceState, TenantSync};

impl TenantSync {
    /// Schedule the periodic TTL sweep, the per-session garbage collection
    /// (each followed by a reconciliation) and the periodic reconciliation.
    ///
    /// Must be called from within a tokio runtime. Starting a running
    /// service is a no-op; a stopped service cannot be restarted.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), StorageError> {
        match self.state() {
            ServiceState::Running => return Ok(()),
            ServiceState::Stopped => {
                return Err(StorageError::NotReady("service has been shut down".to_string()))
            }
            ServiceState::Created => {}
        }

        let sweep = self.spawn_cache_sweep();
        let gc = self.spawn_session_gc();
        let reconcile = self.spawn_periodic_reconcile();
        self.tasks.lock().extend([Some(sweep), Some(gc), reconcile].into_iter().flatten());

        let _ = self.state.send(ServiceState::Running);
        crate::metrics::set_service_state("Running");
        info!(
            ttl_ms = self.config.cache_ttl_ms,
            sweep_ms = self.config.cache_sweep_interval_ms,
            gc_delay_ms = self.config.gc_start_delay_ms,
            reconcile_ms = self.config.reconcile_interval_ms,
            "Tenant sync running"
        );
        Ok(())
    }

    /// Stop every background pass and wait for them to exit.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let tasks: Vec<BackgroundTask> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let name = task.name();
            task.stop().await;
            debug!(task = name, "Background pass stopped");
        }
        let _ = self.state.send(ServiceState::Stopped);
        crate::metrics::set_service_state("Stopped");
        info!("Tenant sync stopped");
    }

    fn spawn_cache_sweep(&self) -> BackgroundTask {
        let cache = Arc::downgrade(&self.cache);
        BackgroundTask::periodic("cache-ttl-sweep", self.config.cache_sweep_interval(), move || {
            let cache = cache.upgrade();
            async move {
                let Some(cache) = cache else {
                    return TaskControl::Stop;
                };
                cache.sweep_expired();
                TaskControl::Continue
            }
        })
    }

    /// First pass after the start delay, then a re-check for a new identity
    /// session every `gc_reauth_delay`. A session sweep is followed by a
    /// reconciliation of every module.
    fn spawn_session_gc(&self) -> BackgroundTask {
        let gc = Arc::downgrade(&self.gc);
        let verifier = Arc::downgrade(&self.verifier);
        let remote = Arc::downgrade(&self.remote);
        BackgroundTask::periodic_after(
            "session-gc",
            self.config.gc_start_delay(),
            self.config.gc_reauth_delay(),
            move || {
                let collaborators = gc.upgrade().zip(verifier.upgrade()).zip(remote.upgrade());
                async move {
                    let Some(((gc, verifier), remote)) = collaborators else {
                        return TaskControl::Stop;
                    };
                    if !remote.is_ready() {
                        return TaskControl::Continue;
                    }
                    match gc.run_for_session() {
                        Ok(Some(report)) => {
                            debug!(removed = report.removed, "Session garbage collection finished");
                            log_reconciliation(&verifier.reconcile_all().await);
                        }
                        Ok(None) | Err(StorageError::NotReady(_)) => {}
                        Err(e) => warn!(error = %e, "Session garbage collection failed"),
                    }
                    TaskControl::Continue
                }
            },
        )
    }

    fn spawn_periodic_reconcile(&self) -> Option<BackgroundTask> {
        let period = self.config.reconcile_interval()?;
        let verifier = Arc::downgrade(&self.verifier);
        let identity = Arc::downgrade(&self.identity);
        let remote = Arc::downgrade(&self.remote);
        Some(BackgroundTask::periodic("reconcile", period, move || {
            let collaborators = verifier.upgrade().zip(identity.upgrade()).zip(remote.upgrade());
            async move {
                let Some(((verifier, identity), remote)) = collaborators else {
                    return TaskControl::Stop;
                };
                if remote.is_ready() && identity.current().is_some() {
                    log_reconciliation(&verifier.reconcile_all().await);
                }
                TaskControl::Continue
            }
        }))
    }
}

fn log_reconciliation(reports: &[ReconcileReport]) {
    let removed: usize = reports.iter().map(|r| r.removed_local.len()).sum();
    let failed = reports.iter().filter(|r| r.report.error.is_some()).count();
    info!(modules = reports.len(), removed, failed, "Background reconciliation finished");
}
