//! Startup reconciliation of the registry with persisted registrations.

use crate::registry::Registry;
use crate::storage::RegistrationStore;
use common::Result;
use tracing::{debug, error, info};

/// Spawn a health-check task for every persisted registration that is
/// not halted. Returns the number of tasks started.
///
/// A storage failure is returned as-is; callers treat it as fatal since
/// the registry state is unknown.
pub async fn reconcile(store: &dyn RegistrationStore, registry: &Registry) -> Result<usize> {
    let registrations = store.registrations().await.map_err(|e| {
        error!(error = %e, "Failed to load registrations");
        e
    })?;

    let total = registrations.len();
    let mut started = 0;

    for registration in registrations {
        if registration.status.is_halted() {
            debug!(service_id = %registration.service_id, "Skipping halted registration");
            continue;
        }
        registry.register(registration).await;
        started += 1;
    }

    info!(
        started,
        skipped = total - started,
        "Registry reconciled with persisted registrations"
    );

    Ok(started)
}
