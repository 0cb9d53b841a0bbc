//! Application layer for registration requests.
//!
//! Persists registration changes and keeps the registry's health-check
//! tasks in step with them.

use common::{Error, Result};
use dashmap::DashMap;
use registry::types::now_millis;
use registry::{Registration, RegistrationStore, Registry, Status};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

pub struct RegistryService {
    store: Arc<dyn RegistrationStore>,
    registry: Arc<Registry>,
    /// Serialises add/update/delete per service id
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Holds the per-service lock; drops the map entry once nobody else
/// holds or waits on it.
struct ServiceGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    service_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ServiceGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.service_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl RegistryService {
    pub fn new(store: Arc<dyn RegistrationStore>, registry: Arc<Registry>) -> Self {
        Self {
            store,
            registry,
            locks: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    async fn lock(&self, service_id: &str) -> ServiceGuard<'_> {
        // Declared before the Arc clone so a cancelled wait still cleans up.
        let mut guard = ServiceGuard {
            locks: &self.locks,
            service_id: service_id.to_string(),
            guard: None,
        };
        let lock = self
            .locks
            .entry(service_id.to_string())
            .or_default()
            .clone();
        guard.guard = Some(lock.lock_owned().await);
        guard
    }

    /// Number of per-service locks currently held or awaited
    pub fn pending_locks(&self) -> usize {
        self.locks.len()
    }

    /// Persist a new registration and start health checking it
    pub async fn add_registration(&self, mut registration: Registration) -> Result<Registration> {
        registration.validate()?;
        let _guard = self.lock(&registration.service_id).await;

        let now = now_millis();
        registration.status = Status::Unknown;
        registration.created = now;
        registration.modified = now;

        let stored = self.store.add_registration(registration).await?;
        self.registry.register(stored.clone()).await;

        info!(service_id = %stored.service_id, "Added registration");
        Ok(stored)
    }

    /// Replace a registration and restart its health checking
    ///
    /// The old task is stopped before the store is written so it cannot
    /// overwrite the update with a stale status. A new task is started
    /// unless the updated registration is halted.
    pub async fn update_registration(&self, mut registration: Registration) -> Result<()> {
        registration.validate()?;
        let _guard = self.lock(&registration.service_id).await;

        let existing = self
            .store
            .registration_by_service_id(&registration.service_id)
            .await?;
        registration.created = existing.created;
        registration.modified = now_millis();

        self.registry.deregister(&registration.service_id).await;
        if let Err(e) = self.store.update_registration(registration.clone()).await {
            self.resume(existing).await;
            return Err(e);
        }

        if registration.status.is_halted() {
            info!(service_id = %registration.service_id, "Registration halted");
        } else {
            self.registry.register(registration.clone()).await;
            info!(service_id = %registration.service_id, "Updated registration");
        }

        Ok(())
    }

    /// Remove a registration and stop its health checking
    pub async fn delete_registration(&self, service_id: &str) -> Result<()> {
        if service_id.trim().is_empty() {
            return Err(Error::contract_invalid("serviceId must not be empty"));
        }
        let _guard = self.lock(service_id).await;

        self.registry.deregister(service_id).await;
        if let Err(e) = self.store.delete_registration_by_service_id(service_id).await {
            if let Ok(existing) = self.store.registration_by_service_id(service_id).await {
                self.resume(existing).await;
            }
            return Err(e);
        }

        info!(service_id = %service_id, "Deleted registration");
        Ok(())
    }

    /// Restart checking of a registration whose change was not stored.
    async fn resume(&self, registration: Registration) {
        if !registration.status.is_halted() {
            warn!(service_id = %registration.service_id, "Store write failed, resuming previous health check");
            self.registry.register(registration).await;
        }
    }

    /// All registrations, halted ones only when `include_halted`
    pub async fn registrations(&self, include_halted: bool) -> Result<Vec<Registration>> {
        let registrations = self.store.registrations().await?;
        Ok(registrations
            .into_iter()
            .filter(|r| include_halted || !r.status.is_halted())
            .collect())
    }

    pub async fn registration_by_service_id(&self, service_id: &str) -> Result<Registration> {
        if service_id.trim().is_empty() {
            return Err(Error::entity_does_not_exist("registration with empty serviceId"));
        }
        self.store.registration_by_service_id(service_id).await
    }
}
