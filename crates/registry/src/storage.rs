//! Registration storage.
//!
//! The registry only depends on the [`RegistrationStore`] trait. Two
//! implementations are provided: [`MemoryStore`] keeps everything in a
//! concurrent map, [`JsonFileStore`] additionally mirrors the map into a
//! JSON snapshot file so registrations survive a restart.

use crate::types::Registration;
use async_trait::async_trait;
use common::{Error, Result};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Persistent registration storage, safe for concurrent use
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Insert a new registration. Fails with `DuplicateName` if the
    /// service id is already stored.
    async fn add_registration(&self, registration: Registration) -> Result<Registration>;

    /// Replace an existing registration. Fails with `EntityDoesNotExist`
    /// if the service id is unknown.
    async fn update_registration(&self, registration: Registration) -> Result<()>;

    async fn delete_registration_by_service_id(&self, service_id: &str) -> Result<()>;

    /// All stored registrations, ordered by service id
    async fn registrations(&self) -> Result<Vec<Registration>>;

    async fn registration_by_service_id(&self, service_id: &str) -> Result<Registration>;
}

fn not_found(service_id: &str) -> Error {
    Error::entity_does_not_exist(format!("registration '{}'", service_id))
}

/// In-memory registration store
#[derive(Default)]
pub struct MemoryStore {
    registrations: DashMap<String, Registration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `registrations`
    pub fn with_registrations(registrations: impl IntoIterator<Item = Registration>) -> Self {
        let store = Self::new();
        for registration in registrations {
            store
                .registrations
                .insert(registration.service_id.clone(), registration);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    fn insert_new(&self, registration: Registration) -> Result<Registration> {
        use dashmap::mapref::entry::Entry;

        match self.registrations.entry(registration.service_id.clone()) {
            Entry::Occupied(_) => Err(Error::duplicate_name(format!(
                "registration '{}' already exists",
                registration.service_id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(registration.clone());
                Ok(registration)
            }
        }
    }

    /// Replace an existing entry, returning whether the stored value changed.
    fn replace(&self, registration: Registration) -> Result<bool> {
        let mut entry = self
            .registrations
            .get_mut(&registration.service_id)
            .ok_or_else(|| not_found(&registration.service_id))?;

        if *entry == registration {
            return Ok(false);
        }
        *entry = registration;
        Ok(true)
    }

    fn remove(&self, service_id: &str) -> Result<()> {
        self.registrations
            .remove(service_id)
            .map(|_| ())
            .ok_or_else(|| not_found(service_id))
    }

    fn snapshot(&self) -> Vec<Registration> {
        let mut all: Vec<Registration> = self
            .registrations
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        all
    }

    fn get(&self, service_id: &str) -> Result<Registration> {
        self.registrations
            .get(service_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found(service_id))
    }
}

#[async_trait]
impl RegistrationStore for MemoryStore {
    async fn add_registration(&self, registration: Registration) -> Result<Registration> {
        self.insert_new(registration)
    }

    async fn update_registration(&self, registration: Registration) -> Result<()> {
        self.replace(registration).map(|_| ())
    }

    async fn delete_registration_by_service_id(&self, service_id: &str) -> Result<()> {
        self.remove(service_id)
    }

    async fn registrations(&self) -> Result<Vec<Registration>> {
        Ok(self.snapshot())
    }

    async fn registration_by_service_id(&self, service_id: &str) -> Result<Registration> {
        self.get(service_id)
    }
}

/// Registration store backed by a JSON snapshot file
///
/// Every mutation rewrites the snapshot through a temporary file and a
/// rename, and reaches memory only once the snapshot is on disk, so a
/// failed write leaves both unchanged.
pub struct JsonFileStore {
    path: PathBuf,
    memory: MemoryStore,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open the snapshot at `path`, starting empty if it does not exist
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let registrations: Vec<Registration> = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(
            path = %path.display(),
            count = registrations.len(),
            "Opened registration store"
        );

        Ok(Self {
            path,
            memory: MemoryStore::with_registrations(registrations),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current rows with `service_id` dropped and `replacement` added,
    /// ordered by service id.
    fn staged(&self, service_id: &str, replacement: Option<&Registration>) -> Vec<Registration> {
        let mut rows: Vec<Registration> = self
            .memory
            .snapshot()
            .into_iter()
            .filter(|r| r.service_id != service_id)
            .collect();
        rows.extend(replacement.cloned());
        rows.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        rows
    }

    /// Write `rows` as the new snapshot. The caller holds `write_lock` and
    /// applies the change to memory only after this succeeds.
    async fn persist(&self, rows: &[Registration]) -> Result<()> {
        let contents = serde_json::to_vec_pretty(rows)?;
        let tmp = self.path.with_extension("tmp");

        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| Error::storage(format!("writing {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::storage(format!("replacing {}: {}", self.path.display(), e)))?;

        debug!(path = %self.path.display(), "Persisted registration snapshot");
        Ok(())
    }
}

#[async_trait]
impl RegistrationStore for JsonFileStore {
    async fn add_registration(&self, registration: Registration) -> Result<Registration> {
        let _guard = self.write_lock.lock().await;

        if self.memory.get(&registration.service_id).is_ok() {
            return Err(Error::duplicate_name(format!(
                "registration '{}' already exists",
                registration.service_id
            )));
        }

        self.persist(&self.staged(&registration.service_id, Some(&registration)))
            .await?;
        self.memory.insert_new(registration)
    }

    async fn update_registration(&self, registration: Registration) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if self.memory.get(&registration.service_id)? == registration {
            return Ok(());
        }

        self.persist(&self.staged(&registration.service_id, Some(&registration)))
            .await?;
        self.memory.replace(registration).map(|_| ())
    }

    async fn delete_registration_by_service_id(&self, service_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        self.memory.get(service_id)?;
        self.persist(&self.staged(service_id, None)).await?;
        self.memory.remove(service_id)
    }

    async fn registrations(&self) -> Result<Vec<Registration>> {
        Ok(self.memory.snapshot())
    }

    async fn registration_by_service_id(&self, service_id: &str) -> Result<Registration> {
        self.memory.get(service_id)
    }
}
