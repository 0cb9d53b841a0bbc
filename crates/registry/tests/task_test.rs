//! Integration tests for the health-check task polling lifecycle

use async_trait::async_trait;
use common::{Error, Result};
use mockall::mock;
use registry::probe::{HealthProbe, HttpProbe};
use registry::storage::{MemoryStore, RegistrationStore};
use registry::task::{HealthCheckTask, TaskContext};
use registry::types::{HealthCheck, Registration, Status};
use registry::RegistryMetrics;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

mock! {
    pub Store {}

    #[async_trait]
    impl RegistrationStore for Store {
        async fn add_registration(&self, registration: Registration) -> Result<Registration>;
        async fn update_registration(&self, registration: Registration) -> Result<()>;
        async fn delete_registration_by_service_id(&self, service_id: &str) -> Result<()>;
        async fn registrations(&self) -> Result<Vec<Registration>>;
        async fn registration_by_service_id(&self, service_id: &str) -> Result<Registration>;
    }
}

/// Probe answering from a script, then with a fixed status, recording
/// the time of every call
struct ScriptedProbe {
    script: Mutex<VecDeque<Status>>,
    then: Status,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedProbe {
    fn new(script: impl IntoIterator<Item = Status>, then: Status) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            then,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn offsets(&self, start: Instant) -> Vec<Duration> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.duration_since(start))
            .collect()
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, _registration: &Registration) -> Status {
        self.calls.lock().unwrap().push(Instant::now());
        self.script.lock().unwrap().pop_front().unwrap_or(self.then)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Memory store that counts status writes
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    updates: AtomicUsize,
}

#[async_trait]
impl RegistrationStore for CountingStore {
    async fn add_registration(&self, registration: Registration) -> Result<Registration> {
        self.inner.add_registration(registration).await
    }

    async fn update_registration(&self, registration: Registration) -> Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_registration(registration).await
    }

    async fn delete_registration_by_service_id(&self, service_id: &str) -> Result<()> {
        self.inner.delete_registration_by_service_id(service_id).await
    }

    async fn registrations(&self) -> Result<Vec<Registration>> {
        self.inner.registrations().await
    }

    async fn registration_by_service_id(&self, service_id: &str) -> Result<Registration> {
        self.inner.registration_by_service_id(service_id).await
    }
}

fn registration(host: &str, port: u16, interval: &str) -> Registration {
    Registration::new(
        "device-modbus",
        host,
        port,
        HealthCheck {
            scheme: "http".to_string(),
            path: "/api/v3/ping".to_string(),
            interval: interval.to_string(),
        },
    )
}

async fn counting_store(registration: &Registration) -> Arc<CountingStore> {
    let store = Arc::new(CountingStore::default());
    store.add_registration(registration.clone()).await.unwrap();
    store
}

#[tokio::test(start_paused = true)]
async fn test_two_phase_polling_cadence() {
    let reg = registration("localhost", 59901, "10s");
    let store = counting_store(&reg).await;
    let probe = ScriptedProbe::new([Status::Down, Status::Down, Status::Down], Status::Up);
    let ctx = TaskContext::new(probe.clone(), store.clone(), CancellationToken::new());

    let start = Instant::now();
    let handle = HealthCheckTask::new(reg, ctx).spawn();

    tokio::time::sleep(Duration::from_secs(45)).await;
    handle.stop();
    handle.join().await;

    // Half-interval polling while down, full interval from the first up.
    let expected: Vec<Duration> = [5, 10, 15, 20, 30, 40]
        .into_iter()
        .map(Duration::from_secs)
        .collect();
    assert_eq!(probe.offsets(start), expected);
    assert_eq!(store.updates.load(Ordering::SeqCst), expected.len());
    assert_eq!(
        store
            .registration_by_service_id("device-modbus")
            .await
            .unwrap()
            .status,
        Status::Up
    );
}

#[tokio::test(start_paused = true)]
async fn test_first_tick_marks_service_up() {
    let reg = registration("localhost", 59901, "10s");
    let store = counting_store(&reg).await;
    let probe = ScriptedProbe::new([], Status::Up);
    let ctx = TaskContext::new(probe.clone(), store.clone(), CancellationToken::new());

    let handle = HealthCheckTask::new(reg, ctx).spawn();

    tokio::time::sleep(Duration::from_millis(5_001)).await;
    assert_eq!(store.updates.load(Ordering::SeqCst), 1);
    assert_eq!(
        store
            .registration_by_service_id("device-modbus")
            .await
            .unwrap()
            .status,
        Status::Up
    );

    handle.stop();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_service_never_up_keeps_fast_polling() {
    let reg = registration("localhost", 59901, "10s");
    let store = counting_store(&reg).await;
    let probe = ScriptedProbe::new([], Status::Down);
    let ctx = TaskContext::new(probe.clone(), store.clone(), CancellationToken::new());

    let start = Instant::now();
    let handle = HealthCheckTask::new(reg, ctx).spawn();

    tokio::time::sleep(Duration::from_secs(61)).await;
    handle.stop();
    handle.join().await;

    let offsets = probe.offsets(start);
    assert_eq!(offsets.len(), 12);
    for (i, offset) in offsets.iter().enumerate() {
        assert_eq!(*offset, Duration::from_secs(5 * (i as u64 + 1)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_probe_after_stop() {
    let reg = registration("localhost", 59901, "10s");
    let store = counting_store(&reg).await;
    let probe = ScriptedProbe::new([], Status::Down);
    let ctx = TaskContext::new(probe.clone(), store.clone(), CancellationToken::new());

    let handle = HealthCheckTask::new(reg, ctx.clone()).spawn();
    tokio::time::sleep(Duration::from_secs(11)).await;
    handle.stop();
    handle.join().await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(probe.offsets(Instant::now()).len(), 2);
    assert_eq!(ctx.live_tasks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_persistence_failure_does_not_stop_task() {
    let mut store = MockStore::new();
    store
        .expect_update_registration()
        .returning(|_| Err(Error::storage("database unavailable")));

    let metrics = Arc::new(RegistryMetrics::new());
    let probe = ScriptedProbe::new([], Status::Down);
    let ctx = TaskContext::new(probe.clone(), Arc::new(store), CancellationToken::new())
        .with_metrics(metrics.clone());

    let handle = HealthCheckTask::new(registration("localhost", 59901, "2s"), ctx).spawn();
    tokio::time::sleep(Duration::from_millis(4_500)).await;

    assert_eq!(probe.offsets(Instant::now()).len(), 4);
    assert_eq!(metrics.tasks_active(), 1);

    handle.stop();
    handle.join().await;
    assert_eq!(metrics.tasks_active(), 0);

    let text = metrics.encode().unwrap();
    assert!(text.contains("keeper_status_write_failures_total 4"));
}

#[tokio::test]
async fn test_unreachable_service_stays_down() {
    // Nothing listens on port 1.
    let reg = registration("127.0.0.1", 1, "100ms");
    let store = counting_store(&reg).await;
    let probe = Arc::new(HttpProbe::new(Duration::from_millis(200)).unwrap());
    let ctx = TaskContext::new(probe, store.clone(), CancellationToken::new());

    let handle = HealthCheckTask::new(reg, ctx).spawn();
    tokio::time::sleep(Duration::from_millis(400)).await;
    handle.stop();
    handle.join().await;

    assert!(store.updates.load(Ordering::SeqCst) >= 2);
    assert_eq!(
        store
            .registration_by_service_id("device-modbus")
            .await
            .unwrap()
            .status,
        Status::Down
    );
}
