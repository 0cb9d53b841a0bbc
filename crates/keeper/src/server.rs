//! Keeper server wiring.

use crate::config::Config;
use crate::http_server::{ApiServer, AppState};
use crate::kv::KvStore;
use crate::service::RegistryService;
use common::Result;
use registry::{
    HttpProbe, JsonFileStore, MemoryStore, RegistrationStore, Registry, RegistryMetrics,
    TaskContext, reconcile,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Keeper server
pub struct KeeperServer {
    config: Config,
}

impl KeeperServer {
    /// Create a new keeper server
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    async fn open_store(&self) -> Result<Arc<dyn RegistrationStore>> {
        match self.config.storage.path {
            Some(ref path) => Ok(Arc::new(JsonFileStore::open(path).await?)),
            None => {
                info!("No storage path configured, registrations are kept in memory");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }

    /// Bind the configured address and run until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        self.run_with_listener(listener, shutdown).await
    }

    /// Run on an already bound listener until `shutdown` is cancelled
    ///
    /// Fails before serving if the persisted registrations cannot be loaded.
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!("Starting keeper server");

        let metrics = if self.config.metrics.enabled {
            info!("Metrics enabled");
            Some(Arc::new(RegistryMetrics::new()))
        } else {
            info!("Metrics disabled");
            None
        };

        let store = self.open_store().await?;

        let mut probe = HttpProbe::new(self.config.service.request_timeout)?;
        if let Some(ref m) = metrics {
            probe = probe.with_metrics(m.clone());
        }

        let mut context = TaskContext::new(Arc::new(probe), store.clone(), shutdown.child_token());
        if let Some(ref m) = metrics {
            context = context.with_metrics(m.clone());
        }
        let registry = Arc::new(Registry::new(context));

        if let Err(e) = reconcile(store.as_ref(), &registry).await {
            error!(error = %e, "Cannot start without registry state");
            return Err(e);
        }

        let state = AppState {
            service: Arc::new(RegistryService::new(store, registry.clone())),
            kv: Arc::new(KvStore::default()),
            metrics,
        };

        let result = ApiServer::new(state).run(listener, shutdown).await;

        registry.shutdown().await;
        info!("Keeper server stopped");
        result
    }
}
