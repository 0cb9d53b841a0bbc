//! Service registry with active HTTP health checking for Keeper.
//!
//! Every registered service instance gets its own health-check task that
//! probes `{type}://{host}:{port}{path}` and writes the classified status
//! back to storage:
//! - fast polling at half the configured interval until the service is up
//! - steady polling at the configured interval afterwards
//! - stopped on deregistration or process shutdown
//!
//! # Example
//!
//! ```no_run
//! use registry::{HealthCheck, HttpProbe, MemoryStore, Registration, Registry, TaskContext};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let context = TaskContext::new(
//!     Arc::new(HttpProbe::new(Duration::from_secs(5))?),
//!     Arc::new(MemoryStore::new()),
//!     CancellationToken::new(),
//! );
//! let registry = Registry::new(context);
//!
//! registry
//!     .register(Registration::new(
//!         "core-data",
//!         "localhost",
//!         59880,
//!         HealthCheck {
//!             scheme: "http".into(),
//!             path: "/api/v3/ping".into(),
//!             interval: "10s".into(),
//!         },
//!     ))
//!     .await;
//!
//! registry.deregister("core-data").await;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod metrics;
pub mod probe;
pub mod registry;
pub mod storage;
pub mod task;
pub mod types;

pub use bootstrap::reconcile;
pub use metrics::RegistryMetrics;
pub use probe::{HealthProbe, HttpProbe, ProbeScheme};
pub use registry::Registry;
pub use storage::{JsonFileStore, MemoryStore, RegistrationStore};
pub use task::{HealthCheckTask, Phase, TaskContext, TaskHandle};
pub use types::{HealthCheck, Registration, Status};
