//! Keeper - service registry and configuration store
//!
//! A lightweight, self-hosted registry for microservices: a hierarchical
//! key-value store for configuration plus a service registry that
//! actively health-checks every registered instance.
//!
//! # Components
//!
//! - **RegistryService**: registration CRUD kept in step with health checking
//! - **KvStore**: `/`-separated configuration keys with change notification
//! - **ApiServer**: REST API over both, plus Prometheus metrics
//! - **KeeperServer**: startup reconciliation, serving and shutdown

pub mod config;
pub mod http_server;
pub mod kv;
pub mod server;
pub mod service;

pub use config::{Config, ConfigError};
pub use http_server::{ApiServer, AppState, router};
pub use kv::{KvChange, KvStore};
pub use server::KeeperServer;
pub use service::RegistryService;
