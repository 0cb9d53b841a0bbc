//! Registration types and structures.

use common::{Error, Result};
use humantime_serde::re::humantime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::probe::ProbeScheme;

/// Health status of a registered service instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// No probe has completed yet
    #[default]
    Unknown,
    /// Last probe answered with a 2xx status
    Up,
    /// Last probe failed or answered with a non-2xx status
    Down,
    /// Service was deregistered and must not be health-checked
    Halt,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unknown => "UNKNOWN",
            Status::Up => "UP",
            Status::Down => "DOWN",
            Status::Halt => "HALT",
        }
    }

    pub fn is_halted(&self) -> bool {
        *self == Status::Halt
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health check settings of a registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Probe scheme, e.g. "http"
    #[serde(rename = "type")]
    pub scheme: String,

    /// URL path of the health endpoint
    pub path: String,

    /// Interval between probes as a duration string, e.g. "10s"
    pub interval: String,
}

impl HealthCheck {
    /// Parse the configured interval.
    ///
    /// Zero intervals are rejected as well as unparseable ones.
    pub fn parse_interval(&self) -> Result<Duration> {
        let interval = humantime::parse_duration(self.interval.trim()).map_err(|e| {
            Error::contract_invalid(format!(
                "invalid health check interval '{}': {}",
                self.interval, e
            ))
        })?;

        if interval.is_zero() {
            return Err(Error::contract_invalid(format!(
                "health check interval '{}' must be greater than zero",
                self.interval
            )));
        }

        Ok(interval)
    }
}

/// One registered service instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub service_id: String,
    pub host: String,
    pub port: u16,
    pub health_check: HealthCheck,

    #[serde(default)]
    pub status: Status,

    /// Creation time, milliseconds since the Unix epoch
    #[serde(default)]
    pub created: i64,

    /// Last modification time, milliseconds since the Unix epoch
    #[serde(default)]
    pub modified: i64,
}

impl Registration {
    /// Build a registration with `Unknown` status and unset timestamps.
    pub fn new(
        service_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        health_check: HealthCheck,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            host: host.into(),
            port,
            health_check,
            status: Status::Unknown,
            created: 0,
            modified: 0,
        }
    }

    /// Check the fields a health-check task depends on.
    pub fn validate(&self) -> Result<()> {
        if self.service_id.trim().is_empty() {
            return Err(Error::contract_invalid("serviceId must not be empty"));
        }
        if self.host.trim().is_empty() {
            return Err(Error::contract_invalid(format!(
                "host of '{}' must not be empty",
                self.service_id
            )));
        }
        if self.port == 0 {
            return Err(Error::contract_invalid(format!(
                "port of '{}' must be between 1 and 65535",
                self.service_id
            )));
        }
        if !self.health_check.path.is_empty() && !self.health_check.path.starts_with('/') {
            return Err(Error::contract_invalid(format!(
                "health check path '{}' must start with '/'",
                self.health_check.path
            )));
        }
        ProbeScheme::parse(&self.health_check.scheme)?;
        self.health_check.parse_interval()?;
        Ok(())
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
