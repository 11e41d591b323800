//! Runner configuration
//!
//! Settings that stay fixed across runs (poll granularity, device paths) are
//! handed to the runner at construction time rather than kept in globals.

use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{Result, SpawnError};
use crate::execution::SpawnRunner;

/// Default sleep between non-blocking waits while a timeout is armed
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Devices bound for `InheritStandard` and `Ignore` stdio targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePaths {
    pub stdin: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub null: PathBuf,
}

impl Default for DevicePaths {
    fn default() -> Self {
        Self {
            stdin: PathBuf::from("/dev/stdin"),
            stdout: PathBuf::from("/dev/stdout"),
            stderr: PathBuf::from("/dev/stderr"),
            null: PathBuf::from("/dev/null"),
        }
    }
}

impl DevicePaths {
    /// Canonical device for a standard slot (0, 1, 2)
    pub fn standard(&self, slot: u32) -> Option<&PathBuf> {
        match slot {
            0 => Some(&self.stdin),
            1 => Some(&self.stdout),
            2 => Some(&self.stderr),
            _ => None,
        }
    }
}

/// Runner configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Sleep between polls when a timeout is configured
    pub poll_interval: Duration,
    /// Device paths used by the stdio resolver
    pub devices: DevicePaths,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            devices: DevicePaths::default(),
        }
    }
}

impl RunnerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(SpawnError::InvalidConfig(
                "Poll interval must be greater than zero".to_string(),
            ));
        }

        let devices = [
            ("stdin", &self.devices.stdin),
            ("stdout", &self.devices.stdout),
            ("stderr", &self.devices.stderr),
            ("null", &self.devices.null),
        ];
        for (name, path) in devices {
            if path.as_os_str().is_empty() {
                return Err(SpawnError::InvalidConfig(format!(
                    "Device path for {} cannot be empty",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// Builder pattern for runner creation
#[derive(Debug, Default)]
pub struct RunnerBuilder {
    config: RunnerConfig,
}

impl RunnerBuilder {
    /// Create new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set poll interval used while a timeout is armed
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set device paths
    pub fn devices(mut self, devices: DevicePaths) -> Self {
        self.config.devices = devices;
        self
    }

    /// Set the null device
    pub fn null_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.devices.null = path.into();
        self
    }

    /// Build runner
    pub fn build(self) -> Result<SpawnRunner> {
        self.config.validate()?;
        Ok(SpawnRunner::new(self.config))
    }
}
