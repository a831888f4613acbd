//! Manager configuration
//!
//! Timing constants and table sizes live here so a board can tune them from
//! a TOML file without rebuilding. Defaults match the values the firmware
//! has shipped with.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NcmError, NcmResult};
use crate::params::{HandleType, Mode};

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Bound on resource lock acquisition in API paths
    pub resource_lock_timeout_ms: u64,
    /// Bound on handle lock acquisition
    pub handle_lock_timeout_ms: u64,
    /// How long `stop` waits for the lease-release pre-event
    pub stop_pre_timeout_ms: u64,
    /// Minimum spacing between retries of a failed DHCP phase
    pub dhcp_retry_interval_secs: u64,
    /// Capacity of the notification queue
    pub notify_queue_depth: usize,
    pub handle_limits: HandleLimits,
    pub logging: LoggingConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            resource_lock_timeout_ms: 10_000,
            handle_lock_timeout_ms: 10_000,
            stop_pre_timeout_ms: 10_000,
            dhcp_retry_interval_secs: 60,
            notify_queue_depth: 16,
            handle_limits: HandleLimits::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Maximum number of live handles per (mode, type)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandleLimits {
    pub normal_control: usize,
    pub normal_information: usize,
    pub access_point_control: usize,
    pub access_point_information: usize,
}

impl Default for HandleLimits {
    fn default() -> Self {
        Self {
            normal_control: 2,
            normal_information: 4,
            access_point_control: 2,
            access_point_information: 4,
        }
    }
}

impl HandleLimits {
    pub fn limit(&self, mode: Mode, handle_type: HandleType) -> usize {
        match (mode, handle_type) {
            (Mode::Normal, HandleType::Control) => self.normal_control,
            (Mode::Normal, HandleType::Information) => self.normal_information,
            (Mode::AccessPoint, HandleType::Control) => self.access_point_control,
            (Mode::AccessPoint, HandleType::Information) => self.access_point_information,
        }
    }

    /// Size of the handle table
    pub fn total(&self) -> usize {
        self.normal_control
            + self.normal_information
            + self.access_point_control
            + self.access_point_information
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. "info" or "ncm_core=debug"
    pub level: String,
    pub json: bool,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            ansi: true,
        }
    }
}

impl ManagerConfig {
    pub fn from_toml_str(text: &str) -> NcmResult<Self> {
        let config: ManagerConfig = toml::from_str(text)
            .map_err(|e| NcmError::invalid_parameter(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> NcmResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| NcmError::External(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> NcmResult<()> {
        if self.notify_queue_depth == 0 {
            return Err(NcmError::invalid_parameter("notify_queue_depth must be non-zero"));
        }
        if self.dhcp_retry_interval_secs == 0 {
            return Err(NcmError::invalid_parameter(
                "dhcp_retry_interval_secs must be non-zero",
            ));
        }
        for mode in Mode::ALL {
            if self.handle_limits.limit(mode, HandleType::Control) == 0 {
                return Err(NcmError::invalid_parameter(format!(
                    "{mode} needs at least one control handle"
                )));
            }
        }
        if self.handle_limits.total() > usize::from(u16::MAX) {
            return Err(NcmError::invalid_parameter("handle table too large"));
        }
        Ok(())
    }

    pub fn resource_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.resource_lock_timeout_ms)
    }

    pub fn handle_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.handle_lock_timeout_ms)
    }

    pub fn stop_pre_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_pre_timeout_ms)
    }

    pub fn dhcp_retry_interval(&self) -> Duration {
        Duration::from_secs(self.dhcp_retry_interval_secs)
    }
}
