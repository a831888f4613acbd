//! Status indicator contract
//!
//! LED signalling is best-effort: a failed update is logged and forgotten.

use parking_lot::Mutex;
use tracing::warn;

/// Physical indicator a status is shown on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedTarget {
    Connection,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedStatus {
    ConnectingEther,
    ConnectingWifi,
    ConnectedEther,
    ConnectedWifi,
    ApStarted,
    DhcpRecovering,
    ErrorInvalidParameter,
    ErrorHwIf,
    ErrorIpAddress,
    ErrorDhcpServer,
    ErrorNoConnectInfo,
}

impl LedStatus {
    pub fn target(self) -> LedTarget {
        match self {
            LedStatus::ConnectingEther
            | LedStatus::ConnectingWifi
            | LedStatus::ConnectedEther
            | LedStatus::ConnectedWifi
            | LedStatus::ApStarted
            | LedStatus::DhcpRecovering => LedTarget::Connection,
            LedStatus::ErrorInvalidParameter
            | LedStatus::ErrorHwIf
            | LedStatus::ErrorIpAddress
            | LedStatus::ErrorDhcpServer
            | LedStatus::ErrorNoConnectInfo => LedTarget::Error,
        }
    }
}

pub trait StatusIndicator: Send + Sync {
    fn set_status(&self, target: LedTarget, status: LedStatus, enabled: bool) -> Result<(), String>;
}

/// Indicator for boards without LEDs
#[derive(Debug, Default)]
pub struct NullIndicator;

impl StatusIndicator for NullIndicator {
    fn set_status(&self, _: LedTarget, _: LedStatus, _: bool) -> Result<(), String> {
        Ok(())
    }
}

/// Indicator that remembers every update
#[derive(Debug, Default)]
pub struct RecordingIndicator {
    updates: Mutex<Vec<(LedStatus, bool)>>,
}

impl RecordingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<(LedStatus, bool)> {
        self.updates.lock().clone()
    }

    /// True if `status` was ever switched on
    pub fn was_shown(&self, status: LedStatus) -> bool {
        self.updates
            .lock()
            .iter()
            .any(|&(shown, enabled)| shown == status && enabled)
    }

    /// True if the latest update of `status` switched it on
    pub fn is_lit(&self, status: LedStatus) -> bool {
        self.updates
            .lock()
            .iter()
            .rev()
            .find(|&&(shown, _)| shown == status)
            .is_some_and(|&(_, enabled)| enabled)
    }

    pub fn clear(&self) {
        self.updates.lock().clear();
    }
}

impl StatusIndicator for RecordingIndicator {
    fn set_status(&self, _: LedTarget, status: LedStatus, enabled: bool) -> Result<(), String> {
        self.updates.lock().push((status, enabled));
        Ok(())
    }
}

pub(crate) fn show(indicator: &dyn StatusIndicator, status: LedStatus, enabled: bool) {
    if let Err(message) = indicator.set_status(status.target(), status, enabled) {
        warn!(?status, enabled, %message, "status indicator update failed");
    }
}
