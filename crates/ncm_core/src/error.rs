//! Result taxonomy of the connection manager
//!
//! Every public operation returns `NcmResult`. Variants map one-to-one onto
//! the result codes firmware callers switch on; `Ok(())` is success.

use std::fmt;

use ncm_hal::HalError;

/// Result type for all connection manager operations
pub type NcmResult<T> = Result<T, NcmError>;

/// Error type returned by the connection manager
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NcmError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid handle type: {0}")]
    InvalidHandleType(String),

    #[error("Status unexecutable: {0}")]
    StatusUnexecutable(String),

    #[error("Status already running: {0}")]
    StatusAlreadyRunning(String),

    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Hardware interface error: {0}")]
    HwIf(String),

    #[error("IP address utility error: {0}")]
    UtilityIpAddress(String),

    #[error("DHCP server utility error: {0}")]
    UtilityDhcpServer(String),

    #[error("External error: {0}")]
    External(String),

    #[error("Callback already registered")]
    AlreadyCallbackRegistered,

    #[error("Callback already unregistered")]
    AlreadyCallbackUnregistered,

    #[error("No connection information saved")]
    NoConnectInfo,

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Internal error [{code}]: {message}")]
    Internal { code: EventCode, message: String },
}

impl NcmError {
    /// Build an internal error and log it with its event code.
    pub fn internal(code: EventCode, message: impl Into<String>) -> Self {
        let message = message.into();
        crate::ncm_log_error!(event_code = code.value(), %message, "internal error");
        NcmError::Internal { code, message }
    }

    /// Stable numeric result code. Zero is reserved for success.
    pub fn code(&self) -> u32 {
        match self {
            NcmError::InvalidParameter(_) => 1,
            NcmError::InvalidHandleType(_) => 2,
            NcmError::StatusUnexecutable(_) => 3,
            NcmError::StatusAlreadyRunning(_) => 4,
            NcmError::FailedPrecondition(_) => 5,
            NcmError::NotFound(_) => 6,
            NcmError::ResourceExhausted(_) => 7,
            NcmError::HwIf(_) => 8,
            NcmError::UtilityIpAddress(_) => 9,
            NcmError::UtilityDhcpServer(_) => 10,
            NcmError::External(_) => 11,
            NcmError::AlreadyCallbackRegistered => 12,
            NcmError::AlreadyCallbackUnregistered => 13,
            NcmError::NoConnectInfo => 14,
            NcmError::Timeout(_) => 15,
            NcmError::Internal { .. } => 16,
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        NcmError::InvalidParameter(message.into())
    }

    pub fn unexecutable() -> Self {
        NcmError::StatusUnexecutable("connection manager is not initialized".to_string())
    }
}

impl From<HalError> for NcmError {
    fn from(err: HalError) -> Self {
        NcmError::HwIf(err.to_string())
    }
}

/// Event-log codes attached to internal errors and dropped events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
    HandleSlotMissing,
    RefCountUnderflow,
    HandleLockContended,
    ModeTableMissing,
    NotifyQueueFull,
    NotifyDispatcherGone,
    InterfaceUnassigned,
    StopPreTimeout,
    EventDropped,
    DhcpReleaseFailed,
}

impl EventCode {
    pub fn value(self) -> u16 {
        match self {
            EventCode::HandleSlotMissing => 0x8101,
            EventCode::RefCountUnderflow => 0x8102,
            EventCode::HandleLockContended => 0x8103,
            EventCode::ModeTableMissing => 0x8104,
            EventCode::NotifyQueueFull => 0x8201,
            EventCode::NotifyDispatcherGone => 0x8202,
            EventCode::InterfaceUnassigned => 0x8301,
            EventCode::StopPreTimeout => 0x8302,
            EventCode::EventDropped => 0x8303,
            EventCode::DhcpReleaseFailed => 0x8401,
        }
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_and_nonzero() {
        let errors = vec![
            NcmError::InvalidParameter(String::new()),
            NcmError::InvalidHandleType(String::new()),
            NcmError::unexecutable(),
            NcmError::StatusAlreadyRunning(String::new()),
            NcmError::FailedPrecondition(String::new()),
            NcmError::NotFound(String::new()),
            NcmError::ResourceExhausted(String::new()),
            NcmError::HwIf(String::new()),
            NcmError::UtilityIpAddress(String::new()),
            NcmError::UtilityDhcpServer(String::new()),
            NcmError::External(String::new()),
            NcmError::AlreadyCallbackRegistered,
            NcmError::AlreadyCallbackUnregistered,
            NcmError::NoConnectInfo,
            NcmError::Timeout(String::new()),
            NcmError::internal(EventCode::HandleSlotMissing, "test"),
        ];
        let mut codes: Vec<u32> = errors.iter().map(NcmError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn test_hal_error_maps_to_hwif() {
        let err: NcmError = HalError::unknown_interface("eth9").into();
        assert!(matches!(err, NcmError::HwIf(ref msg) if msg.contains("eth9")));
    }

    #[test]
    fn test_event_code_display() {
        assert_eq!(EventCode::NotifyQueueFull.to_string(), "0x8201");
    }
}
