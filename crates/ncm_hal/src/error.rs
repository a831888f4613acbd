//! Error handling for the network porting layer
//!
//! This module provides structured error types for all HAL operations,
//! so the connection manager can tell an interface failure from a DHCP
//! failure and react to each differently.

use std::fmt;
use std::result;

/// Result type for HAL operations
pub type HalResult<T> = result::Result<T, HalError>;

/// Error types reported by the porting layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalError {
    /// Interface operation (config, start, stop, address) failed
    Interface(InterfaceError),
    /// DHCP client or server operation failed
    Dhcp(DhcpError),
    /// Legacy configuration could not be read
    Migration(MigrationError),
    /// The interface is already stopped
    Stopped(String),
    /// No such interface
    UnknownInterface(String),
    /// Invalid argument or state
    Invalid(String),
    /// Operation not supported by this port
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceError {
    pub operation: String,
    pub interface: String,
    pub message: String,
}

/// Failure class of a DHCP exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpFailure {
    /// Server answered with DHCPNAK; the lease is gone
    Nak,
    /// No answer within the client's retransmission window
    Timeout,
    /// The reply was malformed or the session is unusable
    Protocol,
    /// DHCP server (AP side) failure
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpError {
    pub operation: String,
    pub failure: DhcpFailure,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationError {
    pub item: String,
    pub message: String,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HalError::Interface(err) => write!(
                f,
                "Interface error on {} in {}: {}",
                err.interface, err.operation, err.message
            ),
            HalError::Dhcp(err) => write!(
                f,
                "DHCP error in {} ({:?}): {}",
                err.operation, err.failure, err.message
            ),
            HalError::Migration(err) => {
                write!(f, "Migration error for {}: {}", err.item, err.message)
            }
            HalError::Stopped(name) => write!(f, "Interface {name} is already stopped"),
            HalError::UnknownInterface(name) => write!(f, "Unknown interface: {name}"),
            HalError::Invalid(msg) => write!(f, "Invalid operation: {msg}"),
            HalError::Unsupported(msg) => write!(f, "Unsupported operation: {msg}"),
        }
    }
}

impl std::error::Error for HalError {}

// Helper functions for creating specific error types
impl HalError {
    pub fn interface_error(operation: &str, interface: &str, message: &str) -> Self {
        HalError::Interface(InterfaceError {
            operation: operation.to_string(),
            interface: interface.to_string(),
            message: message.to_string(),
        })
    }

    pub fn dhcp_error(operation: &str, failure: DhcpFailure, message: &str) -> Self {
        HalError::Dhcp(DhcpError {
            operation: operation.to_string(),
            failure,
            message: message.to_string(),
        })
    }

    pub fn migration_error(item: &str, message: &str) -> Self {
        HalError::Migration(MigrationError {
            item: item.to_string(),
            message: message.to_string(),
        })
    }

    pub fn unknown_interface(name: &str) -> Self {
        HalError::UnknownInterface(name.to_string())
    }

    pub fn stopped(name: &str) -> Self {
        HalError::Stopped(name.to_string())
    }

    pub fn unsupported(message: &str) -> Self {
        HalError::Unsupported(message.to_string())
    }

    pub fn invalid(message: &str) -> Self {
        HalError::Invalid(message.to_string())
    }

    /// True when the port reports that the interface was not running.
    pub fn is_stopped(&self) -> bool {
        matches!(self, HalError::Stopped(_))
    }

    /// The DHCP failure class, if this is a DHCP error.
    pub fn dhcp_failure(&self) -> Option<DhcpFailure> {
        match self {
            HalError::Dhcp(err) => Some(err.failure),
            _ => None,
        }
    }
}
