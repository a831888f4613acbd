//! Network connection manager porting layer
//!
//! This crate holds the contract between the connection manager and the
//! platform beneath it. Nothing in here knows about connection modes or
//! handles; it only describes what the hardware can do.
//!
//! The HAL is designed to:
//! - Report interfaces and their cloud/local roles
//! - Configure, start and stop interfaces
//! - Deliver link and association events from the platform's own thread
//! - Run DHCP client sessions and the access-point DHCP server
//! - Expose legacy configuration for one-shot migration

pub mod error;
pub mod migration;
pub mod network;
pub mod sim;
pub mod time;

pub use error::{DhcpFailure, HalError, HalResult};
pub use migration::{MigrationDataId, MigrationSource};
pub use network::{
    Capabilities, DhcpLease, DhcpServerConfig, DhcpSessionId, EventHandler, HalEvent,
    InterfaceConfig, InterfaceStatus, Ipv4Config, Ipv4Method, NetifKind, NetworkHal, RenewMode,
    SystemInfo, WifiSecurity,
};
pub use time::{Clock, ManualClock, SystemClock};
