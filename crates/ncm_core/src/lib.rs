//! Network connection manager core
//!
//! This crate brings up and supervises the network link of a camera or edge
//! device on top of the `ncm_hal` porting layer. It provides:
//! - Handle-based access for the Normal (Ethernet / Wi-Fi station) and
//!   Access Point modes
//! - The per-mode connection state machine driven by HAL events
//! - DHCP lease upkeep with renewal, rebinding and throttled retries
//! - Masked validation and persistence of connection parameters
//! - One-shot import of legacy configuration

pub use config::{HandleLimits, LoggingConfig, ManagerConfig};
pub use error::{EventCode, NcmError, NcmResult};
pub use led::{LedStatus, LedTarget, NullIndicator, RecordingIndicator, StatusIndicator};
pub use logging::init_logging;
pub use manager::{
    Collaborators, ConnectionInfo, ConnectionManager, IfStatus, IpInfo, StartSource,
};
pub use mode_info::{ActiveInterface, ConnectStatus, NotifyStatus};
pub use params::{
    AccessPointParameter, ConnectionParameter, HandleType, IpMethod, IpSetting, Mode,
    NormalParameter, ParameterMask, ParameterSection, ProxyParameter, VariantParameter,
    WifiApParameter, WifiEncryption, WifiStaParameter,
};
pub use registry::Handle;
pub use storage::{MemoryStore, ParameterStore, StorageError, StorageValue};

pub mod accessor;
pub mod config;
pub mod dhcp;
pub mod error;
mod events;
pub mod gate;
pub mod led;
pub mod logging;
pub mod manager;
pub mod mapper;
mod migration;
pub mod mode_info;
pub mod notify;
pub mod params;
pub mod registry;
pub mod storage;
pub mod validator;

// Logging facade macros; call sites stay, formatting is stripped in minimal builds
#[cfg(feature = "minimal-logging")]
#[macro_export]
macro_rules! ncm_log_debug { ($($tt:tt)*) => {{}}; }
#[cfg(not(feature = "minimal-logging"))]
#[macro_export]
macro_rules! ncm_log_debug { ($($tt:tt)*) => { tracing::debug!($($tt)*) }; }

#[cfg(feature = "minimal-logging")]
#[macro_export]
macro_rules! ncm_log_info { ($($tt:tt)*) => {{}}; }
#[cfg(not(feature = "minimal-logging"))]
#[macro_export]
macro_rules! ncm_log_info { ($($tt:tt)*) => { tracing::info!($($tt)*) }; }

#[cfg(feature = "minimal-logging")]
#[macro_export]
macro_rules! ncm_log_warn { ($($tt:tt)*) => {{}}; }
#[cfg(not(feature = "minimal-logging"))]
#[macro_export]
macro_rules! ncm_log_warn { ($($tt:tt)*) => { tracing::warn!($($tt)*) }; }

#[cfg(feature = "minimal-logging")]
#[macro_export]
macro_rules! ncm_log_error { ($($tt:tt)*) => {{}}; }
#[cfg(not(feature = "minimal-logging"))]
#[macro_export]
macro_rules! ncm_log_error { ($($tt:tt)*) => { tracing::error!($($tt)*) }; }
