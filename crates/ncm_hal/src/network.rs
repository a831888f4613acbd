//! Network porting-layer contract
//!
//! This module defines the narrow interface the connection manager expects
//! from the platform: interface enumeration, configuration, start/stop,
//! asynchronous link events, IPv4 addressing and a DHCP client/server.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::HalResult;

/// Kind of physical network interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetifKind {
    Wifi,
    Ethernet,
}

impl fmt::Display for NetifKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetifKind::Wifi => write!(f, "wifi"),
            NetifKind::Ethernet => write!(f, "ethernet"),
        }
    }
}

/// One interface as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub name: String,
    pub kind: NetifKind,
    /// Usable for the cloud-facing (station/Ethernet) connection
    pub cloud_enabled: bool,
    /// Usable for the local access point
    pub local_enabled: bool,
}

/// Events delivered by the platform on its own thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalEvent {
    IfUp,
    IfDown,
    /// The interface is about to go down; sent before [`HalEvent::IfDown`]
    IfDownPre,
    LinkUp,
    LinkDown,
    WifiStaConnected,
    WifiStaDisconnected,
    WifiStaStop,
    WifiApStart,
    WifiApConnected,
    WifiApDisconnected,
    Tick1s,
}

/// Event callback registered per interface. Receives the interface name.
pub type EventHandler = Arc<dyn Fn(&str, HalEvent) + Send + Sync>;

/// Wi-Fi security as understood by the porting layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WifiSecurity {
    Wpa2Psk,
    Wpa3Psk,
    Wpa2Wpa3Psk,
}

/// Interface configuration applied before [`NetworkHal::start`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceConfig {
    Ethernet,
    WifiStation {
        ssid: String,
        password: String,
        security: WifiSecurity,
    },
    WifiAccessPoint {
        ssid: String,
        password: String,
        security: WifiSecurity,
        channel: u8,
    },
}

/// Raw interface status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceStatus {
    pub is_if_up: bool,
    pub is_link_up: bool,
    /// Received signal strength in dBm, zero when not applicable
    pub rssi: i8,
}

/// How the interface obtains its IPv4 address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ipv4Method {
    Static,
    Dhcp,
}

/// IPv4 configuration of an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Config {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: Ipv4Addr,
}

impl Default for Ipv4Config {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::UNSPECIFIED,
            netmask: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
            dns: Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// Platform capabilities relevant to connection management
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// The platform runs its own DHCP client; the manager must not open one
    pub use_external_dhcpc: bool,
}

/// Identifier of an open DHCP client session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DhcpSessionId(pub u32);

/// Result of a successful DHCP exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpLease {
    pub ipaddr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub default_router: Ipv4Addr,
    pub dnsaddr: Ipv4Addr,
    pub server_id: Ipv4Addr,
    /// Seconds
    pub lease_time: u32,
    /// T1, seconds
    pub renewal_time: u32,
    /// T2, seconds
    pub rebinding_time: u32,
}

impl DhcpLease {
    pub fn ipv4_config(&self) -> Ipv4Config {
        Ipv4Config {
            address: self.ipaddr,
            netmask: self.netmask,
            gateway: self.default_router,
            dns: self.dnsaddr,
        }
    }
}

/// How a lease renewal is addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewMode {
    /// RENEWING: unicast to the server that granted the lease
    Unicast,
    /// REBINDING: broadcast to any server
    Rebind,
}

/// DHCP server settings for the access point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpServerConfig {
    pub server_address: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// The porting layer beneath the connection manager.
///
/// Implementations deliver [`HalEvent`]s to registered handlers from their
/// own thread. A handler may call back into the port, so implementations
/// must not hold internal locks while invoking it, and must never invoke it
/// from inside one of these trait calls.
pub trait NetworkHal: Send + Sync {
    fn system_info(&self) -> HalResult<Vec<SystemInfo>>;
    fn capabilities(&self) -> Capabilities;

    fn set_config(&self, ifname: &str, config: &InterfaceConfig) -> HalResult<()>;
    fn start(&self, ifname: &str) -> HalResult<()>;
    /// Announce an imminent stop. The port answers with [`HalEvent::IfDownPre`].
    fn stop_pre(&self, ifname: &str) -> HalResult<()>;
    /// Stop the interface; [`crate::HalError::Stopped`] if it was not running.
    fn stop(&self, ifname: &str) -> HalResult<()>;

    fn register_event_handler(&self, ifname: &str, handler: EventHandler) -> HalResult<()>;
    fn unregister_event_handler(&self, ifname: &str) -> HalResult<()>;

    fn status(&self, ifname: &str) -> HalResult<InterfaceStatus>;
    fn netstat(&self, ifname: &str) -> HalResult<String>;
    fn mac_address(&self, ifname: &str) -> HalResult<[u8; 6]>;

    fn ipv4(&self, ifname: &str) -> HalResult<Ipv4Config>;
    fn set_ipv4(&self, ifname: &str, config: &Ipv4Config) -> HalResult<()>;
    fn set_ipv4_method(&self, ifname: &str, method: Ipv4Method) -> HalResult<()>;

    fn dhcp_client_open(&self, ifname: &str, mac: [u8; 6]) -> HalResult<DhcpSessionId>;
    fn dhcp_client_request(&self, session: DhcpSessionId) -> HalResult<DhcpLease>;
    fn dhcp_client_renew(&self, session: DhcpSessionId, mode: RenewMode) -> HalResult<DhcpLease>;
    fn dhcp_client_release(&self, session: DhcpSessionId) -> HalResult<()>;
    fn dhcp_client_close(&self, session: DhcpSessionId) -> HalResult<()>;

    fn dhcp_server_start(&self, ifname: &str, config: &DhcpServerConfig) -> HalResult<()>;
    fn dhcp_server_stop(&self, ifname: &str) -> HalResult<()>;
}
