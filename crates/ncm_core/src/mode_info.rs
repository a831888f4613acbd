//! Per-mode connection state

use std::fmt;
use std::sync::Arc;

use ncm_hal::{Ipv4Config, NetifKind, SystemInfo};
use serde::Serialize;

use crate::dhcp::DhcpClientState;
use crate::params::{ConnectionParameter, Mode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectStatus {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectStatus::Disconnected => "disconnected",
            ConnectStatus::Connecting => "connecting",
            ConnectStatus::Connected => "connected",
            ConnectStatus::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Status reported to registered callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotifyStatus {
    Disconnected,
    Connected,
    /// Access point is up and waiting for clients
    ApStart,
}

/// Callback invoked with the mode and its new status. User data is
/// whatever the closure captures.
pub type NotifyCallback = Arc<dyn Fn(Mode, NotifyStatus) + Send + Sync>;

/// Interface a running connection uses
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveInterface {
    pub name: String,
    pub kind: NetifKind,
}

pub struct ModeInfo {
    pub mode: Mode,
    pub connect_status: ConnectStatus,
    pub connect_info_saved: bool,
    /// Parameters of the last successful start
    pub parameter: ConnectionParameter,
    pub ip_info: Ipv4Config,
    pub ether: Option<SystemInfo>,
    pub wifi: Option<SystemInfo>,
    pub ap_client_count: u32,
    pub if_up: bool,
    pub link_up: bool,
    pub notify: NotifyStatus,
    pub callback: Option<NotifyCallback>,
    pub active: Option<ActiveInterface>,
    pub dhcp: Option<DhcpClientState>,
    pub dhcp_server_running: bool,
    pub ap_started: bool,
}

impl ModeInfo {
    pub fn new(mode: Mode, ether: Option<SystemInfo>, wifi: Option<SystemInfo>) -> Self {
        Self {
            mode,
            connect_status: ConnectStatus::Disconnected,
            connect_info_saved: false,
            parameter: ConnectionParameter::default(),
            ip_info: Ipv4Config::default(),
            ether,
            wifi,
            ap_client_count: 0,
            if_up: false,
            link_up: false,
            notify: NotifyStatus::Disconnected,
            callback: None,
            active: None,
            dhcp: None,
            dhcp_server_running: false,
            ap_started: false,
        }
    }

    /// Clear everything a previous connection left behind.
    pub fn reset_transient(&mut self) {
        self.ip_info = Ipv4Config::default();
        self.ap_client_count = 0;
        self.if_up = false;
        self.link_up = false;
        self.active = None;
        self.dhcp = None;
        self.dhcp_server_running = false;
        self.ap_started = false;
    }

    pub fn interface_for(&self, kind: NetifKind) -> Option<&SystemInfo> {
        match kind {
            NetifKind::Ethernet => self.ether.as_ref(),
            NetifKind::Wifi => self.wifi.as_ref(),
        }
    }

    pub fn active_ifname(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.name.as_str())
    }

    pub fn active_kind(&self) -> Option<NetifKind> {
        self.active.as_ref().map(|active| active.kind)
    }

    /// Interface queries go to: the active one, else the first assigned.
    pub fn query_ifname(&self) -> Option<&str> {
        self.active_ifname().or_else(|| {
            self.ether
                .as_ref()
                .or(self.wifi.as_ref())
                .map(|info| info.name.as_str())
        })
    }

    /// True if events from `ifname` belong to this mode.
    pub fn accepts_events_from(&self, ifname: &str) -> bool {
        self.connect_status != ConnectStatus::Disconnected && self.active_ifname() == Some(ifname)
    }

    pub fn compute_notify(&self) -> NotifyStatus {
        match self.connect_status {
            ConnectStatus::Connected => NotifyStatus::Connected,
            ConnectStatus::Connecting if self.mode == Mode::AccessPoint && self.ap_started => {
                NotifyStatus::ApStart
            }
            _ => NotifyStatus::Disconnected,
        }
    }

    /// Recompute the notify value. Returns the callback to run if it changed.
    pub fn refresh_notify(&mut self) -> Option<(NotifyStatus, NotifyCallback)> {
        let next = self.compute_notify();
        if next == self.notify {
            return None;
        }
        self.notify = next;
        self.callback.clone().map(|callback| (next, callback))
    }
}

impl fmt::Debug for ModeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeInfo")
            .field("mode", &self.mode)
            .field("connect_status", &self.connect_status)
            .field("notify", &self.notify)
            .field("active", &self.active)
            .field("ap_client_count", &self.ap_client_count)
            .field("has_callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ap_info() -> ModeInfo {
        ModeInfo::new(
            Mode::AccessPoint,
            None,
            Some(SystemInfo {
                name: "wlan0".to_string(),
                kind: NetifKind::Wifi,
                cloud_enabled: false,
                local_enabled: true,
            }),
        )
    }

    #[test]
    fn test_notify_values() {
        let mut info = ap_info();
        assert_eq!(info.compute_notify(), NotifyStatus::Disconnected);
        info.connect_status = ConnectStatus::Connecting;
        assert_eq!(info.compute_notify(), NotifyStatus::Disconnected);
        info.ap_started = true;
        assert_eq!(info.compute_notify(), NotifyStatus::ApStart);
        info.connect_status = ConnectStatus::Connected;
        assert_eq!(info.compute_notify(), NotifyStatus::Connected);
        info.connect_status = ConnectStatus::Disconnecting;
        assert_eq!(info.compute_notify(), NotifyStatus::Disconnected);
    }

    #[test]
    fn test_refresh_only_reports_changes() {
        let mut info = ap_info();
        info.callback = Some(Arc::new(|_: Mode, _: NotifyStatus| {}));
        assert!(info.refresh_notify().is_none());
        info.connect_status = ConnectStatus::Connected;
        let (status, _) = info.refresh_notify().unwrap();
        assert_eq!(status, NotifyStatus::Connected);
        assert!(info.refresh_notify().is_none());
    }

    #[test]
    fn test_event_routing_requires_active_interface() {
        let mut info = ap_info();
        assert!(!info.accepts_events_from("wlan0"));
        info.active = Some(ActiveInterface {
            name: "wlan0".to_string(),
            kind: NetifKind::Wifi,
        });
        assert!(!info.accepts_events_from("wlan0"));
        info.connect_status = ConnectStatus::Connecting;
        assert!(info.accepts_events_from("wlan0"));
        assert!(!info.accepts_events_from("eth0"));
        assert_eq!(info.query_ifname(), Some("wlan0"));
    }
}
