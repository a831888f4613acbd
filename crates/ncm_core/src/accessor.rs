//! HAL accessor
//!
//! Turns manager intents into porting-layer calls. Every method here runs
//! with the resource lock held and takes the mode it acts on as
//! `&mut ModeInfo`. Failures inside event-driven paths are logged and shown
//! on the status LED; only `start` and `stop` report errors to a caller.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use ncm_hal::{
    Clock, DhcpLease, DhcpServerConfig, DhcpSessionId, InterfaceConfig, Ipv4Config, Ipv4Method,
    NetifKind, NetworkHal, RenewMode,
};
use tracing::{debug, info, warn};

use crate::dhcp::{DhcpClientState, DhcpPhase, LeaseTimers, TickAction};
use crate::error::{EventCode, NcmError, NcmResult};
use crate::led::{self, LedStatus, StatusIndicator};
use crate::mode_info::{ActiveInterface, ConnectStatus, ModeInfo};
use crate::params::{ConnectionParameter, IpMethod, IpSetting, Mode, WifiEncryption};

pub struct Accessor {
    hal: Arc<dyn NetworkHal>,
    led: Arc<dyn StatusIndicator>,
    clock: Arc<dyn Clock>,
    retry_interval: Duration,
}

impl Accessor {
    pub fn new(
        hal: Arc<dyn NetworkHal>,
        led: Arc<dyn StatusIndicator>,
        clock: Arc<dyn Clock>,
        retry_interval: Duration,
    ) -> Self {
        Self {
            hal,
            led,
            clock,
            retry_interval,
        }
    }

    pub fn hal(&self) -> &dyn NetworkHal {
        self.hal.as_ref()
    }

    pub fn show(&self, status: LedStatus, enabled: bool) {
        led::show(self.led.as_ref(), status, enabled);
    }

    /// Configure and start the interface `kind` of this mode.
    pub fn start(
        &self,
        info: &mut ModeInfo,
        parameter: &ConnectionParameter,
        kind: NetifKind,
    ) -> NcmResult<()> {
        let name = info
            .interface_for(kind)
            .map(|netif| netif.name.clone())
            .ok_or_else(|| {
                NcmError::FailedPrecondition(format!("{} has no {kind} interface", info.mode))
            })?;
        let config = interface_config(info.mode, kind, parameter)?;

        if let Err(e) = self
            .hal
            .set_config(&name, &config)
            .and_then(|()| self.hal.start(&name))
        {
            warn!(ifname = %name, error = %e, "interface start failed");
            self.show(LedStatus::ErrorHwIf, true);
            return Err(e.into());
        }

        self.show(connecting_led(kind), true);
        info.active = Some(ActiveInterface { name, kind });
        Ok(())
    }

    /// Stop the active interface and settle the mode's status.
    ///
    /// The lease has normally been released by the pre-teardown handler;
    /// whatever is left is released here.
    pub fn stop(&self, info: &mut ModeInfo) -> NcmResult<()> {
        let Some(active) = info.active.clone() else {
            info.connect_status = ConnectStatus::Disconnected;
            return Ok(());
        };
        let ifname = active.name.as_str();

        match self.hal.stop(ifname) {
            Ok(()) => {}
            Err(e) if e.is_stopped() => debug!(ifname, "interface already stopped"),
            Err(e) => {
                warn!(ifname, error = %e, "interface stop failed");
                self.show(LedStatus::ErrorHwIf, true);
                return Err(e.into());
            }
        }

        if info.dhcp_server_running {
            if let Err(e) = self.hal.dhcp_server_stop(ifname) {
                if !e.is_stopped() {
                    warn!(ifname, error = %e, "DHCP server stop failed");
                }
            }
            info.dhcp_server_running = false;
        }
        if let Some(dhcp) = info.dhcp.take() {
            self.release_session(dhcp.session);
        }
        info.ip_info = Ipv4Config::default();
        info.ap_client_count = 0;
        info.ap_started = false;

        let is_down = match self.hal.status(ifname) {
            Ok(status) => !status.is_if_up,
            Err(e) => {
                warn!(ifname, error = %e, "status query after stop failed");
                true
            }
        };
        if is_down {
            info.if_up = false;
            info.link_up = false;
            info.connect_status = ConnectStatus::Disconnected;
        } else {
            info.connect_status = ConnectStatus::Disconnecting;
        }
        self.show(connecting_led(active.kind), false);
        self.show(connected_led(info.mode, active.kind), false);
        Ok(())
    }

    /// Release and close a DHCP session. Best-effort.
    pub fn release_session(&self, session: DhcpSessionId) {
        if let Err(e) = self.hal.dhcp_client_release(session) {
            warn!(
                event_code = EventCode::DhcpReleaseFailed.value(),
                error = %e,
                "DHCP release failed"
            );
        }
        self.close_session(session);
    }

    fn close_session(&self, session: DhcpSessionId) {
        if let Err(e) = self.hal.dhcp_client_close(session) {
            warn!(error = %e, "DHCP session close failed");
        }
    }

    /// Link is usable while connecting: bring up IPv4.
    pub fn link_up_on_connecting(&self, info: &mut ModeInfo) {
        let Some(ifname) = info.active_ifname().map(str::to_string) else {
            return;
        };
        match IpMethod::from_raw(info.parameter.normal.ip_method) {
            Some(IpMethod::Static) => self.apply_static(info, &ifname),
            _ => self.acquire_lease(info, &ifname),
        }
    }

    /// Link lost: drop the DHCP session and fall back to connecting.
    pub fn link_down(&self, info: &mut ModeInfo) {
        if let Some(dhcp) = info.dhcp.take() {
            self.close_session(dhcp.session);
        }
        info.ip_info = Ipv4Config::default();
        if info.connect_status == ConnectStatus::Connected {
            info.connect_status = ConnectStatus::Connecting;
            if let Some(kind) = info.active_kind() {
                self.show(connected_led(info.mode, kind), false);
                self.show(connecting_led(kind), true);
            }
            info!(mode = %info.mode, "link lost, reconnecting");
        }
    }

    /// Re-issue the HAL start; stop the interface if that fails too.
    pub fn reconnect(&self, info: &mut ModeInfo) {
        let Some(ifname) = info.active_ifname() else {
            return;
        };
        if let Err(e) = self.hal.start(ifname) {
            warn!(ifname, error = %e, "reconnect failed, stopping interface");
            self.show(LedStatus::ErrorHwIf, true);
            if let Err(e) = self.hal.stop(ifname) {
                if !e.is_stopped() {
                    warn!(ifname, error = %e, "interface stop failed");
                }
            }
        }
    }

    /// Access point is up: address it and start its DHCP server.
    pub fn ap_started(&self, info: &mut ModeInfo) {
        if info.ap_started {
            return;
        }
        let Some(ifname) = info.active_ifname().map(str::to_string) else {
            return;
        };
        info.if_up = true;
        info.ap_started = true;
        self.show(LedStatus::ApStarted, true);

        let config = match static_config(&info.parameter.access_point.dev_ip).and_then(|config| {
            self.hal.set_ipv4_method(&ifname, Ipv4Method::Static)?;
            self.hal.set_ipv4(&ifname, &config)?;
            Ok(config)
        }) {
            Ok(config) => config,
            Err(e) => {
                warn!(ifname, error = %e, "access point address not applied");
                self.show(LedStatus::ErrorIpAddress, true);
                return;
            }
        };
        info.ip_info = config;

        let server = DhcpServerConfig {
            server_address: config.address,
            netmask: config.netmask,
        };
        match self.start_dhcp_server(&ifname, &server) {
            Ok(()) => {
                info.dhcp_server_running = true;
                info!(ifname, address = %config.address, "access point started");
            }
            Err(e) => {
                warn!(ifname, code = e.code(), error = %e, "access point has no DHCP server");
                self.show(LedStatus::ErrorDhcpServer, true);
            }
        }
    }

    pub fn start_dhcp_server(&self, ifname: &str, server: &DhcpServerConfig) -> NcmResult<()> {
        self.hal
            .dhcp_server_start(ifname, server)
            .map_err(|e| NcmError::UtilityDhcpServer(e.to_string()))
    }

    pub fn ap_client_joined(&self, info: &mut ModeInfo) {
        info.ap_client_count = info.ap_client_count.saturating_add(1);
        if info.ap_client_count == 1 && info.connect_status == ConnectStatus::Connecting {
            info.connect_status = ConnectStatus::Connected;
            self.show(LedStatus::ConnectedWifi, true);
        }
        debug!(clients = info.ap_client_count, "access point client joined");
    }

    pub fn ap_client_left(&self, info: &mut ModeInfo) {
        if info.ap_client_count == 0 {
            warn!("access point client left with none connected");
            return;
        }
        info.ap_client_count -= 1;
        if info.ap_client_count == 0 && info.connect_status == ConnectStatus::Connected {
            info.connect_status = ConnectStatus::Connecting;
            self.show(LedStatus::ConnectedWifi, false);
        }
        debug!(clients = info.ap_client_count, "access point client left");
    }

    /// One-second housekeeping of the DHCP lease.
    pub fn on_tick(&self, info: &mut ModeInfo) {
        if info.connect_status == ConnectStatus::Disconnecting {
            return;
        }
        let Some(dhcp) = info.dhcp.as_ref() else {
            return;
        };
        let Some(ifname) = info.active_ifname().map(str::to_string) else {
            return;
        };
        match dhcp.next_action(self.clock.now(), self.retry_interval) {
            TickAction::Idle => {}
            TickAction::Request => {
                if info.connect_status == ConnectStatus::Connecting && info.if_up && info.link_up {
                    self.request_lease(info, &ifname);
                }
            }
            TickAction::Renew(mode) => {
                if info.connect_status == ConnectStatus::Connected {
                    self.renew_lease(info, &ifname, mode);
                }
            }
            TickAction::Recover => self.recover_lease(info, &ifname),
        }
    }

    fn apply_static(&self, info: &mut ModeInfo, ifname: &str) {
        let result = static_config(&info.parameter.normal.dev_ip).and_then(|config| {
            self.hal.set_ipv4_method(ifname, Ipv4Method::Static)?;
            self.hal.set_ipv4(ifname, &config)?;
            Ok(config)
        });
        match result {
            Ok(config) => {
                info.ip_info = config;
                self.mark_connected(info);
            }
            Err(e) => {
                warn!(ifname, error = %e, "static address not applied");
                self.show(LedStatus::ErrorIpAddress, true);
            }
        }
    }

    fn acquire_lease(&self, info: &mut ModeInfo, ifname: &str) {
        if self.hal.capabilities().use_external_dhcpc {
            match self.hal.set_ipv4_method(ifname, Ipv4Method::Dhcp) {
                Ok(()) => self.mark_connected(info),
                Err(e) => {
                    warn!(ifname, error = %e, "external DHCP client not enabled");
                    self.show(LedStatus::ErrorHwIf, true);
                }
            }
            return;
        }

        if info.dhcp.is_none() {
            let opened = self
                .hal
                .mac_address(ifname)
                .and_then(|mac| self.hal.dhcp_client_open(ifname, mac));
            match opened {
                Ok(session) => info.dhcp = Some(DhcpClientState::new(session)),
                Err(e) => {
                    warn!(ifname, error = %e, "DHCP client open failed");
                    self.show(LedStatus::ErrorHwIf, true);
                    return;
                }
            }
        }
        self.request_lease(info, ifname);
    }

    fn request_lease(&self, info: &mut ModeInfo, ifname: &str) {
        let Some(dhcp) = info.dhcp.as_mut() else {
            return;
        };
        let now = self.clock.now();
        let outcome = self
            .hal
            .dhcp_client_request(dhcp.session)
            .map_err(|e| (e.dhcp_failure(), NcmError::from(e)))
            .and_then(|lease| {
                self.apply_lease(ifname, &lease)
                    .map(|timers| (lease, timers))
                    .map_err(|e| (None, e))
            });
        match outcome {
            Ok((lease, timers)) => {
                dhcp.record_lease(timers, now);
                info.ip_info = lease.ipv4_config();
                info!(ifname, address = %lease.ipaddr, lease_secs = timers.lease, "DHCP lease acquired");
                self.mark_connected(info);
            }
            Err((failure, e)) => {
                dhcp.record_failure(DhcpPhase::Request, now, failure);
                warn!(ifname, error = %e, "DHCP request failed");
                self.show(LedStatus::ErrorHwIf, true);
            }
        }
    }

    fn renew_lease(&self, info: &mut ModeInfo, ifname: &str, mode: RenewMode) {
        let Some(dhcp) = info.dhcp.as_mut() else {
            return;
        };
        let phase = match mode {
            RenewMode::Unicast => DhcpPhase::Renew,
            RenewMode::Rebind => DhcpPhase::Rebind,
        };
        let now = self.clock.now();
        let outcome = self
            .hal
            .dhcp_client_renew(dhcp.session, mode)
            .map_err(|e| (e.dhcp_failure(), NcmError::from(e)))
            .and_then(|lease| {
                self.apply_lease(ifname, &lease)
                    .map(|timers| (lease, timers))
                    .map_err(|e| (None, e))
            });
        match outcome {
            Ok((lease, timers)) => {
                dhcp.record_lease(timers, now);
                info.ip_info = lease.ipv4_config();
                debug!(ifname, ?mode, lease_secs = timers.lease, "DHCP lease renewed");
            }
            Err((failure, e)) => {
                dhcp.record_failure(phase, now, failure);
                warn!(ifname, ?mode, error = %e, "DHCP renewal failed");
            }
        }
    }

    fn recover_lease(&self, info: &mut ModeInfo, ifname: &str) {
        warn!(ifname, "DHCP lease lost, recovering");
        if let Err(e) = self.hal.set_ipv4(ifname, &Ipv4Config::default()) {
            warn!(ifname, error = %e, "clearing address failed");
        }
        info.ip_info = Ipv4Config::default();
        if let Some(dhcp) = info.dhcp.as_mut() {
            dhcp.forget_lease();
        }
        info.connect_status = ConnectStatus::Connecting;
        if let Some(kind) = info.active_kind() {
            self.show(connected_led(info.mode, kind), false);
            self.show(connecting_led(kind), true);
        }
        self.show(LedStatus::DhcpRecovering, true);

        self.request_lease(info, ifname);
    }

    fn apply_lease(&self, ifname: &str, lease: &DhcpLease) -> NcmResult<LeaseTimers> {
        let timers =
            LeaseTimers::from_server(lease.lease_time, lease.renewal_time, lease.rebinding_time)?;
        self.hal.set_ipv4(ifname, &lease.ipv4_config())?;
        Ok(timers)
    }

    fn mark_connected(&self, info: &mut ModeInfo) {
        info.connect_status = ConnectStatus::Connected;
        if let Some(kind) = info.active_kind() {
            self.show(connecting_led(kind), false);
            self.show(connected_led(info.mode, kind), true);
        }
        // A retry that got through supersedes earlier failures.
        self.show(LedStatus::ErrorHwIf, false);
        self.show(LedStatus::DhcpRecovering, false);
        info!(mode = %info.mode, "connected");
    }
}

fn connecting_led(kind: NetifKind) -> LedStatus {
    match kind {
        NetifKind::Ethernet => LedStatus::ConnectingEther,
        NetifKind::Wifi => LedStatus::ConnectingWifi,
    }
}

fn connected_led(mode: Mode, kind: NetifKind) -> LedStatus {
    match (mode, kind) {
        (Mode::Normal, NetifKind::Ethernet) => LedStatus::ConnectedEther,
        _ => LedStatus::ConnectedWifi,
    }
}

/// Porting-layer configuration for a validated parameter record
pub fn interface_config(
    mode: Mode,
    kind: NetifKind,
    parameter: &ConnectionParameter,
) -> NcmResult<InterfaceConfig> {
    let security = |raw: i32| {
        WifiEncryption::from_raw(raw)
            .map(WifiEncryption::security)
            .ok_or_else(|| NcmError::invalid_parameter(format!("encryption {raw}")))
    };
    match (mode, kind) {
        (Mode::Normal, NetifKind::Ethernet) => Ok(InterfaceConfig::Ethernet),
        (Mode::Normal, NetifKind::Wifi) => {
            let sta = &parameter.normal.wifi_sta;
            Ok(InterfaceConfig::WifiStation {
                ssid: sta.ssid.clone(),
                password: sta.password.clone(),
                security: security(sta.encryption)?,
            })
        }
        (Mode::AccessPoint, _) => {
            let ap = &parameter.access_point.wifi_ap;
            let channel = u8::try_from(ap.channel)
                .map_err(|_| NcmError::invalid_parameter(format!("channel {}", ap.channel)))?;
            Ok(InterfaceConfig::WifiAccessPoint {
                ssid: ap.ssid.clone(),
                password: ap.password.clone(),
                security: security(ap.encryption)?,
                channel,
            })
        }
    }
}

/// Parse a static IPv4 setting. Address and mask are required.
pub fn static_config(setting: &IpSetting) -> NcmResult<Ipv4Config> {
    fn parse(field: &str, value: &str, required: bool) -> NcmResult<Ipv4Addr> {
        if value.is_empty() && !required {
            return Ok(Ipv4Addr::UNSPECIFIED);
        }
        value
            .parse()
            .map_err(|_| NcmError::UtilityIpAddress(format!("{field} {value:?}")))
    }
    Ok(Ipv4Config {
        address: parse("address", &setting.ip_address, true)?,
        netmask: parse("netmask", &setting.subnet_mask, true)?,
        gateway: parse("gateway", &setting.gateway, false)?,
        dns: parse("dns", &setting.dns, false)?,
    })
}
