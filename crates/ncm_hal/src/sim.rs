//! In-memory porting layer
//!
//! `SimulatedNetwork` behaves like a device port without touching real
//! hardware: it keeps per-interface state, records every call, lets the
//! caller inject link events and scripts DHCP replies. It is what the
//! connection manager runs against on a development host.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::thread;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{HalError, HalResult};
use crate::migration::{MigrationDataId, MigrationSource};
use crate::network::{
    Capabilities, DhcpLease, DhcpServerConfig, DhcpSessionId, EventHandler, HalEvent,
    InterfaceConfig, InterfaceStatus, Ipv4Config, Ipv4Method, NetifKind, NetworkHal, RenewMode,
    SystemInfo,
};

/// A call made into the simulated port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalCall {
    SetConfig(String, InterfaceConfig),
    Start(String),
    StopPre(String),
    Stop(String),
    SetIpv4(String, Ipv4Config),
    SetIpv4Method(String, Ipv4Method),
    DhcpOpen(String),
    DhcpRequest(String),
    DhcpRenew(String, RenewMode),
    DhcpRelease(String),
    DhcpClose(String),
    DhcpServerStart(String),
    DhcpServerStop(String),
}

/// Operations whose next invocation can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    SetConfig,
    Start,
    StopPre,
    Stop,
    SetIpv4,
    DhcpOpen,
    DhcpRelease,
    DhcpServerStart,
}

#[derive(Debug, Default)]
struct PortState {
    config: Option<InterfaceConfig>,
    running: bool,
    if_up: bool,
    link_up: bool,
    rssi: i8,
    ipv4: Ipv4Config,
    method: Option<Ipv4Method>,
    mac: [u8; 6],
}

#[derive(Default)]
struct SimState {
    ports: HashMap<String, PortState>,
    handlers: HashMap<String, EventHandler>,
    sessions: HashMap<u32, String>,
    next_session: u32,
    dhcp_script: VecDeque<HalResult<DhcpLease>>,
    dhcp_servers: HashSet<String>,
    failures: HashMap<SimOp, HalError>,
    deferred_teardown: bool,
    calls: Vec<HalCall>,
}

/// Simulated network port
pub struct SimulatedNetwork {
    interfaces: Vec<SystemInfo>,
    capabilities: Mutex<Capabilities>,
    state: Mutex<SimState>,
}

impl SimulatedNetwork {
    pub fn new(interfaces: Vec<SystemInfo>) -> Self {
        let mut state = SimState::default();
        for (index, info) in interfaces.iter().enumerate() {
            state.ports.insert(
                info.name.clone(),
                PortState {
                    mac: [0x02, 0x00, 0x5e, 0x10, 0x00, index as u8],
                    ..PortState::default()
                },
            );
        }
        Self {
            interfaces,
            capabilities: Mutex::new(Capabilities::default()),
            state: Mutex::new(state),
        }
    }

    /// One cloud-enabled Ethernet port and one Wi-Fi radio usable for both
    /// station and access point.
    pub fn camera_board() -> Self {
        Self::new(vec![
            SystemInfo {
                name: "eth0".to_string(),
                kind: NetifKind::Ethernet,
                cloud_enabled: true,
                local_enabled: false,
            },
            SystemInfo {
                name: "wlan0".to_string(),
                kind: NetifKind::Wifi,
                cloud_enabled: true,
                local_enabled: true,
            },
        ])
    }

    /// Lease handed out when no reply has been scripted
    pub fn default_lease() -> DhcpLease {
        DhcpLease {
            ipaddr: Ipv4Addr::new(192, 168, 0, 100),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            default_router: Ipv4Addr::new(192, 168, 0, 1),
            dnsaddr: Ipv4Addr::new(192, 168, 0, 1),
            server_id: Ipv4Addr::new(192, 168, 0, 1),
            lease_time: 3600,
            renewal_time: 1800,
            rebinding_time: 3150,
        }
    }

    pub fn set_capabilities(&self, capabilities: Capabilities) {
        *self.capabilities.lock() = capabilities;
    }

    pub fn set_rssi(&self, ifname: &str, rssi: i8) {
        if let Some(port) = self.state.lock().ports.get_mut(ifname) {
            port.rssi = rssi;
        }
    }

    /// Queue the reply for the next DHCP request or renew
    pub fn script_dhcp(&self, reply: HalResult<DhcpLease>) {
        self.state.lock().dhcp_script.push_back(reply);
    }

    /// Make the next call of `op` fail with `error`
    pub fn fail_next(&self, op: SimOp, error: HalError) {
        self.state.lock().failures.insert(op, error);
    }

    /// When set, `stop` leaves the interface up until an `IfDown` or
    /// `WifiStaStop` is injected, like a radio that powers down slowly.
    pub fn set_deferred_teardown(&self, deferred: bool) {
        self.state.lock().deferred_teardown = deferred;
    }

    /// Deliver `event` to the handler registered for `ifname` on the calling thread.
    pub fn inject(&self, ifname: &str, event: HalEvent) {
        let handler = {
            let mut state = self.state.lock();
            if let Some(port) = state.ports.get_mut(ifname) {
                apply_event(port, event);
            }
            state.handlers.get(ifname).cloned()
        };
        match handler {
            Some(handler) => handler(ifname, event),
            None => debug!(ifname, ?event, "no handler registered, event dropped"),
        }
    }

    /// Deliver a one-second tick to every registered handler.
    pub fn tick(&self) {
        let handlers: Vec<(String, EventHandler)> = {
            let state = self.state.lock();
            state
                .handlers
                .iter()
                .map(|(name, handler)| (name.clone(), handler.clone()))
                .collect()
        };
        for (name, handler) in handlers {
            handler(&name, HalEvent::Tick1s);
        }
    }

    pub fn calls(&self) -> Vec<HalCall> {
        self.state.lock().calls.clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&HalCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|call| pred(call)).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn has_handler(&self, ifname: &str) -> bool {
        self.state.lock().handlers.contains_key(ifname)
    }

    pub fn is_running(&self, ifname: &str) -> bool {
        self.state
            .lock()
            .ports
            .get(ifname)
            .is_some_and(|port| port.running)
    }

    pub fn is_dhcp_server_running(&self, ifname: &str) -> bool {
        self.state.lock().dhcp_servers.contains(ifname)
    }

    pub fn open_dhcp_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn ipv4_method_of(&self, ifname: &str) -> Option<Ipv4Method> {
        self.state
            .lock()
            .ports
            .get(ifname)
            .and_then(|port| port.method)
    }

    pub fn config_of(&self, ifname: &str) -> Option<InterfaceConfig> {
        self.state
            .lock()
            .ports
            .get(ifname)
            .and_then(|port| port.config.clone())
    }

    fn take_failure(state: &mut SimState, op: SimOp) -> HalResult<()> {
        match state.failures.remove(&op) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn session_ifname(state: &SimState, session: DhcpSessionId) -> HalResult<String> {
        state
            .sessions
            .get(&session.0)
            .cloned()
            .ok_or_else(|| HalError::invalid(&format!("unknown DHCP session {}", session.0)))
    }
}

fn apply_event(port: &mut PortState, event: HalEvent) {
    match event {
        HalEvent::IfUp | HalEvent::WifiApStart => port.if_up = true,
        HalEvent::IfDown | HalEvent::WifiStaStop => {
            port.if_up = false;
            port.link_up = false;
        }
        HalEvent::LinkUp => port.link_up = true,
        HalEvent::LinkDown | HalEvent::WifiStaDisconnected => port.link_up = false,
        HalEvent::WifiStaConnected => {
            port.if_up = true;
            port.link_up = true;
        }
        HalEvent::IfDownPre
        | HalEvent::WifiApConnected
        | HalEvent::WifiApDisconnected
        | HalEvent::Tick1s => {}
    }
}

impl NetworkHal for SimulatedNetwork {
    fn system_info(&self) -> HalResult<Vec<SystemInfo>> {
        Ok(self.interfaces.clone())
    }

    fn capabilities(&self) -> Capabilities {
        *self.capabilities.lock()
    }

    fn set_config(&self, ifname: &str, config: &InterfaceConfig) -> HalResult<()> {
        let mut state = self.state.lock();
        state
            .calls
            .push(HalCall::SetConfig(ifname.to_string(), config.clone()));
        Self::take_failure(&mut state, SimOp::SetConfig)?;
        let port = state
            .ports
            .get_mut(ifname)
            .ok_or_else(|| HalError::unknown_interface(ifname))?;
        port.config = Some(config.clone());
        Ok(())
    }

    fn start(&self, ifname: &str) -> HalResult<()> {
        let mut state = self.state.lock();
        state.calls.push(HalCall::Start(ifname.to_string()));
        Self::take_failure(&mut state, SimOp::Start)?;
        let port = state
            .ports
            .get_mut(ifname)
            .ok_or_else(|| HalError::unknown_interface(ifname))?;
        if port.config.is_none() {
            return Err(HalError::interface_error("start", ifname, "not configured"));
        }
        port.running = true;
        Ok(())
    }

    fn stop_pre(&self, ifname: &str) -> HalResult<()> {
        let handler = {
            let mut state = self.state.lock();
            state.calls.push(HalCall::StopPre(ifname.to_string()));
            Self::take_failure(&mut state, SimOp::StopPre)?;
            let running = state
                .ports
                .get(ifname)
                .ok_or_else(|| HalError::unknown_interface(ifname))?
                .running;
            if !running {
                return Err(HalError::stopped(ifname));
            }
            state.handlers.get(ifname).cloned()
        };
        // The pre-event arrives on the port's own thread, like on hardware.
        if let Some(handler) = handler {
            let name = ifname.to_string();
            thread::spawn(move || handler(&name, HalEvent::IfDownPre));
        }
        Ok(())
    }

    fn stop(&self, ifname: &str) -> HalResult<()> {
        let mut state = self.state.lock();
        state.calls.push(HalCall::Stop(ifname.to_string()));
        Self::take_failure(&mut state, SimOp::Stop)?;
        let deferred = state.deferred_teardown;
        let port = state
            .ports
            .get_mut(ifname)
            .ok_or_else(|| HalError::unknown_interface(ifname))?;
        if !port.running {
            return Err(HalError::stopped(ifname));
        }
        port.running = false;
        port.link_up = false;
        port.ipv4 = Ipv4Config::default();
        if !deferred {
            port.if_up = false;
        }
        Ok(())
    }

    fn register_event_handler(&self, ifname: &str, handler: EventHandler) -> HalResult<()> {
        let mut state = self.state.lock();
        if !state.ports.contains_key(ifname) {
            return Err(HalError::unknown_interface(ifname));
        }
        if state.handlers.contains_key(ifname) {
            return Err(HalError::invalid(&format!(
                "handler already registered for {ifname}"
            )));
        }
        state.handlers.insert(ifname.to_string(), handler);
        Ok(())
    }

    fn unregister_event_handler(&self, ifname: &str) -> HalResult<()> {
        self.state
            .lock()
            .handlers
            .remove(ifname)
            .map(|_| ())
            .ok_or_else(|| HalError::invalid(&format!("no handler registered for {ifname}")))
    }

    fn status(&self, ifname: &str) -> HalResult<InterfaceStatus> {
        let state = self.state.lock();
        let port = state
            .ports
            .get(ifname)
            .ok_or_else(|| HalError::unknown_interface(ifname))?;
        Ok(InterfaceStatus {
            is_if_up: port.if_up,
            is_link_up: port.link_up,
            rssi: port.rssi,
        })
    }

    fn netstat(&self, ifname: &str) -> HalResult<String> {
        let state = self.state.lock();
        let port = state
            .ports
            .get(ifname)
            .ok_or_else(|| HalError::unknown_interface(ifname))?;
        Ok(format!(
            "{ifname}: running={} if_up={} link_up={} inet {} netmask {} gateway {}\n",
            port.running, port.if_up, port.link_up, port.ipv4.address, port.ipv4.netmask,
            port.ipv4.gateway
        ))
    }

    fn mac_address(&self, ifname: &str) -> HalResult<[u8; 6]> {
        self.state
            .lock()
            .ports
            .get(ifname)
            .map(|port| port.mac)
            .ok_or_else(|| HalError::unknown_interface(ifname))
    }

    fn ipv4(&self, ifname: &str) -> HalResult<Ipv4Config> {
        self.state
            .lock()
            .ports
            .get(ifname)
            .map(|port| port.ipv4)
            .ok_or_else(|| HalError::unknown_interface(ifname))
    }

    fn set_ipv4(&self, ifname: &str, config: &Ipv4Config) -> HalResult<()> {
        let mut state = self.state.lock();
        state
            .calls
            .push(HalCall::SetIpv4(ifname.to_string(), *config));
        Self::take_failure(&mut state, SimOp::SetIpv4)?;
        let port = state
            .ports
            .get_mut(ifname)
            .ok_or_else(|| HalError::unknown_interface(ifname))?;
        port.ipv4 = *config;
        Ok(())
    }

    fn set_ipv4_method(&self, ifname: &str, method: Ipv4Method) -> HalResult<()> {
        let mut state = self.state.lock();
        state
            .calls
            .push(HalCall::SetIpv4Method(ifname.to_string(), method));
        let port = state
            .ports
            .get_mut(ifname)
            .ok_or_else(|| HalError::unknown_interface(ifname))?;
        port.method = Some(method);
        Ok(())
    }

    fn dhcp_client_open(&self, ifname: &str, _mac: [u8; 6]) -> HalResult<DhcpSessionId> {
        let mut state = self.state.lock();
        state.calls.push(HalCall::DhcpOpen(ifname.to_string()));
        Self::take_failure(&mut state, SimOp::DhcpOpen)?;
        if !state.ports.contains_key(ifname) {
            return Err(HalError::unknown_interface(ifname));
        }
        state.next_session += 1;
        let id = state.next_session;
        state.sessions.insert(id, ifname.to_string());
        Ok(DhcpSessionId(id))
    }

    fn dhcp_client_request(&self, session: DhcpSessionId) -> HalResult<DhcpLease> {
        let mut state = self.state.lock();
        let ifname = Self::session_ifname(&state, session)?;
        state.calls.push(HalCall::DhcpRequest(ifname));
        state
            .dhcp_script
            .pop_front()
            .unwrap_or_else(|| Ok(Self::default_lease()))
    }

    fn dhcp_client_renew(&self, session: DhcpSessionId, mode: RenewMode) -> HalResult<DhcpLease> {
        let mut state = self.state.lock();
        let ifname = Self::session_ifname(&state, session)?;
        state.calls.push(HalCall::DhcpRenew(ifname, mode));
        state
            .dhcp_script
            .pop_front()
            .unwrap_or_else(|| Ok(Self::default_lease()))
    }

    fn dhcp_client_release(&self, session: DhcpSessionId) -> HalResult<()> {
        let mut state = self.state.lock();
        let ifname = Self::session_ifname(&state, session)?;
        state.calls.push(HalCall::DhcpRelease(ifname));
        Self::take_failure(&mut state, SimOp::DhcpRelease)
    }

    fn dhcp_client_close(&self, session: DhcpSessionId) -> HalResult<()> {
        let mut state = self.state.lock();
        let ifname = state
            .sessions
            .remove(&session.0)
            .ok_or_else(|| HalError::invalid(&format!("unknown DHCP session {}", session.0)))?;
        state.calls.push(HalCall::DhcpClose(ifname));
        Ok(())
    }

    fn dhcp_server_start(&self, ifname: &str, _config: &DhcpServerConfig) -> HalResult<()> {
        let mut state = self.state.lock();
        state
            .calls
            .push(HalCall::DhcpServerStart(ifname.to_string()));
        Self::take_failure(&mut state, SimOp::DhcpServerStart)?;
        state.dhcp_servers.insert(ifname.to_string());
        Ok(())
    }

    fn dhcp_server_stop(&self, ifname: &str) -> HalResult<()> {
        let mut state = self.state.lock();
        state
            .calls
            .push(HalCall::DhcpServerStop(ifname.to_string()));
        if state.dhcp_servers.remove(ifname) {
            Ok(())
        } else {
            Err(HalError::stopped(ifname))
        }
    }
}

/// Legacy configuration held in memory
#[derive(Default)]
pub struct SimulatedMigrationSource {
    needs: Mutex<HashSet<NetifKind>>,
    data: Mutex<HashMap<MigrationDataId, Vec<u8>>>,
    broken: Mutex<HashSet<MigrationDataId>>,
    sessions: Mutex<(u32, u32)>,
}

impl SimulatedMigrationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_needs_migration(&self, kind: NetifKind) {
        self.needs.lock().insert(kind);
    }

    /// Store a value, appending the NUL terminator legacy storage carries
    pub fn set(&self, id: MigrationDataId, value: &str) {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        self.data.lock().insert(id, bytes);
    }

    /// Make reads of `id` fail
    pub fn break_item(&self, id: MigrationDataId) {
        self.broken.lock().insert(id);
    }

    /// Number of (init, fin) calls seen
    pub fn session_calls(&self) -> (u32, u32) {
        *self.sessions.lock()
    }
}

impl MigrationSource for SimulatedMigrationSource {
    fn is_need_migration(&self, kind: NetifKind) -> bool {
        self.needs.lock().contains(&kind)
    }

    fn init(&self) -> HalResult<()> {
        self.sessions.lock().0 += 1;
        Ok(())
    }

    fn fin(&self) -> HalResult<()> {
        self.sessions.lock().1 += 1;
        Ok(())
    }

    fn get_migration_data(&self, id: MigrationDataId) -> HalResult<Vec<u8>> {
        if self.broken.lock().contains(&id) {
            return Err(HalError::migration_error(&id.to_string(), "read failed"));
        }
        self.data
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| HalError::migration_error(&id.to_string(), "not present"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_start_requires_config() {
        let sim = SimulatedNetwork::camera_board();
        assert!(sim.start("eth0").is_err());
        sim.set_config("eth0", &InterfaceConfig::Ethernet).unwrap();
        sim.start("eth0").unwrap();
        assert!(sim.is_running("eth0"));
    }

    #[test]
    fn test_stop_when_not_running_reports_stopped() {
        let sim = SimulatedNetwork::camera_board();
        let err = sim.stop("eth0").unwrap_err();
        assert!(err.is_stopped());
    }

    #[test]
    fn test_inject_updates_status_and_calls_handler() {
        let sim = SimulatedNetwork::camera_board();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        sim.register_event_handler(
            "eth0",
            Arc::new(move |_: &str, _: HalEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        sim.inject("eth0", HalEvent::IfUp);
        sim.inject("eth0", HalEvent::LinkUp);
        let status = sim.status("eth0").unwrap();
        assert!(status.is_if_up && status.is_link_up);
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        sim.inject("eth0", HalEvent::IfDown);
        let status = sim.status("eth0").unwrap();
        assert!(!status.is_if_up && !status.is_link_up);
    }

    #[test]
    fn test_deferred_teardown_keeps_interface_up() {
        let sim = SimulatedNetwork::camera_board();
        sim.set_config("eth0", &InterfaceConfig::Ethernet).unwrap();
        sim.start("eth0").unwrap();
        sim.inject("eth0", HalEvent::IfUp);
        sim.set_deferred_teardown(true);
        sim.stop("eth0").unwrap();
        assert!(!sim.is_running("eth0"));
        assert!(sim.status("eth0").unwrap().is_if_up);

        sim.inject("eth0", HalEvent::IfDown);
        assert!(!sim.status("eth0").unwrap().is_if_up);
    }

    #[test]
    fn test_dhcp_script_is_consumed_in_order() {
        let sim = SimulatedNetwork::camera_board();
        let session = sim.dhcp_client_open("wlan0", [0; 6]).unwrap();
        sim.script_dhcp(Err(HalError::dhcp_error(
            "request",
            crate::DhcpFailure::Timeout,
            "no offer",
        )));
        assert!(sim.dhcp_client_request(session).is_err());
        let lease = sim.dhcp_client_request(session).unwrap();
        assert_eq!(lease, SimulatedNetwork::default_lease());
        sim.dhcp_client_close(session).unwrap();
        assert_eq!(sim.open_dhcp_sessions(), 0);
    }

    #[test]
    fn test_fail_next_applies_once() {
        let sim = SimulatedNetwork::camera_board();
        sim.fail_next(SimOp::SetConfig, HalError::invalid("boom"));
        assert!(sim.set_config("eth0", &InterfaceConfig::Ethernet).is_err());
        assert!(sim.set_config("eth0", &InterfaceConfig::Ethernet).is_ok());
    }

    #[test]
    fn test_migration_source_items() {
        let source = SimulatedMigrationSource::new();
        source.set(MigrationDataId::WifiSsid, "office");
        assert_eq!(
            source.get_migration_data(MigrationDataId::WifiSsid).unwrap(),
            b"office\0".to_vec()
        );
        assert!(source.get_migration_data(MigrationDataId::ProxyUrl).is_err());
        source.break_item(MigrationDataId::WifiSsid);
        assert!(source.get_migration_data(MigrationDataId::WifiSsid).is_err());
    }
}
