//! DHCP lease upkeep tests
//!
//! Time is driven by a manual clock and one-second ticks from the simulated
//! port, so renewal, rebinding and retry spacing are exact.

use std::net::Ipv4Addr;
use std::sync::Arc;

use ncm_core::params::netif_kind_to_raw;
use ncm_core::{
    Collaborators, ConnectStatus, ConnectionManager, ConnectionParameter, Handle, HandleType,
    IpMethod, LedStatus, ManagerConfig, MemoryStore, Mode, RecordingIndicator, StartSource,
    WifiEncryption,
};
use ncm_hal::sim::{HalCall, SimulatedNetwork};
use ncm_hal::{
    Capabilities, DhcpFailure, HalError, HalEvent, Ipv4Method, ManualClock, NetifKind, RenewMode,
};

struct Fixture {
    sim: Arc<SimulatedNetwork>,
    led: Arc<RecordingIndicator>,
    clock: Arc<ManualClock>,
    manager: ConnectionManager,
    handle: Handle,
}

impl Fixture {
    fn status(&self) -> ConnectStatus {
        self.manager.get_if_info(self.handle).unwrap().connect_status
    }

    fn address(&self) -> Ipv4Addr {
        self.manager.get_if_info(self.handle).unwrap().ip.address
    }

    fn requests(&self) -> usize {
        self.sim
            .count_calls(|call| matches!(call, HalCall::DhcpRequest(_)))
    }

    fn renewals(&self, mode: RenewMode) -> usize {
        self.sim
            .count_calls(|call| matches!(call, HalCall::DhcpRenew(_, m) if *m == mode))
    }

    /// Move the clock forward and deliver one tick.
    fn tick_after(&self, secs: u64) {
        self.clock.advance_secs(secs);
        self.sim.tick();
    }
}

fn started(config: ManagerConfig) -> Fixture {
    let sim = Arc::new(SimulatedNetwork::camera_board());
    let led = Arc::new(RecordingIndicator::new());
    let clock = Arc::new(ManualClock::new());
    let collaborators = Collaborators::new(sim.clone(), Arc::new(MemoryStore::new()))
        .with_led(led.clone())
        .with_clock(clock.clone());
    let manager = ConnectionManager::new(collaborators, config).unwrap();
    manager.init().unwrap();

    let handle = manager.open(Mode::Normal, HandleType::Control).unwrap();
    let mut parameter = ConnectionParameter::default();
    parameter.normal.netif_kind = netif_kind_to_raw(NetifKind::Wifi);
    parameter.normal.ip_method = IpMethod::Dhcp as i32;
    parameter.normal.wifi_sta.ssid = "warehouse".to_string();
    parameter.normal.wifi_sta.password = "forklift-42".to_string();
    parameter.normal.wifi_sta.encryption = WifiEncryption::Wpa2Wpa3Psk as i32;
    manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap();

    Fixture {
        sim,
        led,
        clock,
        manager,
        handle,
    }
}

fn connected() -> Fixture {
    let f = started(ManagerConfig::default());
    f.sim.inject("wlan0", HalEvent::WifiStaConnected);
    assert_eq!(f.status(), ConnectStatus::Connected);
    f
}

fn timeout() -> HalError {
    HalError::dhcp_error("request", DhcpFailure::Timeout, "no offer")
}

#[test]
fn test_lease_is_applied_on_association() {
    let f = connected();
    assert_eq!(f.address(), Ipv4Addr::new(192, 168, 0, 100));
    assert_eq!(f.requests(), 1);
    assert_eq!(f.sim.open_dhcp_sessions(), 1);
    assert!(f.led.was_shown(LedStatus::ConnectedWifi));

    let lease = f.manager.get_if_info(f.handle).unwrap().lease.unwrap();
    assert_eq!((lease.lease, lease.renewal, lease.rebinding), (3600, 1800, 3150));
}

#[test]
fn test_failed_request_is_retried_after_interval() {
    let f = started(ManagerConfig::default());
    f.sim.script_dhcp(Err(timeout()));
    f.sim.inject("wlan0", HalEvent::WifiStaConnected);
    assert_eq!(f.status(), ConnectStatus::Connecting);
    assert!(f.led.was_shown(LedStatus::ErrorHwIf));
    assert_eq!(f.requests(), 1);

    f.tick_after(1);
    f.tick_after(30);
    assert_eq!(f.requests(), 1);

    assert!(f.led.is_lit(LedStatus::ErrorHwIf));

    f.tick_after(29);
    assert_eq!(f.requests(), 2);
    assert_eq!(f.status(), ConnectStatus::Connected);
    assert!(!f.led.is_lit(LedStatus::ErrorHwIf));
    assert!(f.led.is_lit(LedStatus::ConnectedWifi));
}

#[test]
fn test_retry_interval_comes_from_config() {
    let config = ManagerConfig {
        dhcp_retry_interval_secs: 5,
        ..ManagerConfig::default()
    };
    let f = started(config);
    f.sim.script_dhcp(Err(timeout()));
    f.sim.inject("wlan0", HalEvent::WifiStaConnected);

    f.tick_after(4);
    assert_eq!(f.requests(), 1);
    f.tick_after(1);
    assert_eq!(f.status(), ConnectStatus::Connected);
}

#[test]
fn test_renewal_then_rebinding() {
    let f = connected();
    f.tick_after(1799);
    assert_eq!(f.renewals(RenewMode::Unicast), 0);

    f.sim.script_dhcp(Err(timeout()));
    f.tick_after(1);
    assert_eq!(f.renewals(RenewMode::Unicast), 1);
    assert_eq!(f.status(), ConnectStatus::Connected);

    // A failed renewal waits out the retry interval.
    f.tick_after(59);
    assert_eq!(f.renewals(RenewMode::Unicast), 1);
    f.sim.script_dhcp(Err(timeout()));
    f.tick_after(1);
    assert_eq!(f.renewals(RenewMode::Unicast), 2);

    f.tick_after(1290);
    assert_eq!(f.renewals(RenewMode::Rebind), 1);
    assert_eq!(f.status(), ConnectStatus::Connected);

    let lease = f.manager.get_if_info(f.handle).unwrap().lease.unwrap();
    assert_eq!(lease.renewal, 1800);
    f.tick_after(1799);
    assert_eq!(f.renewals(RenewMode::Unicast), 2);
}

#[test]
fn test_nak_triggers_recovery() {
    let f = connected();
    f.sim.script_dhcp(Err(HalError::dhcp_error(
        "renew",
        DhcpFailure::Nak,
        "address withdrawn",
    )));
    f.tick_after(1800);
    assert_eq!(f.renewals(RenewMode::Unicast), 1);

    f.tick_after(1);
    assert!(f.led.was_shown(LedStatus::DhcpRecovering));
    assert_eq!(f.requests(), 2);
    assert_eq!(f.status(), ConnectStatus::Connected);
    assert!(f
        .sim
        .calls()
        .contains(&HalCall::SetIpv4("wlan0".to_string(), Default::default())));
}

#[test]
fn test_expired_lease_recovers_through_connecting() {
    let f = connected();
    f.sim.script_dhcp(Err(timeout()));
    f.tick_after(3599);
    assert_eq!(f.renewals(RenewMode::Rebind), 1);
    assert_eq!(f.status(), ConnectStatus::Connected);

    f.sim.script_dhcp(Err(timeout()));
    f.tick_after(1);
    assert_eq!(f.status(), ConnectStatus::Connecting);
    assert_eq!(f.address(), Ipv4Addr::UNSPECIFIED);
    assert!(!f.led.is_lit(LedStatus::ConnectedWifi));
    assert!(f.led.is_lit(LedStatus::ConnectingWifi));
    assert!(f.led.is_lit(LedStatus::DhcpRecovering));

    f.tick_after(60);
    assert_eq!(f.status(), ConnectStatus::Connected);
    assert!(f.led.is_lit(LedStatus::ConnectedWifi));
    assert!(!f.led.is_lit(LedStatus::DhcpRecovering));
    assert!(!f.led.is_lit(LedStatus::ErrorHwIf));
}

#[test]
fn test_short_lease_is_rejected() {
    let f = started(ManagerConfig::default());
    let mut lease = SimulatedNetwork::default_lease();
    lease.lease_time = 2;
    f.sim.script_dhcp(Ok(lease));
    f.sim.inject("wlan0", HalEvent::WifiStaConnected);
    assert_eq!(f.status(), ConnectStatus::Connecting);
    assert!(f.led.was_shown(LedStatus::ErrorHwIf));
}

#[test]
fn test_external_client_skips_sessions() {
    let f = started(ManagerConfig::default());
    f.sim.set_capabilities(Capabilities {
        use_external_dhcpc: true,
    });
    f.sim.inject("wlan0", HalEvent::WifiStaConnected);
    assert_eq!(f.status(), ConnectStatus::Connected);
    assert_eq!(f.sim.ipv4_method_of("wlan0"), Some(Ipv4Method::Dhcp));
    assert_eq!(
        f.sim.count_calls(|call| matches!(call, HalCall::DhcpOpen(_))),
        0
    );
}

#[test]
fn test_link_loss_closes_session() {
    let f = connected();
    f.sim.inject("wlan0", HalEvent::WifiStaDisconnected);
    assert_eq!(f.status(), ConnectStatus::Connecting);
    assert_eq!(f.sim.open_dhcp_sessions(), 0);

    f.tick_after(3600);
    assert_eq!(f.requests(), 1);

    f.sim.inject("wlan0", HalEvent::WifiStaConnected);
    assert_eq!(f.status(), ConnectStatus::Connected);
    assert_eq!(f.requests(), 2);
}

#[test]
fn test_ticks_after_stop_do_nothing() {
    let f = connected();
    f.manager.stop(f.handle).unwrap();
    f.sim.clear_calls();
    f.tick_after(4000);
    assert!(f.sim.calls().is_empty());
}
