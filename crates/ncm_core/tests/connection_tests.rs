//! Connection lifecycle tests
//!
//! Drives the manager against the simulated port: handles, start and stop,
//! link events, callbacks and the access point.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ncm_core::params::netif_kind_to_raw;
use ncm_core::{
    Collaborators, ConnectStatus, ConnectionManager, ConnectionParameter, Handle, HandleType,
    IpMethod, IpSetting, LedStatus, ManagerConfig, MemoryStore, Mode, NcmError, NotifyStatus,
    RecordingIndicator, StartSource, WifiEncryption,
};
use ncm_hal::sim::{HalCall, SimOp, SimulatedNetwork};
use ncm_hal::{HalError, HalEvent, ManualClock, NetifKind};

struct Fixture {
    sim: Arc<SimulatedNetwork>,
    led: Arc<RecordingIndicator>,
    manager: ConnectionManager,
}

fn fixture() -> Fixture {
    let sim = Arc::new(SimulatedNetwork::camera_board());
    let led = Arc::new(RecordingIndicator::new());
    let collaborators = Collaborators::new(sim.clone(), Arc::new(MemoryStore::new()))
        .with_led(led.clone())
        .with_clock(Arc::new(ManualClock::new()));
    let manager = ConnectionManager::new(collaborators, ManagerConfig::default()).unwrap();
    manager.init().unwrap();
    Fixture { sim, led, manager }
}

fn ethernet_static() -> ConnectionParameter {
    let mut parameter = ConnectionParameter::default();
    parameter.normal.netif_kind = netif_kind_to_raw(NetifKind::Ethernet);
    parameter.normal.ip_method = IpMethod::Static as i32;
    parameter.normal.dev_ip = IpSetting {
        ip_address: "192.168.1.10".to_string(),
        subnet_mask: "255.255.255.0".to_string(),
        gateway: "192.168.1.1".to_string(),
        dns: "192.168.1.1".to_string(),
    };
    parameter
}

fn wifi_station() -> ConnectionParameter {
    let mut parameter = ConnectionParameter::default();
    parameter.normal.netif_kind = netif_kind_to_raw(NetifKind::Wifi);
    parameter.normal.ip_method = IpMethod::Dhcp as i32;
    parameter.normal.wifi_sta.ssid = "office".to_string();
    parameter.normal.wifi_sta.password = "correct horse".to_string();
    parameter.normal.wifi_sta.encryption = WifiEncryption::Wpa2Psk as i32;
    parameter
}

fn access_point() -> ConnectionParameter {
    let mut parameter = ConnectionParameter::default();
    parameter.access_point.dev_ip.ip_address = "192.168.4.1".to_string();
    parameter.access_point.dev_ip.subnet_mask = "255.255.255.0".to_string();
    parameter.access_point.wifi_ap.ssid = "camera-setup".to_string();
    parameter.access_point.wifi_ap.password = "setup-pass".to_string();
    parameter.access_point.wifi_ap.encryption = WifiEncryption::Wpa2Psk as i32;
    parameter.access_point.wifi_ap.channel = 6;
    parameter
}

fn watch(manager: &ConnectionManager, handle: Handle) -> Receiver<(Mode, NotifyStatus)> {
    let (tx, rx) = mpsc::sync_channel(16);
    manager
        .register_callback(handle, move |mode, status| {
            let _ = tx.send((mode, status));
        })
        .unwrap();
    rx
}

fn status_of(manager: &ConnectionManager, handle: Handle) -> ConnectStatus {
    manager.get_if_info(handle).unwrap().connect_status
}

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_ethernet_static_connects_and_notifies() {
    let f = fixture();
    let handle = f.manager.open(Mode::Normal, HandleType::Control).unwrap();
    assert_eq!(handle.raw(), 0);
    let events = watch(&f.manager, handle);

    let parameter = ethernet_static();
    f.manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap();
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Connecting);
    assert!(f.led.was_shown(LedStatus::ConnectingEther));

    f.sim.inject("eth0", HalEvent::IfUp);
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Connecting);
    f.sim.inject("eth0", HalEvent::LinkUp);
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Connected);
    assert_eq!(
        events.recv_timeout(WAIT).unwrap(),
        (Mode::Normal, NotifyStatus::Connected)
    );

    let info = f.manager.get_if_info(handle).unwrap();
    assert_eq!(info.ip.address.to_string(), "192.168.1.10");
    assert_eq!(info.interface.unwrap().name, "eth0");
    let status = f.manager.get_if_status(handle).unwrap();
    assert!(status.is_if_up && status.is_link_up);
    assert!(f.led.was_shown(LedStatus::ConnectedEther));
    assert!(f.manager.get_netstat(handle).unwrap().starts_with("eth0:"));

    f.manager.stop(handle).unwrap();
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Disconnected);
    assert_eq!(
        events.recv_timeout(WAIT).unwrap(),
        (Mode::Normal, NotifyStatus::Disconnected)
    );
    assert!(!f.sim.is_running("eth0"));
}

#[test]
fn test_slow_ethernet_teardown_finishes_on_if_down() {
    let f = fixture();
    let handle = f.manager.open(Mode::Normal, HandleType::Control).unwrap();
    let events = watch(&f.manager, handle);
    let parameter = ethernet_static();
    f.manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap();
    f.sim.inject("eth0", HalEvent::IfUp);
    f.sim.inject("eth0", HalEvent::LinkUp);
    assert_eq!(
        events.recv_timeout(WAIT).unwrap(),
        (Mode::Normal, NotifyStatus::Connected)
    );

    f.sim.set_deferred_teardown(true);
    f.manager.stop(handle).unwrap();
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Disconnecting);
    assert_eq!(
        events.recv_timeout(WAIT).unwrap(),
        (Mode::Normal, NotifyStatus::Disconnected)
    );
    assert!(matches!(
        f.manager.stop(handle),
        Err(NcmError::StatusAlreadyRunning(_))
    ));

    f.sim.inject("eth0", HalEvent::IfDown);
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Disconnected);
    let status = f.manager.get_if_status(handle).unwrap();
    assert!(!status.is_if_up && !status.is_link_up);
}

#[test]
fn test_slow_station_teardown_ignores_ticks_until_stopped() {
    let f = fixture();
    let handle = f.manager.open(Mode::Normal, HandleType::Control).unwrap();
    let parameter = wifi_station();
    f.manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap();
    f.sim.inject("wlan0", HalEvent::WifiStaConnected);
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Connected);

    f.sim.set_deferred_teardown(true);
    f.manager.stop(handle).unwrap();
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Disconnecting);

    f.sim.clear_calls();
    for _ in 0..5 {
        f.sim.tick();
    }
    assert!(f.sim.calls().is_empty());

    f.sim.inject("wlan0", HalEvent::WifiStaStop);
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Disconnected);
    // No reconnect attempt once the teardown completes.
    assert!(f.sim.calls().is_empty());
}

#[test]
fn test_link_events_arrive_in_any_order() {
    let f = fixture();
    let handle = f.manager.open(Mode::Normal, HandleType::Control).unwrap();
    let parameter = ethernet_static();
    f.manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap();

    f.sim.inject("eth0", HalEvent::LinkUp);
    f.sim.inject("eth0", HalEvent::IfUp);
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Connected);

    f.sim.inject("eth0", HalEvent::LinkDown);
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Connecting);
    f.sim.inject("eth0", HalEvent::LinkUp);
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Connected);
}

#[test]
fn test_start_while_connecting_is_rejected() {
    let f = fixture();
    let handle = f.manager.open(Mode::Normal, HandleType::Control).unwrap();
    let parameter = ethernet_static();
    f.manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap();

    let err = f
        .manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap_err();
    assert!(matches!(err, NcmError::StatusAlreadyRunning(_)));
    assert_eq!(
        f.sim.count_calls(|call| matches!(call, HalCall::Start(_))),
        1
    );
}

#[test]
fn test_invalid_parameter_is_rejected_before_touching_the_port() {
    let f = fixture();
    let handle = f.manager.open(Mode::Normal, HandleType::Control).unwrap();
    let mut parameter = ethernet_static();
    parameter.normal.dev_ip.ip_address = "192.168.1.300".to_string();

    let err = f
        .manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap_err();
    assert!(matches!(err, NcmError::InvalidParameter(_)));
    assert!(f.sim.calls().is_empty());
    assert!(f.led.was_shown(LedStatus::ErrorInvalidParameter));
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Disconnected);
}

#[test]
fn test_port_start_failure_leaves_mode_disconnected() {
    let f = fixture();
    let handle = f.manager.open(Mode::Normal, HandleType::Control).unwrap();
    f.sim
        .fail_next(SimOp::Start, HalError::interface_error("start", "eth0", "phy"));

    let parameter = ethernet_static();
    let err = f
        .manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap_err();
    assert!(matches!(err, NcmError::HwIf(_)));
    assert!(f.led.was_shown(LedStatus::ErrorHwIf));
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Disconnected);

    f.manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap();
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Connecting);
}

#[test]
fn test_stop_releases_lease_once() {
    let f = fixture();
    let handle = f.manager.open(Mode::Normal, HandleType::Control).unwrap();
    let parameter = wifi_station();
    f.manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap();
    f.sim.inject("wlan0", HalEvent::WifiStaConnected);
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Connected);
    assert_eq!(f.sim.open_dhcp_sessions(), 1);

    f.manager.stop(handle).unwrap();
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Disconnected);
    assert_eq!(
        f.sim
            .count_calls(|call| matches!(call, HalCall::DhcpRelease(_))),
        1
    );
    assert_eq!(f.sim.open_dhcp_sessions(), 0);

    let err = f.manager.stop(handle).unwrap_err();
    assert!(matches!(err, NcmError::StatusAlreadyRunning(_)));
    assert_eq!(
        f.sim
            .count_calls(|call| matches!(call, HalCall::DhcpRelease(_))),
        1
    );
}

#[test]
fn test_concurrent_stops_release_once() {
    let f = fixture();
    let first = f.manager.open(Mode::Normal, HandleType::Control).unwrap();
    let second = f.manager.open(Mode::Normal, HandleType::Control).unwrap();
    let parameter = wifi_station();
    f.manager
        .start(first, StartSource::Explicit(&parameter))
        .unwrap();
    f.sim.inject("wlan0", HalEvent::WifiStaConnected);

    let manager = &f.manager;
    let results: Vec<Result<(), NcmError>> = thread::scope(|scope| {
        let workers: Vec<_> = [first, second]
            .into_iter()
            .map(|handle| scope.spawn(move || manager.stop(handle)))
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect()
    });

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert_eq!(
        f.sim
            .count_calls(|call| matches!(call, HalCall::DhcpRelease(_))),
        1
    );
    assert_eq!(status_of(&f.manager, first), ConnectStatus::Disconnected);
}

#[test]
fn test_wifi_station_reconnects_after_disconnect() {
    let f = fixture();
    let handle = f.manager.open(Mode::Normal, HandleType::Control).unwrap();
    let parameter = wifi_station();
    f.manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap();
    assert_eq!(
        f.sim.config_of("wlan0"),
        Some(ncm_hal::InterfaceConfig::WifiStation {
            ssid: "office".to_string(),
            password: "correct horse".to_string(),
            security: ncm_hal::WifiSecurity::Wpa2Psk,
        })
    );

    f.sim.inject("wlan0", HalEvent::WifiStaDisconnected);
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Connecting);
    assert_eq!(
        f.sim.count_calls(|call| matches!(call, HalCall::Start(_))),
        2
    );

    f.sim.inject("wlan0", HalEvent::WifiStaConnected);
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Connected);
    f.sim.inject("wlan0", HalEvent::WifiStaDisconnected);
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Connecting);
    assert_eq!(f.sim.open_dhcp_sessions(), 0);
}

#[test]
fn test_access_point_tracks_clients() {
    let f = fixture();
    let handle = f
        .manager
        .open(Mode::AccessPoint, HandleType::Control)
        .unwrap();
    let events = watch(&f.manager, handle);
    let parameter = access_point();
    f.manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap();

    f.sim.inject("wlan0", HalEvent::WifiApStart);
    assert!(f.sim.is_dhcp_server_running("wlan0"));
    assert_eq!(
        events.recv_timeout(WAIT).unwrap(),
        (Mode::AccessPoint, NotifyStatus::ApStart)
    );
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Connecting);

    f.sim.inject("wlan0", HalEvent::WifiApConnected);
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Connected);
    assert_eq!(
        events.recv_timeout(WAIT).unwrap(),
        (Mode::AccessPoint, NotifyStatus::Connected)
    );
    f.sim.inject("wlan0", HalEvent::WifiApConnected);
    f.sim.inject("wlan0", HalEvent::WifiApDisconnected);
    let info = f.manager.get_if_info(handle).unwrap();
    assert_eq!(info.ap_client_count, 1);
    assert_eq!(info.connect_status, ConnectStatus::Connected);

    f.sim.inject("wlan0", HalEvent::WifiApDisconnected);
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Connecting);
    assert_eq!(
        events.recv_timeout(WAIT).unwrap(),
        (Mode::AccessPoint, NotifyStatus::ApStart)
    );

    f.manager.stop(handle).unwrap();
    assert!(!f.sim.is_dhcp_server_running("wlan0"));
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Disconnected);
}

#[test]
fn test_access_point_without_dhcp_server() {
    let f = fixture();
    let handle = f
        .manager
        .open(Mode::AccessPoint, HandleType::Control)
        .unwrap();
    let parameter = access_point();
    f.manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap();
    f.sim.fail_next(
        SimOp::DhcpServerStart,
        HalError::invalid("pool exhausted"),
    );

    f.sim.inject("wlan0", HalEvent::WifiApStart);
    assert!(!f.sim.is_dhcp_server_running("wlan0"));
    assert!(f.led.was_shown(LedStatus::ErrorDhcpServer));
    let info = f.manager.get_if_info(handle).unwrap();
    assert_eq!(info.ip.address.to_string(), "192.168.4.1");

    // Nothing to stop on the way down.
    f.manager.stop(handle).unwrap();
    assert_eq!(
        f.sim
            .count_calls(|call| matches!(call, HalCall::DhcpServerStop(_))),
        0
    );
}

#[test]
fn test_events_for_idle_interface_are_dropped() {
    let f = fixture();
    let handle = f.manager.open(Mode::Normal, HandleType::Information).unwrap();
    f.sim.inject("eth0", HalEvent::IfUp);
    f.sim.inject("eth0", HalEvent::LinkUp);
    f.sim.tick();
    assert_eq!(status_of(&f.manager, handle), ConnectStatus::Disconnected);
    assert!(f.sim.calls().is_empty());
}

#[test]
fn test_handle_limits_and_types() {
    let f = fixture();
    let limits = f.manager.config().handle_limits;
    for _ in 0..limits.normal_control {
        f.manager.open(Mode::Normal, HandleType::Control).unwrap();
    }
    let err = f
        .manager
        .open(Mode::Normal, HandleType::Control)
        .unwrap_err();
    assert!(matches!(err, NcmError::ResourceExhausted(_)));
    // Other (mode, type) pairs have their own budget.
    f.manager
        .open(Mode::AccessPoint, HandleType::Control)
        .unwrap();

    let info = f.manager.open(Mode::Normal, HandleType::Information).unwrap();
    let parameter = ethernet_static();
    let err = f
        .manager
        .start(info, StartSource::Explicit(&parameter))
        .unwrap_err();
    assert!(matches!(err, NcmError::InvalidHandleType(_)));
}

#[test]
fn test_close_rules_and_stale_handles() {
    let f = fixture();
    let handle = f.manager.open(Mode::Normal, HandleType::Control).unwrap();
    let parameter = ethernet_static();
    f.manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap();

    let err = f.manager.close(handle).unwrap_err();
    assert!(matches!(err, NcmError::FailedPrecondition(_)));

    f.manager.stop(handle).unwrap();
    f.manager.close(handle).unwrap();
    assert!(matches!(
        f.manager.get_if_status(handle),
        Err(NcmError::NotFound(_))
    ));

    // The slot is reused under a new generation.
    let reused = f.manager.open(Mode::Normal, HandleType::Control).unwrap();
    assert_ne!(reused, handle);
    assert!(matches!(
        f.manager.close(handle),
        Err(NcmError::NotFound(_))
    ));
    f.manager.close(reused).unwrap();
}

#[test]
fn test_rssi_requires_wifi_station() {
    let f = fixture();
    let handle = f.manager.open(Mode::Normal, HandleType::Control).unwrap();
    assert!(matches!(
        f.manager.get_rssi(handle),
        Err(NcmError::FailedPrecondition(_))
    ));

    let parameter = ethernet_static();
    f.manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap();
    assert!(matches!(
        f.manager.get_rssi(handle),
        Err(NcmError::FailedPrecondition(_))
    ));
    f.manager.stop(handle).unwrap();

    let parameter = wifi_station();
    f.manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap();
    f.sim.set_rssi("wlan0", -58);
    assert_eq!(f.manager.get_rssi(handle).unwrap(), -58);
}

#[test]
fn test_callback_registration_is_single() {
    let f = fixture();
    let handle = f.manager.open(Mode::Normal, HandleType::Information).unwrap();
    assert!(matches!(
        f.manager.unregister_callback(handle),
        Err(NcmError::AlreadyCallbackUnregistered)
    ));
    f.manager.register_callback(handle, |_, _| {}).unwrap();
    assert!(matches!(
        f.manager.register_callback(handle, |_, _| {}),
        Err(NcmError::AlreadyCallbackRegistered)
    ));
    f.manager.unregister_callback(handle).unwrap();
}

#[test]
fn test_diagnostics_hide_passwords() {
    let f = fixture();
    let handle = f.manager.open(Mode::Normal, HandleType::Control).unwrap();
    let parameter = wifi_station();
    f.manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap();

    let json = f.manager.get_if_info(handle).unwrap().to_json().unwrap();
    assert!(json.contains("office"));
    assert!(!json.contains("correct horse"));
    assert!(json.contains("********"));
}

#[test]
fn test_lifecycle_errors() {
    let sim = Arc::new(SimulatedNetwork::camera_board());
    let manager = ConnectionManager::new(
        Collaborators::new(sim.clone(), Arc::new(MemoryStore::new())),
        ManagerConfig::default(),
    )
    .unwrap();
    assert!(matches!(
        manager.open(Mode::Normal, HandleType::Control),
        Err(NcmError::StatusUnexecutable(_))
    ));

    manager.init().unwrap();
    manager.init().unwrap();
    assert!(sim.has_handler("eth0") && sim.has_handler("wlan0"));

    let handle = manager.open(Mode::Normal, HandleType::Control).unwrap();
    let parameter = ethernet_static();
    manager
        .start(handle, StartSource::Explicit(&parameter))
        .unwrap();
    manager.stop(handle).unwrap();
    manager.close(handle).unwrap();

    manager.deinit().unwrap();
    assert!(!sim.has_handler("eth0"));
    assert!(matches!(
        manager.deinit(),
        Err(NcmError::StatusUnexecutable(_))
    ));
}
