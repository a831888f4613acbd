//! Bring up a simulated camera board over Ethernet and Wi-Fi
//!
//! Run with `RUST_LOG`-style filtering through the config's logging level.

use std::sync::Arc;
use std::time::Duration;

use ncm_core::params::netif_kind_to_raw;
use ncm_core::{
    init_logging, Collaborators, ConnectionManager, ConnectionParameter, HandleType, IpMethod,
    ManagerConfig, MemoryStore, Mode, NcmResult, StartSource, VariantParameter, WifiEncryption,
};
use ncm_hal::sim::SimulatedNetwork;
use ncm_hal::{HalEvent, NetifKind};

fn main() -> NcmResult<()> {
    let config = ManagerConfig::default();
    init_logging(&config.logging)?;

    let sim = Arc::new(SimulatedNetwork::camera_board());
    let manager = ConnectionManager::new(
        Collaborators::new(sim.clone(), Arc::new(MemoryStore::new())),
        config,
    )?;
    manager.init()?;

    let handle = manager.open(Mode::Normal, HandleType::Control)?;
    manager.register_callback(handle, |mode, status| {
        println!("callback: {mode} -> {status:?}");
    })?;

    let mut parameter = ConnectionParameter::default();
    parameter.normal.netif_kind = netif_kind_to_raw(NetifKind::Wifi);
    parameter.normal.ip_method = IpMethod::Dhcp as i32;
    parameter.normal.wifi_sta.ssid = "studio".to_string();
    parameter.normal.wifi_sta.password = "long enough".to_string();
    parameter.normal.wifi_sta.encryption = WifiEncryption::Wpa2Psk as i32;
    manager.save_variant_parameter(&VariantParameter::Normal(parameter.normal.clone()))?;

    manager.start(handle, StartSource::Storage)?;
    sim.inject("wlan0", HalEvent::WifiStaConnected);
    println!("{}", manager.get_if_info(handle)?.to_json()?);
    print!("{}", manager.get_netstat(handle)?);

    manager.stop(handle)?;
    // Let the notification thread drain before exiting.
    std::thread::sleep(Duration::from_millis(50));
    manager.close(handle)?;
    manager.deinit()
}
