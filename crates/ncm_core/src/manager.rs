//! Public API of the connection manager
//!
//! [`ConnectionManager`] is the explicit context object firmware code holds.
//! Handle-based calls open a [`HandleGuard`](crate::registry::HandleGuard)
//! first and only then take the resource lock.

use std::net::Ipv4Addr;
use std::sync::Arc;

use ncm_hal::{
    Clock, EventHandler, HalEvent, Ipv4Config, MigrationSource, NetifKind, NetworkHal, SystemClock,
};
use serde::Serialize;

use crate::accessor::Accessor;
use crate::config::ManagerConfig;
use crate::dhcp::LeaseTimers;
use crate::error::{EventCode, NcmError, NcmResult};
use crate::events;
use crate::gate::EventGate;
use crate::led::{LedStatus, NullIndicator, StatusIndicator};
use crate::mapper;
use crate::migration;
use crate::mode_info::{ActiveInterface, ConnectStatus, ModeInfo, NotifyCallback, NotifyStatus};
use crate::notify::Notifier;
use crate::params::{
    netif_kind_from_raw, ConnectionParameter, HandleType, Mode, ParameterMask, ParameterSection,
    VariantParameter,
};
use crate::registry::{Handle, Registry};
use crate::storage::ParameterStore;
use crate::validator;

/// Where `start` takes its parameters from
#[derive(Debug, Clone, Copy)]
pub enum StartSource<'a> {
    Explicit(&'a ConnectionParameter),
    /// Load the mode's section from storage
    Storage,
    /// Parameters of the last successful start
    LastSaved,
}

/// Everything the manager talks to
pub struct Collaborators {
    pub hal: Arc<dyn NetworkHal>,
    pub store: Arc<dyn ParameterStore>,
    pub led: Arc<dyn StatusIndicator>,
    pub clock: Arc<dyn Clock>,
    pub migration: Option<Arc<dyn MigrationSource>>,
}

impl Collaborators {
    pub fn new(hal: Arc<dyn NetworkHal>, store: Arc<dyn ParameterStore>) -> Self {
        Self {
            hal,
            store,
            led: Arc::new(NullIndicator),
            clock: Arc::new(SystemClock::new()),
            migration: None,
        }
    }

    pub fn with_led(mut self, led: Arc<dyn StatusIndicator>) -> Self {
        self.led = led;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_migration(mut self, source: Arc<dyn MigrationSource>) -> Self {
        self.migration = Some(source);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IfStatus {
    pub is_if_up: bool,
    pub is_link_up: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IpInfo {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: Ipv4Addr,
}

impl From<Ipv4Config> for IpInfo {
    fn from(config: Ipv4Config) -> Self {
        Self {
            address: config.address,
            netmask: config.netmask,
            gateway: config.gateway,
            dns: config.dns,
        }
    }
}

/// Snapshot of one mode
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub mode: Mode,
    pub connect_status: ConnectStatus,
    pub notify: NotifyStatus,
    pub interface: Option<ActiveInterface>,
    pub parameter: ConnectionParameter,
    pub ip: IpInfo,
    pub ap_client_count: u32,
    pub lease: Option<LeaseTimers>,
}

impl ConnectionInfo {
    fn snapshot(info: &ModeInfo) -> Self {
        Self {
            mode: info.mode,
            connect_status: info.connect_status,
            notify: info.notify,
            interface: info.active.clone(),
            parameter: info.parameter.clone(),
            ip: info.ip_info.into(),
            ap_client_count: info.ap_client_count,
            lease: info.dhcp.as_ref().and_then(|dhcp| dhcp.lease),
        }
    }

    /// Diagnostics rendering with passwords masked
    pub fn to_json(&self) -> NcmResult<String> {
        let redacted = Self {
            parameter: self.parameter.redacted(),
            ..self.clone()
        };
        serde_json::to_string_pretty(&redacted)
            .map_err(|e| NcmError::External(format!("diagnostics: {e}")))
    }
}

pub(crate) struct Shared {
    pub(crate) config: ManagerConfig,
    pub(crate) registry: Registry,
    pub(crate) accessor: Accessor,
    store: Arc<dyn ParameterStore>,
    migration: Option<Arc<dyn MigrationSource>>,
    gates: [EventGate; Mode::COUNT],
    notifier: Notifier,
}

impl Shared {
    pub(crate) fn gate(&self, mode: Mode) -> &EventGate {
        &self.gates[mode.index()]
    }

    /// Queue a callback if the mode's notify value changed.
    pub(crate) fn publish(&self, info: &mut ModeInfo) {
        if let Some((status, callback)) = info.refresh_notify() {
            self.notifier.send(info.mode, status, callback);
        }
    }
}

pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(collaborators: Collaborators, config: ManagerConfig) -> NcmResult<Self> {
        config.validate()?;
        let notifier = Notifier::spawn(config.notify_queue_depth)?;
        let Collaborators {
            hal,
            store,
            led,
            clock,
            migration,
        } = collaborators;
        let accessor = Accessor::new(hal, led, clock, config.dhcp_retry_interval());
        Ok(Self {
            shared: Arc::new(Shared {
                registry: Registry::new(&config),
                accessor,
                store,
                migration,
                gates: [EventGate::new(), EventGate::new()],
                notifier,
                config,
            }),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// Set up mode state and subscribe to every interface's events.
    /// Calling it again is a no-op.
    pub fn init(&self) -> NcmResult<()> {
        let hal = self.shared.accessor.hal();
        let interfaces = hal.system_info()?;
        if !self.shared.registry.init(&interfaces)? {
            return Ok(());
        }

        let mut registered: Vec<&str> = Vec::new();
        for netif in &interfaces {
            let weak = Arc::downgrade(&self.shared);
            let handler: EventHandler = Arc::new(move |ifname: &str, event: HalEvent| {
                if let Some(shared) = weak.upgrade() {
                    events::handle_event(&shared, ifname, event);
                }
            });
            if let Err(e) = hal.register_event_handler(&netif.name, handler) {
                crate::ncm_log_warn!(
                    ifname = %netif.name,
                    error = %e,
                    "event handler registration failed"
                );
                for name in registered {
                    if let Err(e) = hal.unregister_event_handler(name) {
                        crate::ncm_log_warn!(
                            ifname = name,
                            error = %e,
                            "event handler cleanup failed"
                        );
                    }
                }
                self.shared.registry.deinit()?;
                return Err(e.into());
            }
            registered.push(&netif.name);
        }
        crate::ncm_log_info!(interfaces = interfaces.len(), "connection manager initialized");
        Ok(())
    }

    pub fn deinit(&self) -> NcmResult<()> {
        let resources = self.shared.registry.deinit()?;
        let hal = self.shared.accessor.hal();
        for netif in resources.interfaces() {
            if let Err(e) = hal.unregister_event_handler(&netif.name) {
                crate::ncm_log_warn!(
                    ifname = %netif.name,
                    error = %e,
                    "event handler removal failed"
                );
            }
        }
        crate::ncm_log_info!("connection manager released");
        Ok(())
    }

    pub fn open(&self, mode: Mode, handle_type: HandleType) -> NcmResult<Handle> {
        self.shared.registry.new_handle(mode, handle_type)
    }

    pub fn close(&self, handle: Handle) -> NcmResult<()> {
        let registry = &self.shared.registry;
        let resources = registry.lock_resource()?;
        registry.delete_handle(handle, &resources)
    }

    pub fn start(&self, handle: Handle, source: StartSource<'_>) -> NcmResult<()> {
        let shared = &self.shared;
        let guard = shared.registry.open_handle(handle, true)?;
        let mode = guard.mode();
        let mut resources = shared.registry.lock_resource()?;

        let status = resources.mode(mode).connect_status;
        if status != ConnectStatus::Disconnected {
            return Err(NcmError::StatusAlreadyRunning(format!("{mode} is {status}")));
        }

        let parameter = match source {
            StartSource::Explicit(parameter) => parameter.clone(),
            StartSource::LastSaved => {
                let info = resources.mode(mode);
                if !info.connect_info_saved {
                    shared.accessor.show(LedStatus::ErrorNoConnectInfo, true);
                    return Err(NcmError::NoConnectInfo);
                }
                info.parameter.clone()
            }
            StartSource::Storage => match self.stored_parameter(mode) {
                Ok(parameter) => parameter,
                Err(e) => {
                    if e == NcmError::NoConnectInfo {
                        shared.accessor.show(LedStatus::ErrorNoConnectInfo, true);
                    }
                    return Err(e);
                }
            },
        };

        let kind = match mode {
            Mode::Normal => netif_kind_from_raw(parameter.normal.netif_kind),
            Mode::AccessPoint => Some(NetifKind::Wifi),
        };
        let checked = kind
            .ok_or_else(|| {
                NcmError::invalid_parameter(format!(
                    "netif kind {}",
                    parameter.normal.netif_kind
                ))
            })
            .and_then(|kind| {
                validator::validate(ParameterMask::for_connect(mode, kind), &parameter, true)
                    .map(|()| kind)
            });
        let kind = match checked {
            Ok(kind) => kind,
            Err(e) => {
                shared.accessor.show(LedStatus::ErrorInvalidParameter, true);
                return Err(e);
            }
        };

        let info = resources.mode_mut(mode);
        info.reset_transient();
        shared.accessor.start(info, &parameter, kind)?;
        info.parameter = parameter;
        info.connect_info_saved = true;
        info.connect_status = ConnectStatus::Connecting;
        shared.publish(info);
        crate::ncm_log_info!(%handle, %mode, netif = %kind, "connection started");
        Ok(())
    }

    pub fn stop(&self, handle: Handle) -> NcmResult<()> {
        let shared = &self.shared;
        let guard = shared.registry.open_handle(handle, true)?;
        let mode = guard.mode();

        let ifname = {
            let resources = shared.registry.lock_resource()?;
            let info = resources.mode(mode);
            if matches!(
                info.connect_status,
                ConnectStatus::Disconnected | ConnectStatus::Disconnecting
            ) {
                return Err(NcmError::StatusAlreadyRunning(format!(
                    "{mode} is {}",
                    info.connect_status
                )));
            }
            info.active_ifname().map(str::to_string)
        };

        // The pre-teardown event is delivered on the port's thread and takes
        // the resource lock, so it must run before we lock again.
        if let Some(ifname) = ifname.as_deref() {
            self.release_before_stop(mode, ifname);
        }

        let mut resources = shared.registry.lock_resource()?;
        let info = resources.mode_mut(mode);
        let result = shared.accessor.stop(info);
        shared.publish(info);
        result?;
        crate::ncm_log_info!(
            %handle,
            %mode,
            status = %info.connect_status,
            "connection stopped"
        );
        Ok(())
    }

    fn release_before_stop(&self, mode: Mode, ifname: &str) {
        let gate = self.shared.gate(mode);
        gate.reset();
        match self.shared.accessor.hal().stop_pre(ifname) {
            Ok(()) => {
                if !gate.wait_timeout(self.shared.config.stop_pre_timeout()) {
                    crate::ncm_log_warn!(
                        event_code = EventCode::StopPreTimeout.value(),
                        ifname,
                        "pre-teardown event did not arrive"
                    );
                }
            }
            Err(e) if e.is_stopped() => {
                crate::ncm_log_debug!(ifname, "interface already stopped")
            }
            Err(e) => crate::ncm_log_warn!(ifname, error = %e, "pre-teardown request failed"),
        }
    }

    pub fn get_if_status(&self, handle: Handle) -> NcmResult<IfStatus> {
        let guard = self.shared.registry.open_handle(handle, false)?;
        let resources = self.shared.registry.lock_resource()?;
        let info = resources.mode(guard.mode());
        Ok(IfStatus {
            is_if_up: info.if_up,
            is_link_up: info.link_up,
        })
    }

    pub fn get_if_info(&self, handle: Handle) -> NcmResult<ConnectionInfo> {
        let guard = self.shared.registry.open_handle(handle, false)?;
        let resources = self.shared.registry.lock_resource()?;
        Ok(ConnectionInfo::snapshot(resources.mode(guard.mode())))
    }

    /// Signal strength of the Wi-Fi station link, in dBm
    pub fn get_rssi(&self, handle: Handle) -> NcmResult<i8> {
        let guard = self.shared.registry.open_handle(handle, false)?;
        let resources = self.shared.registry.lock_resource()?;
        let info = resources.mode(guard.mode());
        match (info.mode, info.active.as_ref()) {
            (Mode::Normal, Some(active)) if active.kind == NetifKind::Wifi => {
                Ok(self.shared.accessor.hal().status(&active.name)?.rssi)
            }
            _ => Err(NcmError::FailedPrecondition(format!(
                "{} is not using a wifi station",
                info.mode
            ))),
        }
    }

    pub fn get_netstat(&self, handle: Handle) -> NcmResult<String> {
        let guard = self.shared.registry.open_handle(handle, false)?;
        let resources = self.shared.registry.lock_resource()?;
        let info = resources.mode(guard.mode());
        let ifname = info.query_ifname().ok_or_else(|| {
            NcmError::FailedPrecondition(format!("{} has no interface", info.mode))
        })?;
        Ok(self.shared.accessor.hal().netstat(ifname)?)
    }

    /// Register the status callback of the handle's mode. Callbacks run on
    /// the notification thread and must not call `start` or `stop`.
    pub fn register_callback<F>(&self, handle: Handle, callback: F) -> NcmResult<()>
    where
        F: Fn(Mode, NotifyStatus) + Send + Sync + 'static,
    {
        let guard = self.shared.registry.open_handle(handle, false)?;
        let mut resources = self.shared.registry.lock_resource()?;
        let info = resources.mode_mut(guard.mode());
        if info.callback.is_some() {
            return Err(NcmError::AlreadyCallbackRegistered);
        }
        let callback: NotifyCallback = Arc::new(callback);
        info.callback = Some(callback);
        crate::ncm_log_debug!(%handle, mode = %info.mode, "callback registered");
        Ok(())
    }

    pub fn unregister_callback(&self, handle: Handle) -> NcmResult<()> {
        let guard = self.shared.registry.open_handle(handle, false)?;
        let mut resources = self.shared.registry.lock_resource()?;
        let info = resources.mode_mut(guard.mode());
        info.callback
            .take()
            .map(|_| ())
            .ok_or(NcmError::AlreadyCallbackUnregistered)
    }

    /// Persist the masked fields of `parameter`.
    pub fn save_parameter(
        &self,
        mask: ParameterMask,
        parameter: &ConnectionParameter,
    ) -> NcmResult<()> {
        if mask.is_empty() {
            return Err(NcmError::invalid_parameter("empty mask"));
        }
        let registry = &self.shared.registry;
        let _resources = registry.lock_resource()?;
        validator::validate(mask, parameter, false)?;

        let mut work = registry.parameter_work(mask);
        work.internal = mapper::encode(work.mask, parameter)?;
        mapper::write_fields(self.shared.store.as_ref(), &work.internal)?;
        crate::ncm_log_debug!(fields = work.internal.len(), "parameters saved");
        Ok(())
    }

    /// Fill the masked fields of `parameter` from storage.
    pub fn load_parameter(
        &self,
        mask: ParameterMask,
        parameter: &mut ConnectionParameter,
    ) -> NcmResult<()> {
        if mask.is_empty() {
            return Err(NcmError::invalid_parameter("empty mask"));
        }
        let registry = &self.shared.registry;
        let _resources = registry.lock_resource()?;

        let mut work = registry.parameter_work(mask);
        work.parameter = parameter.clone();
        mapper::load(self.shared.store.as_ref(), work.mask, &mut work.parameter)?;
        *parameter = work.parameter;
        Ok(())
    }

    pub fn save_variant_parameter(&self, variant: &VariantParameter) -> NcmResult<()> {
        let mask = variant.section().mask();
        self.save_parameter(mask, &variant.clone().into_parameter())
    }

    pub fn load_variant_parameter(&self, section: ParameterSection) -> NcmResult<VariantParameter> {
        let mut parameter = ConnectionParameter::default();
        self.load_parameter(section.mask(), &mut parameter)?;
        Ok(VariantParameter::from_parameter(section, parameter))
    }

    /// Import legacy configuration, if the platform has any.
    pub fn exec_migration(&self) -> NcmResult<()> {
        match self.shared.migration.as_deref() {
            Some(source) => migration::execute(self, source),
            None => {
                crate::ncm_log_debug!("no legacy configuration source");
                Ok(())
            }
        }
    }

    fn stored_parameter(&self, mode: Mode) -> NcmResult<ConnectionParameter> {
        let (probe, section) = match mode {
            Mode::Normal => (ParameterMask::NORMAL_NETIF_KIND, ParameterSection::Normal),
            Mode::AccessPoint => (ParameterMask::AP_SSID, ParameterSection::AccessPoint),
        };
        let store = self.shared.store.as_ref();
        if !mapper::is_stored(store, probe)? {
            return Err(NcmError::NoConnectInfo);
        }
        let mut parameter = ConnectionParameter::default();
        mapper::load(store, section.mask(), &mut parameter)?;
        Ok(parameter)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if self.shared.registry.is_initialized() {
            if let Err(e) = self.deinit() {
                crate::ncm_log_warn!(error = %e, "teardown on drop failed");
            }
        }
    }
}
