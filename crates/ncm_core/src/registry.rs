//! Resource and handle registry
//!
//! The registry owns the per-mode state and the handle table, each behind
//! its own lock:
//!
//! - the **resource lock** guards [`Resources`] (mode state). API paths take
//!   it with a timeout; HAL event handlers and teardown block on it.
//! - the **handle lock** guards the handle table and is always timed.
//!
//! Handle acquisition ([`Registry::open_handle`]) happens before resource
//! locking on every path, so nothing ever waits for the handle lock while
//! holding the resource lock except `close`, which needs both to check the
//! mode's status.

use std::fmt;
use std::time::Duration;

use ncm_hal::{NetifKind, SystemInfo};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::{HandleLimits, ManagerConfig};
use crate::error::{EventCode, NcmError, NcmResult};
use crate::mapper::StoredField;
use crate::mode_info::{ConnectStatus, ModeInfo};
use crate::params::{ConnectionParameter, HandleType, Mode, ParameterMask};

/// Opaque handle: slot index in the low 16 bits, generation above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u32);

impl Handle {
    fn new(index: usize, generation: u16) -> Self {
        Handle((u32::from(generation) << 16) | (index as u32 & 0xffff))
    }

    pub fn from_raw(raw: u32) -> Self {
        Handle(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        (self.0 & 0xffff) as usize
    }

    fn generation(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct HandleEntry {
    mode: Mode,
    handle_type: HandleType,
    ref_count: u32,
    in_use_for_control: bool,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u16,
    entry: Option<HandleEntry>,
}

/// Mode state guarded by the resource lock
#[derive(Debug)]
pub struct Resources {
    modes: [ModeInfo; Mode::COUNT],
    interfaces: Vec<SystemInfo>,
}

impl Resources {
    pub fn mode(&self, mode: Mode) -> &ModeInfo {
        &self.modes[mode.index()]
    }

    pub fn mode_mut(&mut self, mode: Mode) -> &mut ModeInfo {
        &mut self.modes[mode.index()]
    }

    pub fn modes_mut(&mut self) -> impl Iterator<Item = &mut ModeInfo> {
        self.modes.iter_mut()
    }

    /// Every interface the port reported at init
    pub fn interfaces(&self) -> &[SystemInfo] {
        &self.interfaces
    }
}

pub type ResourceGuard<'a> = MappedMutexGuard<'a, Resources>;

/// Per-call working set for parameter load and save
#[derive(Debug, Default)]
pub struct ParameterWork {
    pub parameter: ConnectionParameter,
    pub mask: ParameterMask,
    pub internal: Vec<StoredField>,
}

pub struct Registry {
    resources: Mutex<Option<Resources>>,
    handles: Mutex<Option<Vec<Slot>>>,
    resource_timeout: Duration,
    handle_timeout: Duration,
    limits: HandleLimits,
}

impl Registry {
    pub fn new(config: &ManagerConfig) -> Self {
        Self {
            resources: Mutex::new(None),
            handles: Mutex::new(None),
            resource_timeout: config.resource_lock_timeout(),
            handle_timeout: config.handle_lock_timeout(),
            limits: config.handle_limits,
        }
    }

    /// Allocate mode state and the handle table.
    ///
    /// Returns `Ok(false)` without touching anything if already initialized.
    pub fn init(&self, interfaces: &[SystemInfo]) -> NcmResult<bool> {
        let mut resources = self.lock_resources_raw()?;
        if resources.is_some() {
            debug!("registry already initialized");
            return Ok(false);
        }

        let first = |kind: NetifKind, usable: fn(&SystemInfo) -> bool| {
            interfaces
                .iter()
                .find(|info| info.kind == kind && usable(info))
                .cloned()
        };
        let normal_ether = first(NetifKind::Ethernet, |info| info.cloud_enabled);
        let normal_wifi = first(NetifKind::Wifi, |info| info.cloud_enabled);
        let ap_wifi = first(NetifKind::Wifi, |info| info.local_enabled);
        if normal_ether.is_none() && normal_wifi.is_none() {
            return Err(NcmError::internal(
                EventCode::InterfaceUnassigned,
                "no cloud-enabled interface reported",
            ));
        }

        let total = self.limits.total();
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(total)
            .map_err(|e| NcmError::ResourceExhausted(format!("handle table: {e}")))?;
        slots.resize_with(total, Slot::default);

        let mut handles = self.lock_handles()?;
        *handles = Some(slots);
        *resources = Some(Resources {
            modes: [
                ModeInfo::new(Mode::Normal, normal_ether, normal_wifi),
                ModeInfo::new(Mode::AccessPoint, None, ap_wifi),
            ],
            interfaces: interfaces.to_vec(),
        });
        info!(interfaces = interfaces.len(), handles = total, "registry initialized");
        Ok(true)
    }

    /// Release mode state and the handle table, returning the mode state.
    pub fn deinit(&self) -> NcmResult<Resources> {
        let mut resources = self.lock_resources_raw()?;
        if resources.is_none() {
            return Err(NcmError::unexecutable());
        }
        let mut handles = self.lock_handles()?;
        let busy = handles
            .iter()
            .flatten()
            .filter_map(|slot| slot.entry)
            .any(|entry| entry.ref_count > 0);
        if busy {
            return Err(NcmError::FailedPrecondition(
                "a handle is still in use".to_string(),
            ));
        }
        *handles = None;
        info!("registry released");
        resources.take().ok_or_else(NcmError::unexecutable)
    }

    pub fn is_initialized(&self) -> bool {
        self.resources.lock().is_some()
    }

    pub fn new_handle(&self, mode: Mode, handle_type: HandleType) -> NcmResult<Handle> {
        let mut guard = self.lock_handles()?;
        let slots = guard.as_mut().ok_or_else(NcmError::unexecutable)?;

        let limit = self.limits.limit(mode, handle_type);
        let live = slots
            .iter()
            .filter_map(|slot| slot.entry)
            .filter(|entry| entry.mode == mode && entry.handle_type == handle_type)
            .count();
        if live >= limit {
            return Err(NcmError::ResourceExhausted(format!(
                "{mode} allows {limit} {handle_type:?} handles"
            )));
        }

        let (index, slot) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.entry.is_none())
            .ok_or_else(|| NcmError::internal(EventCode::HandleSlotMissing, "no free slot"))?;
        slot.entry = Some(HandleEntry {
            mode,
            handle_type,
            ref_count: 0,
            in_use_for_control: false,
        });
        let handle = Handle::new(index, slot.generation);
        debug!(%handle, %mode, ?handle_type, "handle created");
        Ok(handle)
    }

    /// Mode a handle refers to
    pub fn handle_mode(&self, handle: Handle) -> NcmResult<Mode> {
        let mut guard = self.lock_handles()?;
        let slots = guard.as_mut().ok_or_else(NcmError::unexecutable)?;
        Ok(lookup(slots, handle)?.mode)
    }

    /// Remove a handle. The caller holds the resource lock so the mode's
    /// status cannot change underneath.
    pub fn delete_handle(&self, handle: Handle, resources: &Resources) -> NcmResult<()> {
        let mut guard = self.lock_handles()?;
        let slots = guard.as_mut().ok_or_else(NcmError::unexecutable)?;
        let entry = *lookup(slots, handle)?;

        if entry.ref_count > 0 {
            return Err(NcmError::FailedPrecondition(format!(
                "handle {handle} is in use"
            )));
        }
        if entry.handle_type == HandleType::Control {
            let status = resources.mode(entry.mode).connect_status;
            if !matches!(
                status,
                ConnectStatus::Disconnected | ConnectStatus::Disconnecting
            ) {
                return Err(NcmError::FailedPrecondition(format!(
                    "{} is {status}",
                    entry.mode
                )));
            }
        }

        let slot = &mut slots[handle.index()];
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        debug!(%handle, "handle deleted");
        Ok(())
    }

    /// Take a reference on `handle` for the duration of one API call.
    pub fn open_handle(&self, handle: Handle, is_control: bool) -> NcmResult<HandleGuard<'_>> {
        let mut guard = self.lock_handles()?;
        let slots = guard.as_mut().ok_or_else(NcmError::unexecutable)?;
        let entry = *lookup(slots, handle)?;

        if is_control {
            if entry.handle_type != HandleType::Control {
                return Err(NcmError::InvalidHandleType(format!(
                    "handle {handle} is not a control handle"
                )));
            }
            let busy = slots
                .iter()
                .filter_map(|slot| slot.entry)
                .any(|other| other.mode == entry.mode && other.in_use_for_control);
            if busy {
                return Err(NcmError::FailedPrecondition(format!(
                    "a control operation on {} is in progress",
                    entry.mode
                )));
            }
        }

        let slot_entry = slots[handle.index()]
            .entry
            .as_mut()
            .ok_or_else(|| NcmError::internal(EventCode::HandleSlotMissing, "slot vanished"))?;
        slot_entry.ref_count += 1;
        slot_entry.in_use_for_control |= is_control;

        Ok(HandleGuard {
            registry: self,
            handle,
            mode: entry.mode,
            handle_type: entry.handle_type,
            is_control,
        })
    }

    fn close_handle(&self, handle: Handle, is_control: bool) -> NcmResult<()> {
        let mut guard = match self.handles.try_lock_for(self.handle_timeout) {
            Some(guard) => guard,
            None => {
                warn!(
                    event_code = EventCode::HandleLockContended.value(),
                    %handle,
                    "handle lock contended on close, waiting"
                );
                self.handles.lock()
            }
        };
        let slots = guard.as_mut().ok_or_else(|| {
            NcmError::internal(EventCode::ModeTableMissing, "handle table released while open")
        })?;
        let entry = slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.entry.as_mut())
            .ok_or_else(|| {
                NcmError::internal(EventCode::HandleSlotMissing, format!("handle {handle}"))
            })?;
        if entry.ref_count == 0 {
            return Err(NcmError::internal(
                EventCode::RefCountUnderflow,
                format!("handle {handle}"),
            ));
        }
        entry.ref_count -= 1;
        if is_control {
            entry.in_use_for_control = false;
        }
        Ok(())
    }

    /// Timed resource lock for API paths.
    pub fn lock_resource(&self) -> NcmResult<ResourceGuard<'_>> {
        initialized(self.lock_resources_raw()?)
    }

    /// Blocking resource lock for event handlers and teardown.
    pub fn lock_resource_no_timeout(&self) -> NcmResult<ResourceGuard<'_>> {
        initialized(self.resources.lock())
    }

    /// Fresh working set for one parameter operation.
    pub fn parameter_work(&self, mask: ParameterMask) -> ParameterWork {
        ParameterWork {
            mask,
            ..ParameterWork::default()
        }
    }

    fn lock_resources_raw(&self) -> NcmResult<MutexGuard<'_, Option<Resources>>> {
        self.resources
            .try_lock_for(self.resource_timeout)
            .ok_or_else(|| NcmError::Timeout("resource lock".to_string()))
    }

    fn lock_handles(&self) -> NcmResult<MutexGuard<'_, Option<Vec<Slot>>>> {
        self.handles
            .try_lock_for(self.handle_timeout)
            .ok_or_else(|| NcmError::Timeout("handle lock".to_string()))
    }
}

fn initialized(guard: MutexGuard<'_, Option<Resources>>) -> NcmResult<ResourceGuard<'_>> {
    MutexGuard::try_map(guard, Option::as_mut).map_err(|_| NcmError::unexecutable())
}

fn lookup(slots: &[Slot], handle: Handle) -> NcmResult<&HandleEntry> {
    slots
        .get(handle.index())
        .filter(|slot| slot.generation == handle.generation())
        .and_then(|slot| slot.entry.as_ref())
        .ok_or_else(|| NcmError::NotFound(format!("handle {handle}")))
}

/// Reference on a handle, released on drop
pub struct HandleGuard<'a> {
    registry: &'a Registry,
    handle: Handle,
    mode: Mode,
    handle_type: HandleType,
    is_control: bool,
}

impl HandleGuard<'_> {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn handle_type(&self) -> HandleType {
        self.handle_type
    }
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        // Errors are already logged with their event code.
        let _ = self.registry.close_handle(self.handle, self.is_control);
    }
}
