//! HAL event dispatch
//!
//! Events arrive on the port's thread. Each one is routed to the mode that
//! is running on the reporting interface and drives that mode's state
//! machine under the resource lock. Nothing here returns an error: a failed
//! reaction is logged and the event is dropped.

use ncm_hal::{HalEvent, NetifKind};
use tracing::{debug, trace};

use crate::accessor::Accessor;
use crate::error::EventCode;
use crate::manager::Shared;
use crate::mode_info::{ConnectStatus, ModeInfo};
use crate::params::Mode;

pub(crate) fn handle_event(shared: &Shared, ifname: &str, event: HalEvent) {
    if event == HalEvent::IfDownPre {
        on_if_down_pre(shared, ifname);
        return;
    }

    let Ok(mut resources) = shared.registry.lock_resource_no_timeout() else {
        debug!(ifname, ?event, "event before init, dropped");
        return;
    };
    let mut routed = false;
    for info in resources.modes_mut() {
        if !info.accepts_events_from(ifname) {
            continue;
        }
        routed = true;
        apply(&shared.accessor, info, event);
        shared.publish(info);
    }

    if !routed {
        if event == HalEvent::Tick1s {
            trace!(ifname, "tick for idle interface");
        } else {
            debug!(
                event_code = EventCode::EventDropped.value(),
                ifname,
                ?event,
                "no running mode on interface, event dropped"
            );
        }
    }
}

/// The interface is about to go down. The lease is released outside the
/// resource lock, then a waiting `stop` is let through.
fn on_if_down_pre(shared: &Shared, ifname: &str) {
    let mut sessions = Vec::new();
    let mut modes = Vec::new();
    if let Ok(mut resources) = shared.registry.lock_resource_no_timeout() {
        for info in resources.modes_mut() {
            if info.accepts_events_from(ifname) {
                if let Some(dhcp) = info.dhcp.take() {
                    sessions.push(dhcp.session);
                }
                modes.push(info.mode);
            }
        }
    }

    for session in sessions {
        shared.accessor.release_session(session);
    }
    debug!(ifname, modes = modes.len(), "pre-teardown handled");
    for mode in modes {
        shared.gate(mode).signal();
    }
}

fn apply(accessor: &Accessor, info: &mut ModeInfo, event: HalEvent) {
    match event {
        HalEvent::Tick1s => accessor.on_tick(info),
        HalEvent::IfDown if info.connect_status == ConnectStatus::Disconnecting => {
            finish_disconnect(info)
        }
        _ => match (info.mode, info.active_kind()) {
            (Mode::AccessPoint, _) => access_point(accessor, info, event),
            (Mode::Normal, Some(NetifKind::Ethernet)) => ethernet(accessor, info, event),
            (Mode::Normal, Some(NetifKind::Wifi)) => station(accessor, info, event),
            (Mode::Normal, None) => {}
        },
    }
}

fn finish_disconnect(info: &mut ModeInfo) {
    info.if_up = false;
    info.link_up = false;
    info.connect_status = ConnectStatus::Disconnected;
    debug!(mode = %info.mode, "disconnected");
}

fn ethernet(accessor: &Accessor, info: &mut ModeInfo, event: HalEvent) {
    match event {
        HalEvent::IfUp => {
            info.if_up = true;
            ethernet_ready(accessor, info);
        }
        HalEvent::LinkUp => {
            info.link_up = true;
            ethernet_ready(accessor, info);
        }
        HalEvent::IfDown => {
            info.if_up = false;
            info.link_up = false;
            accessor.link_down(info);
        }
        HalEvent::LinkDown => {
            info.link_up = false;
            accessor.link_down(info);
        }
        _ => trace!(?event, "ignored on ethernet"),
    }
}

/// IfUp and LinkUp may arrive in either order.
fn ethernet_ready(accessor: &Accessor, info: &mut ModeInfo) {
    if info.connect_status == ConnectStatus::Connecting && info.if_up && info.link_up {
        accessor.link_up_on_connecting(info);
    }
}

fn station(accessor: &Accessor, info: &mut ModeInfo, event: HalEvent) {
    match event {
        HalEvent::WifiStaConnected => {
            info.if_up = true;
            info.link_up = true;
            if info.connect_status == ConnectStatus::Connecting {
                accessor.link_up_on_connecting(info);
            }
        }
        HalEvent::WifiStaDisconnected => {
            info.link_up = false;
            let was_connecting = info.connect_status == ConnectStatus::Connecting;
            accessor.link_down(info);
            if was_connecting {
                accessor.reconnect(info);
            }
        }
        HalEvent::WifiStaStop => {
            info.if_up = false;
            info.link_up = false;
            if info.connect_status == ConnectStatus::Disconnecting {
                finish_disconnect(info);
            } else {
                accessor.link_down(info);
                accessor.reconnect(info);
            }
        }
        HalEvent::IfDown | HalEvent::LinkDown => {
            info.link_up = false;
            accessor.link_down(info);
        }
        _ => trace!(?event, "ignored on wifi station"),
    }
}

fn access_point(accessor: &Accessor, info: &mut ModeInfo, event: HalEvent) {
    match event {
        HalEvent::WifiApStart => {
            if info.connect_status == ConnectStatus::Connecting {
                accessor.ap_started(info);
            }
        }
        HalEvent::WifiApConnected => accessor.ap_client_joined(info),
        HalEvent::WifiApDisconnected => accessor.ap_client_left(info),
        _ => trace!(?event, "ignored on access point"),
    }
}
