//! DHCP lease bookkeeping
//!
//! The HAL runs the protocol; this module only decides, once per second,
//! whether the lease needs a renewal, a rebind or a full recovery, and
//! throttles retries of failed phases.

use std::time::Duration;

use ncm_hal::{DhcpFailure, DhcpSessionId, RenewMode};
use serde::Serialize;

use crate::error::{NcmError, NcmResult};

/// Shortest lease for which integer timers T1 < T2 < lease exist
pub const MIN_LEASE_SECS: u32 = 3;

/// Lease, renewal (T1) and rebinding (T2) times in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LeaseTimers {
    pub lease: u32,
    pub renewal: u32,
    pub rebinding: u32,
}

impl LeaseTimers {
    /// Accept the server's timers, or derive T1 = 50% and T2 = 87.5% of the
    /// lease when they are not strictly increasing.
    pub fn from_server(lease: u32, renewal: u32, rebinding: u32) -> NcmResult<Self> {
        if lease < MIN_LEASE_SECS {
            return Err(NcmError::HwIf(format!("lease time {lease}s too short")));
        }
        if 0 < renewal && renewal < rebinding && rebinding < lease {
            return Ok(Self {
                lease,
                renewal,
                rebinding,
            });
        }
        let lease64 = u64::from(lease);
        Ok(Self {
            lease,
            renewal: (lease64 / 2) as u32,
            rebinding: (lease64 * 7 / 8) as u32,
        })
    }

    /// Zeroed timers force a recovery on the next tick.
    pub fn is_cleared(&self) -> bool {
        self.lease == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpPhase {
    Request,
    Renew,
    Rebind,
}

impl DhcpPhase {
    fn slot(self) -> usize {
        match self {
            DhcpPhase::Request => 0,
            DhcpPhase::Renew => 1,
            DhcpPhase::Rebind => 2,
        }
    }
}

/// What a tick should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    Idle,
    Request,
    Renew(RenewMode),
    Recover,
}

/// Client session of one connection
#[derive(Debug, Clone)]
pub struct DhcpClientState {
    pub session: DhcpSessionId,
    /// None until the first request succeeds
    pub lease: Option<LeaseTimers>,
    pub updated_at: Duration,
    failed_at: [Option<Duration>; 3],
}

impl DhcpClientState {
    pub fn new(session: DhcpSessionId) -> Self {
        Self {
            session,
            lease: None,
            updated_at: Duration::ZERO,
            failed_at: [None; 3],
        }
    }

    pub fn record_lease(&mut self, timers: LeaseTimers, now: Duration) {
        self.lease = Some(timers);
        self.updated_at = now;
        self.failed_at = [None; 3];
    }

    pub fn record_failure(&mut self, phase: DhcpPhase, now: Duration, failure: Option<DhcpFailure>) {
        self.failed_at[phase.slot()] = Some(now);
        if failure == Some(DhcpFailure::Nak) {
            if let Some(timers) = self.lease.as_mut() {
                *timers = LeaseTimers::default();
            }
        }
    }

    /// Drop the lease ahead of a fresh request
    pub fn forget_lease(&mut self) {
        self.lease = None;
    }

    fn may_retry(&self, phase: DhcpPhase, now: Duration, retry: Duration) -> bool {
        match self.failed_at[phase.slot()] {
            Some(failed) => now.saturating_sub(failed) >= retry,
            None => true,
        }
    }

    pub fn next_action(&self, now: Duration, retry: Duration) -> TickAction {
        let Some(timers) = self.lease else {
            return if self.may_retry(DhcpPhase::Request, now, retry) {
                TickAction::Request
            } else {
                TickAction::Idle
            };
        };
        if timers.is_cleared() {
            return TickAction::Recover;
        }
        let elapsed = now.saturating_sub(self.updated_at);
        if elapsed >= secs(timers.lease) {
            TickAction::Recover
        } else if elapsed >= secs(timers.rebinding) {
            if self.may_retry(DhcpPhase::Rebind, now, retry) {
                TickAction::Renew(RenewMode::Rebind)
            } else {
                TickAction::Idle
            }
        } else if elapsed >= secs(timers.renewal) {
            if self.may_retry(DhcpPhase::Renew, now, retry) {
                TickAction::Renew(RenewMode::Unicast)
            } else {
                TickAction::Idle
            }
        } else {
            TickAction::Idle
        }
    }
}

fn secs(value: u32) -> Duration {
    Duration::from_secs(u64::from(value))
}
