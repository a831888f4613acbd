//! Notification dispatcher
//!
//! Status changes are detected under the resource lock but callbacks run on
//! a dedicated thread fed by a bounded queue. Only one callback is ever in
//! flight, and a callback may call query operations without deadlocking.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use crate::error::{EventCode, NcmError, NcmResult};
use crate::mode_info::{NotifyCallback, NotifyStatus};
use crate::params::Mode;

struct Notification {
    mode: Mode,
    status: NotifyStatus,
    callback: NotifyCallback,
}

pub struct Notifier {
    tx: Option<SyncSender<Notification>>,
    worker: Option<JoinHandle<()>>,
}

impl Notifier {
    pub fn spawn(depth: usize) -> NcmResult<Self> {
        let (tx, rx) = mpsc::sync_channel(depth);
        let worker = thread::Builder::new()
            .name("ncm-notify".to_string())
            .spawn(move || dispatch_loop(rx))
            .map_err(|e| NcmError::ResourceExhausted(format!("notify thread: {e}")))?;
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Queue a callback invocation without blocking.
    pub fn send(&self, mode: Mode, status: NotifyStatus, callback: NotifyCallback) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        match tx.try_send(Notification {
            mode,
            status,
            callback,
        }) {
            Ok(()) => debug!(%mode, ?status, "notification queued"),
            Err(TrySendError::Full(_)) => warn!(
                event_code = EventCode::NotifyQueueFull.value(),
                %mode,
                ?status,
                "notification queue full, dropping"
            ),
            Err(TrySendError::Disconnected(_)) => error!(
                event_code = EventCode::NotifyDispatcherGone.value(),
                %mode,
                "notification dispatcher has exited"
            ),
        }
    }
}

fn dispatch_loop(rx: Receiver<Notification>) {
    for notification in rx {
        let Notification {
            mode,
            status,
            callback,
        } = notification;
        if panic::catch_unwind(AssertUnwindSafe(|| callback(mode, status))).is_err() {
            error!(%mode, ?status, "notification callback panicked");
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                error!("notification dispatcher panicked");
            }
        }
    }
}
