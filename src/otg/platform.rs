//! Platform collaborators: interface clock and controller core

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::transceiver::Transceiver;
use crate::error::{OtgError, Result};
use crate::regs::RegisterBus;

/// Interface clock of the controller
pub trait ClockControl: Send + Sync {
    fn enable(&self) -> Result<()>;
    fn disable(&self);
}

/// Core controller engine as seen from the glue
pub trait CoreController: Send + Sync {
    /// Save the generic controller context (endpoint and FIFO setup)
    fn save_context(&self);

    /// Restore what `save_context` captured
    fn restore_context(&self);

    /// Ask the host stack to poll root-hub status
    fn poll_root_hub_status(&self);
}

/// Hardware handles resolved at bind time
pub(crate) struct Hardware {
    pub regs: Arc<dyn RegisterBus>,
    pub transceiver: Arc<dyn Transceiver>,
    pub core: Arc<dyn CoreController>,
    pub clock: Arc<dyn ClockControl>,
}

/// Software clock that counts enable/disable calls
#[derive(Default)]
pub struct SimClock {
    enabled: AtomicBool,
    fail_enable: AtomicBool,
    enables: AtomicUsize,
    disables: AtomicUsize,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `enable` calls fail
    pub fn set_fail_enable(&self, fail: bool) {
        self.fail_enable.store(fail, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn enable_count(&self) -> usize {
        self.enables.load(Ordering::Relaxed)
    }

    pub fn disable_count(&self) -> usize {
        self.disables.load(Ordering::Relaxed)
    }
}

impl ClockControl for SimClock {
    fn enable(&self) -> Result<()> {
        if self.fail_enable.load(Ordering::Relaxed) {
            return Err(OtgError::Clock("interface clock failed to enable".to_string()));
        }
        self.enables.fetch_add(1, Ordering::Relaxed);
        self.enabled.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn disable(&self) {
        self.disables.fetch_add(1, Ordering::Relaxed);
        self.enabled.store(false, Ordering::Relaxed);
    }
}

/// Calls recorded by [`SimCore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreCall {
    SaveContext,
    RestoreContext,
    PollRootHub,
}

/// Core stand-in that records calls
#[derive(Default)]
pub struct SimCore {
    calls: Mutex<Vec<CoreCall>>,
}

impl SimCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<CoreCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: CoreCall) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }
}

impl CoreController for SimCore {
    fn save_context(&self) {
        self.calls.lock().push(CoreCall::SaveContext);
    }

    fn restore_context(&self) {
        self.calls.lock().push(CoreCall::RestoreContext);
    }

    fn poll_root_hub_status(&self) {
        self.calls.lock().push(CoreCall::PollRootHub);
    }
}
