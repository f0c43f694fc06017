//! Transceiver collaborator
//!
//! The PHY driver is opaque to the glue. It delivers cable and VBUS events to
//! a registered [`OtgNotifier`] and accepts VBUS/state-machine requests.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::state::OtgState;
use crate::error::{OtgError, Result};

/// Events the transceiver reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransceiverEvent {
    /// ID pin grounded: an A-plug was inserted
    Id,
    /// VBUS became valid
    VbusPresent,
    /// VBUS went away
    VbusAbsent,
    /// ID floating or any unrecognized notification
    Indeterminate,
}

/// Whether a notifier consumed the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyStatus {
    Handled,
    NotHandled,
}

/// Receiver of transceiver notifications
pub trait OtgNotifier: Send + Sync {
    fn notify(&self, event: TransceiverEvent) -> NotifyStatus;
}

/// Transceiver operations used by the glue
///
/// Implementations must not deliver notifications synchronously from inside
/// `set_vbus`, `init` or `shutdown`: those are called with the controller
/// lock held.
pub trait Transceiver: Send + Sync {
    /// Subscribe to cable/VBUS events
    fn register_notifier(&self, notifier: Arc<dyn OtgNotifier>) -> Result<()>;

    /// Drop the subscription; no notification is delivered after this returns
    fn unregister_notifier(&self);

    /// Whether the PHY can drive VBUS itself
    fn has_vbus_control(&self) -> bool {
        true
    }

    fn set_vbus(&self, on: bool);

    /// Kick the PHY state machine (re-initialize after a cable event)
    fn init(&self);

    fn shutdown(&self);

    /// State latched by the PHY
    fn state(&self) -> OtgState;

    /// Release the transceiver reference at unbind
    fn release(&self) {}
}

/// Calls recorded by [`SimTransceiver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "call", content = "arg", rename_all = "snake_case")]
pub enum TransceiverCall {
    Register,
    Unregister,
    SetVbus(bool),
    Init,
    Shutdown,
    Release,
}

#[derive(Default)]
struct SimInner {
    notifier: Option<Arc<dyn OtgNotifier>>,
    calls: Vec<TransceiverCall>,
}

/// Software transceiver for simulation and tests
pub struct SimTransceiver {
    inner: Mutex<SimInner>,
    state: Mutex<OtgState>,
    vbus_control: bool,
    fail_registration: bool,
}

impl SimTransceiver {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SimInner::default()),
            state: Mutex::new(OtgState::Undefined),
            vbus_control: true,
            fail_registration: false,
        }
    }

    /// A transceiver that rejects notifier registration
    pub fn failing_registration() -> Self {
        Self {
            fail_registration: true,
            ..Self::new()
        }
    }

    pub fn without_vbus_control() -> Self {
        Self {
            vbus_control: false,
            ..Self::new()
        }
    }

    pub fn set_state(&self, state: OtgState) {
        *self.state.lock() = state;
    }

    /// Deliver an event to the registered notifier, if any
    pub fn emit(&self, event: TransceiverEvent) -> Option<NotifyStatus> {
        // Clone out so the notifier runs without our lock held
        let notifier = self.inner.lock().notifier.clone();
        notifier.map(|n| n.notify(event))
    }

    pub fn is_registered(&self) -> bool {
        self.inner.lock().notifier.is_some()
    }

    pub fn calls(&self) -> Vec<TransceiverCall> {
        self.inner.lock().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<TransceiverCall> {
        std::mem::take(&mut self.inner.lock().calls)
    }
}

impl Default for SimTransceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Transceiver for SimTransceiver {
    fn register_notifier(&self, notifier: Arc<dyn OtgNotifier>) -> Result<()> {
        if self.fail_registration {
            return Err(OtgError::NotifierRegistration(
                "notifier chain rejected registration".to_string(),
            ));
        }
        let mut inner = self.inner.lock();
        inner.notifier = Some(notifier);
        inner.calls.push(TransceiverCall::Register);
        Ok(())
    }

    fn unregister_notifier(&self) {
        let mut inner = self.inner.lock();
        inner.notifier = None;
        inner.calls.push(TransceiverCall::Unregister);
    }

    fn has_vbus_control(&self) -> bool {
        self.vbus_control
    }

    fn set_vbus(&self, on: bool) {
        self.inner.lock().calls.push(TransceiverCall::SetVbus(on));
    }

    fn init(&self) {
        self.inner.lock().calls.push(TransceiverCall::Init);
    }

    fn shutdown(&self) {
        self.inner.lock().calls.push(TransceiverCall::Shutdown);
    }

    fn state(&self) -> OtgState {
        *self.state.lock()
    }

    fn release(&self) {
        self.inner.lock().calls.push(TransceiverCall::Release);
    }
}
