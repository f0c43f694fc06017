//! Event notification bridge
//!
//! Transceiver notifications enter through [`NotifierHandle`], which holds only
//! a weak reference to the controller and checks the subscription under the
//! controller lock, so nothing is delivered into a torn-down controller.

use std::sync::Weak;
use tracing::debug;

use super::glue::Shared;
use super::session::Session;
use super::transceiver::{NotifyStatus, OtgNotifier, TransceiverEvent};
use crate::config::PhyInterface;

/// Subscription handle registered with the transceiver
pub(crate) struct NotifierHandle {
    pub shared: Weak<Shared>,
}

impl OtgNotifier for NotifierHandle {
    fn notify(&self, event: TransceiverEvent) -> NotifyStatus {
        match self.shared.upgrade() {
            Some(shared) => shared.deliver(event),
            None => NotifyStatus::NotHandled,
        }
    }
}

impl Session<'_> {
    fn utmi(&self) -> bool {
        self.config.board.interface_type == PhyInterface::Utmi
    }

    /// Dispatch one transceiver event
    pub(crate) fn handle_transceiver_event(&mut self, event: TransceiverEvent) -> NotifyStatus {
        match event {
            TransceiverEvent::Id => {
                debug!("ID GND");
                // With role negotiation on, only act once a gadget driver is bound
                if !self.st.otg_enabled || self.st.gadget_bound {
                    self.hw.transceiver.init();
                    if self.utmi() {
                        self.set_vbus(true);
                    }
                }
            }
            TransceiverEvent::VbusPresent => {
                debug!("VBUS connect");
                self.hw.transceiver.init();
            }
            TransceiverEvent::VbusAbsent => {
                debug!("VBUS disconnect");
                if self.utmi() && self.hw.transceiver.has_vbus_control() {
                    self.hw.transceiver.set_vbus(false);
                }
                self.hw.transceiver.shutdown();
            }
            TransceiverEvent::Indeterminate => {
                debug!("ID float");
                return NotifyStatus::NotHandled;
            }
        }
        NotifyStatus::Handled
    }
}
