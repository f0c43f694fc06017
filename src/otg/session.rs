//! Session/role controller
//!
//! Executes the OTG transition table against the controller state. A
//! [`Session`] is a short-lived view built while the controller lock is held;
//! nothing in here blocks except the bounded A-device poll in `set_vbus`.

use std::time::Instant as StdInstant;
use tokio::time::Instant;
use tracing::{debug, error};

use super::idle::IdleTimer;
use super::platform::Hardware;
use super::state::{ControllerState, OtgState, PortStatus, Role};
use crate::config::GlueConfig;
use crate::events::{EventBus, OtgEvent};
use crate::regs::{ctrl, RegisterGroup};

pub(crate) struct Session<'a> {
    pub st: &'a mut ControllerState,
    pub timer: &'a mut IdleTimer,
    pub hw: &'a Hardware,
    pub config: &'a GlueConfig,
    pub events: &'a EventBus,
}

impl Session<'_> {
    pub(crate) fn devctl(&self) -> u32 {
        self.hw.regs.read(RegisterGroup::DeviceControl, ctrl::DEVCTL)
    }

    pub(crate) fn write_devctl(&self, value: u32) {
        self.hw
            .regs
            .write(RegisterGroup::DeviceControl, ctrl::DEVCTL, value);
    }

    fn host_mode(&self) -> bool {
        self.devctl() & ctrl::devctl::HM != 0
    }

    pub(crate) fn transition(&mut self, to: OtgState) {
        let from = self.st.state;
        if from == to {
            return;
        }
        debug!("OTG state {} -> {}", from, to);
        self.st.state = to;
        self.events.publish(OtgEvent::StateChanged { from, to });
    }

    fn switch_role(&mut self, role: Role) {
        if self.st.role != role {
            debug!("Controller role {:?} -> {:?}", self.st.role, role);
        }
        self.st.role = role;
    }

    fn arm_poll(&mut self) {
        let deadline = Instant::now() + self.config.timing.poll_interval();
        self.timer.arm(deadline);
    }

    /// Start or end a VBUS session
    pub(crate) fn set_vbus(&mut self, on: bool) {
        let mut devctl = self.devctl();

        if on {
            if self.st.state == OtgState::AIdle {
                devctl |= ctrl::devctl::SESSION;
                self.write_devctl(devctl);

                if !self.wait_for_a_device() {
                    error!("Configured as A device timeout");
                    if self.hw.transceiver.has_vbus_control() {
                        self.hw.transceiver.set_vbus(true);
                    }
                }
            } else {
                self.st.is_active = true;
                self.st.default_is_a_device = true;
                self.transition(OtgState::AWaitVrise);
                devctl |= ctrl::devctl::SESSION;
                self.switch_role(Role::Host);
            }
        } else {
            self.st.is_active = false;
            // A_WAIT_VFALL and A_IDLE are skipped, the hardware goes straight to B_IDLE
            self.st.default_is_a_device = false;
            self.transition(OtgState::BIdle);
            devctl &= !ctrl::devctl::SESSION;
            self.switch_role(Role::Peripheral);
        }
        self.write_devctl(devctl);

        debug!("VBUS {}, devctl {:02x}", self.st.state, self.devctl());
        self.events.publish(OtgEvent::Vbus { on });
    }

    /// Poll until the port drops its B-device indication.
    /// Returns false when the bound expires first.
    fn wait_for_a_device(&self) -> bool {
        let deadline = StdInstant::now() + self.config.timing.vbus_ready_timeout();
        while self.devctl() & ctrl::devctl::BDEVICE != 0 {
            std::hint::spin_loop();
            if StdInstant::now() > deadline {
                return false;
            }
        }
        true
    }

    /// Role selection is left to the session mechanism; any mode starts a session
    pub(crate) fn set_mode(&mut self, mode: Role) {
        debug!("Set mode {:?}", mode);
        let devctl = self.devctl() | ctrl::devctl::SESSION;
        self.write_devctl(devctl);
    }

    /// ID pin changed
    pub(crate) fn id_change(&mut self) {
        if self.st.otg_enabled && self.st.state == OtgState::BIdle {
            self.arm_poll();
        }
    }

    /// Idle timer handler
    pub(crate) fn do_idle(&mut self) {
        match self.st.state {
            OtgState::AWaitBcon => {
                let devctl = self.devctl() & !ctrl::devctl::SESSION;
                self.write_devctl(devctl);

                if self.host_mode() {
                    self.transition(OtgState::AIdle);
                    self.switch_role(Role::Host);
                } else {
                    self.transition(OtgState::BIdle);
                    self.switch_role(Role::Peripheral);
                    self.arm_poll();
                }
            }
            OtgState::ASuspend => {
                if self.st.port_status.contains(PortStatus::RESUME) {
                    self.finish_resume_signalling();
                }
            }
            OtgState::AHost => {
                if self.host_mode() {
                    self.transition(OtgState::AWaitBcon);
                } else {
                    self.transition(OtgState::BIdle);
                }
            }
            OtgState::BIdle => self.solicit_session(),
            _ => {}
        }
    }

    fn finish_resume_signalling(&mut self) {
        let power = self.hw.regs.read(RegisterGroup::DeviceControl, ctrl::POWER)
            & !ctrl::power::RESUME;
        debug!("Root port resume stopped, power {:02x}", power);
        self.hw
            .regs
            .write(RegisterGroup::DeviceControl, ctrl::POWER, power);

        self.st.is_active = true;
        self.st
            .port_status
            .remove(PortStatus::SUSPEND | PortStatus::RESUME);
        self.st.port_status.insert(PortStatus::C_SUSPEND);
        self.hw.core.poll_root_hub_status();
        self.events.publish(OtgEvent::RootHubPoll);

        // Canonically A_WAIT_BCON; the controller goes straight back to host
        self.transition(OtgState::AHost);
    }

    fn solicit_session(&mut self) {
        if !self.st.peripheral_enabled {
            return;
        }

        let devctl = self.devctl();
        if devctl & ctrl::devctl::HM != 0 {
            self.transition(OtgState::AHost);
        } else {
            self.arm_poll();
            self.write_devctl(devctl | ctrl::devctl::SESSION);
        }
    }

    /// Request an idle evaluation by `deadline` (default: a few ms from now)
    pub(crate) fn try_idle(&mut self, deadline: Option<Instant>) {
        let now = Instant::now();
        let deadline = deadline.unwrap_or(now + self.config.timing.default_idle_delay());

        // Never idle while active, or in A_WAIT_BCON without a B-connect timeout
        if self.st.is_active
            || (self.st.a_wait_bcon.is_zero() && self.st.state == OtgState::AWaitBcon)
        {
            debug!("{} active, deleting timer", self.st.state);
            self.timer.reset(now);
            return;
        }

        if self.timer.request(deadline, now) {
            debug!(
                "{} inactive, idle timer for {} ms",
                self.st.state,
                deadline.saturating_duration_since(now).as_millis()
            );
        }
    }
}
