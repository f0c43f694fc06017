//! Scripted simulation
//!
//! Binds a controller to in-memory registers and software collaborators and
//! replays a JSON script of cable events, core requests and PM callbacks.
//!
//! ```json
//! { "steps": [
//!     { "op": "event", "event": "vbus_present" },
//!     { "op": "host_mode", "on": true },
//!     { "op": "try_idle" },
//!     { "op": "wait_ms", "ms": 10 },
//!     { "op": "status" }
//! ] }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::GlueConfig;
use crate::error::{OtgError, Result};
use crate::events::EventBus;
use crate::otg::{
    BindResources, NotifyStatus, OtgGlue, OtgState, OtgStatus, Role, SimClock, SimCore,
    SimTransceiver, TransceiverEvent,
};
use crate::regs::mem::MemRegisters;
use crate::regs::{ctrl, RegisterGroup};

/// One scripted action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Transceiver notification, delivered through the registered notifier
    Event { event: TransceiverEvent },
    SetVbus { on: bool },
    SetMode { mode: Role },
    /// Idle request; `delay_ms` omitted means the default delay
    TryIdle {
        #[serde(default)]
        delay_ms: Option<u64>,
    },
    IdChange,
    Suspend,
    Resume,
    /// Drive the host-mode status bit
    HostMode { on: bool },
    /// Drive the B-device status bit
    BDevice { on: bool },
    Peripheral { enabled: bool },
    GadgetBound { bound: bool },
    LinkActive { active: bool },
    /// State change reported by the core engine
    CoreState { state: OtgState },
    /// State latched by the transceiver
    Cable { state: OtgState },
    PortSuspend { suspended: bool },
    PortResume,
    WaitMs { ms: u64 },
    Status,
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::Event { .. } => "event",
            Step::SetVbus { .. } => "set_vbus",
            Step::SetMode { .. } => "set_mode",
            Step::TryIdle { .. } => "try_idle",
            Step::IdChange => "id_change",
            Step::Suspend => "suspend",
            Step::Resume => "resume",
            Step::HostMode { .. } => "host_mode",
            Step::BDevice { .. } => "b_device",
            Step::Peripheral { .. } => "peripheral",
            Step::GadgetBound { .. } => "gadget_bound",
            Step::LinkActive { .. } => "link_active",
            Step::CoreState { .. } => "core_state",
            Step::Cable { .. } => "cable",
            Step::PortSuspend { .. } => "port_suspend",
            Step::PortResume => "port_resume",
            Step::WaitMs { .. } => "wait_ms",
            Step::Status => "status",
        }
    }
}

/// Script document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Script {
    /// Overrides the configuration given on the command line
    pub config: Option<GlueConfig>,
    pub steps: Vec<Step>,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OtgError::Config(format!("Failed to read script {}: {}", path.display(), e))
        })?;
        Self::parse(&raw)
    }

    /// Accepts either a script object or a bare array of steps
    pub fn parse(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if value.is_array() {
            Ok(Script {
                config: None,
                steps: serde_json::from_value(value)?,
            })
        } else {
            Ok(serde_json::from_value(value)?)
        }
    }
}

/// Outcome of one step
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub op: &'static str,
    pub state: OtgState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify: Option<NotifyStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OtgStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Controller bound to simulated hardware
pub struct SimRig {
    pub glue: OtgGlue,
    pub regs: Arc<MemRegisters>,
    pub transceiver: Arc<SimTransceiver>,
    pub clock: Arc<SimClock>,
    pub core: Arc<SimCore>,
    pub events: Arc<EventBus>,
}

impl SimRig {
    /// Bind with fresh simulated parts on the current runtime
    pub fn bind(config: GlueConfig) -> Result<Self> {
        Self::bind_with(config, Arc::new(SimTransceiver::new()))
    }

    pub fn bind_with(config: GlueConfig, transceiver: Arc<SimTransceiver>) -> Result<Self> {
        let regs = Arc::new(MemRegisters::new());
        let clock = Arc::new(SimClock::new());
        let core = Arc::new(SimCore::new());
        let events = Arc::new(EventBus::new());

        let glue = OtgGlue::init(BindResources {
            regs: regs.clone(),
            clock: clock.clone(),
            transceiver: Some(transceiver.clone()),
            core: core.clone(),
            config,
            events: Some(events.clone()),
        })?;

        Ok(Self {
            glue,
            regs,
            transceiver,
            clock,
            core,
            events,
        })
    }

    fn devctl_bit(&self, bit: u32, on: bool) {
        self.regs
            .poke_bits(RegisterGroup::DeviceControl, ctrl::DEVCTL, bit, on);
    }

    /// Execute one step
    pub async fn apply(&self, index: usize, step: &Step) -> StepReport {
        let mut report = StepReport {
            index,
            op: step.name(),
            state: OtgState::Undefined,
            notify: None,
            status: None,
            error: None,
        };
        debug!("Step {}: {:?}", index, step);

        let glue = &self.glue;
        let outcome: Result<()> = match step {
            Step::Event { event } => {
                report.notify = self.transceiver.emit(*event);
                Ok(())
            }
            Step::SetVbus { on } => {
                glue.set_vbus(*on);
                Ok(())
            }
            Step::SetMode { mode } => glue.set_mode(*mode),
            Step::TryIdle { delay_ms } => {
                glue.try_idle(delay_ms.map(|ms| Instant::now() + Duration::from_millis(ms)));
                Ok(())
            }
            Step::IdChange => {
                glue.id_change();
                Ok(())
            }
            Step::Suspend => glue.suspend().await,
            Step::Resume => glue.resume().await,
            Step::HostMode { on } => {
                self.devctl_bit(ctrl::devctl::HM, *on);
                Ok(())
            }
            Step::BDevice { on } => {
                self.devctl_bit(ctrl::devctl::BDEVICE, *on);
                Ok(())
            }
            Step::Peripheral { enabled } => {
                glue.set_peripheral_enabled(*enabled);
                Ok(())
            }
            Step::GadgetBound { bound } => {
                glue.set_gadget_bound(*bound);
                Ok(())
            }
            Step::LinkActive { active } => {
                glue.set_link_active(*active);
                Ok(())
            }
            Step::CoreState { state } => {
                glue.report_core_state(*state);
                Ok(())
            }
            Step::Cable { state } => {
                self.transceiver.set_state(*state);
                Ok(())
            }
            Step::PortSuspend { suspended } => {
                glue.set_port_suspended(*suspended);
                Ok(())
            }
            Step::PortResume => {
                self.regs.poke_bits(
                    RegisterGroup::DeviceControl,
                    ctrl::POWER,
                    ctrl::power::RESUME,
                    true,
                );
                glue.mark_port_resume();
                Ok(())
            }
            Step::WaitMs { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(())
            }
            Step::Status => {
                report.status = Some(glue.status());
                Ok(())
            }
        };

        if let Err(e) = outcome {
            report.error = Some(e.to_string());
        }
        report.state = glue.state();
        report
    }

    /// Execute a script; step failures are reported, not fatal
    pub async fn run(&self, steps: &[Step]) -> Vec<StepReport> {
        let mut reports = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            reports.push(self.apply(index, step).await);
        }
        info!(
            "Simulation finished: {} steps, final state {}",
            reports.len(),
            self.glue.state()
        );
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otg::TransceiverCall;

    #[test]
    fn test_parse_script_forms() {
        let script = Script::parse(r#"[{"op": "id_change"}, {"op": "wait_ms", "ms": 5}]"#).unwrap();
        assert!(script.config.is_none());
        assert_eq!(script.steps, vec![Step::IdChange, Step::WaitMs { ms: 5 }]);

        let script = Script::parse(
            r#"{"config": {"board": {"interface_type": "utmi"}},
                "steps": [{"op": "event", "event": "vbus_absent"}, {"op": "try_idle"}]}"#,
        )
        .unwrap();
        assert_eq!(
            script.steps,
            vec![
                Step::Event {
                    event: TransceiverEvent::VbusAbsent
                },
                Step::TryIdle { delay_ms: None },
            ]
        );
        assert!(script.config.is_some());
    }

    #[test]
    fn test_parse_rejects_unknown_op() {
        assert!(Script::parse(r#"[{"op": "reboot"}]"#).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_session_request_script() {
        let rig = SimRig::bind(GlueConfig::default()).unwrap();
        let script = Script::parse(
            r#"[
                {"op": "event", "event": "vbus_present"},
                {"op": "try_idle"},
                {"op": "wait_ms", "ms": 5},
                {"op": "host_mode", "on": true},
                {"op": "wait_ms", "ms": 2000},
                {"op": "status"}
            ]"#,
        )
        .unwrap();

        let reports = rig.run(&script.steps).await;
        assert_eq!(reports.len(), 6);
        assert_eq!(reports[0].notify, Some(NotifyStatus::Handled));
        assert_eq!(reports[2].state, OtgState::BIdle);
        // Poll timer fired with host mode seen
        assert_eq!(reports[5].state, OtgState::AHost);
        let status = reports[5].status.as_ref().unwrap();
        assert_eq!(status.session, Some(true));
        assert!(rig.transceiver.calls().contains(&TransceiverCall::Init));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reports_step_errors() {
        let rig = SimRig::bind(GlueConfig::default()).unwrap();
        rig.glue.suspend().await.unwrap();
        rig.clock.set_fail_enable(true);

        let reports = rig.run(&[Step::Resume, Step::Status]).await;
        assert!(reports[0].error.as_deref().unwrap().contains("Clock"));
        assert!(!reports[1].status.as_ref().unwrap().clock_enabled);
    }
}
