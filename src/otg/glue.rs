//! Controller instance lifecycle
//!
//! [`OtgGlue`] is created when the controller binds to its resources and owns
//! the controller state for the lifetime of the binding. Event delivery, idle
//! timer firings and power-management callbacks all serialize through the
//! per-instance lock in [`Shared`].

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::idle::IdleTimer;
use super::notify::NotifierHandle;
use super::platform::{ClockControl, CoreController, Hardware};
use super::session::Session;
use super::state::{ControllerState, OtgState, PortStatus, Role};
use super::transceiver::{NotifyStatus, Transceiver, TransceiverEvent};
use crate::config::{GlueConfig, PhyInterface, SocVariant};
use crate::error::{OtgError, Result};
use crate::events::{EventBus, OtgEvent};
use crate::regs::{wrapper, RegisterBus, RegisterGroup};

/// Resources resolved by the bus layer before bind
pub struct BindResources {
    pub regs: Arc<dyn RegisterBus>,
    pub clock: Arc<dyn ClockControl>,
    /// `None` when the board has no transceiver wired up
    pub transceiver: Option<Arc<dyn Transceiver>>,
    pub core: Arc<dyn CoreController>,
    pub config: GlueConfig,
    pub events: Option<Arc<EventBus>>,
}

/// Serializable view of the controller state
#[derive(Debug, Clone, Serialize)]
pub struct OtgStatus {
    pub state: OtgState,
    pub role: Role,
    pub is_active: bool,
    pub default_is_a_device: bool,
    pub peripheral_enabled: bool,
    pub otg_enabled: bool,
    pub gadget_bound: bool,
    pub clock_enabled: bool,
    pub has_snapshot: bool,
    pub port_status: PortStatus,
    /// Milliseconds until the pending idle evaluation
    pub idle_pending_ms: Option<u64>,
    /// Session bit, `None` while the clock is gated
    pub session: Option<bool>,
}

pub(crate) struct Inner {
    pub state: ControllerState,
    pub timer: IdleTimer,
    /// Transceiver notifications are accepted
    pub subscribed: bool,
    pub bound: bool,
}

pub(crate) struct Shared {
    pub inner: Mutex<Inner>,
    /// Serializes whole suspend/resume sequences, which sleep between steps
    pub pm: tokio::sync::Mutex<()>,
    pub hw: Hardware,
    pub config: GlueConfig,
    pub events: Arc<EventBus>,
}

impl Shared {
    /// Run `f` on a session view with the controller lock held
    pub(crate) fn with_session<R>(&self, f: impl FnOnce(&mut Session<'_>) -> R) -> R {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut session = Session {
            st: &mut inner.state,
            timer: &mut inner.timer,
            hw: &self.hw,
            config: &self.config,
            events: &self.events,
        };
        f(&mut session)
    }

    /// Like [`with_session`](Self::with_session), but `None` once unbound
    pub(crate) fn with_bound_session<R>(
        &self,
        f: impl FnOnce(&mut Session<'_>) -> R,
    ) -> Option<R> {
        let mut guard = self.inner.lock();
        if !guard.bound {
            return None;
        }
        let inner = &mut *guard;
        let mut session = Session {
            st: &mut inner.state,
            timer: &mut inner.timer,
            hw: &self.hw,
            config: &self.config,
            events: &self.events,
        };
        Some(f(&mut session))
    }

    /// Transceiver notification entry point
    pub(crate) fn deliver(&self, event: TransceiverEvent) -> NotifyStatus {
        let status = {
            let mut guard = self.inner.lock();
            if !guard.subscribed {
                debug!("Dropping {:?} delivered after unsubscribe", event);
                return NotifyStatus::NotHandled;
            }
            let inner = &mut *guard;
            Session {
                st: &mut inner.state,
                timer: &mut inner.timer,
                hw: &self.hw,
                config: &self.config,
                events: &self.events,
            }
            .handle_transceiver_event(event)
        };

        self.events.publish(OtgEvent::Transceiver {
            event,
            handled: status == NotifyStatus::Handled,
        });
        status
    }

    /// Idle timer entry point
    fn fire_idle(&self, generation: u64) {
        let mut guard = self.inner.lock();
        if !guard.timer.claim(generation) {
            return;
        }
        let inner = &mut *guard;
        Session {
            st: &mut inner.state,
            timer: &mut inner.timer,
            hw: &self.hw,
            config: &self.config,
            events: &self.events,
        }
        .do_idle();
    }
}

/// Bound dual-role controller
pub struct OtgGlue {
    shared: Arc<Shared>,
}

impl OtgGlue {
    /// Bind on the current tokio runtime
    pub fn init(resources: BindResources) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| OtgError::Internal(format!("No tokio runtime for idle timer: {}", e)))?;
        Self::init_with_runtime(resources, runtime)
    }

    /// Bind the controller: claim the transceiver, program the wrapper and
    /// subscribe to cable events. Any failure aborts bring-up.
    pub fn init_with_runtime(resources: BindResources, runtime: Handle) -> Result<Self> {
        let BindResources {
            regs,
            clock,
            transceiver,
            core,
            config,
            events,
        } = resources;

        config.validate()?;

        let transceiver = transceiver.ok_or_else(|| {
            error!("No transceiver configured for the OTG port");
            OtgError::NoTransceiver
        })?;

        clock.enable().map_err(|e| {
            error!("Failed to enable interface clock: {}", e);
            e
        })?;

        let events = events.unwrap_or_default();
        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let weak = weak.clone();
            let timer = IdleTimer::new(
                runtime,
                Arc::new(move |generation| {
                    if let Some(shared) = weak.upgrade() {
                        shared.fire_idle(generation);
                    }
                }),
            );
            Shared {
                inner: Mutex::new(Inner {
                    state: ControllerState::new(&config),
                    timer,
                    subscribed: false,
                    bound: true,
                }),
                pm: tokio::sync::Mutex::new(()),
                hw: Hardware {
                    regs,
                    transceiver,
                    core,
                    clock,
                },
                config,
                events,
            }
        });

        shared.with_session(|s| {
            s.low_level_init();
            s.program_wrapper();
        });

        // Accept deliveries before registering so an immediate one is not lost
        shared.inner.lock().subscribed = true;
        let notifier = Arc::new(NotifierHandle {
            shared: Arc::downgrade(&shared),
        });
        if let Err(e) = shared.hw.transceiver.register_notifier(notifier) {
            error!("Notification register failed: {}", e);
            {
                let mut inner = shared.inner.lock();
                inner.subscribed = false;
                inner.bound = false;
            }
            shared.with_session(|s| s.low_level_exit());
            shared.hw.transceiver.release();
            shared.hw.clock.disable();
            return Err(match e {
                OtgError::NotifierRegistration(_) => e,
                other => OtgError::NotifierRegistration(other.to_string()),
            });
        }

        // Cable already present at bind
        if shared.hw.transceiver.state() == OtgState::BIdle {
            shared.deliver(TransceiverEvent::VbusPresent);
        }

        info!(
            "OTG controller bound ({:?} PHY, {:?} port)",
            shared.config.board.interface_type, shared.config.board.port_mode
        );
        shared.events.publish(OtgEvent::Bound);

        Ok(Self { shared })
    }

    /// Unbind: stop the idle timer, drop the subscription and release the
    /// hardware. Safe to call more than once.
    pub fn exit(&self) -> Result<()> {
        {
            let mut inner = self.shared.inner.lock();
            if !inner.bound {
                return Ok(());
            }
            inner.bound = false;
            inner.subscribed = false;
            inner.timer.cancel();
        }

        self.shared.hw.transceiver.unregister_notifier();

        let clock_was_on = self.shared.with_session(|s| {
            let on = s.st.clock_enabled;
            if on {
                s.low_level_exit();
            }
            s.st.clock_enabled = false;
            on
        });

        self.shared.hw.transceiver.release();
        if clock_was_on {
            self.shared.hw.clock.disable();
        }

        info!("OTG controller unbound");
        self.shared.events.publish(OtgEvent::Unbound);
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.shared.inner.lock().bound
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.shared.events.clone()
    }

    pub fn config(&self) -> &GlueConfig {
        &self.shared.config
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Start (`true`) or end (`false`) a VBUS session
    pub fn set_vbus(&self, on: bool) {
        self.shared.with_session(|s| s.set_vbus(on));
    }

    pub fn set_mode(&self, mode: Role) -> Result<()> {
        self.shared.with_session(|s| s.set_mode(mode));
        Ok(())
    }

    /// ID pin change reported by the core
    pub fn id_change(&self) {
        self.shared.with_session(|s| s.id_change());
    }

    /// Request an idle evaluation by `deadline`, or shortly if `None`
    pub fn try_idle(&self, deadline: Option<Instant>) {
        self.shared.with_session(|s| s.try_idle(deadline));
    }

    /// Deliver a transceiver event as the PHY driver would
    pub fn notify(&self, event: TransceiverEvent) -> NotifyStatus {
        self.shared.deliver(event)
    }

    /// State change driven by the core engine's interrupt path
    pub fn report_core_state(&self, state: OtgState) {
        self.shared.with_session(|s| s.transition(state));
    }

    /// Link activity reported by the core engine
    pub fn set_link_active(&self, active: bool) {
        self.shared.inner.lock().state.is_active = active;
    }

    pub fn set_peripheral_enabled(&self, enabled: bool) {
        self.shared.inner.lock().state.peripheral_enabled = enabled;
    }

    /// A gadget driver was bound to or removed from the peripheral side
    pub fn set_gadget_bound(&self, bound: bool) {
        self.shared.inner.lock().state.gadget_bound = bound;
    }

    /// Root port suspended (`true`) or woken (`false`) by the host stack
    pub fn set_port_suspended(&self, suspended: bool) {
        self.shared.with_session(|s| {
            if suspended {
                s.st.port_status.insert(PortStatus::SUSPEND);
                if s.st.state == OtgState::AHost {
                    s.transition(OtgState::ASuspend);
                }
            } else {
                s.st.port_status.remove(PortStatus::SUSPEND);
            }
        });
    }

    /// The core started resume signalling on the root port
    pub fn mark_port_resume(&self) {
        self.shared
            .inner
            .lock()
            .state
            .port_status
            .insert(PortStatus::RESUME);
    }

    pub fn state(&self) -> OtgState {
        self.shared.inner.lock().state.state
    }

    pub fn status(&self) -> OtgStatus {
        self.shared.with_session(|s| {
            let now = Instant::now();
            OtgStatus {
                state: s.st.state,
                role: s.st.role,
                is_active: s.st.is_active,
                default_is_a_device: s.st.default_is_a_device,
                peripheral_enabled: s.st.peripheral_enabled,
                otg_enabled: s.st.otg_enabled,
                gadget_bound: s.st.gadget_bound,
                clock_enabled: s.st.clock_enabled,
                has_snapshot: s.st.snapshot.is_some(),
                port_status: s.st.port_status,
                idle_pending_ms: s
                    .timer
                    .deadline()
                    .map(|d| d.saturating_duration_since(now).as_millis() as u64),
                session: s
                    .st
                    .clock_enabled
                    .then(|| s.devctl() & crate::regs::ctrl::devctl::SESSION != 0),
            }
        })
    }
}

impl Drop for OtgGlue {
    fn drop(&mut self) {
        if let Err(e) = self.exit() {
            warn!("Error unbinding OTG controller: {}", e);
        }
        debug!("OtgGlue dropping");
    }
}

impl Session<'_> {
    /// Wrapper setup at bind: standby/idle modes and PHY interface select
    pub(crate) fn program_wrapper(&mut self) {
        use crate::regs::wrapper::{interfsel, sysconfig};

        let regs = &self.hw.regs;
        let board = &self.config.board;

        let mut cfg = regs.read(RegisterGroup::SystemConfig, wrapper::SYSCONFIG);
        cfg &= !(sysconfig::ENABLEWAKEUP | sysconfig::NOSTDBY | sysconfig::AUTOIDLE | sysconfig::NOIDLE);
        cfg |= sysconfig::SMARTSTDBY;
        // Smart-idle keeps the 3630 core out of off mode
        if board.soc == SocVariant::Omap3630 {
            cfg |= sysconfig::FORCEIDLE;
        } else {
            cfg |= sysconfig::SMARTIDLE;
        }
        // Auto-idle does not work on 3430
        if board.soc != SocVariant::Omap3430 {
            cfg |= sysconfig::AUTOIDLE;
        }
        regs.write(RegisterGroup::SystemConfig, wrapper::SYSCONFIG, cfg);

        let mut sel = regs.read(RegisterGroup::SystemConfig, wrapper::INTERFSEL);
        match board.interface_type {
            PhyInterface::Utmi => sel = (sel & !interfsel::ULPI_12PIN) | interfsel::UTMI_8BIT,
            PhyInterface::Ulpi => sel |= interfsel::ULPI_12PIN,
        }
        regs.write(RegisterGroup::SystemConfig, wrapper::INTERFSEL, sel);

        debug!(
            "Wrapper: revision {:#x}, sysconfig {:#06x}, sysstatus {:#x}, interfsel {:#x}, simenable {:#x}",
            regs.read(RegisterGroup::SystemConfig, wrapper::REVISION),
            regs.read(RegisterGroup::SystemConfig, wrapper::SYSCONFIG),
            regs.read(RegisterGroup::SystemConfig, wrapper::SYSSTATUS),
            regs.read(RegisterGroup::SystemConfig, wrapper::INTERFSEL),
            regs.read(RegisterGroup::SystemConfig, wrapper::SIMENABLE),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otg::{SimClock, SimCore, SimTransceiver, TransceiverCall};
    use crate::regs::mem::MemRegisters;
    use crate::regs::wrapper::{forcestdby, interfsel, sysconfig};
    use crate::regs::ctrl;
    use crate::sim::SimRig;
    use std::time::Duration;

    fn wrapper_reg(rig: &SimRig, offset: u32) -> u32 {
        rig.regs.read(RegisterGroup::SystemConfig, offset)
    }

    fn resources(transceiver: Option<Arc<SimTransceiver>>, clock: Arc<SimClock>) -> BindResources {
        BindResources {
            regs: Arc::new(MemRegisters::new()),
            clock,
            transceiver: transceiver.map(|t| t as Arc<dyn Transceiver>),
            core: Arc::new(SimCore::new()),
            config: GlueConfig::default(),
            events: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_programs_wrapper() {
        let rig = SimRig::bind(GlueConfig::default()).unwrap();
        assert_eq!(
            wrapper_reg(&rig, wrapper::SYSCONFIG),
            sysconfig::SMARTSTDBY | sysconfig::SMARTIDLE | sysconfig::AUTOIDLE
        );
        assert_eq!(wrapper_reg(&rig, wrapper::FORCESTDBY), 0);
        assert_eq!(wrapper_reg(&rig, wrapper::INTERFSEL), interfsel::ULPI_12PIN);
        assert!(rig.clock.is_enabled());
        assert!(rig.glue.is_bound());
        assert_eq!(rig.transceiver.calls(), vec![TransceiverCall::Register]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_per_soc_variant() {
        let mut config = GlueConfig::default();
        config.board.soc = SocVariant::Omap3630;
        config.board.interface_type = PhyInterface::Utmi;
        let rig = SimRig::bind(config).unwrap();
        assert_eq!(
            wrapper_reg(&rig, wrapper::SYSCONFIG),
            sysconfig::SMARTSTDBY | sysconfig::FORCEIDLE | sysconfig::AUTOIDLE
        );
        assert_eq!(wrapper_reg(&rig, wrapper::INTERFSEL), interfsel::UTMI_8BIT);

        let mut config = GlueConfig::default();
        config.board.soc = SocVariant::Omap3430;
        let rig = SimRig::bind(config).unwrap();
        assert_eq!(
            wrapper_reg(&rig, wrapper::SYSCONFIG),
            sysconfig::SMARTSTDBY | sysconfig::SMARTIDLE
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_without_transceiver() {
        let clock = Arc::new(SimClock::new());
        let err = OtgGlue::init(resources(None, clock.clone())).err().unwrap();
        assert!(matches!(err, OtgError::NoTransceiver));
        assert!(err.is_fatal_at_bind());
        assert_eq!(clock.enable_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_registration_failure_releases_resources() {
        let clock = Arc::new(SimClock::new());
        let xceiv = Arc::new(SimTransceiver::failing_registration());
        let err = OtgGlue::init(resources(Some(xceiv.clone()), clock.clone()))
            .err()
            .unwrap();

        assert!(matches!(err, OtgError::NotifierRegistration(_)));
        assert!(!clock.is_enabled());
        assert_eq!(clock.disable_count(), 1);
        assert_eq!(xceiv.calls(), vec![TransceiverCall::Release]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_clock_failure() {
        let clock = Arc::new(SimClock::new());
        clock.set_fail_enable(true);
        let xceiv = Arc::new(SimTransceiver::new());
        let err = OtgGlue::init(resources(Some(xceiv.clone()), clock))
            .err()
            .unwrap();
        assert!(matches!(err, OtgError::Clock(_)));
        assert!(!xceiv.is_registered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_rejects_invalid_config() {
        let mut config = GlueConfig::default();
        config.timing.poll_interval_ms = 0;
        assert!(matches!(
            SimRig::bind(config).err().unwrap(),
            OtgError::Config(_)
        ));
    }

    #[test]
    fn test_bind_requires_runtime() {
        let clock = Arc::new(SimClock::new());
        let xceiv = Arc::new(SimTransceiver::new());
        let err = OtgGlue::init(resources(Some(xceiv), clock)).err().unwrap();
        assert!(matches!(err, OtgError::Internal(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cable_present_at_bind() {
        let xceiv = Arc::new(SimTransceiver::new());
        xceiv.set_state(OtgState::BIdle);
        let rig = SimRig::bind_with(GlueConfig::default(), xceiv).unwrap();
        assert_eq!(
            rig.transceiver.calls(),
            vec![TransceiverCall::Register, TransceiverCall::Init]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_is_idempotent() {
        let rig = SimRig::bind(GlueConfig::default()).unwrap();
        let mut rx = rig.events.subscribe();
        rig.transceiver.take_calls();

        rig.glue.exit().unwrap();
        rig.glue.exit().unwrap();

        assert!(!rig.glue.is_bound());
        assert_eq!(rig.clock.disable_count(), 1);
        assert_eq!(
            rig.transceiver.calls(),
            vec![TransceiverCall::Unregister, TransceiverCall::Release]
        );
        assert_ne!(
            wrapper_reg(&rig, wrapper::FORCESTDBY) & forcestdby::ENABLEFORCE,
            0
        );
        assert_ne!(
            wrapper_reg(&rig, wrapper::SYSCONFIG) & sysconfig::ENABLEWAKEUP,
            0
        );
        assert_eq!(rx.try_recv().unwrap(), OtgEvent::Unbound);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_stops_idle_timer() {
        let rig = SimRig::bind(GlueConfig::default()).unwrap();
        rig.regs
            .poke_bits(RegisterGroup::DeviceControl, ctrl::DEVCTL, ctrl::devctl::HM, true);
        rig.glue.try_idle(None);
        rig.glue.exit().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rig.glue.state(), OtgState::BIdle);
        assert_eq!(rig.glue.status().idle_pending_ms, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_unbinds() {
        let rig = SimRig::bind(GlueConfig::default()).unwrap();
        let SimRig {
            glue,
            clock,
            transceiver,
            ..
        } = rig;
        drop(glue);
        assert!(!clock.is_enabled());
        assert!(!transceiver.is_registered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_changes_are_published() {
        let rig = SimRig::bind(GlueConfig::default()).unwrap();
        let mut rx = rig.events.subscribe();

        rig.glue.set_vbus(true);
        assert_eq!(
            rx.try_recv().unwrap(),
            OtgEvent::StateChanged {
                from: OtgState::BIdle,
                to: OtgState::AWaitVrise,
            }
        );
        assert_eq!(rx.try_recv().unwrap(), OtgEvent::Vbus { on: true });

        // Same state, no transition event
        rig.glue.report_core_state(OtgState::AWaitVrise);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_serializes() {
        let rig = SimRig::bind(GlueConfig::default()).unwrap();
        rig.glue.try_idle(Some(Instant::now() + Duration::from_millis(40)));

        let json = serde_json::to_value(rig.glue.status()).unwrap();
        assert_eq!(json["state"], "b_idle");
        assert_eq!(json["role"], "peripheral");
        assert_eq!(json["idle_pending_ms"], 40);
        assert_eq!(json["session"], false);
        assert_eq!(json["port_status"], 0);
    }
}
