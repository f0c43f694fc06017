//! Power context manager
//!
//! Saves the wrapper's system-config and force-standby registers before the
//! interface clock is gated and writes them back after it is restored. All
//! register access is skipped while the clock is off.

use tracing::{debug, error, info};

use super::glue::OtgGlue;
use super::session::Session;
use super::state::RegisterSnapshot;
use crate::error::Result;
use crate::events::OtgEvent;
use crate::regs::wrapper::{forcestdby, sysconfig};
use crate::regs::{wrapper, RegisterGroup};

impl Session<'_> {
    /// Capture the wrapper registers. Returns false with the clock gated.
    pub(crate) fn save_context(&mut self) -> bool {
        if !self.st.clock_enabled {
            return false;
        }
        let snapshot = RegisterSnapshot {
            sysconfig: self
                .hw
                .regs
                .read(RegisterGroup::SystemConfig, wrapper::SYSCONFIG),
            forcestdby: self
                .hw
                .regs
                .read(RegisterGroup::SystemConfig, wrapper::FORCESTDBY),
        };
        debug!(
            "Saved context: sysconfig {:#x}, forcestdby {:#x}",
            snapshot.sysconfig, snapshot.forcestdby
        );
        self.st.snapshot = Some(snapshot);
        true
    }

    /// Write back and consume the saved snapshot
    pub(crate) fn restore_context(&mut self) -> bool {
        if !self.st.clock_enabled {
            return false;
        }
        let Some(snapshot) = self.st.snapshot.take() else {
            debug!("No saved context to restore");
            return false;
        };
        let regs = &self.hw.regs;
        regs.write(RegisterGroup::SystemConfig, wrapper::SYSCONFIG, snapshot.sysconfig);
        regs.write(
            RegisterGroup::SystemConfig,
            wrapper::FORCESTDBY,
            snapshot.forcestdby,
        );
        true
    }

    /// Leave standby handling to the wrapper: no wakeup, no forced MSTANDBY
    pub(crate) fn low_level_init(&mut self) {
        let regs = &self.hw.regs;
        regs.modify(
            RegisterGroup::SystemConfig,
            wrapper::SYSCONFIG,
            sysconfig::ENABLEWAKEUP,
            0,
        );
        regs.modify(
            RegisterGroup::SystemConfig,
            wrapper::FORCESTDBY,
            forcestdby::ENABLEFORCE,
            0,
        );
    }

    /// Quiesce in any role: force MSTANDBY and enable wakeup
    pub(crate) fn low_level_exit(&mut self) {
        let regs = &self.hw.regs;
        regs.modify(
            RegisterGroup::SystemConfig,
            wrapper::FORCESTDBY,
            0,
            forcestdby::ENABLEFORCE,
        );
        regs.modify(
            RegisterGroup::SystemConfig,
            wrapper::SYSCONFIG,
            0,
            sysconfig::ENABLEWAKEUP,
        );
    }
}

impl OtgGlue {
    /// Save this component's registers outside system suspend.
    /// No-op while the clock is gated.
    pub fn save_context(&self) -> bool {
        self.shared().with_session(|s| s.save_context())
    }

    /// Restore what [`save_context`](Self::save_context) captured.
    /// No-op while the clock is gated or when nothing was saved.
    pub fn restore_context(&self) -> bool {
        self.shared().with_session(|s| s.restore_context())
    }

    /// Platform idle hook: save the core and glue contexts
    pub fn idle_save_context(&self) {
        let shared = self.shared();
        shared.with_session(|s| {
            if !s.st.clock_enabled {
                return;
            }
            s.hw.core.save_context();
            s.save_context();
        });
    }

    /// Platform idle hook: restore the glue and core contexts
    pub fn idle_restore_context(&self) {
        let shared = self.shared();
        shared.with_session(|s| {
            if !s.st.clock_enabled {
                return;
            }
            s.restore_context();
            s.hw.core.restore_context();
        });
    }

    pub fn is_clock_enabled(&self) -> bool {
        self.shared().inner.lock().state.clock_enabled
    }

    /// System suspend. No-op when the clock is already gated or the
    /// controller is unbound.
    pub async fn suspend(&self) -> Result<()> {
        let shared = self.shared();
        let _pm = shared.pm.lock().await;

        let quiesced = shared.with_bound_session(|s| {
            if !s.st.clock_enabled {
                return false;
            }
            s.low_level_exit();
            true
        });
        match quiesced {
            None => {
                debug!("Suspend skipped, controller unbound");
                return Ok(());
            }
            Some(false) => {
                debug!("Suspend skipped, clock already off");
                return Ok(());
            }
            Some(true) => {}
        }

        tokio::time::sleep(shared.config.timing.pm_settle()).await;

        // Unbind may have released the hardware during the settle delay
        let gated = shared.with_bound_session(|s| {
            if !s.st.clock_enabled {
                return false;
            }
            s.hw.core.save_context();
            s.save_context();
            s.hw.clock.disable();
            s.st.clock_enabled = false;
            true
        });
        if gated != Some(true) {
            debug!("Suspend abandoned, controller unbound while settling");
            return Ok(());
        }

        info!("OTG controller suspended");
        shared.events.publish(OtgEvent::Suspended);
        Ok(())
    }

    /// System resume. A clock failure is returned and leaves the
    /// controller gated with its snapshot untouched. No-op once unbound.
    pub async fn resume(&self) -> Result<()> {
        let shared = self.shared();
        let _pm = shared.pm.lock().await;

        let resumed = shared.with_bound_session(|s| -> Result<bool> {
            if s.st.clock_enabled {
                return Ok(false);
            }
            s.hw.clock.enable().map_err(|e| {
                error!("Failed to enable clock on resume: {}", e);
                e
            })?;
            s.st.clock_enabled = true;
            s.restore_context();
            s.low_level_init();
            s.hw.core.restore_context();
            Ok(true)
        });
        match resumed {
            None => {
                debug!("Resume skipped, controller unbound");
                return Ok(());
            }
            Some(Ok(false)) => {
                debug!("Resume skipped, clock already on");
                return Ok(());
            }
            Some(Ok(true)) => {}
            Some(Err(e)) => return Err(e),
        }

        tokio::time::sleep(shared.config.timing.pm_settle()).await;

        info!("OTG controller resumed");
        shared.events.publish(OtgEvent::Resumed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::GlueConfig;
    use crate::error::OtgError;
    use crate::events::OtgEvent;
    use crate::otg::CoreCall;
    use crate::regs::wrapper::{self, forcestdby, sysconfig};
    use crate::regs::{RegisterBus, RegisterGroup};
    use crate::sim::SimRig;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn sysconfig_of(rig: &SimRig) -> u32 {
        rig.regs.read(RegisterGroup::SystemConfig, wrapper::SYSCONFIG)
    }

    fn forcestdby_of(rig: &SimRig) -> u32 {
        rig.regs.read(RegisterGroup::SystemConfig, wrapper::FORCESTDBY)
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_resume_round_trip() {
        let rig = SimRig::bind(GlueConfig::default()).unwrap();
        let programmed = sysconfig_of(&rig);
        let mut rx = rig.events.subscribe();

        rig.glue.suspend().await.unwrap();
        assert!(!rig.glue.is_clock_enabled());
        assert!(!rig.clock.is_enabled());
        assert!(rig.glue.status().has_snapshot);
        assert_ne!(forcestdby_of(&rig) & forcestdby::ENABLEFORCE, 0);
        assert_ne!(sysconfig_of(&rig) & sysconfig::ENABLEWAKEUP, 0);
        assert_eq!(rx.try_recv().unwrap(), OtgEvent::Suspended);

        rig.glue.resume().await.unwrap();
        assert!(rig.glue.is_clock_enabled());
        assert!(!rig.glue.status().has_snapshot);
        assert_eq!(sysconfig_of(&rig), programmed);
        assert_eq!(forcestdby_of(&rig), 0);
        assert_eq!(rx.try_recv().unwrap(), OtgEvent::Resumed);
        assert_eq!(
            rig.core.calls(),
            vec![CoreCall::SaveContext, CoreCall::RestoreContext]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_twice_is_noop() {
        let rig = SimRig::bind(GlueConfig::default()).unwrap();
        rig.glue.suspend().await.unwrap();
        let writes = rig.regs.total_writes();

        rig.glue.suspend().await.unwrap();
        assert_eq!(rig.regs.total_writes(), writes);
        assert_eq!(rig.clock.disable_count(), 1);
        assert_eq!(rig.core.count(CoreCall::SaveContext), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_while_running_is_noop() {
        let rig = SimRig::bind(GlueConfig::default()).unwrap();
        let writes = rig.regs.total_writes();
        rig.glue.resume().await.unwrap();
        assert_eq!(rig.regs.total_writes(), writes);
        assert_eq!(rig.clock.enable_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_clock_failure_stays_gated() {
        let rig = SimRig::bind(GlueConfig::default()).unwrap();
        rig.glue.suspend().await.unwrap();
        let writes = rig.regs.total_writes();

        rig.clock.set_fail_enable(true);
        let err = assert_err!(rig.glue.resume().await);
        assert!(matches!(err, OtgError::Clock(_)));
        assert!(!rig.glue.is_clock_enabled());
        assert!(rig.glue.status().has_snapshot);
        assert_eq!(rig.regs.total_writes(), writes);

        rig.clock.set_fail_enable(false);
        assert_ok!(rig.glue.resume().await);
        assert!(rig.glue.is_clock_enabled());
        assert!(!rig.glue.status().has_snapshot);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_register_access_with_clock_gated() {
        let rig = SimRig::bind(GlueConfig::default()).unwrap();
        rig.glue.suspend().await.unwrap();
        let writes = rig.regs.total_writes();

        assert!(!rig.glue.save_context());
        assert!(!rig.glue.restore_context());
        rig.glue.idle_save_context();
        rig.glue.idle_restore_context();

        assert_eq!(rig.regs.total_writes(), writes);
        assert_eq!(rig.core.count(CoreCall::RestoreContext), 0);
        // Snapshot from suspend is still there for resume
        assert!(rig.glue.status().has_snapshot);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_restore_context() {
        let rig = SimRig::bind(GlueConfig::default()).unwrap();
        let programmed = sysconfig_of(&rig);

        assert!(rig.glue.save_context());
        rig.regs
            .poke(RegisterGroup::SystemConfig, wrapper::SYSCONFIG, 0x1234);
        rig.regs
            .poke(RegisterGroup::SystemConfig, wrapper::FORCESTDBY, 1);

        assert!(rig.glue.restore_context());
        assert_eq!(sysconfig_of(&rig), programmed);
        assert_eq!(forcestdby_of(&rig), 0);

        // Snapshot is consumed
        rig.regs
            .poke(RegisterGroup::SystemConfig, wrapper::SYSCONFIG, 0x1234);
        assert!(!rig.glue.restore_context());
        assert_eq!(sysconfig_of(&rig), 0x1234);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_hooks_include_core_context() {
        let rig = SimRig::bind(GlueConfig::default()).unwrap();
        rig.glue.idle_save_context();
        rig.glue.idle_restore_context();
        assert_eq!(
            rig.core.calls(),
            vec![CoreCall::SaveContext, CoreCall::RestoreContext]
        );
        assert!(!rig.glue.status().has_snapshot);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_after_unbind_keeps_clock_off() {
        let rig = SimRig::bind(GlueConfig::default()).unwrap();
        rig.glue.exit().unwrap();
        let writes = rig.regs.total_writes();

        assert_ok!(rig.glue.resume().await);
        assert!(!rig.clock.is_enabled());
        assert!(!rig.glue.is_clock_enabled());
        assert_eq!(rig.regs.total_writes(), writes);
        assert_eq!(rig.clock.enable_count(), 1);

        let SimRig { glue, clock, .. } = rig;
        drop(glue);
        assert!(!clock.is_enabled());
        assert_eq!(clock.disable_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_after_unbind_is_noop() {
        let rig = SimRig::bind(GlueConfig::default()).unwrap();
        rig.glue.exit().unwrap();
        let writes = rig.regs.total_writes();

        assert_ok!(rig.glue.suspend().await);
        assert_eq!(rig.regs.total_writes(), writes);
        assert_eq!(rig.clock.disable_count(), 1);
        assert!(rig.core.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbind_during_suspend_settle() {
        let rig = SimRig::bind(GlueConfig::default()).unwrap();
        let mut rx = rig.events.subscribe();

        let unbind = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            rig.glue.exit().unwrap();
        };
        let (suspended, ()) = tokio::join!(rig.glue.suspend(), unbind);

        assert_ok!(suspended);
        assert_eq!(rig.clock.disable_count(), 1);
        assert!(!rig.clock.is_enabled());
        assert!(rig.core.calls().is_empty());
        assert!(!rig.glue.status().has_snapshot);
        assert_eq!(rx.try_recv().unwrap(), OtgEvent::Unbound);
        assert!(rx.try_recv().is_err());
    }
}
