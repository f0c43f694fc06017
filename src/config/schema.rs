use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level glue configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GlueConfig {
    /// Board wiring resolved at bind time
    pub board: BoardConfig,
    /// Timer and poll intervals
    pub timing: TimingConfig,
}

/// PHY interface between the controller and the transceiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhyInterface {
    /// External ULPI transceiver (analog VBUS handling in the PHY)
    Ulpi,
    /// Internal UTMI PHY, VBUS is driven explicitly by the glue
    Utmi,
}

impl Default for PhyInterface {
    fn default() -> Self {
        Self::Ulpi
    }
}

/// Roles the board allows the port to take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortMode {
    Host,
    Peripheral,
    Otg,
}

impl Default for PortMode {
    fn default() -> Self {
        Self::Otg
    }
}

impl PortMode {
    /// Peripheral role is available unless the port is host-only
    pub fn peripheral_enabled(self) -> bool {
        self != PortMode::Host
    }

    /// Role negotiation is only enabled for dual-role ports
    pub fn otg_enabled(self) -> bool {
        self == PortMode::Otg
    }
}

/// SoC revision, selects idle-mode workarounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocVariant {
    /// Controller auto-idle is broken on this part
    Omap3430,
    /// Smart-idle blocks core off mode on this part
    Omap3630,
    Generic,
}

impl Default for SocVariant {
    fn default() -> Self {
        Self::Generic
    }
}

/// Board configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BoardConfig {
    pub interface_type: PhyInterface,
    pub port_mode: PortMode,
    pub soc: SocVariant,
}

/// Timing configuration (all values in milliseconds)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Idle poll interval used when soliciting a session
    pub poll_interval_ms: u64,
    /// Wait-for-B-connect timeout, 0 disables it
    pub a_wait_bcon_ms: u64,
    /// Upper bound for the A-device poll in set_vbus
    pub vbus_ready_timeout_ms: u64,
    /// Deadline used by try_idle when the caller gives none
    pub default_idle_delay_ms: u64,
    /// Settle delay around suspend/resume
    pub pm_settle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            a_wait_bcon_ms: 1100,
            vbus_ready_timeout_ms: 1000,
            default_idle_delay_ms: 3,
            pm_settle_ms: 20,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn vbus_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.vbus_ready_timeout_ms)
    }

    pub fn default_idle_delay(&self) -> Duration {
        Duration::from_millis(self.default_idle_delay_ms)
    }

    pub fn pm_settle(&self) -> Duration {
        Duration::from_millis(self.pm_settle_ms)
    }
}
