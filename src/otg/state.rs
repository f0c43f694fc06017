//! Controller state record

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::GlueConfig;

/// OTG state of the port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtgState {
    AIdle,
    AWaitVrise,
    AWaitBcon,
    AHost,
    ASuspend,
    BIdle,
    /// Any state owned by the core engine that the glue does not act on
    Undefined,
}

impl OtgState {
    pub fn as_str(self) -> &'static str {
        match self {
            OtgState::AIdle => "a_idle",
            OtgState::AWaitVrise => "a_wait_vrise",
            OtgState::AWaitBcon => "a_wait_bcon",
            OtgState::AHost => "a_host",
            OtgState::ASuspend => "a_suspend",
            OtgState::BIdle => "b_idle",
            OtgState::Undefined => "undefined",
        }
    }
}

impl fmt::Display for OtgState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role the controller core is switched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Peripheral,
}

/// Root port status flags, laid out as the hub status/change words
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortStatus(u32);

impl PortStatus {
    pub const SUSPEND: u32 = 0x0004;
    /// Change bits live in the upper half-word
    pub const C_SUSPEND: u32 = 0x0004 << 16;
    /// Resume signalling driven by the root port
    pub const RESUME: u32 = 1 << 31;

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    pub fn insert(&mut self, bits: u32) {
        self.0 |= bits;
    }

    pub fn remove(&mut self, bits: u32) {
        self.0 &= !bits;
    }
}

/// Wrapper registers captured around a low-power transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSnapshot {
    pub sysconfig: u32,
    pub forcestdby: u32,
}

/// Mutable record of one bound controller
#[derive(Debug, Clone)]
pub struct ControllerState {
    pub state: OtgState,
    pub role: Role,
    /// A session or transfer is ongoing
    pub is_active: bool,
    pub default_is_a_device: bool,
    /// Wait-for-B-connect timeout, zero when disabled
    pub a_wait_bcon: Duration,
    pub peripheral_enabled: bool,
    pub otg_enabled: bool,
    /// A gadget driver is bound to the peripheral side
    pub gadget_bound: bool,
    pub clock_enabled: bool,
    pub snapshot: Option<RegisterSnapshot>,
    pub port_status: PortStatus,
}

impl ControllerState {
    pub fn new(config: &GlueConfig) -> Self {
        Self {
            state: OtgState::BIdle,
            role: Role::Peripheral,
            is_active: false,
            default_is_a_device: false,
            a_wait_bcon: Duration::from_millis(config.timing.a_wait_bcon_ms),
            peripheral_enabled: config.board.port_mode.peripheral_enabled(),
            otg_enabled: config.board.port_mode.otg_enabled(),
            gadget_bound: false,
            clock_enabled: true,
            snapshot: None,
            port_status: PortStatus::default(),
        }
    }
}
