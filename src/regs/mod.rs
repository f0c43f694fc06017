//! Register access shim
//!
//! All hardware access of the glue goes through [`RegisterBus`]. The window is
//! split into two groups:
//!
//! - the controller core group (8-bit registers, DEVCTL and POWER)
//! - the OTG wrapper group (32-bit system-config and standby registers)
//!
//! Accesses are direct and unbuffered: a write is visible to the next read.
//! A failed hardware access is not recoverable and is not modelled as an error.

pub mod mem;
pub mod mmio;

pub use mem::MemRegisters;
pub use mmio::MmioRegisters;

use serde::{Deserialize, Serialize};

/// Register group selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterGroup {
    /// Controller core registers, byte wide
    DeviceControl,
    /// OTG wrapper registers, word wide
    SystemConfig,
}

impl RegisterGroup {
    /// Mask of the bits a register in this group carries
    pub fn width_mask(self) -> u32 {
        match self {
            RegisterGroup::DeviceControl => 0xff,
            RegisterGroup::SystemConfig => 0xffff_ffff,
        }
    }
}

/// Typed register access
pub trait RegisterBus: Send + Sync {
    /// Read a register
    fn read(&self, group: RegisterGroup, offset: u32) -> u32;

    /// Write a register
    fn write(&self, group: RegisterGroup, offset: u32, value: u32);

    /// Read-modify-write helper: `(reg & !clear) | set`
    fn modify(&self, group: RegisterGroup, offset: u32, clear: u32, set: u32) -> u32 {
        let value = (self.read(group, offset) & !clear) | set;
        self.write(group, offset, value);
        value
    }
}

/// Controller core registers (group [`RegisterGroup::DeviceControl`])
pub mod ctrl {
    /// Power management register
    pub const POWER: u32 = 0x01;
    /// Device control register
    pub const DEVCTL: u32 = 0x60;

    pub mod power {
        pub const SUSPENDM: u32 = 0x02;
        /// Resume signalling in progress on the root port
        pub const RESUME: u32 = 0x04;
    }

    pub mod devctl {
        /// Session start/end
        pub const SESSION: u32 = 0x01;
        /// Host request
        pub const HR: u32 = 0x02;
        /// Controller is operating in host mode
        pub const HM: u32 = 0x04;
        /// VBUS level field
        pub const VBUS: u32 = 0x18;
        pub const LSDEV: u32 = 0x20;
        pub const FSDEV: u32 = 0x40;
        /// Port is a B-device; cleared once it becomes an A-device
        pub const BDEVICE: u32 = 0x80;
    }
}

/// OTG wrapper registers (group [`RegisterGroup::SystemConfig`])
pub mod wrapper {
    pub const REVISION: u32 = 0x400;
    pub const SYSCONFIG: u32 = 0x404;
    pub const SYSSTATUS: u32 = 0x408;
    pub const INTERFSEL: u32 = 0x40c;
    pub const SIMENABLE: u32 = 0x410;
    pub const FORCESTDBY: u32 = 0x414;

    pub mod sysconfig {
        const MIDLEMODE: u32 = 12;
        const SIDLEMODE: u32 = 3;

        pub const MIDLEMODE_MASK: u32 = 0b11 << MIDLEMODE;
        pub const FORCESTDBY: u32 = 0 << MIDLEMODE;
        pub const NOSTDBY: u32 = 1 << MIDLEMODE;
        pub const SMARTSTDBY: u32 = 2 << MIDLEMODE;

        pub const SIDLEMODE_MASK: u32 = 0b11 << SIDLEMODE;
        pub const FORCEIDLE: u32 = 0 << SIDLEMODE;
        pub const NOIDLE: u32 = 1 << SIDLEMODE;
        pub const SMARTIDLE: u32 = 2 << SIDLEMODE;

        pub const ENABLEWAKEUP: u32 = 1 << 2;
        pub const SOFTRST: u32 = 1 << 1;
        pub const AUTOIDLE: u32 = 1 << 0;
    }

    pub mod sysstatus {
        pub const RESETDONE: u32 = 1 << 0;
    }

    pub mod interfsel {
        const PHYSEL: u32 = 0;

        pub const EXTCP: u32 = 1 << 2;
        pub const UTMI_8BIT: u32 = 0 << PHYSEL;
        pub const ULPI_12PIN: u32 = 1 << PHYSEL;
        pub const ULPI_8PIN: u32 = 2 << PHYSEL;
    }

    pub mod simenable {
        pub const TM1: u32 = 1 << 0;
    }

    pub mod forcestdby {
        /// Force MSTANDBY towards the interconnect
        pub const ENABLEFORCE: u32 = 1 << 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysconfig_field_layout() {
        use wrapper::sysconfig::*;
        assert_eq!(SMARTSTDBY, 0x2000);
        assert_eq!(NOSTDBY, 0x1000);
        assert_eq!(SMARTIDLE, 0x10);
        assert_eq!(NOIDLE, 0x08);
        assert_eq!(SMARTSTDBY & !MIDLEMODE_MASK, 0);
        assert_eq!(SMARTIDLE & !SIDLEMODE_MASK, 0);
    }

    #[test]
    fn test_modify() {
        let regs = MemRegisters::new();
        regs.poke(RegisterGroup::SystemConfig, wrapper::SYSCONFIG, 0xff);

        let value = regs.modify(RegisterGroup::SystemConfig, wrapper::SYSCONFIG, 0x0f, 0x100);
        assert_eq!(value, 0x1f0);
        assert_eq!(regs.read(RegisterGroup::SystemConfig, wrapper::SYSCONFIG), 0x1f0);
    }
}
