//! Memory-mapped register window
//!
//! Maps the controller window through `/dev/mem`. The core group is accessed
//! with byte-wide volatile operations, the wrapper group with 32-bit ones.

use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::os::fd::{FromRawFd, OwnedFd};
use std::path::Path;
use std::ptr::NonNull;
use tracing::debug;

use super::{wrapper, RegisterBus, RegisterGroup};
use crate::error::{OtgError, Result};

/// Default window length, covers the core and the wrapper registers
pub const DEFAULT_WINDOW_LEN: usize = 0x1000;

/// Register window mapped from a physical address
pub struct MmioRegisters {
    base: NonNull<c_void>,
    len: usize,
}

// The mapping is owned by this struct and accessed only with volatile
// operations of the register's natural width.
unsafe impl Send for MmioRegisters {}
unsafe impl Sync for MmioRegisters {}

impl MmioRegisters {
    /// Map `len` bytes at physical address `phys_base` through `/dev/mem`
    pub fn map(phys_base: u64, len: usize) -> Result<Self> {
        Self::map_file(Path::new("/dev/mem"), phys_base, len)
    }

    /// Map a window from any memory device file
    pub fn map_file(path: &Path, phys_base: u64, len: usize) -> Result<Self> {
        if len <= wrapper::FORCESTDBY as usize + 4 {
            return Err(OtgError::Mmio(format!(
                "window of {:#x} bytes does not cover the wrapper registers",
                len
            )));
        }
        let length = NonZeroUsize::new(len)
            .ok_or_else(|| OtgError::Mmio("window length must be non-zero".to_string()))?;
        let offset = nix::libc::off_t::try_from(phys_base)
            .map_err(|_| OtgError::Mmio(format!("base address {:#x} out of range", phys_base)))?;

        let raw = nix::fcntl::open(path, OFlag::O_RDWR | OFlag::O_SYNC, Mode::empty())
            .map_err(|e| OtgError::Mmio(format!("Failed to open {}: {}", path.display(), e)))?;
        // SAFETY: `raw` was just returned by open() and is not owned elsewhere.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: a fresh shared mapping; nothing else aliases it.
        let base = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &fd,
                offset,
            )
        }
        .map_err(|e| OtgError::Mmio(format!("mmap at {:#x} failed: {}", phys_base, e)))?;

        debug!("Mapped register window {:#x}+{:#x}", phys_base, len);
        Ok(Self { base, len })
    }

    fn addr(&self, group: RegisterGroup, offset: u32) -> *mut u8 {
        let width = match group {
            RegisterGroup::DeviceControl => 1,
            RegisterGroup::SystemConfig => 4,
        };
        let offset = offset as usize;
        assert!(
            offset + width <= self.len,
            "register offset {:#x} outside window",
            offset
        );
        // SAFETY: bounds checked above.
        unsafe { self.base.as_ptr().cast::<u8>().add(offset) }
    }
}

impl RegisterBus for MmioRegisters {
    fn read(&self, group: RegisterGroup, offset: u32) -> u32 {
        let ptr = self.addr(group, offset);
        // SAFETY: ptr lies inside the mapping and is aligned for the access width.
        unsafe {
            match group {
                RegisterGroup::DeviceControl => std::ptr::read_volatile(ptr) as u32,
                RegisterGroup::SystemConfig => std::ptr::read_volatile(ptr.cast::<u32>()),
            }
        }
    }

    fn write(&self, group: RegisterGroup, offset: u32, value: u32) {
        let ptr = self.addr(group, offset);
        // SAFETY: as in read().
        unsafe {
            match group {
                RegisterGroup::DeviceControl => std::ptr::write_volatile(ptr, value as u8),
                RegisterGroup::SystemConfig => std::ptr::write_volatile(ptr.cast::<u32>(), value),
            }
        }
    }
}

impl Drop for MmioRegisters {
    fn drop(&mut self) {
        // SAFETY: base/len describe the mapping created in map_file().
        if let Err(e) = unsafe { munmap(self.base, self.len) } {
            debug!("munmap failed: {}", e);
        }
    }
}
