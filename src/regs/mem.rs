//! In-memory register file
//!
//! Backs the register shim with plain memory. Used by the simulator and by
//! tests, which rely on the per-group write counters.

use parking_lot::Mutex;
use std::collections::HashMap;

use super::{RegisterBus, RegisterGroup};

#[derive(Default)]
struct MemInner {
    values: HashMap<(RegisterGroup, u32), u32>,
    writes: HashMap<RegisterGroup, usize>,
}

/// Register file held in memory
#[derive(Default)]
pub struct MemRegisters {
    inner: Mutex<MemInner>,
}

impl MemRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a register value as the hardware would, without counting a write
    pub fn poke(&self, group: RegisterGroup, offset: u32, value: u32) {
        self.inner
            .lock()
            .values
            .insert((group, offset), value & group.width_mask());
    }

    /// Set or clear status bits as the hardware would
    pub fn poke_bits(&self, group: RegisterGroup, offset: u32, bits: u32, on: bool) {
        let mut inner = self.inner.lock();
        let value = inner.values.entry((group, offset)).or_insert(0);
        if on {
            *value |= bits;
        } else {
            *value &= !bits;
        }
    }

    /// Number of writes issued to a group
    pub fn write_count(&self, group: RegisterGroup) -> usize {
        self.inner.lock().writes.get(&group).copied().unwrap_or(0)
    }

    /// Total number of writes across both groups
    pub fn total_writes(&self) -> usize {
        self.inner.lock().writes.values().sum()
    }
}

impl RegisterBus for MemRegisters {
    fn read(&self, group: RegisterGroup, offset: u32) -> u32 {
        self.inner
            .lock()
            .values
            .get(&(group, offset))
            .copied()
            .unwrap_or(0)
    }

    fn write(&self, group: RegisterGroup, offset: u32, value: u32) {
        let mut inner = self.inner.lock();
        inner
            .values
            .insert((group, offset), value & group.width_mask());
        *inner.writes.entry(group).or_insert(0) += 1;
    }
}
