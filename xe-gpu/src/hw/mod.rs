// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Hardware-generation capabilities.
//!
//! Command layouts are shared (see [`commands`]); what differs between
//! generations is captured by [`HwFamily`], selected once per device.

pub mod commands;
pub mod gen12lp;
pub mod gen9;

use std::fmt;

use commands::{registers, MiLoadRegisterImm, StateBaseAddress};

use crate::preemption::PreemptionMode;

/// Render core generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GfxCoreFamily {
    Gen9,
    Gen12Lp,
}

/// Generation-specific encoding decisions.
pub trait HwFamily: Send + Sync + fmt::Debug {
    fn core_family(&self) -> GfxCoreFamily;

    /// Length of STATE_BASE_ADDRESS in dwords.
    fn state_base_address_dwords(&self) -> usize;

    fn encode_state_base_address(&self, sba: &StateBaseAddress) -> Vec<u32> {
        sba.encode(self.state_base_address_dwords())
    }

    fn l3_config_register(&self) -> u32;

    /// L3 partitioning value with or without a shared-local-memory slice.
    fn l3_config(&self, slm_enabled: bool) -> u32;

    fn encode_l3_config(&self, slm_enabled: bool) -> MiLoadRegisterImm {
        MiLoadRegisterImm {
            register: self.l3_config_register(),
            data: self.l3_config(slm_enabled),
            mmio_remap: false,
        }
    }

    /// Whether the hardware prefetches binding table entries.
    fn binding_table_prefetch(&self) -> bool;

    /// Register write selecting `mode`.
    fn preemption_register_write(&self, mode: PreemptionMode) -> MiLoadRegisterImm {
        const MASK: u32 = (1 << 1) | (1 << 2);
        let value = match mode {
            PreemptionMode::MidThread => 0,
            PreemptionMode::ThreadGroup => 1 << 1,
            _ => 1 << 2,
        };
        MiLoadRegisterImm {
            register: registers::CS_CHICKEN1,
            data: (MASK << 16) | value,
            mmio_remap: false,
        }
    }

    /// Commands surrounding each walker to work around preemption issues.
    fn preemption_wa_begin(&self) -> Vec<u32> {
        Vec::new()
    }

    fn preemption_wa_end(&self) -> Vec<u32> {
        Vec::new()
    }

    /// Bytes of `preemption_wa_begin` plus `preemption_wa_end`.
    fn preemption_wa_size(&self) -> usize {
        (self.preemption_wa_begin().len() + self.preemption_wa_end().len()) * 4
    }

    /// Shared-local-memory bucket: 0 is "0K", then powers of two from 1K
    /// to 64K map to 1..=7.
    fn slm_encoding(&self, slm_size: u32) -> u32 {
        match slm_size {
            0 => 0,
            1..=1024 => 1,
            1025..=2048 => 2,
            2049..=4096 => 3,
            4097..=8192 => 4,
            8193..=16384 => 5,
            16385..=32768 => 6,
            _ => 7,
        }
    }
}

/// Strategy for `core`.
pub fn family_for(core: GfxCoreFamily) -> Box<dyn HwFamily> {
    match core {
        GfxCoreFamily::Gen9 => Box::new(gen9::Gen9Family),
        GfxCoreFamily::Gen12Lp => Box::new(gen12lp::Gen12LpFamily),
    }
}

/// Maximum binding table entries the hardware prefetches.
pub const MAX_BINDING_TABLE_PREFETCH: u32 = 31;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slm_buckets() {
        let family = family_for(GfxCoreFamily::Gen9);
        assert_eq!(family.slm_encoding(0), 0);
        assert_eq!(family.slm_encoding(1), 1);
        assert_eq!(family.slm_encoding(1024), 1);
        assert_eq!(family.slm_encoding(1025), 2);
        assert_eq!(family.slm_encoding(4096), 3);
        assert_eq!(family.slm_encoding(5000), 4);
        assert_eq!(family.slm_encoding(64 * 1024), 7);
    }

    #[test]
    fn test_family_selection() {
        assert_eq!(family_for(GfxCoreFamily::Gen9).core_family(), GfxCoreFamily::Gen9);
        assert_eq!(
            family_for(GfxCoreFamily::Gen12Lp).core_family(),
            GfxCoreFamily::Gen12Lp
        );
    }
}
