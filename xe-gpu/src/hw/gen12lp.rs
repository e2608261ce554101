// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Gen12LP (Tiger Lake class).

use super::commands::{registers, MiLoadRegisterImm};
use super::{GfxCoreFamily, HwFamily};
use crate::preemption::PreemptionMode;

const L3_CONFIG_WITH_SLM: u32 = 0xD000_0020;
const L3_CONFIG_NO_SLM: u32 = 0xD000_0020;

#[derive(Debug, Clone, Copy, Default)]
pub struct Gen12LpFamily;

impl HwFamily for Gen12LpFamily {
    fn core_family(&self) -> GfxCoreFamily {
        GfxCoreFamily::Gen12Lp
    }

    /// Adds the bindless sampler state base.
    fn state_base_address_dwords(&self) -> usize {
        22
    }

    fn l3_config_register(&self) -> u32 {
        registers::L3CNTL_GEN12
    }

    fn l3_config(&self, slm_enabled: bool) -> u32 {
        if slm_enabled {
            L3_CONFIG_WITH_SLM
        } else {
            L3_CONFIG_NO_SLM
        }
    }

    fn binding_table_prefetch(&self) -> bool {
        false
    }

    fn preemption_register_write(&self, mode: PreemptionMode) -> MiLoadRegisterImm {
        const MASK: u32 = (1 << 1) | (1 << 2);
        let value = match mode {
            PreemptionMode::MidThread => 0,
            PreemptionMode::ThreadGroup => 1 << 1,
            _ => 1 << 2,
        };
        // Engine-relative register, remapped for compute engines.
        MiLoadRegisterImm {
            register: registers::CS_CHICKEN1,
            data: (MASK << 16) | value,
            mmio_remap: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::commands::StateBaseAddress;

    #[test]
    fn test_gen12lp_layouts() {
        let f = Gen12LpFamily;
        assert_eq!(f.encode_state_base_address(&StateBaseAddress::default())[0], 0x6101_0014);
        assert_eq!(f.encode_l3_config(false).register, 0xB134);
        assert!(!f.binding_table_prefetch());
        assert_eq!(f.preemption_wa_size(), 0);
    }

    #[test]
    fn test_preemption_write_uses_mmio_remap() {
        let lri = Gen12LpFamily.preemption_register_write(PreemptionMode::MidBatch);
        assert!(lri.mmio_remap);
        assert_eq!(lri.data, (0x6 << 16) | 0x4);
    }
}
