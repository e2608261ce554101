// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Gen9 (Skylake class).

use super::commands::{registers, MiLoadRegisterImm};
use super::{GfxCoreFamily, HwFamily};

const L3_CONFIG_WITH_SLM: u32 = 0x6000_0121;
const L3_CONFIG_NO_SLM: u32 = 0x8000_0140;

/// Cookies written to GPR0 around each walker so a resumed context can tell
/// whether it was preempted inside the dispatch.
const WALKER_COOKIE_BEFORE: u32 = 0xFFFF_FFFF;
const WALKER_COOKIE_AFTER: u32 = 0;

#[derive(Debug, Clone, Copy, Default)]
pub struct Gen9Family;

impl HwFamily for Gen9Family {
    fn core_family(&self) -> GfxCoreFamily {
        GfxCoreFamily::Gen9
    }

    fn state_base_address_dwords(&self) -> usize {
        19
    }

    fn l3_config_register(&self) -> u32 {
        registers::L3CNTL_GEN9
    }

    fn l3_config(&self, slm_enabled: bool) -> u32 {
        if slm_enabled {
            L3_CONFIG_WITH_SLM
        } else {
            L3_CONFIG_NO_SLM
        }
    }

    fn binding_table_prefetch(&self) -> bool {
        true
    }

    fn preemption_wa_begin(&self) -> Vec<u32> {
        MiLoadRegisterImm {
            register: registers::CS_GPR_R0,
            data: WALKER_COOKIE_BEFORE,
            mmio_remap: false,
        }
        .encode()
        .to_vec()
    }

    fn preemption_wa_end(&self) -> Vec<u32> {
        MiLoadRegisterImm {
            register: registers::CS_GPR_R0,
            data: WALKER_COOKIE_AFTER,
            mmio_remap: false,
        }
        .encode()
        .to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::commands::StateBaseAddress;

    #[test]
    fn test_gen9_layouts() {
        let f = Gen9Family;
        assert_eq!(f.encode_state_base_address(&StateBaseAddress::default()).len(), 19);
        assert_eq!(f.encode_l3_config(true).data, 0x6000_0121);
        assert_eq!(f.encode_l3_config(false).register, 0x7034);
        assert!(f.binding_table_prefetch());
        assert_eq!(f.preemption_wa_size(), 24);
    }
}
