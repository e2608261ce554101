// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Static description of a GPU product.

use crate::hw::GfxCoreFamily;
use crate::preemption::PreemptionMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareInfo {
    pub name: &'static str,
    pub core_family: GfxCoreFamily,
    pub eu_count: u32,
    pub threads_per_eu: u32,
    /// Compute engines exposed as queue ordinals.
    pub compute_engine_count: u32,
    /// Compute ordinals map to CCS instances instead of the render engine.
    pub uses_ccs: bool,
    pub has_blitter: bool,
    pub default_preemption_mode: PreemptionMode,
    pub max_work_group_size: u32,
    pub max_slm_size: u32,
}

impl HardwareInfo {
    /// Skylake GT2.
    pub fn skl() -> Self {
        Self {
            name: "Skylake GT2",
            core_family: GfxCoreFamily::Gen9,
            eu_count: 24,
            threads_per_eu: 7,
            compute_engine_count: 1,
            uses_ccs: false,
            has_blitter: true,
            default_preemption_mode: PreemptionMode::MidThread,
            max_work_group_size: 256,
            max_slm_size: 64 * 1024,
        }
    }

    /// Tiger Lake LP GT2.
    pub fn tgllp() -> Self {
        Self {
            name: "Tiger Lake LP GT2",
            core_family: GfxCoreFamily::Gen12Lp,
            eu_count: 96,
            threads_per_eu: 7,
            compute_engine_count: 1,
            uses_ccs: true,
            has_blitter: true,
            default_preemption_mode: PreemptionMode::MidThread,
            max_work_group_size: 1024,
            max_slm_size: 64 * 1024,
        }
    }

    pub fn from_product_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "skl" | "skylake" | "gen9" => Some(Self::skl()),
            "tgllp" | "tgl" | "tigerlake" | "gen12lp" => Some(Self::tgllp()),
            _ => None,
        }
    }

    /// Hardware threads across the whole device.
    pub fn compute_units(&self) -> u32 {
        self.eu_count * self.threads_per_eu
    }
}
