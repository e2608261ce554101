// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Preemption modes and their programming.
//!
//! Modes are ordered from most to least restrictive for the purpose of
//! merging: a command list runs at the minimum mode any of its kernels
//! tolerates, because the mode is programmed once per list.

use crate::hw::commands::MiLoadRegisterImm;
use crate::hw::HwFamily;
use crate::kernel::KernelFlags;
use crate::linear_stream::LinearStream;

/// Granularity at which the hardware may interrupt in-flight work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum PreemptionMode {
    /// Nothing programmed yet.
    Initial = 0,
    Disabled = 1,
    MidBatch = 2,
    ThreadGroup = 3,
    MidThread = 4,
}

impl PreemptionMode {
    pub fn from_raw(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Initial),
            1 => Some(Self::Disabled),
            2 => Some(Self::MidBatch),
            3 => Some(Self::ThreadGroup),
            4 => Some(Self::MidThread),
            _ => None,
        }
    }

    /// The interface descriptor's thread-preemption-disable bit: clear only
    /// when threads themselves may be preempted.
    pub fn thread_preemption_disabled(self) -> bool {
        self != Self::MidThread
    }
}

/// Most permissive mode a kernel with `flags` tolerates on a device whose
/// default is `device_mode`.
pub fn kernel_preemption_mode(device_mode: PreemptionMode, flags: KernelFlags) -> PreemptionMode {
    let required = if flags.contains(KernelFlags::USES_VME) {
        PreemptionMode::Disabled
    } else if flags.contains(KernelFlags::DISABLE_MID_THREAD_PREEMPTION) {
        PreemptionMode::ThreadGroup
    } else {
        PreemptionMode::MidThread
    };
    device_mode.min(required)
}

/// Bytes needed to switch from `old` to `new`.
pub fn preemption_mode_cmd_size(new: PreemptionMode, old: PreemptionMode) -> usize {
    if new == old || new == PreemptionMode::Initial {
        0
    } else {
        MiLoadRegisterImm::DWORDS * 4
    }
}

/// Emit the register write selecting `new`, when it differs from `old`.
pub fn program_preemption_mode(
    stream: &mut LinearStream,
    family: &dyn HwFamily,
    new: PreemptionMode,
    old: PreemptionMode,
) {
    if preemption_mode_cmd_size(new, old) == 0 {
        return;
    }
    log::debug!("preemption: {:?} -> {:?}", old, new);
    stream.write_dwords(&family.preemption_register_write(new).encode());
}
