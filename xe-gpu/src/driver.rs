// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Driver handle: the explicitly constructed root of all devices.

use std::sync::Arc;

use xe_common::settings::Settings;
use xe_common::{DriverError, DriverResult};

use crate::backend::SubmissionBackend;
use crate::device::Device;
use crate::hw_info::HardwareInfo;
use crate::memory_manager::MemoryManager;

#[derive(Debug)]
pub struct DriverHandle {
    devices: Vec<Arc<Device>>,
    memory_manager: Arc<MemoryManager>,
    backend: Arc<dyn SubmissionBackend>,
    settings: Settings,
}

impl DriverHandle {
    /// Create one device per entry of `hw_infos` that the affinity mask
    /// exposes. Devices keep their physical index.
    pub fn new(
        hw_infos: Vec<HardwareInfo>,
        memory_manager: Arc<MemoryManager>,
        backend: Arc<dyn SubmissionBackend>,
        settings: Settings,
    ) -> DriverResult<Self> {
        let mut devices = Vec::new();
        for (index, hw_info) in hw_infos.into_iter().enumerate() {
            let index = index as u32;
            let exposed = settings
                .affinity_mask
                .is_none_or(|mask| index < 32 && mask & (1 << index) != 0);
            if !exposed {
                log::debug!("driver: device {} ({}) hidden by affinity mask", index, hw_info.name);
                continue;
            }
            devices.push(Device::new(
                index,
                hw_info,
                memory_manager.clone(),
                backend.clone(),
                &settings,
            )?);
        }
        if devices.is_empty() {
            return Err(DriverError::Uninitialized("no devices exposed"));
        }
        log::info!(
            "driver: {} device(s) on {} backend{}",
            devices.len(),
            backend.name(),
            if settings.program_debugging {
                ", program debugging enabled"
            } else {
                ""
            }
        );
        Ok(Self {
            devices,
            memory_manager,
            backend,
            settings,
        })
    }

    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    pub fn device(&self, index: usize) -> Option<&Arc<Device>> {
        self.devices.get(index)
    }

    pub fn memory_manager(&self) -> &Arc<MemoryManager> {
        &self.memory_manager
    }

    pub fn backend(&self) -> &Arc<dyn SubmissionBackend> {
        &self.backend
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;

    fn driver(mask: Option<u32>) -> DriverResult<DriverHandle> {
        DriverHandle::new(
            vec![HardwareInfo::skl(), HardwareInfo::tgllp()],
            Arc::new(MemoryManager::new()),
            Arc::new(NullBackend::new()),
            Settings {
                affinity_mask: mask,
                ..Settings::default()
            },
        )
    }

    #[test]
    fn test_all_devices_without_mask() {
        let driver = driver(None).unwrap();
        assert_eq!(driver.devices().len(), 2);
        assert_eq!(driver.device(1).unwrap().hw_info().name, HardwareInfo::tgllp().name);
    }

    #[test]
    fn test_affinity_mask_hides_devices() {
        let driver = driver(Some(0b10)).unwrap();
        assert_eq!(driver.devices().len(), 1);
        assert_eq!(driver.device(0).unwrap().index(), 1);
        assert_eq!(driver.device(0).unwrap().hw_info().name, HardwareInfo::tgllp().name);
    }

    #[test]
    fn test_empty_affinity_is_uninitialized() {
        assert!(matches!(driver(Some(0b100)), Err(DriverError::Uninitialized(_))));
    }

    #[test]
    fn test_devices_get_distinct_contexts() {
        let driver = driver(None).unwrap();
        let a = driver.device(0).unwrap().compute_engine(0).unwrap().context().context_id;
        let b = driver.device(1).unwrap().compute_engine(0).unwrap().context().context_id;
        assert_ne!(a, b);
    }
}
