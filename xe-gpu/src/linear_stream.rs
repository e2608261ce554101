// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Linear command stream writer over a command-buffer allocation.

use byteorder::{ByteOrder, LittleEndian};

use crate::allocation::AllocationRef;

/// Append-only dword writer. Callers size their writes with the encoder's
/// estimates; running past the end is an invariant violation.
#[derive(Debug)]
pub struct LinearStream {
    allocation: AllocationRef,
    used: usize,
}

impl LinearStream {
    pub fn new(allocation: AllocationRef) -> Self {
        Self {
            allocation,
            used: 0,
        }
    }

    pub fn allocation(&self) -> &AllocationRef {
        &self.allocation
    }

    pub fn gpu_base(&self) -> u64 {
        self.allocation.gpu_address()
    }

    /// GPU address of the next byte to be written.
    pub fn current_gpu_address(&self) -> u64 {
        self.gpu_base() + self.used as u64
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn capacity(&self) -> usize {
        self.allocation.size()
    }

    pub fn available_space(&self) -> usize {
        self.capacity() - self.used
    }

    /// Reserve `size` bytes and return their offset.
    pub fn get_space(&mut self, size: usize) -> usize {
        assert!(
            size <= self.available_space(),
            "command stream overflow: need 0x{:X} bytes, 0x{:X} available",
            size,
            self.available_space()
        );
        let offset = self.used;
        self.used += size;
        offset
    }

    /// Append encoded dwords; returns the GPU address they were written to.
    pub fn write_dwords(&mut self, dwords: &[u32]) -> u64 {
        let mut bytes = vec![0u8; dwords.len() * 4];
        LittleEndian::write_u32_into(dwords, &mut bytes);
        let offset = self.get_space(bytes.len());
        self.allocation.write(offset, &bytes);
        log::trace!(
            "stream: +{} dwords @0x{:X} (header 0x{:08X})",
            dwords.len(),
            self.gpu_base() + offset as u64,
            dwords.first().copied().unwrap_or(0)
        );
        self.gpu_base() + offset as u64
    }

    /// Switch to a fresh buffer, starting at offset 0.
    pub fn replace_buffer(&mut self, allocation: AllocationRef) {
        self.allocation = allocation;
        self.used = 0;
    }

    /// Rewind to empty.
    pub fn reset(&mut self) {
        self.used = 0;
    }

    /// Snapshot of the written dwords.
    pub fn dwords(&self) -> Vec<u32> {
        let bytes = self.allocation.to_vec(self.used);
        let mut out = vec![0u32; self.used / 4];
        LittleEndian::read_u32_into(&bytes[..out.len() * 4], &mut out);
        out
    }
}
