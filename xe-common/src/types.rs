// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

/// GPU virtual address.
pub type GpuVa = u64;

/// Page size (4 KiB).
pub const PAGE_SIZE: usize = 0x1000;

/// Page size as u64 for address math.
pub const PAGE_SIZE_U64: u64 = PAGE_SIZE as u64;

/// Page mask for alignment checks.
pub const PAGE_MASK: u64 = PAGE_SIZE_U64 - 1;

/// 64 KiB, the granularity of command buffers and heaps.
pub const KB64: usize = 0x1_0000;

/// Width of one general register file entry in bytes.
pub const GRF_SIZE: u32 = 32;

/// Alignment of heap sub-allocations read by the dispatch hardware.
pub const CACHELINE_SIZE: usize = 64;

/// Highest GPU virtual address reachable with 48-bit addressing.
pub const MAX_48BIT_ADDRESS: u64 = (1 << 48) - 1;

/// Timeout value meaning "wait forever".
pub const INFINITE_TIMEOUT_NS: u64 = u64::MAX;

/// Convert an API timeout in nanoseconds; `None` means no deadline.
#[inline]
pub fn timeout_from_ns(timeout_ns: u64) -> Option<std::time::Duration> {
    (timeout_ns != INFINITE_TIMEOUT_NS).then(|| std::time::Duration::from_nanos(timeout_ns))
}

/// Align a value up to the given alignment.
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

/// Align a value down to the given alignment.
#[inline]
pub const fn align_down(value: u64, alignment: u64) -> u64 {
    value & !(alignment - 1)
}

/// `usize` flavour of [`align_up`].
#[inline]
pub const fn align_up_usize(value: usize, alignment: usize) -> usize {
    let mask = alignment - 1;
    (value + mask) & !mask
}

/// Check if a value is page-aligned.
#[inline]
pub const fn is_page_aligned(value: u64) -> bool {
    value & PAGE_MASK == 0
}

/// Smallest power of two that is `>= value` (and at least 1).
#[inline]
pub const fn next_power_of_two(value: u32) -> u32 {
    if value <= 1 {
        1
    } else {
        1 << (32 - (value - 1).leading_zeros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, PAGE_SIZE_U64), 0);
        assert_eq!(align_up(1, PAGE_SIZE_U64), PAGE_SIZE_U64);
        assert_eq!(align_up(PAGE_SIZE_U64, PAGE_SIZE_U64), PAGE_SIZE_U64);
        assert_eq!(align_up_usize(65, CACHELINE_SIZE), 128);
    }

    #[test]
    fn test_align_down() {
        assert_eq!(align_down(0, PAGE_SIZE_U64), 0);
        assert_eq!(align_down(PAGE_SIZE_U64 + 1, PAGE_SIZE_U64), PAGE_SIZE_U64);
    }

    #[test]
    fn test_is_page_aligned() {
        assert!(is_page_aligned(0));
        assert!(is_page_aligned(PAGE_SIZE_U64 * 100));
        assert!(!is_page_aligned(PAGE_SIZE_U64 + 1));
    }

    #[test]
    fn test_next_power_of_two() {
        assert_eq!(next_power_of_two(0), 1);
        assert_eq!(next_power_of_two(1), 1);
        assert_eq!(next_power_of_two(3), 4);
        assert_eq!(next_power_of_two(1024), 1024);
        assert_eq!(next_power_of_two(1025), 2048);
    }

    #[test]
    fn test_timeout_from_ns() {
        assert_eq!(timeout_from_ns(INFINITE_TIMEOUT_NS), None);
        assert_eq!(timeout_from_ns(0), Some(std::time::Duration::ZERO));
        assert_eq!(timeout_from_ns(1_000), Some(std::time::Duration::from_micros(1)));
    }
}
