// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Residency tracking.
//!
//! A [`ResidencyContainer`] lists every allocation a command stream touches.
//! Entries may repeat while recording; [`ResidencyContainer::deduplicated`]
//! collapses them (first-seen order) at submission time.

use std::collections::HashSet;

use crate::allocation::{AllocationId, AllocationRef, GraphicsAllocation};

/// Ordered multiset of allocation references. Never owns the allocations'
/// lifetimes beyond holding a shared reference.
#[derive(Debug, Clone, Default)]
pub struct ResidencyContainer {
    entries: Vec<AllocationRef>,
}

impl ResidencyContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, allocation: &AllocationRef) {
        self.entries.push(allocation.clone());
    }

    pub fn extend<'a>(&mut self, allocations: impl IntoIterator<Item = &'a AllocationRef>) {
        self.entries.extend(allocations.into_iter().cloned());
    }

    /// Append every entry of `other`.
    pub fn merge(&mut self, other: &ResidencyContainer) {
        self.extend(other.iter());
    }

    pub fn contains(&self, allocation: &GraphicsAllocation) -> bool {
        self.contains_id(allocation.id())
    }

    pub fn contains_id(&self, id: AllocationId) -> bool {
        self.entries.iter().any(|a| a.id() == id)
    }

    /// Number of entries, duplicates included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AllocationRef> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Unique entries in first-seen order.
    pub fn deduplicated(&self) -> Vec<AllocationRef> {
        let mut seen = HashSet::with_capacity(self.entries.len());
        self.entries
            .iter()
            .filter(|a| seen.insert(a.id()))
            .cloned()
            .collect()
    }

    /// Collapse duplicates in place, keeping first-seen order.
    pub fn deduplicate(&mut self) {
        self.entries = self.deduplicated();
    }

    /// Ids of the unique entries in first-seen order.
    pub fn unique_ids(&self) -> Vec<AllocationId> {
        self.deduplicated().iter().map(|a| a.id()).collect()
    }
}
