// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::types::KB64;

/// Global driver settings, populated from config INI and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    // Driver
    /// Bit `i` exposes device `i`. `None` exposes every device.
    pub affinity_mask: Option<u32>,
    pub program_debugging: bool,

    // Command list
    pub command_buffer_size: usize,
    pub heap_size: usize,
    pub num_idd_per_block: u32,
    /// Forces binding-table prefetch on or off regardless of the generation.
    pub enable_binding_table_prefetch: Option<bool>,

    // Preemption
    /// Raw preemption mode (1 = disabled, 2 = mid-batch, 3 = thread-group,
    /// 4 = mid-thread) overriding the hardware default.
    pub force_preemption_mode: Option<u32>,

    // Debug
    pub print_debug_messages: bool,
    pub print_execution_buffer: bool,
    pub make_each_enqueue_blocking: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            affinity_mask: None,
            program_debugging: false,
            command_buffer_size: KB64,
            heap_size: KB64,
            num_idd_per_block: 64,
            enable_binding_table_prefetch: None,
            force_preemption_mode: None,
            print_debug_messages: false,
            print_execution_buffer: false,
            make_each_enqueue_blocking: false,
        }
    }
}

impl Settings {
    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` to resolve variable names.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(mask) = lookup("ZE_AFFINITY_MASK") {
            match parse_hex(&mask) {
                Some(value) => self.affinity_mask = Some(value),
                None => log::warn!("settings: ignoring malformed ZE_AFFINITY_MASK={}", mask),
            }
        }
        if let Some(v) = lookup("ZET_ENABLE_PROGRAM_DEBUGGING") {
            self.program_debugging = parse_bool(&v);
        }
        if let Some(v) = lookup("XE_PRINT_DEBUG_MESSAGES") {
            self.print_debug_messages = parse_bool(&v);
        }
        if let Some(v) = lookup("XE_PRINT_EXECUTION_BUFFER") {
            self.print_execution_buffer = parse_bool(&v);
        }
        if let Some(v) = lookup("XE_MAKE_EACH_ENQUEUE_BLOCKING") {
            self.make_each_enqueue_blocking = parse_bool(&v);
        }
        if let Some(v) = lookup("XE_FORCE_PREEMPTION_MODE") {
            self.force_preemption_mode = parse_preemption_override(&v);
        }
    }
}

/// Parse a boolean flag in the usual `1/0/true/false` spellings.
pub fn parse_bool(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Parse a hexadecimal value with or without a `0x` prefix.
pub fn parse_hex(s: &str) -> Option<u32> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).ok()
}

/// `-1` (or anything unparsable) means "no override".
pub fn parse_preemption_override(s: &str) -> Option<u32> {
    match s.trim().parse::<i32>() {
        Ok(v) if (1..=4).contains(&v) => Some(v as u32),
        Ok(-1) => None,
        _ => {
            log::warn!("settings: ignoring preemption override '{}'", s);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.command_buffer_size, 0x1_0000);
        assert_eq!(s.num_idd_per_block, 64);
        assert!(s.affinity_mask.is_none());
        assert!(s.force_preemption_mode.is_none());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("ZE_AFFINITY_MASK", "0x2"),
            ("ZET_ENABLE_PROGRAM_DEBUGGING", "1"),
            ("XE_PRINT_EXECUTION_BUFFER", "true"),
            ("XE_FORCE_PREEMPTION_MODE", "3"),
        ]
        .into_iter()
        .collect();

        let mut s = Settings::default();
        s.apply_overrides_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(s.affinity_mask, Some(2));
        assert!(s.program_debugging);
        assert!(s.print_execution_buffer);
        assert!(!s.print_debug_messages);
        assert_eq!(s.force_preemption_mode, Some(3));
    }

    #[test]
    fn test_malformed_affinity_mask_ignored() {
        let mut s = Settings::default();
        s.apply_overrides_from(|k| (k == "ZE_AFFINITY_MASK").then(|| "zz".to_string()));
        assert!(s.affinity_mask.is_none());
    }

    #[test]
    fn test_parse_helpers() {
        assert!(parse_bool(" TRUE "));
        assert!(!parse_bool("0"));
        assert_eq!(parse_hex("ff"), Some(0xFF));
        assert_eq!(parse_hex("0X10"), Some(0x10));
        assert_eq!(parse_preemption_override("-1"), None);
        assert_eq!(parse_preemption_override("7"), None);
        assert_eq!(parse_preemption_override("4"), Some(4));
    }
}
