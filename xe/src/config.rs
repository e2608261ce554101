// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::{Context, Result};
use ini::Ini;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use xe_common::settings::{parse_bool, parse_hex, parse_preemption_override, Settings};

/// Locate xe.ini: an explicit path, then `$XDG_CONFIG_HOME/xe`, then
/// `~/.config/xe`.
pub fn find_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(&xdg).join("xe").join("xe.ini");
        if path.exists() {
            return Some(path);
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let path = PathBuf::from(&home).join(".config").join("xe").join("xe.ini");
        if path.exists() {
            return Some(path);
        }
    }

    None
}

/// Load settings from `path`, or defaults when no config exists.
/// Environment overrides are applied last.
pub fn load_config(path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();

    match find_config_path(path) {
        Some(config_path) => {
            info!("Loading config from: {}", config_path.display());
            let conf = Ini::load_from_file(&config_path)
                .with_context(|| format!("Failed to parse config {}", config_path.display()))?;
            apply_ini(&conf, &mut settings);
        }
        None => info!("No xe.ini found, using defaults"),
    }

    settings.apply_env_overrides();
    Ok(settings)
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    let parsed = value.trim().parse().ok();
    if parsed.is_none() {
        warn!("Ignoring malformed {}={}", key, value);
    }
    parsed
}

pub fn apply_ini(conf: &Ini, settings: &mut Settings) {
    // [Driver]
    if let Some(section) = conf.section(Some("Driver")) {
        if let Some(mask) = section.get("affinity_mask") {
            match parse_hex(mask) {
                Some(mask) => settings.affinity_mask = Some(mask),
                None => warn!("Ignoring malformed affinity_mask={}", mask),
            }
        }
        if let Some(v) = section.get("program_debugging") {
            settings.program_debugging = parse_bool(v);
        }
    }

    // [CommandList]
    if let Some(section) = conf.section(Some("CommandList")) {
        if let Some(v) = section.get("command_buffer_size").and_then(|v| parse_or_warn("command_buffer_size", v)) {
            settings.command_buffer_size = v;
        }
        if let Some(v) = section.get("heap_size").and_then(|v| parse_or_warn("heap_size", v)) {
            settings.heap_size = v;
        }
        if let Some(v) = section.get("num_idd_per_block").and_then(|v| parse_or_warn("num_idd_per_block", v)) {
            settings.num_idd_per_block = v;
        }
        if let Some(v) = section.get("enable_binding_table_prefetch") {
            settings.enable_binding_table_prefetch = Some(parse_bool(v));
        }
    }

    // [Preemption]
    if let Some(section) = conf.section(Some("Preemption")) {
        if let Some(v) = section.get("force_preemption_mode") {
            settings.force_preemption_mode = parse_preemption_override(v);
            debug!("Preemption override: {:?}", settings.force_preemption_mode);
        }
    }

    // [Debugging]
    if let Some(section) = conf.section(Some("Debugging")) {
        if let Some(v) = section.get("print_debug_messages") {
            settings.print_debug_messages = parse_bool(v);
        }
        if let Some(v) = section.get("print_execution_buffer") {
            settings.print_execution_buffer = parse_bool(v);
        }
        if let Some(v) = section.get("make_each_enqueue_blocking") {
            settings.make_each_enqueue_blocking = parse_bool(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_from(text: &str) -> Settings {
        let conf = Ini::load_from_str(text).unwrap();
        let mut settings = Settings::default();
        apply_ini(&conf, &mut settings);
        settings
    }

    #[test]
    fn test_sections_map_to_settings() {
        let s = settings_from(
            "[Driver]\naffinity_mask = 0x3\nprogram_debugging = true\n\
             [CommandList]\ncommand_buffer_size = 131072\nnum_idd_per_block = 32\nenable_binding_table_prefetch = 0\n\
             [Preemption]\nforce_preemption_mode = 3\n\
             [Debugging]\nprint_debug_messages = 1\nmake_each_enqueue_blocking = yes\n",
        );
        assert_eq!(s.affinity_mask, Some(3));
        assert!(s.program_debugging);
        assert_eq!(s.command_buffer_size, 131072);
        assert_eq!(s.num_idd_per_block, 32);
        assert_eq!(s.enable_binding_table_prefetch, Some(false));
        assert_eq!(s.force_preemption_mode, Some(3));
        assert!(s.print_debug_messages);
        assert!(!s.print_execution_buffer);
        assert!(s.make_each_enqueue_blocking);
    }

    #[test]
    fn test_malformed_values_keep_defaults() {
        let s = settings_from("[Driver]\naffinity_mask = zz\n[CommandList]\nheap_size = big\n");
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = Path::new("/tmp/custom.ini");
        assert_eq!(find_config_path(Some(path)), Some(path.to_path_buf()));
    }
}
