// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use xe_gpu::allocation::AllocationRef;
use xe_gpu::hw::commands::{command_length, command_name, MiBatchBufferStart, MI_BATCH_BUFFER_END};
use xe_gpu::CommandList;

/// One line per command in `buffer`, up to its terminating
/// MI_BATCH_BUFFER_END or the jump into the next chained buffer.
pub fn decode_buffer(buffer: &AllocationRef) -> Vec<String> {
    let mut lines = Vec::new();
    let mut offset = 0;
    while offset + 4 <= buffer.size() {
        let header = buffer.read_u32(offset);
        let length = command_length(header);
        if offset + length * 4 > buffer.size() {
            lines.push(format!("0x{:04X}: truncated 0x{:08X}", offset, header));
            break;
        }
        let dwords: Vec<u32> = (0..length).map(|i| buffer.read_u32(offset + i * 4)).collect();
        lines.push(format!("0x{:04X}: {:<32} {:08X?}", offset, command_name(header), dwords));
        offset += length * 4;

        let chained = header >> 23 == MiBatchBufferStart::HEADER >> 23 && !MiBatchBufferStart::decode(&dwords).second_level;
        if header == MI_BATCH_BUFFER_END || chained {
            break;
        }
    }
    lines
}

pub fn dump_command_list(label: &str, list: &CommandList) {
    println!("{}: {} buffer(s)", label, list.command_buffers().len());
    for (i, buffer) in list.command_buffers().iter().enumerate() {
        println!("  buffer {} @ 0x{:X}", i, buffer.gpu_address());
        for line in decode_buffer(buffer) {
            println!("    {}", line);
        }
    }
}
