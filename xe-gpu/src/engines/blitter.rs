// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Copy engine model (BCS). Understands XY_COPY_BLT and XY_COLOR_BLT.

use super::{Engine, ExecContext, ExecResult, ExecutionError};
use crate::hw::commands::{XyColorBlt, XyCopyBlt};

const fn blt_opcode(header: u32) -> u32 {
    (header >> 22) & 0x7F
}

#[derive(Debug, Default)]
pub struct BlitterEngine {
    copies: u64,
    fills: u64,
}

impl BlitterEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blits executed so far.
    pub fn copies(&self) -> u64 {
        self.copies
    }

    fn copy(&mut self, blt: XyCopyBlt, ctx: &mut ExecContext<'_>) -> ExecResult<()> {
        if blt.dst_x2 < blt.dst_x1 || blt.dst_y2 < blt.dst_y1 {
            return Err(ExecutionError::InvalidState("blit rectangle is inverted"));
        }
        let width = (blt.dst_x2 - blt.dst_x1) as u64;
        let height = (blt.dst_y2 - blt.dst_y1) as u64;
        log::trace!(
            "blitter: 0x{:X} -> 0x{:X}, {}x{}",
            blt.src_address,
            blt.dst_address,
            width,
            height
        );
        let mut row = vec![0u8; width as usize];
        for y in 0..height {
            let src = blt.src_address + (blt.src_y1 as u64 + y) * blt.src_pitch as u64 + blt.src_x1 as u64;
            let dst = blt.dst_address + (blt.dst_y1 as u64 + y) * blt.dst_pitch as u64 + blt.dst_x1 as u64;
            ctx.memory.read(src, &mut row)?;
            ctx.memory.write(dst, &row)?;
        }
        self.copies += 1;
        Ok(())
    }

    /// Number of color fills executed so far.
    pub fn fills(&self) -> u64 {
        self.fills
    }

    fn fill(&mut self, blt: XyColorBlt, ctx: &mut ExecContext<'_>) -> ExecResult<()> {
        if blt.dst_x2 < blt.dst_x1 || blt.dst_y2 < blt.dst_y1 {
            return Err(ExecutionError::InvalidState("blit rectangle is inverted"));
        }
        let bpp = blt.color_depth.bytes();
        let pixels = (blt.dst_x2 - blt.dst_x1) as usize;
        let height = (blt.dst_y2 - blt.dst_y1) as u64;
        log::trace!(
            "blitter: fill 0x{:X} with 0x{:X}, {}x{} at {} bpp",
            blt.dst_address,
            blt.color,
            pixels,
            height,
            bpp * 8
        );
        let color = blt.color.to_le_bytes();
        let row: Vec<u8> = color[..bpp].iter().copied().cycle().take(pixels * bpp).collect();
        for y in 0..height {
            let dst = blt.dst_address + (blt.dst_y1 as u64 + y) * blt.dst_pitch as u64 + (blt.dst_x1 as usize * bpp) as u64;
            ctx.memory.write(dst, &row)?;
        }
        self.fills += 1;
        Ok(())
    }
}

impl Engine for BlitterEngine {
    fn name(&self) -> &'static str {
        "blitter"
    }

    fn execute(&mut self, command: &[u32], ctx: &mut ExecContext<'_>) -> ExecResult<()> {
        let header = command[0];
        if header >> 29 == 2 && blt_opcode(header) == blt_opcode(XyCopyBlt::HEADER) {
            return self.copy(XyCopyBlt::decode(command), ctx);
        }
        if header >> 29 == 2 && blt_opcode(header) == blt_opcode(XyColorBlt::HEADER) {
            return self.fill(XyColorBlt::decode(command), ctx);
        }
        Err(ExecutionError::WrongEngine {
            engine: self.name(),
            header,
        })
    }
}
