// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Engine models used by the simulated backend.
//!
//! The command processor executes MI commands itself and forwards every
//! other command to the engine bound to the context: the compute engine for
//! RCS/CCS contexts, the blitter for BCS contexts.

pub mod blitter;
pub mod compute;

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::hw::commands::registers;

/// Failures while executing a batch. All of them end the submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("page fault: 0x{va:X}+0x{len:X} is not resident")]
    PageFault { va: u64, len: usize },

    #[error("{engine} engine cannot execute command 0x{header:08X}")]
    WrongEngine { engine: &'static str, header: u32 },

    #[error("semaphore at 0x{address:X} still 0x{value:X} after timeout")]
    SemaphoreTimeout { address: u64, value: u32 },

    #[error("batch buffer calls nested deeper than {0}")]
    NestingTooDeep(usize),

    #[error("batch did not terminate after {0} commands")]
    Runaway(usize),

    #[error("invalid engine state: {0}")]
    InvalidState(&'static str),

    #[error("kernel at 0x{kernel_start:X} failed: {message}")]
    KernelFailed { kernel_start: u64, message: String },
}

pub type ExecResult<T> = Result<T, ExecutionError>;

/// GPU virtual memory as visible to an executing batch.
pub trait GpuMemory {
    fn read(&self, va: u64, dst: &mut [u8]) -> ExecResult<()>;

    fn write(&self, va: u64, src: &[u8]) -> ExecResult<()>;

    fn read_u32(&self, va: u64) -> ExecResult<u32> {
        let mut buf = [0u8; 4];
        self.read(va, &mut buf)?;
        Ok(LittleEndian::read_u32(&buf))
    }

    fn write_u32(&self, va: u64, value: u32) -> ExecResult<()> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.write(va, &buf)
    }

    fn write_u64(&self, va: u64, value: u64) -> ExecResult<()> {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, value);
        self.write(va, &buf)
    }

    fn read_dwords(&self, va: u64, count: usize) -> ExecResult<Vec<u32>> {
        let mut bytes = vec![0u8; count * 4];
        self.read(va, &mut bytes)?;
        let mut out = vec![0u32; count];
        LittleEndian::read_u32_into(&bytes, &mut out);
        Ok(out)
    }
}

/// MMIO register state of one engine context.
///
/// The timestamp registers read a counter that advances once per executed
/// command, so timestamps taken around a command are strictly ordered.
#[derive(Debug, Default)]
pub struct RegisterFile {
    values: HashMap<u32, u32>,
    timestamp: u64,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, register: u32) -> u32 {
        match register {
            registers::REG_GLOBAL_TIMESTAMP_LDW | registers::GP_THREAD_TIME_REG_ADDRESS_OFFSET_LOW => {
                self.timestamp as u32
            }
            _ => self.values.get(&register).copied().unwrap_or(0),
        }
    }

    pub fn write(&mut self, register: u32, value: u32) {
        log::trace!("reg[0x{:X}] = 0x{:X}", register, value);
        self.values.insert(register, value);
    }

    /// 64-bit value of a register pair (`register`, `register + 4`).
    pub fn read_u64(&self, register: u32) -> u64 {
        ((self.read(register + 4) as u64) << 32) | self.read(register) as u64
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn tick(&mut self) {
        self.timestamp += 1;
    }

    /// Whether MI_PREDICATE left the predicate set.
    pub fn predicate(&self) -> bool {
        self.read(registers::MI_PREDICATE_RESULT) != 0
    }

    pub fn set_predicate(&mut self, value: bool) {
        self.write(registers::MI_PREDICATE_RESULT, value as u32);
    }
}

/// What a command sees while executing.
pub struct ExecContext<'a> {
    pub memory: &'a dyn GpuMemory,
    pub registers: &'a mut RegisterFile,
}

/// A hardware engine executing the non-MI part of the command stream.
pub trait Engine: Send {
    fn name(&self) -> &'static str;

    /// Execute one complete command (header included).
    fn execute(&mut self, command: &[u32], ctx: &mut ExecContext<'_>) -> ExecResult<()>;
}
