// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Batch buffer command processor.
//!
//! Walks a batch from GPU memory one command at a time. MI commands are
//! executed here; everything else goes to the context's [`Engine`].
//!
//! ## Batch buffer flow
//!
//! | Command                          | Effect                                   |
//! |----------------------------------|------------------------------------------|
//! | MI_BATCH_BUFFER_START (2nd level) | call: push the return address and jump   |
//! | MI_BATCH_BUFFER_START (1st level) | jump without return                      |
//! | MI_BATCH_BUFFER_END              | return from a call, or end the batch     |

use std::time::{Duration, Instant};

use crate::engines::{Engine, ExecContext, ExecResult, ExecutionError, GpuMemory, RegisterFile};
use crate::hw::commands::{
    command_length, CommandType, MiBatchBufferStart, MiFlushDw, MiLoadRegisterImm, MiLoadRegisterMem,
    MiPredicate, MiSemaphoreWait, MiStoreDataImm, MiStoreRegisterMem, PostSyncOp, PredicateCombineOp,
    PredicateCompareOp, PredicateLoadOp, registers, MI_BATCH_BUFFER_END, MI_NOOP,
};

/// Second-level calls the hardware can return from.
const MAX_CALL_DEPTH: usize = 2;

/// Guard against batches that never reach MI_BATCH_BUFFER_END.
const MAX_COMMANDS_PER_BATCH: usize = 1 << 20;

const fn mi_opcode(header: u32) -> u32 {
    (header >> 23) & 0x3F
}

/// Counters for one executed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub commands: usize,
    pub batch_buffers: usize,
}

pub struct CommandProcessor<'a> {
    memory: &'a dyn GpuMemory,
    engine: &'a mut dyn Engine,
    registers: &'a mut RegisterFile,
    semaphore_timeout: Duration,
}

impl<'a> CommandProcessor<'a> {
    pub fn new(
        memory: &'a dyn GpuMemory,
        engine: &'a mut dyn Engine,
        registers: &'a mut RegisterFile,
        semaphore_timeout: Duration,
    ) -> Self {
        Self {
            memory,
            engine,
            registers,
            semaphore_timeout,
        }
    }

    /// Execute the batch starting at `address` until its final
    /// MI_BATCH_BUFFER_END.
    pub fn execute_batch(&mut self, address: u64) -> ExecResult<BatchStats> {
        let mut stats = BatchStats {
            commands: 0,
            batch_buffers: 1,
        };
        let mut return_stack: Vec<u64> = Vec::new();
        let mut pc = address;

        loop {
            if stats.commands >= MAX_COMMANDS_PER_BATCH {
                return Err(ExecutionError::Runaway(stats.commands));
            }
            let header = self.memory.read_u32(pc)?;
            let length = command_length(header);
            let command = self.memory.read_dwords(pc, length)?;
            stats.commands += 1;
            self.registers.tick();
            let next = pc + 4 * length as u64;

            if CommandType::of(header) != CommandType::Mi {
                let mut ctx = ExecContext {
                    memory: self.memory,
                    registers: &mut *self.registers,
                };
                self.engine.execute(&command, &mut ctx)?;
                pc = next;
                continue;
            }

            match header {
                MI_NOOP => pc = next,
                MI_BATCH_BUFFER_END => match return_stack.pop() {
                    Some(ret) => {
                        log::trace!("cp: return to 0x{:X}", ret);
                        pc = ret;
                    }
                    None => break,
                },
                _ => match mi_opcode(header) {
                    op if op == mi_opcode(MiBatchBufferStart::HEADER) => {
                        let bb = MiBatchBufferStart::decode(&command);
                        if bb.second_level {
                            if return_stack.len() >= MAX_CALL_DEPTH {
                                return Err(ExecutionError::NestingTooDeep(MAX_CALL_DEPTH));
                            }
                            return_stack.push(next);
                        }
                        log::trace!("cp: batch buffer start 0x{:X} (second level: {})", bb.address, bb.second_level);
                        stats.batch_buffers += 1;
                        pc = bb.address;
                    }
                    _ => {
                        self.execute_mi(&command)?;
                        pc = next;
                    }
                },
            }
        }

        log::trace!(
            "cp: batch 0x{:X} done, {} commands in {} buffers",
            address,
            stats.commands,
            stats.batch_buffers
        );
        Ok(stats)
    }

    fn execute_mi(&mut self, command: &[u32]) -> ExecResult<()> {
        let header = command[0];
        match mi_opcode(header) {
            op if op == mi_opcode(MiLoadRegisterImm::HEADER) => {
                let lri = MiLoadRegisterImm::decode(command);
                self.registers.write(lri.register, lri.data);
            }
            op if op == mi_opcode(MiLoadRegisterMem::HEADER) => {
                let lrm = MiLoadRegisterMem::decode(command);
                let value = self.memory.read_u32(lrm.address)?;
                self.registers.write(lrm.register, value);
            }
            op if op == mi_opcode(MiStoreRegisterMem::HEADER) => {
                let srm = MiStoreRegisterMem::decode(command);
                self.memory.write_u32(srm.address, self.registers.read(srm.register))?;
            }
            op if op == mi_opcode(MiStoreDataImm::HEADER) => {
                let sdi = MiStoreDataImm::decode(command);
                self.memory.write_u32(sdi.address, sdi.data)?;
            }
            op if op == mi_opcode(MiSemaphoreWait::HEADER) => {
                self.semaphore_wait(MiSemaphoreWait::decode(command))?;
            }
            op if op == mi_opcode(MiFlushDw::HEADER) => {
                let flush = MiFlushDw::decode(command);
                post_sync_write(self.memory, self.registers, flush.post_sync, flush.address, flush.immediate)?;
            }
            op if op == mi_opcode(MiPredicate::HEADER) => {
                self.predicate(MiPredicate::decode(command));
            }
            op => log::warn!("cp: skipping unknown MI command 0x{:08X} (opcode 0x{:X})", header, op),
        }
        Ok(())
    }

    fn semaphore_wait(&mut self, wait: MiSemaphoreWait) -> ExecResult<()> {
        let deadline = Instant::now() + self.semaphore_timeout;
        loop {
            let value = self.memory.read_u32(wait.address)?;
            if wait.compare.evaluate(value, wait.data) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ExecutionError::SemaphoreTimeout {
                    address: wait.address,
                    value,
                });
            }
            std::thread::sleep(Duration::from_micros(100));
        }
    }

    fn predicate(&mut self, predicate: MiPredicate) {
        let compare = match predicate.compare {
            PredicateCompareOp::True => true,
            PredicateCompareOp::False => false,
            PredicateCompareOp::SrcsEqual => {
                self.registers.read_u64(registers::MI_PREDICATE_SRC0)
                    == self.registers.read_u64(registers::MI_PREDICATE_SRC1)
            }
            PredicateCompareOp::DeltasEqual => {
                log::warn!("cp: MI_PREDICATE delta compare is not modelled");
                false
            }
        };
        let previous = self.registers.predicate();
        let value = match predicate.load {
            PredicateLoadOp::Keep => previous,
            PredicateLoadOp::Load => compare,
            PredicateLoadOp::LoadInverted => !compare,
        };
        let result = match predicate.combine {
            PredicateCombineOp::Set => value,
            PredicateCombineOp::And => previous && value,
            PredicateCombineOp::Or => previous || value,
            PredicateCombineOp::Xor => previous ^ value,
        };
        self.registers.set_predicate(result);
    }
}

/// Post-sync operation shared by PIPE_CONTROL and MI_FLUSH_DW.
pub fn post_sync_write(
    memory: &dyn GpuMemory,
    registers: &RegisterFile,
    op: PostSyncOp,
    address: u64,
    immediate: u64,
) -> ExecResult<()> {
    match op {
        PostSyncOp::NoWrite => Ok(()),
        PostSyncOp::WriteImmediate => memory.write_u32(address, immediate as u32),
        PostSyncOp::WriteTimestamp => memory.write_u64(address, registers.timestamp()),
        PostSyncOp::WriteDepthCount => memory.write_u64(address, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::test_util::FlatMemory;
    use crate::hw::commands::SemaphoreCompare;

    const BASE: u64 = 0x10_0000;

    /// Engine that records what reaches it.
    #[derive(Default)]
    struct RecordingEngine {
        commands: Vec<Vec<u32>>,
    }

    impl Engine for RecordingEngine {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn execute(&mut self, command: &[u32], _ctx: &mut ExecContext<'_>) -> ExecResult<()> {
            self.commands.push(command.to_vec());
            Ok(())
        }
    }

    fn run(mem: &FlatMemory, engine: &mut RecordingEngine, regs: &mut RegisterFile) -> ExecResult<BatchStats> {
        CommandProcessor::new(mem, engine, regs, Duration::from_millis(20)).execute_batch(BASE)
    }

    #[test]
    fn test_register_and_memory_commands() {
        let mem = FlatMemory::new(BASE, 0x1000);
        let data = BASE + 0x800;
        mem.write_u32(data, 0x1234).unwrap();

        let mut stream = Vec::new();
        stream.extend(MiLoadRegisterImm { register: 0x2600, data: 7, mmio_remap: false }.encode());
        stream.extend(MiLoadRegisterMem { register: 0x2604, address: data }.encode());
        stream.extend(MiStoreRegisterMem { register: 0x2600, address: data + 8 }.encode());
        stream.extend(MiStoreDataImm { address: data + 16, data: 0xCAFE }.encode());
        stream.push(MI_NOOP);
        stream.push(MI_BATCH_BUFFER_END);
        mem.put_dwords(BASE, &stream);

        let mut engine = RecordingEngine::default();
        let mut regs = RegisterFile::new();
        let stats = run(&mem, &mut engine, &mut regs).unwrap();
        assert_eq!(stats.commands, 6);
        assert_eq!(regs.read(0x2604), 0x1234);
        assert_eq!(mem.read_u32(data + 8).unwrap(), 7);
        assert_eq!(mem.read_u32(data + 16).unwrap(), 0xCAFE);
        assert!(engine.commands.is_empty());
    }

    #[test]
    fn test_second_level_call_returns() {
        let mem = FlatMemory::new(BASE, 0x1000);
        let callee = BASE + 0x400;
        let mut ring = Vec::new();
        ring.extend(MiBatchBufferStart { address: callee, second_level: true }.encode());
        ring.extend(MiStoreDataImm { address: BASE + 0x800, data: 2 }.encode());
        ring.push(MI_BATCH_BUFFER_END);
        mem.put_dwords(BASE, &ring);

        let mut list = Vec::new();
        list.extend(MiStoreDataImm { address: BASE + 0x804, data: 1 }.encode());
        list.push(0x7A00_0004);
        list.extend([0u32; 5]);
        list.push(MI_BATCH_BUFFER_END);
        mem.put_dwords(callee, &list);

        let mut engine = RecordingEngine::default();
        let mut regs = RegisterFile::new();
        let stats = run(&mem, &mut engine, &mut regs).unwrap();
        assert_eq!(stats.batch_buffers, 2);
        assert_eq!(mem.read_u32(BASE + 0x804).unwrap(), 1);
        assert_eq!(mem.read_u32(BASE + 0x800).unwrap(), 2);
        // Non-MI command forwarded whole.
        assert_eq!(engine.commands.len(), 1);
        assert_eq!(engine.commands[0].len(), 6);
    }

    #[test]
    fn test_flush_dw_post_sync() {
        let mem = FlatMemory::new(BASE, 0x1000);
        let mut stream = Vec::new();
        stream.extend(
            MiFlushDw {
                post_sync: PostSyncOp::WriteImmediate,
                address: BASE + 0x800,
                immediate: 9,
            }
            .encode(),
        );
        stream.push(MI_BATCH_BUFFER_END);
        mem.put_dwords(BASE, &stream);

        let mut regs = RegisterFile::new();
        run(&mem, &mut RecordingEngine::default(), &mut regs).unwrap();
        assert_eq!(mem.read_u32(BASE + 0x800).unwrap(), 9);
    }

    #[test]
    fn test_semaphore_satisfied_and_timeout() {
        let mem = FlatMemory::new(BASE, 0x1000);
        let sem = BASE + 0x800;
        let wait = MiSemaphoreWait {
            address: sem,
            data: 0,
            compare: SemaphoreCompare::Equal,
        };
        let mut stream = wait.encode().to_vec();
        stream.push(MI_BATCH_BUFFER_END);
        mem.put_dwords(BASE, &stream);

        let mut regs = RegisterFile::new();
        assert!(run(&mem, &mut RecordingEngine::default(), &mut regs).is_ok());

        mem.write_u32(sem, 1).unwrap();
        assert_eq!(
            run(&mem, &mut RecordingEngine::default(), &mut regs),
            Err(ExecutionError::SemaphoreTimeout { address: sem, value: 1 })
        );
    }

    #[test]
    fn test_predicate_chain() {
        let mem = FlatMemory::new(BASE, 0x1000);
        let mut regs = RegisterFile::new();
        regs.write(registers::MI_PREDICATE_SRC0, 2);
        let mut engine = RecordingEngine::default();
        let mut cp = CommandProcessor::new(&mem, &mut engine, &mut regs, Duration::ZERO);

        let not_equal = |combine| MiPredicate {
            load: PredicateLoadOp::LoadInverted,
            combine,
            compare: PredicateCompareOp::SrcsEqual,
        };
        let mut results = Vec::new();
        for i in 0..4u32 {
            cp.registers.write(registers::MI_PREDICATE_SRC1, i);
            let combine = if i == 0 {
                PredicateCombineOp::Set
            } else {
                PredicateCombineOp::And
            };
            cp.predicate(not_equal(combine));
            results.push(cp.registers.predicate());
        }
        // count = 2: indices 0 and 1 run.
        assert_eq!(results, vec![true, true, false, false]);
    }

    #[test]
    fn test_unmapped_batch_faults() {
        let mem = FlatMemory::new(BASE, 0x100);
        let mut regs = RegisterFile::new();
        let mut engine = RecordingEngine::default();
        let result = CommandProcessor::new(&mem, &mut engine, &mut regs, Duration::ZERO).execute_batch(0x42_0000);
        assert_eq!(result, Err(ExecutionError::PageFault { va: 0x42_0000, len: 4 }));
    }

    #[test]
    fn test_nesting_limit() {
        let mem = FlatMemory::new(BASE, 0x1000);
        // A buffer that calls itself forever.
        mem.put_dwords(BASE, &MiBatchBufferStart { address: BASE, second_level: true }.encode());
        let mut regs = RegisterFile::new();
        assert_eq!(
            run(&mem, &mut RecordingEngine::default(), &mut regs),
            Err(ExecutionError::NestingTooDeep(MAX_CALL_DEPTH))
        );
    }
}
