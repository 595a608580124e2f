//! Shared fixtures for machine-level tests.
#![allow(dead_code)]

use gcfifo_core::memory::MemoryBus;
use gcfifo_runtime::hardware::command_processor::regs as cp_regs;
use gcfifo_runtime::hardware::memory_map::{
    COMMAND_PROCESSOR_BASE, PIXEL_ENGINE_BASE, PROCESSOR_INTERFACE_BASE,
};
use gcfifo_runtime::hardware::CpControl;
use gcfifo_runtime::video::{ChunkLog, RecordingBackend};
use gcfifo_runtime::{FifoGeometry, Machine, MachineConfig};

/// Uncached mirror of the register windows, as guest code addresses them.
const UNCACHED: u32 = 0xC000_0000;

pub fn cp(offset: u32) -> u32 {
    UNCACHED | COMMAND_PROCESSOR_BASE | offset
}

pub fn pe(offset: u32) -> u32 {
    UNCACHED | PIXEL_ENGINE_BASE | offset
}

pub fn pi(offset: u32) -> u32 {
    UNCACHED | PROCESSOR_INTERFACE_BASE | offset
}

/// 256-byte ring at physical 0 with hi = 128, lo = 32.
pub fn ring_config(dual_core: bool) -> MachineConfig {
    MachineConfig {
        dual_core,
        ram_size: 0x10000,
        stall_timeout_ms: Some(5_000),
        initial_fifo: Some(FifoGeometry {
            base: 0,
            end: 256,
            hi_watermark: 128,
            lo_watermark: 32,
        }),
        ..MachineConfig::default()
    }
}

pub fn recording_machine(config: MachineConfig) -> (Machine, ChunkLog) {
    let backend = RecordingBackend::new();
    let log = backend.log();
    let machine = Machine::new(config, Box::new(backend)).unwrap();
    (machine, log)
}

pub fn set_control(machine: &mut Machine, control: CpControl) {
    machine.write_u16(cp(cp_regs::CONTROL), control.bits()).unwrap();
}

/// Write a 32-bit FIFO field through its two 16-bit halves.
pub fn write_fifo_field(machine: &mut Machine, lo_offset: u32, value: u32) {
    machine.write_u16(cp(lo_offset), value as u16).unwrap();
    machine
        .write_u16(cp(lo_offset + 2), (value >> 16) as u16)
        .unwrap();
}

pub fn read_fifo_field(machine: &mut Machine, lo_offset: u32) -> u32 {
    let lo = machine.read_u16(cp(lo_offset)).unwrap() as u32;
    let hi = machine.read_u16(cp(lo_offset + 2)).unwrap() as u32;
    (hi << 16) | lo
}

/// Push one 32-byte chunk through the gather pipe, every word set to `tag`.
pub fn write_chunk(machine: &mut Machine, tag: u32) {
    for _ in 0..8 {
        machine.gather_pipe_write32(tag).unwrap();
    }
}

/// First word of each recorded chunk.
pub fn tags(log: &ChunkLog) -> Vec<u32> {
    log.chunks()
        .iter()
        .map(|chunk| u32::from_be_bytes([chunk.data[0], chunk.data[1], chunk.data[2], chunk.data[3]]))
        .collect()
}

/// Encode a PowerPC D-form instruction.
pub fn d_form(opcode: u32, rd: u32, ra: u32, imm: i16) -> u32 {
    (opcode << 26) | (rd << 21) | (ra << 16) | (imm as u16 as u32)
}
