//! Test Utilities
//!
//! Mock contexts, instruction encoders, and a memory bus that separates
//! gather-pipe traffic from RAM so routing can be asserted.

#![allow(dead_code)]

use gcfifo_core::error::FifoResult;
use gcfifo_core::memory::{is_gather_pipe, MemoryBus, Ram};
use gcfifo_core::CpuContext;

/// Create a mock CPU context with specific register values.
pub fn mock_cpu_context_with_registers(registers: &[(u8, u32)]) -> CpuContext {
    let mut ctx = CpuContext::new();
    ctx.pc = 0x8000_0000;
    for (reg, value) in registers {
        ctx.set_register(*reg, *value);
    }
    ctx
}

/// Encode a D-form instruction.
pub fn d_form(opcode: u32, rd: u32, ra: u32, d: i16) -> u32 {
    (opcode << 26) | (rd << 21) | (ra << 16) | (d as u16 as u32)
}

/// Encode an X-form (primary opcode 31) instruction.
pub fn x_form(rd: u32, ra: u32, rb: u32, xo: u32) -> u32 {
    (31 << 26) | (rd << 21) | (ra << 16) | (rb << 11) | (xo << 1)
}

/// A single access observed on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    GatherPipe { size: u8, value: u32 },
    Ram { address: u32, size: u8 },
}

/// RAM plus an access log; gather-pipe stores never reach RAM.
pub struct RoutingBus {
    pub ram: Ram,
    pub log: Vec<Access>,
}

impl RoutingBus {
    pub fn new() -> Self {
        Self {
            ram: Ram::with_size(0x10000),
            log: Vec::new(),
        }
    }

    pub fn gathered(&self) -> Vec<(u8, u32)> {
        self.log
            .iter()
            .filter_map(|a| match *a {
                Access::GatherPipe { size, value } => Some((size, value)),
                Access::Ram { .. } => None,
            })
            .collect()
    }

    fn store(&mut self, address: u32, size: u8, value: u32) -> FifoResult<()> {
        if is_gather_pipe(address) {
            self.log.push(Access::GatherPipe { size, value });
            return Ok(());
        }
        self.log.push(Access::Ram { address, size });
        match size {
            1 => self.ram.write_u8(address, value as u8),
            2 => self.ram.write_u16(address, value as u16),
            _ => self.ram.write_u32(address, value),
        }
    }
}

impl MemoryBus for RoutingBus {
    fn read_u8(&mut self, address: u32) -> FifoResult<u8> {
        self.log.push(Access::Ram { address, size: 1 });
        self.ram.read_u8(address)
    }

    fn read_u16(&mut self, address: u32) -> FifoResult<u16> {
        self.log.push(Access::Ram { address, size: 2 });
        self.ram.read_u16(address)
    }

    fn read_u32(&mut self, address: u32) -> FifoResult<u32> {
        self.log.push(Access::Ram { address, size: 4 });
        self.ram.read_u32(address)
    }

    fn write_u8(&mut self, address: u32, value: u8) -> FifoResult<()> {
        self.store(address, 1, value as u32)
    }

    fn write_u16(&mut self, address: u32, value: u16) -> FifoResult<()> {
        self.store(address, 2, value as u32)
    }

    fn write_u32(&mut self, address: u32, value: u32) -> FifoResult<()> {
        self.store(address, 4, value)
    }
}
