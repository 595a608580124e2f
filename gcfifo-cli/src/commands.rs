// CLI command handlers
use anyhow::{Context, Result};
use gcfifo_core::jit::translate_block;
use gcfifo_core::memory::MemoryBus;
use gcfifo_core::CpuContext;
use gcfifo_runtime::hardware::memory_map::{
    COMMAND_PROCESSOR_BASE, PIXEL_ENGINE_BASE, PROCESSOR_INTERFACE_BASE,
};
use gcfifo_runtime::hardware::{
    command_processor, pixel_engine, processor_interface, CpControl, InterruptCause, PeControl,
};
use gcfifo_runtime::video::CommandStats;
use gcfifo_runtime::{CommandStreamBackend, FifoGeometry, Machine, MachineConfig, MachineSnapshot};
use std::path::Path;
use std::sync::PoisonError;

/// Where the driver pretends its guest code lives.
const GUEST_CODE: u32 = 0x8000_3100;
/// CPU cycles charged for each translated chunk-building block.
const CYCLES_PER_CHUNK: u64 = 400;
/// Uncached mirror of the register windows.
const UNCACHED: u32 = 0xC000_0000;

const ADDI: u32 = 14;
const ADDIS: u32 = 15;
const ORI: u32 = 24;
const STW: u32 = 36;

/// Outcome of [`run_workload`].
#[derive(Debug, Clone, Copy)]
pub struct RunReport {
    pub stats: CommandStats,
    pub last_token: u16,
    pub interrupts_serviced: u32,
    pub cycles: u64,
}

/// Ring used when the configuration leaves the FIFO unprogrammed: 32 KiB at
/// 1 MiB with the usual 3/4 and 1/4 watermarks.
pub fn default_geometry() -> FifoGeometry {
    let base = 0x0010_0000;
    let size = 0x8000;
    FifoGeometry {
        base,
        end: base + size,
        hi_watermark: size / 4 * 3,
        lo_watermark: size / 4,
    }
}

pub fn load_config(path: Option<&Path>, dual_core: bool) -> Result<MachineConfig> {
    let mut config = match path {
        Some(path) => MachineConfig::load(path)?,
        None => MachineConfig::default(),
    };
    config.dual_core |= dual_core;
    config.initial_fifo.get_or_insert_with(default_geometry);
    Ok(config)
}

fn d_form(opcode: u32, rd: u8, ra: u8, imm: i16) -> u32 {
    (opcode << 26) | ((rd as u32) << 21) | ((ra as u32) << 16) | (imm as u16 as u32)
}

/// `lis rd, value@h; ori rd, rd, value@l`
fn load_immediate(rd: u8, value: u32) -> [u32; 2] {
    [
        d_form(ADDIS, rd, 0, (value >> 16) as u16 as i16),
        d_form(ORI, rd, rd, value as u16 as i16),
    ]
}

/// Guest code storing one 32-byte chunk to the gather pipe: a BP write of
/// the PE token register followed by NOP padding.
fn token_chunk_program(token: u16) -> Vec<u32> {
    let [hi, lo] = token.to_be_bytes();
    let words = [
        u32::from_be_bytes([0x61, 0x48, 0x00, hi]),
        u32::from_be_bytes([lo, 0x00, 0x00, 0x00]),
    ];

    let mut program = Vec::with_capacity(24);
    // r5 = 0xCC008000
    program.push(d_form(ADDIS, 5, 0, 0xCC01_u16 as i16));
    program.push(d_form(ADDI, 5, 5, -0x8000));
    for word in words {
        program.extend(load_immediate(6, word));
        program.push(d_form(STW, 6, 5, 0));
    }
    program.push(d_form(ADDI, 6, 0, 0));
    program.extend(std::iter::repeat(d_form(STW, 6, 5, 0)).take(6));
    program
}

fn run_guest(machine: &mut Machine, ctx: &mut CpuContext, program: &[u32]) -> Result<()> {
    let block = translate_block(program, GUEST_CODE).context("Failed to translate guest block")?;
    block
        .execute(ctx, machine)
        .context("Guest block faulted")?;
    Ok(())
}

/// Program the PI FIFO registers to match the CP ring, enable token
/// interrupts and link the ring.
fn program_hardware(machine: &mut Machine, geometry: &FifoGeometry) -> Result<()> {
    let pi = UNCACHED | PROCESSOR_INTERFACE_BASE;
    machine.write_u32(pi | processor_interface::regs::FIFO_BASE, geometry.base)?;
    machine.write_u32(pi | processor_interface::regs::FIFO_END, geometry.end)?;
    machine.write_u32(pi | processor_interface::regs::FIFO_WRITE_POINTER, geometry.base)?;
    machine.write_u32(
        pi | processor_interface::regs::INTERRUPT_MASK,
        InterruptCause::PE_TOKEN.bits(),
    )?;

    let pe = UNCACHED | PIXEL_ENGINE_BASE;
    machine.write_u16(
        pe | pixel_engine::regs::CONTROL,
        PeControl::TOKEN_ENABLE.bits(),
    )?;

    let cp = UNCACHED | COMMAND_PROCESSOR_BASE;
    let control = CpControl::READ_ENABLE | CpControl::LINK_ENABLE;
    machine.write_u16(cp | command_processor::regs::CONTROL, control.bits())?;
    Ok(())
}

/// Acknowledge a pending PE token interrupt the way a guest handler would.
fn service_interrupts(machine: &mut Machine) -> Result<bool> {
    if !machine.external_interrupt_pending() {
        return Ok(false);
    }
    let pe_control = UNCACHED | PIXEL_ENGINE_BASE | pixel_engine::regs::CONTROL;
    let ack = PeControl::TOKEN_ENABLE | PeControl::TOKEN;
    machine.write_u16(pe_control, ack.bits())?;
    Ok(true)
}

/// Run `chunks` token-writing blocks through a fresh machine.
///
/// `on_chunk` is called after every block; the machine is handed back so
/// callers can snapshot it before shutting it down.
pub fn run_workload(
    config: MachineConfig,
    chunks: u32,
    mut on_chunk: impl FnMut(u32),
) -> Result<(Machine, RunReport)> {
    let geometry = config.initial_fifo.unwrap_or_else(default_geometry);
    let backend = CommandStreamBackend::new();
    let stats = backend.stats();
    let mut machine = Machine::new(config, Box::new(backend)).context("Failed to start machine")?;
    program_hardware(&mut machine, &geometry)?;

    let mut ctx = CpuContext::new();
    let mut interrupts_serviced = 0;
    for i in 0..chunks {
        run_guest(&mut machine, &mut ctx, &token_chunk_program((i + 1) as u16))?;
        machine.advance(CYCLES_PER_CHUNK);
        if service_interrupts(&mut machine)? {
            interrupts_serviced += 1;
        }
        on_chunk(i);
    }

    machine.sync_gpu();
    machine.advance(0);
    if service_interrupts(&mut machine)? {
        interrupts_serviced += 1;
    }

    let last_token = machine.read_u16(UNCACHED | PIXEL_ENGINE_BASE | pixel_engine::regs::TOKEN)?;
    let report = RunReport {
        stats: *stats.lock().unwrap_or_else(PoisonError::into_inner),
        last_token,
        interrupts_serviced,
        cycles: machine.now(),
    };
    Ok((machine, report))
}

pub fn run(
    config_path: Option<&Path>,
    dual_core: bool,
    chunks: u32,
    save_state: Option<&Path>,
    on_chunk: impl FnMut(u32),
) -> Result<RunReport> {
    let config = load_config(config_path, dual_core)?;
    log::info!(
        "running {chunks} chunks ({})",
        if config.dual_core { "dual-core" } else { "single-core" }
    );

    let (mut machine, report) = run_workload(config, chunks, on_chunk)?;
    if let Some(path) = save_state {
        machine.snapshot().save_to_file(path)?;
    }
    machine.shutdown();
    Ok(report)
}

pub fn print_report(report: &RunReport) {
    let stats = &report.stats;
    println!("Run complete");
    println!("  Cycles: {}", report.cycles);
    println!("  Chunks dispatched: {}", stats.chunks);
    println!("  Commands: {} ({} BP writes)", stats.commands, stats.bp_writes);
    println!("  Tokens: {}, last 0x{:04X}", stats.tokens, report.last_token);
    println!("  Draw-done signals: {}", stats.finishes);
    println!("  Unknown opcodes: {}", stats.unknown);
    println!("  Interrupts serviced: {}", report.interrupts_serviced);
}

pub fn inspect(path: &Path) -> Result<()> {
    let snapshot = MachineSnapshot::load_from_file(path)?;
    let json = serde_json::to_string_pretty(&snapshot).context("Failed to format snapshot")?;
    println!("{json}");
    Ok(())
}

pub fn write_default_config(path: &Path) -> Result<()> {
    let config = load_config(None, false)?;
    config.save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
