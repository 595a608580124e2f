//! Translated guest code driving the FIFO through the machine's memory bus

mod utils;

use gcfifo_core::jit::translate_block;
use gcfifo_core::{CpuContext, FifoError};
use gcfifo_runtime::hardware::CpControl;
use utils::*;

const ADDI: u32 = 14;
const ADDIS: u32 = 15;
const LWZ: u32 = 32;
const STW: u32 = 36;
const LHZ: u32 = 40;
const STH: u32 = 44;

/// `lis r7, 0xCC00` / `lis r5, 0xCC01; addi r5, r5, -0x8000`
fn register_pointers() -> Vec<u32> {
    vec![
        d_form(ADDIS, 7, 0, 0xCC00_u16 as i16),
        d_form(ADDIS, 5, 0, 0xCC01_u16 as i16),
        d_form(ADDI, 5, 5, -0x8000),
    ]
}

#[test]
fn test_translated_stores_feed_gather_pipe() {
    let (mut machine, log) = recording_machine(ring_config(false));
    let control = (CpControl::READ_ENABLE | CpControl::LINK_ENABLE).bits();

    let mut program = register_pointers();
    program.push(d_form(ADDI, 8, 0, control as i16));
    program.push(d_form(STH, 8, 7, 0x02));
    program.push(d_form(ADDI, 6, 0, 0x55));
    program.extend(std::iter::repeat(d_form(STW, 6, 5, 0)).take(8));

    let block = translate_block(&program, 0x8000_3000).unwrap();
    let mut ctx = CpuContext::new();
    block.execute(&mut ctx, &mut machine).unwrap();

    assert_eq!(ctx.get_register(5), 0xCC00_8000);
    assert_eq!(machine.command_processor().read16(0x02), control);
    assert_eq!(tags(&log), vec![0x55]);
    assert!(machine.gather_pipe().is_empty());
}

#[test]
fn test_translated_loads_read_registers() {
    let (mut machine, _log) = recording_machine(ring_config(false));
    set_control(&mut machine, CpControl::LINK_ENABLE);
    write_chunk(&mut machine, 1);
    write_chunk(&mut machine, 2);

    let mut program = register_pointers();
    program.push(d_form(LHZ, 9, 7, 0x30));
    program.push(d_form(LWZ, 10, 5, 0));
    program.push(d_form(LHZ, 11, 7, 0x34));

    let block = translate_block(&program, 0x8000_3000).unwrap();
    let mut ctx = CpuContext::new();
    block.execute(&mut ctx, &mut machine).unwrap();

    assert_eq!(ctx.get_register(9), 64);
    assert_eq!(ctx.get_register(10), 0);
    assert_eq!(ctx.get_register(11), 64);
}

#[test]
fn test_untranslatable_block_is_rejected() {
    // `mflr r0`
    let program = [register_pointers()[0], 0x7C08_02A6];
    assert!(matches!(
        translate_block(&program, 0x8000_3000),
        Err(FifoError::UnsupportedInstruction {
            address: 0x8000_3004,
            ..
        })
    ));
}
