//! FIFO ring, gather pipe and GPU consumer through the machine's MMIO surface

mod utils;

use gcfifo_core::memory::MemoryBus;
use gcfifo_runtime::hardware::command_processor::regs as cp_regs;
use gcfifo_runtime::hardware::processor_interface::regs as pi_regs;
use gcfifo_runtime::hardware::{CpControl, CpStatus, InterruptCause};
use gcfifo_runtime::{Machine, MachineConfig};
use proptest::prelude::*;
use utils::*;

#[test]
fn test_unlinked_ring_fills_without_dispatch() {
    let (mut machine, log) = recording_machine(ring_config(false));
    set_control(&mut machine, CpControl::READ_ENABLE);

    for tag in 0..8 {
        write_chunk(&mut machine, tag);
    }

    assert_eq!(read_fifo_field(&mut machine, cp_regs::FIFO_WRITE_POINTER_LO), 0);
    assert_eq!(read_fifo_field(&mut machine, cp_regs::FIFO_DISTANCE_LO), 256);
    assert!(log.is_empty());
    assert!(machine.processor_interface().cause().is_empty());
    assert!(!machine.external_interrupt_pending());
    assert_eq!(machine.ram().read_u32(7 * 32).unwrap(), 7);
}

#[test]
fn test_linked_chunk_is_dispatched_synchronously() {
    let (mut machine, log) = recording_machine(ring_config(false));
    set_control(&mut machine, CpControl::READ_ENABLE | CpControl::LINK_ENABLE);

    write_chunk(&mut machine, 0xAA);

    assert_eq!(tags(&log), vec![0xAA]);
    assert_eq!(read_fifo_field(&mut machine, cp_regs::FIFO_READ_POINTER_LO), 32);
    assert_eq!(read_fifo_field(&mut machine, cp_regs::FIFO_DISTANCE_LO), 0);
}

#[test]
fn test_partial_chunk_stays_staged() {
    let (mut machine, log) = recording_machine(ring_config(false));
    set_control(&mut machine, CpControl::READ_ENABLE | CpControl::LINK_ENABLE);

    for _ in 0..7 {
        machine.gather_pipe_write32(1).unwrap();
    }
    machine.gather_pipe_write16(2).unwrap();
    assert_eq!(machine.gather_pipe().len(), 30);
    assert!(log.is_empty());

    machine.gather_pipe_write32(0x0304_0506).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(machine.gather_pipe().staged(), &[0x05, 0x06]);
}

#[test]
fn test_breakpoint_halts_before_breakpoint_chunk() {
    let (mut machine, log) = recording_machine(ring_config(false));
    write_fifo_field(&mut machine, cp_regs::FIFO_BREAKPOINT_LO, 64);
    set_control(
        &mut machine,
        CpControl::READ_ENABLE | CpControl::LINK_ENABLE | CpControl::BREAKPOINT_ENABLE,
    );
    machine
        .write_u32(pi(pi_regs::INTERRUPT_MASK), InterruptCause::CP.bits())
        .unwrap();

    for tag in 0..3 {
        write_chunk(&mut machine, tag);
    }

    assert_eq!(tags(&log), vec![0, 1]);
    assert!(machine.fifo().breakpoint_hit());
    assert_eq!(read_fifo_field(&mut machine, cp_regs::FIFO_READ_POINTER_LO), 64);
    let status = machine.read_u16(cp(cp_regs::STATUS)).unwrap();
    assert_ne!(status & CpStatus::BREAKPOINT.bits(), 0);
    assert!(machine.processor_interface().cause().contains(InterruptCause::CP));
    assert!(machine.external_interrupt_pending());

    // acknowledge: the breakpoint chunk goes out once
    machine
        .write_u16(cp(cp_regs::STATUS), CpStatus::BREAKPOINT.bits())
        .unwrap();
    assert_eq!(tags(&log), vec![0, 1, 2]);
    assert!(!machine.processor_interface().cause().contains(InterruptCause::CP));
    assert!(!machine.external_interrupt_pending());
}

#[test]
fn test_release_does_not_carry_to_moved_breakpoint() {
    let (mut machine, log) = recording_machine(ring_config(false));
    write_fifo_field(&mut machine, cp_regs::FIFO_BREAKPOINT_LO, 64);
    set_control(
        &mut machine,
        CpControl::READ_ENABLE | CpControl::LINK_ENABLE | CpControl::BREAKPOINT_ENABLE,
    );
    for tag in 0..4 {
        write_chunk(&mut machine, tag);
    }
    assert_eq!(tags(&log), vec![0, 1]);

    // acknowledge with reads off, then move the breakpoint before resuming
    set_control(&mut machine, CpControl::LINK_ENABLE | CpControl::BREAKPOINT_ENABLE);
    machine
        .write_u16(cp(cp_regs::STATUS), CpStatus::BREAKPOINT.bits())
        .unwrap();
    write_fifo_field(&mut machine, cp_regs::FIFO_BREAKPOINT_LO, 96);
    set_control(
        &mut machine,
        CpControl::READ_ENABLE | CpControl::LINK_ENABLE | CpControl::BREAKPOINT_ENABLE,
    );

    assert_eq!(tags(&log), vec![0, 1, 2]);
    assert!(machine.fifo().breakpoint_hit());
    assert_eq!(read_fifo_field(&mut machine, cp_regs::FIFO_READ_POINTER_LO), 96);
}

#[test]
fn test_burst_outside_ram_drops_chunk() {
    let (mut machine, log) = recording_machine(ring_config(false));
    // ram_size is 0x10000; put the ring just past it
    write_fifo_field(&mut machine, cp_regs::FIFO_END_LO, 0x2_0100);
    write_fifo_field(&mut machine, cp_regs::FIFO_BASE_LO, 0x2_0000);
    write_fifo_field(&mut machine, cp_regs::FIFO_WRITE_POINTER_LO, 0x2_0000);
    write_fifo_field(&mut machine, cp_regs::FIFO_READ_POINTER_LO, 0x2_0000);
    set_control(&mut machine, CpControl::READ_ENABLE | CpControl::LINK_ENABLE);

    for _ in 0..7 {
        machine.gather_pipe_write32(1).unwrap();
    }
    assert!(matches!(
        machine.gather_pipe_write32(1),
        Err(gcfifo_core::FifoError::MemoryAccess { .. })
    ));

    assert!(machine.gather_pipe().is_empty());
    assert_eq!(
        read_fifo_field(&mut machine, cp_regs::FIFO_WRITE_POINTER_LO),
        0x2_0000
    );
    assert_eq!(read_fifo_field(&mut machine, cp_regs::FIFO_DISTANCE_LO), 0);
    assert!(log.is_empty());
}

#[test]
fn test_disabling_breakpoints_resumes_consumer() {
    let (mut machine, log) = recording_machine(ring_config(false));
    write_fifo_field(&mut machine, cp_regs::FIFO_BREAKPOINT_LO, 32);
    set_control(
        &mut machine,
        CpControl::READ_ENABLE | CpControl::LINK_ENABLE | CpControl::BREAKPOINT_ENABLE,
    );
    write_chunk(&mut machine, 0);
    write_chunk(&mut machine, 1);
    assert_eq!(tags(&log), vec![0]);

    set_control(&mut machine, CpControl::READ_ENABLE | CpControl::LINK_ENABLE);
    assert_eq!(tags(&log), vec![0, 1]);
    assert!(!machine.fifo().breakpoint_hit());
}

#[test]
fn test_write_pointer_wraps_exactly_at_end() {
    let (mut machine, _log) = recording_machine(MachineConfig {
        ram_size: 0x10000,
        ..MachineConfig::default()
    });
    write_fifo_field(&mut machine, cp_regs::FIFO_BASE_LO, 0x1000);
    write_fifo_field(&mut machine, cp_regs::FIFO_END_LO, 0x1100);
    write_fifo_field(&mut machine, cp_regs::FIFO_READ_POINTER_LO, 0x10C0);
    write_fifo_field(&mut machine, cp_regs::FIFO_WRITE_POINTER_LO, 0x10C0);

    write_chunk(&mut machine, 1);
    assert_eq!(machine.fifo().write_pointer(), 0x10E0);
    write_chunk(&mut machine, 2);
    assert_eq!(machine.fifo().write_pointer(), 0x1000);
    assert_eq!(machine.fifo().distance(), 64);
    assert_eq!(machine.ram().read_u32(0x10E0).unwrap(), 2);
}

#[test]
fn test_read_only_and_trigger_registers() {
    let (mut machine, _log) = recording_machine(ring_config(false));
    write_chunk(&mut machine, 1);
    machine.write_u16(cp(cp_regs::FIFO_DISTANCE_LO), 0).unwrap();
    assert_eq!(read_fifo_field(&mut machine, cp_regs::FIFO_DISTANCE_LO), 32);

    let before = machine.snapshot();
    machine.write_u16(cp(cp_regs::CLEAR), 0xFFFF).unwrap();
    assert_eq!(machine.read_u16(cp(cp_regs::CLEAR)).unwrap(), 0);
    for offset in [
        cp_regs::BOUNDING_BOX_LEFT,
        cp_regs::BOUNDING_BOX_RIGHT,
        cp_regs::BOUNDING_BOX_TOP,
        cp_regs::BOUNDING_BOX_BOTTOM,
    ] {
        machine.read_u16(cp(offset)).unwrap();
    }
    assert_eq!(machine.snapshot(), before);
}

#[test]
fn test_gather_pipe_reads_as_zero() {
    let (mut machine, _log) = recording_machine(ring_config(false));
    machine.write_u32(0xCC00_8000, 0x1234_5678).unwrap();
    assert_eq!(machine.read_u32(0xCC00_8000).unwrap(), 0);
    assert_eq!(machine.gather_pipe().len(), 4);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "FIFO desync")]
fn test_pi_cp_write_pointer_desync_asserts() {
    let (mut machine, _log) = recording_machine(ring_config(false));
    machine.write_u32(pi(pi_regs::FIFO_BASE), 0).unwrap();
    machine.write_u32(pi(pi_regs::FIFO_END), 256).unwrap();
    machine.write_u32(pi(pi_regs::FIFO_WRITE_POINTER), 0x40).unwrap();
    set_control(&mut machine, CpControl::READ_ENABLE | CpControl::LINK_ENABLE);
    write_chunk(&mut machine, 1);
}

#[test]
fn test_pi_tracks_write_pointer_in_lockstep() {
    let (mut machine, log) = recording_machine(ring_config(false));
    machine.write_u32(pi(pi_regs::FIFO_BASE), 0).unwrap();
    machine.write_u32(pi(pi_regs::FIFO_END), 256).unwrap();
    machine.write_u32(pi(pi_regs::FIFO_WRITE_POINTER), 0).unwrap();
    set_control(&mut machine, CpControl::READ_ENABLE | CpControl::LINK_ENABLE);

    for tag in 0..10 {
        write_chunk(&mut machine, tag);
    }

    assert_eq!(log.len(), 10);
    let pi_wp = machine.read_u32(pi(pi_regs::FIFO_WRITE_POINTER)).unwrap();
    assert_eq!(pi_wp & 0x03FF_FFE0, machine.fifo().write_pointer());
    assert_ne!(pi_wp & (1 << 29), 0);
}

#[test]
fn test_invalid_config_is_rejected_at_init() {
    let mut config = ring_config(false);
    if let Some(fifo) = config.initial_fifo.as_mut() {
        fifo.hi_watermark = 512;
    }
    let result = Machine::new(config, Box::new(gcfifo_runtime::NullBackend));
    assert!(matches!(
        result.err(),
        Some(gcfifo_core::FifoError::InvalidConfig { .. })
    ));
}

#[test]
fn test_shutdown_stops_bursts() {
    let (mut machine, _log) = recording_machine(ring_config(false));
    assert!(machine.shutdown().is_some());
    assert!(machine.shutdown().is_none());
    for _ in 0..7 {
        machine.gather_pipe_write32(0).unwrap();
    }
    assert_eq!(
        machine.gather_pipe_write32(0),
        Err(gcfifo_core::FifoError::Shutdown)
    );
}

proptest! {
    #[test]
    fn prop_ring_invariant_holds(ops in prop::collection::vec(0u8..4, 1..80)) {
        let (mut machine, log) = recording_machine(ring_config(false));
        set_control(&mut machine, CpControl::LINK_ENABLE);
        let mut expected = 0;
        for (i, op) in ops.into_iter().enumerate() {
            match op {
                0 => set_control(&mut machine, CpControl::LINK_ENABLE),
                1 => set_control(&mut machine, CpControl::LINK_ENABLE | CpControl::READ_ENABLE),
                _ => {
                    // keep the ring from overflowing so every chunk survives
                    if machine.fifo().distance() < 256 {
                        write_chunk(&mut machine, i as u32);
                        expected += 1;
                    }
                }
            }
            let fifo = machine.fifo();
            let (wp, rp, distance) = (fifo.write_pointer(), fifo.read_pointer(), fifo.distance());
            prop_assert!(distance <= 256);
            prop_assert!(wp < 256 && rp < 256);
            prop_assert_eq!(wp % 32, 0);
            prop_assert_eq!((rp + distance) % 256, wp);
        }
        set_control(&mut machine, CpControl::LINK_ENABLE | CpControl::READ_ENABLE);
        prop_assert_eq!(log.len(), expected);
        prop_assert_eq!(machine.fifo().distance(), 0);
    }

    #[test]
    fn prop_single_core_dispatch_preserves_order(chunks in prop::collection::vec(any::<u32>(), 1..40)) {
        let (mut machine, log) = recording_machine(ring_config(false));
        set_control(&mut machine, CpControl::READ_ENABLE | CpControl::LINK_ENABLE);
        for &tag in &chunks {
            write_chunk(&mut machine, tag);
        }
        prop_assert_eq!(tags(&log), chunks);
    }
}
