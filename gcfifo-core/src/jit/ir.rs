//! Intermediate Representation (IR) Instructions
//!
//! This module defines the IR produced by the load/store emitter. Each guest
//! instruction becomes a handful of simple nodes: register loads and stores
//! are separate from computation, and memory accesses are explicit sized
//! nodes.
//!
//! # IR Design
//! - **Arena + index**: nodes live in an append-only `Vec` and reference
//!   their operands by [`InstLoc`], a stable index. Operands always point at
//!   earlier nodes, so the arena can reallocate without invalidating anything.
//! - **Value semantics**: a node with a result *is* that result. Evaluation
//!   is strictly in order; there are no jumps inside a block.
//! - **Big-endian memory**: `Load*`/`Store*` nodes carry host values. The
//!   memory bus converts to and from guest byte order.

use smallvec::SmallVec;

/// Index of a node inside an [`IrBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstLoc(u32);

impl InstLoc {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// IR node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrInst {
    /// 32-bit integer constant.
    Imm32(u32),

    /// Read guest GPR.
    LoadGReg(u8),
    /// Write guest GPR.
    StoreGReg { value: InstLoc, reg: u8 },
    /// Read guest FPR (as f64 bits).
    LoadFReg(u8),
    /// Write guest FPR (as f64 bits).
    StoreFReg { value: InstLoc, reg: u8 },

    /// `a + b` (wrapping)
    Add(InstLoc, InstLoc),
    /// `a | b`
    Or(InstLoc, InstLoc),
    /// Sign-extend the low halfword.
    SExt16(InstLoc),
    /// Reverse the bytes of the low halfword.
    ByteSwap16(InstLoc),
    /// Reverse the bytes of the word.
    ByteSwap32(InstLoc),
    /// f32 bits -> f64 bits.
    SingleToDouble(InstLoc),
    /// f64 bits -> f32 bits.
    DoubleToSingle(InstLoc),

    /// Zero-extending memory loads.
    Load8 { addr: InstLoc },
    Load16 { addr: InstLoc },
    Load32 { addr: InstLoc },
    /// Memory stores of the low 8/16/32 bits of `value`.
    Store8 { value: InstLoc, addr: InstLoc },
    Store16 { value: InstLoc, addr: InstLoc },
    Store32 { value: InstLoc, addr: InstLoc },
}

impl IrInst {
    /// Operands referenced by this node, in evaluation order.
    pub fn operands(&self) -> SmallVec<[InstLoc; 2]> {
        let mut ops = SmallVec::new();
        match *self {
            IrInst::Imm32(_) | IrInst::LoadGReg(_) | IrInst::LoadFReg(_) => {}
            IrInst::StoreGReg { value, .. } | IrInst::StoreFReg { value, .. } => ops.push(value),
            IrInst::Add(a, b) | IrInst::Or(a, b) => {
                ops.push(a);
                ops.push(b);
            }
            IrInst::SExt16(a)
            | IrInst::ByteSwap16(a)
            | IrInst::ByteSwap32(a)
            | IrInst::SingleToDouble(a)
            | IrInst::DoubleToSingle(a) => ops.push(a),
            IrInst::Load8 { addr } | IrInst::Load16 { addr } | IrInst::Load32 { addr } => {
                ops.push(addr)
            }
            IrInst::Store8 { value, addr }
            | IrInst::Store16 { value, addr }
            | IrInst::Store32 { value, addr } => {
                ops.push(value);
                ops.push(addr);
            }
        }
        ops
    }

    /// Whether the node touches guest memory.
    pub fn is_memory_access(&self) -> bool {
        matches!(
            self,
            IrInst::Load8 { .. }
                | IrInst::Load16 { .. }
                | IrInst::Load32 { .. }
                | IrInst::Store8 { .. }
                | IrInst::Store16 { .. }
                | IrInst::Store32 { .. }
        )
    }

    /// Whether the node has an effect besides producing a value.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            IrInst::StoreGReg { .. }
                | IrInst::StoreFReg { .. }
                | IrInst::Store8 { .. }
                | IrInst::Store16 { .. }
                | IrInst::Store32 { .. }
        ) || self.is_memory_access()
    }
}

/// A translated block of guest code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IrBlock {
    /// Guest address of the first translated instruction.
    pub guest_address: u32,
    /// Number of guest instructions folded into this block.
    pub guest_instructions: u32,
    /// Bytes stored to a constant gather-pipe address by this block.
    pub fifo_bytes: u32,
    insts: Vec<IrInst>,
}

impl IrBlock {
    pub fn new(guest_address: u32) -> Self {
        Self {
            guest_address,
            ..Self::default()
        }
    }

    /// Append a node and return its location.
    pub fn push(&mut self, inst: IrInst) -> InstLoc {
        debug_assert!(
            inst.operands().iter().all(|op| op.index() < self.insts.len()),
            "IR operand must reference an earlier node: {inst:?}"
        );
        let loc = InstLoc(self.insts.len() as u32);
        self.insts.push(inst);
        loc
    }

    #[inline]
    pub fn get(&self, loc: InstLoc) -> &IrInst {
        &self.insts[loc.index()]
    }

    /// Constant value of `loc`, if it is an `Imm32`.
    pub fn imm_value(&self, loc: InstLoc) -> Option<u32> {
        match self.get(loc) {
            IrInst::Imm32(value) => Some(*value),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InstLoc, &IrInst)> {
        self.insts
            .iter()
            .enumerate()
            .map(|(i, inst)| (InstLoc(i as u32), inst))
    }

    /// Number of uses of each node. Nodes with zero uses and no side effects
    /// are dead and skipped by the backend.
    pub fn use_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.insts.len()];
        for inst in &self.insts {
            for op in inst.operands() {
                counts[op.index()] += 1;
            }
        }
        counts
    }
}
