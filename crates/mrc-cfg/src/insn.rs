//! The annotated instruction record.

use mrc_isa::{Instr, Op, RegMask};

/// Rewritten form of an instruction. The original decoded word is kept so
/// the operand fields stay readable; the patch changes the opcode the later
/// stages observe and carries the effective immediate.
#[derive(Clone, Copy, Debug)]
pub struct Patch {
    pub op: Op,
    pub addr: u32,
}

/// A `JR` identified as a jump-table dispatch.
#[derive(Clone, Copy, Debug)]
pub struct JumpTable {
    /// Table VRAM in `.rodata`.
    pub addr: u32,
    pub num_cases: u32,
    /// Register indexing the table.
    pub index_reg: u8,
}

/// Edge tag in the instruction graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeKind {
    /// Plain control flow.
    Flow,
    /// Into a called function's entry.
    FunctionEntry,
    /// From a callee's return back to the continuation.
    FunctionExit,
    /// Across a call to an extern.
    ExternCall,
    /// Across an unresolved `JALR`.
    IndirectCall,
}

/// Directed edge between instruction indices.
#[derive(Clone, Copy, Debug)]
pub struct Edge {
    pub target: usize,
    pub kind: EdgeKind,
}

/// One instruction of the `.text` stream plus accumulated annotations.
#[derive(Clone, Debug)]
pub struct RInsn {
    /// Original decoded instruction.
    pub orig: Instr,
    /// In-place rewrite, if any stage patched this instruction.
    pub patch: Option<Patch>,

    /// A `LW` via `$gp` resolved to a GOT global, rewritten to `ORI`.
    pub is_global_got_memop: bool,
    /// Suppresses the fallthrough edge (delay slots of unconditional
    /// transfers, and the sentinel).
    pub no_following_successor: bool,

    /// Partner index in a paired HI/LO or `JALR $t9` sequence.
    pub linked_insn: Option<usize>,
    /// Resolved absolute address for the pair.
    pub linked_value: u32,
    /// Resolved constant for a floating-point `LI`.
    pub linked_float: Option<f32>,

    pub jtbl: Option<JumpTable>,

    pub successors: Vec<Edge>,
    pub predecessors: Vec<Edge>,
    pub f_livein: RegMask,
    pub f_liveout: RegMask,
    pub b_livein: RegMask,
    pub b_liveout: RegMask,
}

impl RInsn {
    pub fn new(orig: Instr) -> RInsn {
        RInsn {
            orig,
            patch: None,
            is_global_got_memop: false,
            no_following_successor: false,
            linked_insn: None,
            linked_value: 0,
            linked_float: None,
            jtbl: None,
            successors: Vec::new(),
            predecessors: Vec::new(),
            f_livein: RegMask::EMPTY,
            f_liveout: RegMask::EMPTY,
            b_livein: RegMask::EMPTY,
            b_liveout: RegMask::EMPTY,
        }
    }

    /// Effective opcode: the patched one if rewritten.
    pub fn op(&self) -> Op {
        self.patch.map(|p| p.op).unwrap_or(self.orig.op)
    }

    pub fn is_patched(&self) -> bool {
        self.patch.is_some()
    }

    pub fn vram(&self) -> u32 {
        self.orig.vram
    }

    /// Effective immediate: the patched address if rewritten.
    pub fn imm(&self) -> i32 {
        match self.patch {
            Some(p) => p.addr as i32,
            None => self.orig.imm(),
        }
    }

    /// Effective absolute jump target (`J`/`JAL`).
    pub fn target(&self) -> u32 {
        match self.patch {
            Some(p) => p.addr,
            None => self.orig.jump_target(),
        }
    }

    /// Effective branch target.
    pub fn branch_target(&self) -> u32 {
        match self.patch {
            Some(p) => p.addr,
            None => self.orig.branch_target(),
        }
    }

    pub fn patch_to(&mut self, op: Op, addr: u32) {
        self.patch = Some(Patch { op, addr });
    }

    pub fn patch_nop(&mut self) {
        self.patch = Some(Patch {
            op: Op::Nop,
            addr: 0,
        });
    }

    /// Destination GPR of the underlying instruction, `zero` if none.
    ///
    /// Operand positions always come from the original descriptor: patches
    /// preserve the encoded fields.
    pub fn dest_reg(&self) -> u8 {
        self.orig.dest_reg()
    }

    pub fn dest_mask(&self) -> RegMask {
        if self.orig.op.modifies_rt() {
            RegMask::reg(self.orig.rt())
        } else if self.orig.op.modifies_rd() {
            RegMask::reg(self.orig.rd())
        } else {
            RegMask::EMPTY
        }
    }

    /// Mask of the single source operand (the `rs` slot when read, else
    /// `rt`). A jump-table `JR` sources its index register instead.
    pub fn single_source_mask(&self) -> RegMask {
        if self.op() == Op::Jr {
            if let Some(jtbl) = self.jtbl {
                return RegMask::reg(jtbl.index_reg);
            }
        }
        if self.orig.op.reads_rs() {
            RegMask::reg(self.orig.rs())
        } else if self.orig.op.reads_rt() {
            RegMask::reg(self.orig.rt())
        } else {
            RegMask::EMPTY
        }
    }

    /// Mask of every source operand.
    pub fn all_source_mask(&self) -> RegMask {
        let mut mask = RegMask::EMPTY;
        if self.orig.op.reads_rs() {
            mask |= RegMask::reg(self.orig.rs());
        }
        if self.orig.op.reads_rt() && !self.orig.op.modifies_rt() {
            mask |= RegMask::reg(self.orig.rt());
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mrc_isa::{encode_addu, encode_lw, encode_sw, REG_A0, REG_A1, REG_SP, REG_V0};

    #[test]
    fn test_patch_overlay() {
        let mut insn = RInsn::new(Instr::decode(encode_lw(REG_V0, REG_SP, 8), 0x400000));
        assert_eq!(insn.op(), Op::Lw);
        assert_eq!(insn.imm(), 8);

        insn.patch_to(Op::Ori, 0x410000);
        assert_eq!(insn.op(), Op::Ori);
        assert_eq!(insn.imm(), 0x410000);
        // original fields survive the rewrite
        assert_eq!(insn.orig.op, Op::Lw);
        assert_eq!(insn.dest_reg(), REG_V0);
    }

    #[test]
    fn test_source_masks() {
        let addu = RInsn::new(Instr::decode(encode_addu(REG_V0, REG_A0, REG_A1), 0));
        assert_eq!(
            addu.all_source_mask(),
            RegMask::reg(REG_A0) | RegMask::reg(REG_A1)
        );
        assert_eq!(addu.single_source_mask(), RegMask::reg(REG_A0));
        assert_eq!(addu.dest_mask(), RegMask::reg(REG_V0));

        let sw = RInsn::new(Instr::decode(encode_sw(REG_V0, REG_SP, 4), 0));
        assert_eq!(
            sw.all_source_mask(),
            RegMask::reg(REG_SP) | RegMask::reg(REG_V0)
        );
        assert_eq!(sw.dest_mask(), RegMask::EMPTY);
    }
}
