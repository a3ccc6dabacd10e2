//! Opcode identifiers and descriptor predicates.

/// Decoded opcode, after pseudo-instruction normalization (`move`, `negu`,
/// `not`, `b`, `beqz`, `bnez`, `nop`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    // ALU, register
    Add,
    Addu,
    Sub,
    Subu,
    And,
    Or,
    Xor,
    Nor,
    Slt,
    Sltu,
    Sllv,
    Srlv,
    Srav,
    Move,
    Negu,
    Not,
    // ALU, immediate
    Addi,
    Addiu,
    Slti,
    Sltiu,
    Andi,
    Ori,
    Xori,
    Lui,
    // shifts by immediate
    Sll,
    Srl,
    Sra,
    // multiply / divide
    Mult,
    Multu,
    Div,
    Divu,
    Mfhi,
    Mflo,
    // loads / stores
    Lb,
    Lbu,
    Lh,
    Lhu,
    Lw,
    Lwl,
    Lwr,
    Ld,
    Sb,
    Sh,
    Sw,
    Swl,
    Swr,
    Sd,
    Lwc1,
    Ldc1,
    Swc1,
    Sdc1,
    // branches
    Beq,
    Bne,
    Beqz,
    Bnez,
    Blez,
    Bgtz,
    Bltz,
    Bgez,
    B,
    Beql,
    Bnel,
    Blezl,
    Bgtzl,
    Bltzl,
    Bgezl,
    Bgezal,
    Bc1f,
    Bc1t,
    Bc1fl,
    Bc1tl,
    // jumps
    J,
    Jal,
    Jalr,
    Jr,
    // traps and breaks
    Break,
    Teq,
    Tne,
    Tge,
    Tgeu,
    Tlt,
    // coprocessor 1 moves
    Mfc1,
    Mtc1,
    Cfc1,
    Ctc1,
    // coprocessor 1 arithmetic
    AddS,
    AddD,
    SubS,
    SubD,
    MulS,
    MulD,
    DivS,
    DivD,
    MovS,
    MovD,
    NegS,
    NegD,
    SqrtS,
    CvtSW,
    CvtDW,
    CvtDS,
    CvtSD,
    CvtWD,
    CvtWS,
    TruncWS,
    TruncWD,
    CLtS,
    CLeS,
    CEqS,
    CLtD,
    CLeD,
    CEqD,
    Nop,
    /// Anything the decoder does not model.
    Unknown,
}

/// Opcode class used by the liveness transfer functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferKind {
    /// No tracked register traffic.
    Nop,
    /// One source.
    OneSrc,
    /// Two sources.
    TwoSrc,
    /// One destination.
    OneDst,
    /// One destination, one source.
    DstSrc,
    /// One destination, two sources.
    DstTwoSrc,
    /// HI/LO out, two sources.
    LoHiTwoSrc,
    /// One source in the second operand position (FP load/store base).
    SrcPos1,
}

impl Op {
    /// The instruction writes its `rt` field.
    pub fn modifies_rt(self) -> bool {
        matches!(
            self,
            Op::Addi
                | Op::Addiu
                | Op::Slti
                | Op::Sltiu
                | Op::Andi
                | Op::Ori
                | Op::Xori
                | Op::Lui
                | Op::Lb
                | Op::Lbu
                | Op::Lh
                | Op::Lhu
                | Op::Lw
                | Op::Lwl
                | Op::Lwr
                | Op::Ld
                | Op::Mfc1
                | Op::Cfc1
        )
    }

    /// The instruction writes its `rd` field.
    pub fn modifies_rd(self) -> bool {
        matches!(
            self,
            Op::Add
                | Op::Addu
                | Op::Sub
                | Op::Subu
                | Op::And
                | Op::Or
                | Op::Xor
                | Op::Nor
                | Op::Slt
                | Op::Sltu
                | Op::Sll
                | Op::Srl
                | Op::Sra
                | Op::Sllv
                | Op::Srlv
                | Op::Srav
                | Op::Move
                | Op::Negu
                | Op::Not
                | Op::Mfhi
                | Op::Mflo
                | Op::Jalr
        )
    }

    /// The instruction reads its `rs` field as a GPR.
    pub fn reads_rs(self) -> bool {
        matches!(
            self,
            Op::Add
                | Op::Addu
                | Op::Sub
                | Op::Subu
                | Op::And
                | Op::Or
                | Op::Xor
                | Op::Nor
                | Op::Slt
                | Op::Sltu
                | Op::Sllv
                | Op::Srlv
                | Op::Srav
                | Op::Move
                | Op::Not
                | Op::Addi
                | Op::Addiu
                | Op::Slti
                | Op::Sltiu
                | Op::Andi
                | Op::Ori
                | Op::Xori
                | Op::Mult
                | Op::Multu
                | Op::Div
                | Op::Divu
                | Op::Lb
                | Op::Lbu
                | Op::Lh
                | Op::Lhu
                | Op::Lw
                | Op::Lwl
                | Op::Lwr
                | Op::Ld
                | Op::Sb
                | Op::Sh
                | Op::Sw
                | Op::Swl
                | Op::Swr
                | Op::Sd
                | Op::Lwc1
                | Op::Ldc1
                | Op::Swc1
                | Op::Sdc1
                | Op::Beq
                | Op::Bne
                | Op::Beqz
                | Op::Bnez
                | Op::Blez
                | Op::Bgtz
                | Op::Bltz
                | Op::Bgez
                | Op::Beql
                | Op::Bnel
                | Op::Blezl
                | Op::Bgtzl
                | Op::Bltzl
                | Op::Bgezl
                | Op::Bgezal
                | Op::Jalr
                | Op::Jr
                | Op::Teq
                | Op::Tne
                | Op::Tge
                | Op::Tgeu
                | Op::Tlt
        )
    }

    /// The instruction reads its `rt` field as a GPR.
    pub fn reads_rt(self) -> bool {
        matches!(
            self,
            Op::Add
                | Op::Addu
                | Op::Sub
                | Op::Subu
                | Op::And
                | Op::Or
                | Op::Xor
                | Op::Nor
                | Op::Slt
                | Op::Sltu
                | Op::Sll
                | Op::Srl
                | Op::Sra
                | Op::Sllv
                | Op::Srlv
                | Op::Srav
                | Op::Negu
                | Op::Mult
                | Op::Multu
                | Op::Div
                | Op::Divu
                | Op::Sb
                | Op::Sh
                | Op::Sw
                | Op::Swl
                | Op::Swr
                | Op::Sd
                | Op::Beq
                | Op::Bne
                | Op::Beql
                | Op::Bnel
                | Op::Teq
                | Op::Tne
                | Op::Tge
                | Op::Tgeu
                | Op::Tlt
                | Op::Mtc1
                | Op::Ctc1
        )
    }

    /// Conditional branch, including the FP condition branches and `b`.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Op::Beq
                | Op::Bne
                | Op::Beqz
                | Op::Bnez
                | Op::Blez
                | Op::Bgtz
                | Op::Bltz
                | Op::Bgez
                | Op::B
                | Op::Bgezal
                | Op::Bc1f
                | Op::Bc1t
        ) || self.is_branch_likely()
    }

    /// Branch-likely variant (delay slot squashed when not taken).
    pub fn is_branch_likely(self) -> bool {
        matches!(
            self,
            Op::Beql | Op::Bnel | Op::Blezl | Op::Bgtzl | Op::Bltzl | Op::Bgezl | Op::Bc1fl | Op::Bc1tl
        )
    }

    /// Register or absolute jump.
    pub fn is_jump(self) -> bool {
        matches!(self, Op::J | Op::Jal | Op::Jalr | Op::Jr)
    }

    /// Any control transfer (used to suppress dead-code annotations and to
    /// collect label addresses).
    pub fn is_control_transfer(self) -> bool {
        self.is_branch() || self.is_jump()
    }

    /// Uses the zero-extended immediate (the logical immediates); everything
    /// else with a 16-bit immediate sign-extends it.
    pub fn has_unsigned_imm(self) -> bool {
        matches!(self, Op::Andi | Op::Ori | Op::Xori | Op::Lui)
    }

    /// Liveness transfer class. FP arithmetic is deliberately `Nop`: the FP
    /// register file is not tracked by the GPR dataflow.
    pub fn transfer_kind(self) -> TransferKind {
        match self {
            Op::Add
            | Op::Addu
            | Op::Addi
            | Op::Addiu
            | Op::Andi
            | Op::Ori
            | Op::Lb
            | Op::Lbu
            | Op::Lh
            | Op::Lhu
            | Op::Lw
            | Op::Lwl
            | Op::Move
            | Op::Negu
            | Op::Not
            | Op::Sll
            | Op::Slti
            | Op::Sltiu
            | Op::Sra
            | Op::Srl
            | Op::Xori
            | Op::Mfhi
            | Op::Mflo => TransferKind::DstSrc,

            Op::And
            | Op::Or
            | Op::Nor
            | Op::Sllv
            | Op::Slt
            | Op::Sltu
            | Op::Srav
            | Op::Srlv
            | Op::Subu
            | Op::Xor => TransferKind::DstTwoSrc,

            Op::Cfc1 | Op::Mfc1 | Op::Lui => TransferKind::OneDst,

            Op::Ctc1
            | Op::Bgez
            | Op::Bgezl
            | Op::Bgtz
            | Op::Bgtzl
            | Op::Blez
            | Op::Blezl
            | Op::Bltz
            | Op::Bltzl
            | Op::Beqz
            | Op::Bnez
            | Op::Mtc1
            | Op::Jalr
            | Op::Jr => TransferKind::OneSrc,

            Op::Beq
            | Op::Beql
            | Op::Bne
            | Op::Bnel
            | Op::Sb
            | Op::Sh
            | Op::Sw
            | Op::Swl
            | Op::Tne
            | Op::Teq
            | Op::Tge
            | Op::Tgeu
            | Op::Tlt => TransferKind::TwoSrc,

            Op::Div | Op::Divu | Op::Mult | Op::Multu => TransferKind::LoHiTwoSrc,

            Op::Lwc1 | Op::Ldc1 | Op::Swc1 | Op::Sdc1 => TransferKind::SrcPos1,

            _ => TransferKind::Nop,
        }
    }
}
