//! Per-instruction lowering to straight-line C statements.

use mrc_isa::{Op, TransferKind, RegMask, REG_HI, REG_LO, REG_RA};

use crate::emitter::{dr, fr, r, wr, Emitter};
use crate::{EmitError, Result};

impl<'e, 'a> Emitter<'e, 'a> {
    /// Emit one instruction. Branch arms pull their delay slot in before
    /// the `goto`, so the delay slot appears once inside the taken path and
    /// once at its own address for the fallthrough path.
    pub(crate) fn dump_instr(&mut self, i: usize) -> Result<()> {
        let vaddr = self.program.index_to_vram(i);
        if let Some(name) = self.program.image.symbol(vaddr) {
            let line = format!("//{name}:\n");
            self.push(&line);
        }

        if let Some(note) = self.dead_annotation(i) {
            self.push(&note);
        }

        let insn = &self.program.insns[i];
        let orig = insn.orig;
        let op = insn.op();
        let imm = insn.imm();
        let uimm = imm as u32;
        let (rs, rt, rd, sa) = (r(orig.rs()), r(orig.rt()), r(orig.rd()), orig.sa());
        let (fs, ft, fd) = (orig.fs(), orig.ft(), orig.fd());

        match op {
            Op::Add | Op::Addu => {
                self.push(&format!("{rd} = {rs} + {rt};\n"));
            }
            Op::AddS => {
                self.push(&format!("{} = {} + {};\n", fr(fd), fr(fs), fr(ft)));
            }
            Op::AddD => {
                self.push(&format!(
                    "{} = FloatReg_from_double(double_from_FloatReg({}) + double_from_FloatReg({}));\n",
                    dr(fd), dr(fs), dr(ft)
                ));
            }
            Op::Addi | Op::Addiu => {
                self.push(&format!("{rt} = {rs} + 0x{uimm:x};\n"));
            }
            Op::And => {
                self.push(&format!("{rd} = {rs} & {rt};\n"));
            }
            Op::Andi => {
                self.push(&format!("{rt} = {rs} & 0x{uimm:x};\n"));
            }

            Op::Beq => self.dump_cond_branch(i, rs, "==", rt)?,
            Op::Beql => self.dump_cond_branch_likely(i, rs, "==", rt)?,
            Op::Bgez => self.dump_cond_branch(i, rs, ">=", "0")?,
            Op::Bgezl => self.dump_cond_branch_likely(i, rs, ">=", "0")?,
            Op::Bgtz => self.dump_cond_branch(i, rs, ">", "0")?,
            Op::Bgtzl => self.dump_cond_branch_likely(i, rs, ">", "0")?,
            Op::Blez => self.dump_cond_branch(i, rs, "<=", "0")?,
            Op::Blezl => self.dump_cond_branch_likely(i, rs, "<=", "0")?,
            Op::Bltz => self.dump_cond_branch(i, rs, "<", "0")?,
            Op::Bltzl => self.dump_cond_branch_likely(i, rs, "<", "0")?,
            Op::Bne => self.dump_cond_branch(i, rs, "!=", rt)?,
            Op::Bnel => self.dump_cond_branch_likely(i, rs, "!=", rt)?,
            Op::Beqz => self.dump_cond_branch(i, rs, "==", "0")?,
            Op::Bnez => self.dump_cond_branch(i, rs, "!=", "0")?,

            Op::Break => {
                self.push("abort();\n");
            }

            Op::B => {
                self.dump_instr(i + 1)?;
                let target = self.program.insns[i].branch_target();
                self.push(&format!("goto L{target:x};\n"));
            }

            Op::Bc1f | Op::Bc1t => {
                let cond = if op == Op::Bc1f { "!cf" } else { "cf" };
                self.push(&format!("if ({cond}) {{"));
                self.dump_instr(i + 1)?;
                let target = self.program.insns[i].branch_target();
                self.push(&format!("goto L{target:x};}}\n"));
            }
            Op::Bc1fl | Op::Bc1tl => {
                let cond = if op == Op::Bc1fl { "!cf" } else { "cf" };
                self.push(&format!("if ({cond}) {{"));
                self.dump_instr(i + 1)?;
                let target = self.program.insns[i].branch_target();
                self.push(&format!("goto L{target:x};}}\n"));
                let skip = self.program.index_to_vram(i + 2);
                self.push(&format!("else goto L{skip:x};\n"));
                self.program.label_addresses.insert(skip);
            }

            Op::CLtS => {
                self.push(&format!("cf = {} < {};\n", fr(fs), fr(ft)));
            }
            Op::CLeS => {
                self.push(&format!("cf = {} <= {};\n", fr(fs), fr(ft)));
            }
            Op::CEqS => {
                self.push(&format!("cf = {} == {};\n", fr(fs), fr(ft)));
            }
            Op::CLtD => {
                self.push(&format!(
                    "cf = double_from_FloatReg({}) < double_from_FloatReg({});\n",
                    dr(fs), dr(ft)
                ));
            }
            Op::CLeD => {
                self.push(&format!(
                    "cf = double_from_FloatReg({}) <= double_from_FloatReg({});\n",
                    dr(fs), dr(ft)
                ));
            }
            Op::CEqD => {
                self.push(&format!(
                    "cf = double_from_FloatReg({}) == double_from_FloatReg({});\n",
                    dr(fs), dr(ft)
                ));
            }

            Op::CvtSW => {
                self.push(&format!("{} = (int){};\n", fr(fd), wr(fs)));
            }
            Op::CvtDW => {
                self.push(&format!("{} = FloatReg_from_double((int){});\n", dr(fd), wr(fs)));
            }
            Op::CvtDS => {
                self.push(&format!("{} = FloatReg_from_double({});\n", dr(fd), fr(fs)));
            }
            Op::CvtSD => {
                self.push(&format!("{} = double_from_FloatReg({});\n", fr(fd), dr(fs)));
            }
            Op::CvtWD => {
                self.push(&format!(
                    "{} = cvt_w_d(double_from_FloatReg({}));\n",
                    wr(fd), dr(fs)
                ));
            }
            Op::CvtWS => {
                self.push(&format!("{} = cvt_w_s({});\n", wr(fd), fr(fs)));
            }

            Op::Cfc1 => {
                if orig.fs() != 31 {
                    return Err(EmitError::UnexpectedControlRegister(vaddr));
                }
                self.push(&format!("{rt} = fcsr;\n"));
            }
            Op::Ctc1 => {
                if orig.fs() != 31 {
                    return Err(EmitError::UnexpectedControlRegister(vaddr));
                }
                self.push(&format!("fcsr = {rt};\n"));
            }

            Op::Div => {
                self.push(&format!("lo = (int){rs} / (int){rt}; "));
                self.push(&format!("hi = (int){rs} % (int){rt};\n"));
            }
            Op::Divu => {
                self.push(&format!("lo = {rs} / {rt}; "));
                self.push(&format!("hi = {rs} % {rt};\n"));
            }
            Op::DivS => {
                self.push(&format!("{} = {} / {};\n", fr(fd), fr(fs), fr(ft)));
            }
            Op::DivD => {
                self.push(&format!(
                    "{} = FloatReg_from_double(double_from_FloatReg({}) / double_from_FloatReg({}));\n",
                    dr(fd), dr(fs), dr(ft)
                ));
            }

            Op::MovS => {
                self.push(&format!("{} = {};\n", fr(fd), fr(fs)));
            }
            Op::MovD => {
                self.push(&format!("{} = {};\n", dr(fd), dr(fs)));
            }
            Op::MulS => {
                self.push(&format!("{} = {} * {};\n", fr(fd), fr(fs), fr(ft)));
            }
            Op::MulD => {
                self.push(&format!(
                    "{} = FloatReg_from_double(double_from_FloatReg({}) * double_from_FloatReg({}));\n",
                    dr(fd), dr(fs), dr(ft)
                ));
            }
            Op::Negu => {
                self.push(&format!("{rd} = -{rt};\n"));
            }
            Op::NegS => {
                self.push(&format!("{} = -{};\n", fr(fd), fr(fs)));
            }
            Op::NegD => {
                self.push(&format!(
                    "{} = FloatReg_from_double(-double_from_FloatReg({}));\n",
                    dr(fd), dr(fs)
                ));
            }
            Op::SubS => {
                self.push(&format!("{} = {} - {};\n", fr(fd), fr(fs), fr(ft)));
            }
            Op::SubD => {
                self.push(&format!(
                    "{} = FloatReg_from_double(double_from_FloatReg({}) - double_from_FloatReg({}));\n",
                    dr(fd), dr(fs), dr(ft)
                ));
            }
            Op::SqrtS => {
                self.push(&format!("{} = sqrtf({});\n", fr(fd), fr(fs)));
            }
            Op::TruncWS => {
                self.push(&format!("{} = (int){};\n", wr(fd), fr(fs)));
            }
            Op::TruncWD => {
                self.push(&format!(
                    "{} = (int)double_from_FloatReg({});\n",
                    wr(fd), dr(fs)
                ));
            }

            Op::J => {
                self.dump_instr(i + 1)?;
                let target = self.program.insns[i].target();
                self.push(&format!("goto L{target:x};\n"));
            }
            Op::Jal => self.dump_jal(i)?,
            Op::Jalr => {
                self.push(&format!("fp_dest = {rs};\n"));
                self.dump_instr(i + 1)?;
                self.push("temp64 = trampoline(mem, sp, a0, a1, a2, a3, fp_dest);\n");
                self.push("v0 = (uint32_t)(temp64 >> 32);\n");
                self.push("v1 = (uint32_t)temp64;\n");
                let cont = self.program.index_to_vram(i + 2);
                self.push(&format!("goto L{cont:x};\n"));
                self.program.label_addresses.insert(cont);
            }
            Op::Jr => self.dump_jr(i)?,

            Op::Lb => {
                self.push(&format!("{rt} = MEM_S8({rs} + {imm});\n"));
            }
            Op::Lbu => {
                self.push(&format!("{rt} = MEM_U8({rs} + {imm});\n"));
            }
            Op::Lh => {
                self.push(&format!("{rt} = MEM_S16({rs} + {imm});\n"));
            }
            Op::Lhu => {
                self.push(&format!("{rt} = MEM_U16({rs} + {imm});\n"));
            }
            Op::Lui => {
                self.push(&format!("{rt} = 0x{:x};\n", uimm << 16));
            }
            Op::Lw => {
                self.push(&format!("{rt} = MEM_U32({rs} + {imm});\n"));
            }
            Op::Lwc1 => {
                self.push(&format!("{} = MEM_U32({rs} + {imm});\n", wr(ft)));
            }
            Op::Ldc1 => {
                if ft % 2 != 0 {
                    return Err(EmitError::OddDoubleRegister(vaddr));
                }
                self.push(&format!("{} = MEM_U32({rs} + {imm});\n", wr(ft + 1)));
                self.push(&format!("{} = MEM_U32({rs} + {imm} + 4);\n", wr(ft)));
            }
            Op::Lwl => {
                self.push(&format!("{rt} = {rs} + {imm}; "));
                self.push(&format!(
                    "{rt} = (MEM_U8({rt}) << 24) | (MEM_U8({rt} + 1) << 16) | (MEM_U8({rt} + 2) << 8) | MEM_U8({rt} + 3);\n"
                ));
            }
            Op::Lwr => {
                // merged into the preceding LWL pair by the compilers we
                // accept; nothing to do on its own
            }

            Op::Mfc1 => {
                self.push(&format!("{rt} = {};\n", wr(fs)));
            }
            Op::Mfhi => {
                self.push(&format!("{rd} = hi;\n"));
            }
            Op::Mflo => {
                self.push(&format!("{rd} = lo;\n"));
            }
            Op::Move => {
                // rewritten ADDIUs keep their I-type destination field
                let dest = if orig.op.modifies_rt() { rt } else { rd };
                self.push(&format!("{dest} = {rs};\n"));
            }
            Op::Mtc1 => {
                self.push(&format!("{} = {rt};\n", wr(fs)));
            }
            Op::Mult => {
                self.push(&format!("lo = {rs} * {rt};\n"));
                self.push(&format!(
                    "hi = (uint32_t)((int64_t)(int){rs} * (int64_t)(int){rt} >> 32);\n"
                ));
            }
            Op::Multu => {
                self.push(&format!("lo = {rs} * {rt};\n"));
                self.push(&format!(
                    "hi = (uint32_t)((uint64_t){rs} * (uint64_t){rt} >> 32);\n"
                ));
            }

            Op::Nor => {
                self.push(&format!("{rd} = ~({rs} | {rt});\n"));
            }
            Op::Not => {
                self.push(&format!("{rd} = ~{rs};\n"));
            }
            Op::Or => {
                self.push(&format!("{rd} = {rs} | {rt};\n"));
            }
            Op::Ori => {
                self.push(&format!("{rt} = {rs} | 0x{uimm:x};\n"));
            }

            Op::Sb => {
                self.push(&format!("MEM_U8({rs} + {imm}) = (uint8_t){rt};\n"));
            }
            Op::Sh => {
                self.push(&format!("MEM_U16({rs} + {imm}) = (uint16_t){rt};\n"));
            }
            Op::Sll => {
                self.push(&format!("{rd} = {rt} << {sa};\n"));
            }
            Op::Sllv => {
                self.push(&format!("{rd} = {rt} << ({rs} & 0x1f);\n"));
            }
            Op::Slt => {
                self.push(&format!("{rd} = (int){rs} < (int){rt};\n"));
            }
            Op::Slti => {
                self.push(&format!("{rt} = (int){rs} < (int)0x{uimm:x};\n"));
            }
            Op::Sltiu => {
                self.push(&format!("{rt} = {rs} < 0x{uimm:x};\n"));
            }
            Op::Sltu => {
                self.push(&format!("{rd} = {rs} < {rt};\n"));
            }
            Op::Sra => {
                self.push(&format!("{rd} = (int){rt} >> {sa};\n"));
            }
            Op::Srav => {
                self.push(&format!("{rd} = (int){rt} >> ({rs} & 0x1f);\n"));
            }
            Op::Srl => {
                self.push(&format!("{rd} = {rt} >> {sa};\n"));
            }
            Op::Srlv => {
                self.push(&format!("{rd} = {rt} >> ({rs} & 0x1f);\n"));
            }
            Op::Subu => {
                self.push(&format!("{rd} = {rs} - {rt};\n"));
            }
            Op::Sw => {
                self.push(&format!("MEM_U32({rs} + {imm}) = {rt};\n"));
            }
            Op::Swc1 => {
                self.push(&format!("MEM_U32({rs} + {imm}) = {};\n", wr(ft)));
            }
            Op::Sdc1 => {
                if ft % 2 != 0 {
                    return Err(EmitError::OddDoubleRegister(vaddr));
                }
                self.push(&format!("MEM_U32({rs} + {imm}) = {};\n", wr(ft + 1)));
                self.push(&format!("MEM_U32({rs} + {imm} + 4) = {};\n", wr(ft)));
            }
            Op::Swl => {
                for k in 0..4 {
                    self.push(&format!(
                        "MEM_U8({rs} + {imm} + {k}) = (uint8_t)({rt} >> {});\n",
                        (3 - k) * 8
                    ));
                }
            }
            Op::Swr => {
                self.push("//swr\n");
            }

            Op::Xor => {
                self.push(&format!("{rd} = {rs} ^ {rt};\n"));
            }
            Op::Xori => {
                self.push(&format!("{rt} = {rs} ^ 0x{uimm:x};\n"));
            }

            Op::Tne => {
                self.push(&format!("assert({rs} == {rt} && \"tne {imm}\");\n"));
            }
            Op::Teq => {
                self.push(&format!("assert({rs} != {rt} && \"teq {imm}\");\n"));
            }
            Op::Tge => {
                self.push(&format!("assert((int){rs} < (int){rt} && \"tge {imm}\");\n"));
            }
            Op::Tgeu => {
                self.push(&format!("assert({rs} < {rt} && \"tgeu {imm}\");\n"));
            }
            Op::Tlt => {
                self.push(&format!("assert((int){rs} >= (int){rt} && \"tlt {imm}\");\n"));
            }

            Op::Nop => {
                self.push("//nop;\n");
            }

            _ => {
                self.push(&format!("UNIMPLEMENTED 0x{:X}\n", orig.word));
            }
        }
        Ok(())
    }

    fn dump_cond_branch(&mut self, i: usize, lhs: &str, cmp: &str, rhs: &str) -> Result<()> {
        let (cast1, cast2) = if cmp != "==" && cmp != "!=" {
            ("(int)", if rhs != "0" { "(int)" } else { "" })
        } else {
            ("", "")
        };
        self.push(&format!("if ({cast1}{lhs} {cmp} {cast2}{rhs}) {{"));
        self.dump_instr(i + 1)?;
        let target = self.program.insns[i].branch_target();
        self.push(&format!("goto L{target:x};}}\n"));
        Ok(())
    }

    fn dump_cond_branch_likely(&mut self, i: usize, lhs: &str, cmp: &str, rhs: &str) -> Result<()> {
        self.dump_cond_branch(i, lhs, cmp, rhs)?;
        let skip = self.program.index_to_vram(i + 2);
        self.push(&format!("else goto L{skip:x};\n"));
        self.program.label_addresses.insert(skip);
        Ok(())
    }

    fn dump_jr(&mut self, i: usize) -> Result<()> {
        let vaddr = self.program.index_to_vram(i);

        if let Some(jtbl) = self.program.insns[i].jtbl {
            let rodata = self
                .program
                .image
                .rodata
                .as_ref()
                .ok_or(EmitError::UnsupportedJump(vaddr))?;
            let base = (jtbl.addr - rodata.vaddr) as usize;
            let targets: Vec<u32> = (0..jtbl.num_cases as usize)
                .map(|c| {
                    rodata
                        .word_at(base + c * 4)
                        .wrapping_add(self.program.image.gp_value)
                })
                .collect();

            // a label may precede, so open with an empty statement
            self.push(&format!(";static void *const Lswitch{:x}[] = {{\n", jtbl.addr));
            for dest in targets {
                self.push(&format!("&&L{dest:x},\n"));
                self.program.label_addresses.insert(dest);
            }
            self.push("};\n");
            self.push(&format!(
                "dest = Lswitch{:x}[{}];\n",
                jtbl.addr,
                r(jtbl.index_reg)
            ));
            self.dump_instr(i + 1)?;
            self.push("goto *dest;\n");
            return Ok(());
        }

        if self.program.insns[i].orig.rs() != REG_RA {
            return Err(EmitError::UnsupportedJump(vaddr));
        }

        self.dump_instr(i + 1)?;
        let nret = self
            .program
            .find_function_entry(vaddr)
            .and_then(|entry| self.program.functions.get(&entry))
            .map(|f| f.nret)
            .unwrap_or(0);
        match nret {
            0 => self.push("return;\n"),
            1 => self.push("return v0;\n"),
            _ => self.push("return ((uint64_t)v0 << 32) | v1;\n"),
        }
        Ok(())
    }

    /// Dead-instruction diagnostics from the liveness results. Emitted as a
    /// block comment so the statement itself survives.
    fn dead_annotation(&self, i: usize) -> Option<String> {
        let insn = &self.program.insns[i];
        if insn.op().is_control_transfer() || self.conservative {
            return None;
        }

        let fdead = Some(format!("/* fdead {:x} */ ", insn.f_livein.bits()));
        let bdead = Some(format!("/* bdead {:x} */ ", insn.b_liveout.bits()));

        match insn.op().transfer_kind() {
            TransferKind::OneSrc | TransferKind::SrcPos1 => {
                if !insn.f_livein.intersects(insn.single_source_mask()) {
                    return fdead;
                }
            }
            TransferKind::TwoSrc => {
                if !insn.f_livein.contains_all(insn.all_source_mask()) {
                    return fdead;
                }
            }
            TransferKind::DstTwoSrc => {
                if !insn.f_livein.intersects(RegMask::reg(insn.orig.rt())) {
                    return fdead;
                }
                if !insn.f_livein.intersects(insn.single_source_mask()) {
                    return fdead;
                }
                if !insn.b_liveout.intersects(insn.dest_mask()) {
                    return bdead;
                }
            }
            TransferKind::DstSrc => {
                if !insn.f_livein.intersects(insn.single_source_mask()) {
                    return fdead;
                }
                if !insn.b_liveout.intersects(insn.dest_mask()) {
                    return bdead;
                }
            }
            TransferKind::OneDst => {
                if !insn.b_liveout.intersects(insn.dest_mask()) {
                    return bdead;
                }
            }
            TransferKind::LoHiTwoSrc => {
                if !insn.f_livein.contains_all(insn.all_source_mask()) {
                    return fdead;
                }
                let lohi = RegMask::reg(REG_HI) | RegMask::reg(REG_LO);
                if !insn.b_liveout.intersects(lohi) {
                    return bdead;
                }
            }
            TransferKind::Nop => {}
        }
        None
    }
}
