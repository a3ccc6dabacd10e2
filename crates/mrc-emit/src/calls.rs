//! Call lowering: extern wrappers with O32 marshalling, and direct calls
//! to recompiled functions.

use mrc_isa::abi::{call_plan, find_extern, ArgLoc, RetKind};
use mrc_isa::{FPR_FA0, FPR_FV0, REG_A0};

use crate::emitter::{dr, fr, r, Emitter};
use crate::{EmitError, Result};

impl<'e, 'a> Emitter<'e, 'a> {
    pub(crate) fn dump_jal(&mut self, i: usize) -> Result<()> {
        let target = self.program.insns[i].target();
        let extern_fn = self
            .program
            .image
            .symbol(target)
            .and_then(find_extern);

        // the delay slot runs before the transfer
        self.dump_instr(i + 1)?;

        match extern_fn {
            Some(f) => self.dump_extern_call(f)?,
            None => self.dump_internal_call(i, target)?,
        }

        let cont = self.program.index_to_vram(i + 2);
        self.push(&format!("goto L{cont:x};\n"));
        self.program.label_addresses.insert(cont);
        Ok(())
    }

    fn dump_extern_call(&mut self, f: &'static mrc_isa::abi::ExternFunction) -> Result<()> {
        let plan = call_plan(f);

        if f.is_vararg() {
            // bridge the register arguments onto the stack
            for j in 0..4u8 {
                self.push(&format!("MEM_U32(sp + {}) = {};\n", j as u32 * 4, r(REG_A0 + j)));
            }
        }

        match plan.ret {
            RetKind::Void => {}
            RetKind::Word => self.push("v0 = "),
            RetKind::Float => self.push(&format!("{} = ", fr(FPR_FV0))),
            RetKind::Double => self.push("tempf64 = "),
            RetKind::Pair => self.push("temp64 = "),
        }

        self.push(&format!("wrapper_{}(", f.name));
        let mut first = true;
        if f.takes_mem() {
            self.push("mem");
            first = false;
        }

        for slot in &plan.args {
            if !first {
                self.push(", ");
            }
            first = false;

            if slot.trampoline {
                self.push("trampoline, ");
            }

            match slot.loc {
                ArgLoc::Gpr(n) => self.push(r(REG_A0 + n)),
                ArgLoc::Stack { pos, signed } => {
                    let kind = if signed { 'S' } else { 'U' };
                    self.push(&format!("MEM_{kind}32(sp + {pos})"));
                }
                ArgLoc::FloatFpr { pos_float } => self.push(&fr(FPR_FA0 + pos_float)),
                ArgLoc::FloatGpr(n) => {
                    self.push(&format!("BITCAST_U32_TO_F32({})", r(REG_A0 + n)));
                }
                ArgLoc::FloatStack { pos } => {
                    self.push(&format!("BITCAST_U32_TO_F32(MEM_U32(sp + {pos}))"));
                }
                ArgLoc::DoubleFpr { pos_float } => {
                    self.push(&format!("double_from_FloatReg({})", dr(FPR_FA0 + pos_float)));
                }
                ArgLoc::DoubleGprPair(n) => {
                    self.push(&format!(
                        "BITCAST_U64_TO_F64(((uint64_t){} << 32) | (uint64_t){})",
                        r(REG_A0 + n),
                        r(REG_A0 + n + 1)
                    ));
                }
                ArgLoc::DoubleStackPair { pos } => {
                    self.push(&format!(
                        "BITCAST_U64_TO_F64(((uint64_t)MEM_U32(sp + {}) << 32) | (uint64_t)MEM_U32(sp + {}))",
                        pos,
                        pos + 4
                    ));
                }
                ArgLoc::PairGpr { idx, signed } => {
                    if signed {
                        self.push("(int64_t)");
                    }
                    self.push(&format!(
                        "(((uint64_t){} << 32) | (uint64_t){})",
                        r(REG_A0 + idx),
                        r(REG_A0 + idx + 1)
                    ));
                }
                ArgLoc::PairStack { pos, signed } => {
                    if signed {
                        self.push("(int64_t)");
                    }
                    self.push(&format!(
                        "(((uint64_t)MEM_U32(sp + {}) << 32) | (uint64_t)MEM_U32(sp + {}))",
                        pos,
                        pos + 4
                    ));
                }
            }
        }

        if plan.needs_sp {
            self.push(if first { "sp" } else { ", sp" });
        }
        self.push(");\n");

        match plan.ret {
            RetKind::Pair => {
                self.push("v0 = (uint32_t)(temp64 >> 32);\n");
                self.push("v1 = (uint32_t)temp64;\n");
            }
            RetKind::Double => {
                self.push(&format!("{} = FloatReg_from_double(tempf64);\n", dr(FPR_FV0)));
            }
            _ => {}
        }
        Ok(())
    }

    fn dump_internal_call(&mut self, i: usize, target: u32) -> Result<()> {
        let vaddr = self.program.index_to_vram(i);
        let f = self
            .program
            .functions
            .get(&target)
            .ok_or(EmitError::UnknownCallTarget(vaddr, target))?
            .clone();

        match f.nret {
            1 => self.push("v0 = "),
            2 => self.push("temp64 = "),
            _ => {}
        }

        let name = self.function_name(target);
        self.push(&name);
        self.push("(mem, sp");
        if f.v0_in {
            self.push(", v0");
        }
        for n in 0..f.nargs {
            self.push(&format!(", {}", r(REG_A0 + n as u8)));
        }
        self.push(");\n");

        if f.nret == 2 {
            self.push("v0 = (uint32_t)(temp64 >> 32);\n");
            self.push("v1 = (uint32_t)temp64;\n");
        }
        Ok(())
    }
}
