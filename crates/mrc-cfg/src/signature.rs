//! Stage 6: per-function signature inference from intersected liveness.

use tracing::debug;

use mrc_isa::{RegMask, REG_A0, REG_V0, REG_V1};

use crate::Program;

/// Derive `nargs`, `nret` and `v0_in` for every function.
pub fn run(program: &mut Program) {
    let entries: Vec<u32> = program.functions.keys().copied().collect();

    for entry in entries {
        let returns = program.functions[&entry].returns.clone();

        let mut nret = 0u32;
        for ret in returns {
            let insn = &program.insns[program.addr_to_index(ret)];
            let both = insn.f_liveout & insn.b_liveout;
            if both.intersects(RegMask::reg(REG_V1)) {
                nret = 2;
            } else if both.intersects(RegMask::reg(REG_V0)) && nret == 0 {
                nret = 1;
            }
        }

        let entry_insn = &program.insns[program.addr_to_index(entry)];
        let both = entry_insn.f_livein & entry_insn.b_livein;

        let mut nargs = 0u32;
        for i in 0..4u8 {
            if both.intersects(RegMask::reg(REG_A0 + i)) {
                nargs = 1 + i as u32;
            }
        }
        let v0_live = both.intersects(RegMask::reg(REG_V0));

        let f = program.functions.get_mut(&entry).expect("known entry");
        f.nret = nret;
        f.nargs = nargs;
        f.v0_in = v0_live && !f.referenced_by_function_pointer;
    }

    debug!("inferred signatures");
}

#[cfg(test)]
mod tests {
    use mrc_isa::*;

    use crate::testutil::*;
    use crate::{disasm, functions, graph, liveness, pointers, resolve, signature};

    #[test]
    fn test_void_function_signature() {
        // callee stores to memory and returns nothing:
        //   sw a0, 0(a1); jr ra; nop
        let callee = TEXT_BASE + 0x10;
        let image = ImageBuilder::new()
            .text(&[
                encode_jal(callee),
                0,
                encode_jr(REG_RA),
                0,
                encode_sw(REG_A0, REG_A1, 0),
                encode_jr(REG_RA),
                0,
                0,
            ])
            .func_symbol(callee, "store")
            .build();
        let mut p = program(&image);
        disasm::run(&mut p);
        pointers::run(&mut p);
        resolve::run(&mut p).unwrap();
        functions::run(&mut p).unwrap();
        graph::run(&mut p).unwrap();
        liveness::forward(&mut p).unwrap();
        liveness::backward(&mut p).unwrap();
        signature::run(&mut p);

        let f = &p.functions[&callee];
        assert_eq!(f.nret, 0);
        assert_eq!(f.nargs, 2);
        assert!(!f.v0_in);
    }
}
