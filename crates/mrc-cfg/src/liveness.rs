//! Stages 4 and 5: forward and backward liveness.
//!
//! Both passes are worklist fixed-points over the instruction graph with
//! edge-kind-specific masks. Register sets only ever grow, so termination
//! is bounded by the mask width times the edge count.

use tracing::debug;

use mrc_isa::abi::{self, ExternFunction};
use mrc_isa::{
    RegMask, TransferKind, REG_A0, REG_A1, REG_A2, REG_A3, REG_HI, REG_LO, REG_SP, REG_V0, REG_V1,
    REG_ZERO,
};

use crate::{AnalysisError, Program, Result};

fn arg_regs() -> RegMask {
    RegMask::reg(REG_A0) | RegMask::reg(REG_A1) | RegMask::reg(REG_A2) | RegMask::reg(REG_A3)
}

fn entry_mask() -> RegMask {
    // what survives into a called function
    RegMask::REACHABLE
        | RegMask::reg(REG_V0)
        | arg_regs()
        | RegMask::reg(REG_SP)
        | RegMask::reg(REG_ZERO)
}

fn exit_mask() -> RegMask {
    // what survives back out of a called function
    RegMask::REACHABLE | RegMask::reg(REG_V0) | RegMask::reg(REG_V1) | RegMask::reg(REG_ZERO)
}

/// The extern called by the `JAL` at `jal_index`.
fn extern_at(program: &Program, jal_index: usize) -> Result<&'static ExternFunction> {
    let address = program.insns[jal_index].target();
    let name = program
        .image
        .symbol(address)
        .ok_or(AnalysisError::UnnamedExtern(address))?;
    abi::find_extern(name).ok_or_else(|| AnalysisError::MissingExtern(name.to_string()))
}

struct Worklist {
    stack: Vec<usize>,
    queued: Vec<bool>,
}

impl Worklist {
    fn new(len: usize) -> Worklist {
        Worklist {
            stack: Vec::new(),
            queued: vec![false; len],
        }
    }

    fn push(&mut self, i: usize) {
        if !self.queued[i] {
            self.queued[i] = true;
            self.stack.push(i);
        }
    }

    fn pop(&mut self) -> Option<usize> {
        let i = self.stack.pop()?;
        self.queued[i] = false;
        Some(i)
    }
}

/// Forward pass: reachability with live-in bits, seeded from `main` and
/// every address-taken function.
pub fn forward(program: &mut Program) -> Result<()> {
    let mut worklist = Worklist::new(program.insns.len());

    let livein_func_start = RegMask::function_entry_livein();
    let livein_taken = livein_func_start | RegMask::reg(REG_A2) | RegMask::reg(REG_A3);

    let main_index = program.addr_to_index(program.image.main_addr);
    program.insns[main_index].f_livein = livein_func_start;
    worklist.push(main_index);

    let pointer_targets: Vec<u32> = program
        .data_function_pointers
        .iter()
        .map(|&(_, addr)| addr)
        .chain(program.li_function_pointers.iter().copied())
        .collect();
    for addr in pointer_targets {
        let i = program.addr_to_index(addr);
        program.insns[i].f_livein = livein_taken;
        worklist.push(i);
    }

    let caller_saved = RegMask::caller_saved();
    let mut pops = 0usize;

    while let Some(i) = worklist.pop() {
        pops += 1;
        let insn = &program.insns[i];
        let mut live = insn.f_livein | RegMask::REACHABLE;

        match insn.op().transfer_kind() {
            TransferKind::OneDst => {
                live |= insn.dest_mask();
            }
            TransferKind::DstSrc => {
                if live.intersects(insn.single_source_mask()) {
                    live |= insn.dest_mask();
                }
            }
            TransferKind::DstTwoSrc => {
                let sources = insn.all_source_mask();
                if live.contains_all(sources) {
                    live |= insn.dest_mask();
                }
            }
            TransferKind::LoHiTwoSrc => {
                let sources = insn.all_source_mask();
                if live.contains_all(sources) {
                    live |= RegMask::reg(REG_HI) | RegMask::reg(REG_LO);
                }
            }
            _ => {}
        }

        if program.insns[i].f_liveout.contains_all(live) {
            continue; // no new bits
        }
        let live = live | program.insns[i].f_liveout;
        program.insns[i].f_liveout = live;

        let mut function_entry = false;
        let successors = program.insns[i].successors.clone();
        for edge in successors {
            let mut new_live = live;
            match edge.kind {
                crate::EdgeKind::FunctionExit => {
                    new_live &= exit_mask();
                }
                crate::EdgeKind::FunctionEntry => {
                    new_live &= entry_mask();
                    function_entry = true;
                }
                crate::EdgeKind::ExternCall => {
                    let f = extern_at(program, i - 1)?;
                    new_live &= !caller_saved;
                    new_live |= f.ret().result_mask();
                }
                crate::EdgeKind::IndirectCall => {
                    new_live &= !caller_saved;
                    new_live |= RegMask::reg(REG_V0) | RegMask::reg(REG_V1);
                }
                crate::EdgeKind::Flow => {}
            }

            if !program.insns[edge.target].f_livein.contains_all(new_live) {
                program.insns[edge.target].f_livein |= new_live;
                worklist.push(edge.target);
            }
        }

        if function_entry {
            // skip-call edge: callee-saved liveness flows around the callee
            let skipped = live & !caller_saved;
            if !program.insns[i + 1].f_livein.contains_all(skipped) {
                program.insns[i + 1].f_livein |= skipped;
                worklist.push(i + 1);
            }
        }
    }

    debug!(pops, "forward liveness fixed point");
    Ok(())
}

/// Backward pass: classic liveness, seeded from the returns of `main` and
/// of every address-taken function, plus every reachable instruction.
pub fn backward(program: &mut Program) -> Result<()> {
    let mut worklist = Worklist::new(program.insns.len());

    let main = program
        .functions
        .get(&program.image.main_addr)
        .ok_or(AnalysisError::MissingSymbol("main"))?;
    for addr in main.returns.clone() {
        let i = program.addr_to_index(addr);
        program.insns[i].b_liveout = RegMask::REACHABLE | RegMask::reg(REG_V0);
        worklist.push(i);
    }

    let taken: Vec<u32> = program
        .data_function_pointers
        .iter()
        .map(|&(_, addr)| addr)
        .chain(program.li_function_pointers.iter().copied())
        .collect();
    for addr in taken {
        let Some(f) = program.functions.get(&addr) else {
            continue;
        };
        for ret in f.returns.clone() {
            let i = program.addr_to_index(ret);
            program.insns[i].b_liveout =
                RegMask::REACHABLE | RegMask::reg(REG_V0) | RegMask::reg(REG_V1);
            worklist.push(i);
        }
    }

    // every reachable instruction participates
    for i in 0..program.insns.len() {
        if !program.insns[i].f_livein.is_empty() {
            worklist.push(i);
        }
    }

    let caller_saved = RegMask::caller_saved();
    let mut pops = 0usize;

    while let Some(i) = worklist.pop() {
        pops += 1;
        let insn = &program.insns[i];
        let mut live = insn.b_liveout | RegMask::REACHABLE;

        match insn.op().transfer_kind() {
            TransferKind::OneSrc | TransferKind::SrcPos1 => {
                live |= insn.single_source_mask();
            }
            TransferKind::TwoSrc => {
                live |= insn.all_source_mask();
            }
            TransferKind::OneDst => {
                live &= !insn.dest_mask();
            }
            TransferKind::DstSrc => {
                if live.intersects(insn.dest_mask()) {
                    live &= !insn.dest_mask();
                    live |= insn.single_source_mask();
                }
            }
            TransferKind::DstTwoSrc => {
                if live.intersects(insn.dest_mask()) {
                    live &= !insn.dest_mask();
                    live |= insn.all_source_mask();
                }
            }
            TransferKind::LoHiTwoSrc => {
                let lohi = RegMask::reg(REG_HI) | RegMask::reg(REG_LO);
                let used = live.intersects(lohi);
                live &= !lohi;
                if used {
                    live |= insn.all_source_mask();
                }
            }
            TransferKind::Nop => {}
        }

        if program.insns[i].b_livein.contains_all(live) {
            continue; // no new bits
        }
        let live = live | program.insns[i].b_livein;
        program.insns[i].b_livein = live;

        let mut function_exit = false;
        let predecessors = program.insns[i].predecessors.clone();
        for edge in predecessors {
            let mut new_live = live;
            match edge.kind {
                crate::EdgeKind::FunctionExit => {
                    new_live &=
                        RegMask::REACHABLE | RegMask::reg(REG_V0) | RegMask::reg(REG_V1);
                    function_exit = true;
                }
                crate::EdgeKind::FunctionEntry => {
                    new_live &= RegMask::REACHABLE
                        | RegMask::reg(REG_V0)
                        | arg_regs()
                        | RegMask::reg(REG_SP);
                }
                crate::EdgeKind::ExternCall => {
                    let f = extern_at(program, i - 2)?;
                    let plan = abi::call_plan(f);
                    new_live &= !caller_saved;
                    new_live |= plan.arg_mask;
                }
                crate::EdgeKind::IndirectCall => {
                    new_live &= !caller_saved;
                    new_live |= arg_regs();
                }
                crate::EdgeKind::Flow => {}
            }

            if !program.insns[edge.target].b_liveout.contains_all(new_live) {
                program.insns[edge.target].b_liveout |= new_live;
                worklist.push(edge.target);
            }
        }

        if function_exit {
            // skip-call edge mirroring the forward pass
            let skipped = live & !caller_saved;
            if i > 0 && !program.insns[i - 1].b_liveout.contains_all(skipped) {
                program.insns[i - 1].b_liveout |= skipped;
                worklist.push(i - 1);
            }
        }
    }

    debug!(pops, "backward liveness fixed point");
    Ok(())
}

#[cfg(test)]
mod tests {
    use mrc_isa::*;

    use crate::testutil::*;
    use crate::{disasm, functions, graph, liveness, pointers, resolve, signature};

    fn analyze<'a>(image: &'a mrc_elf::BinaryImage) -> crate::Program<'a> {
        let mut p = program(image);
        disasm::run(&mut p);
        pointers::run(&mut p);
        resolve::run(&mut p).unwrap();
        functions::run(&mut p).unwrap();
        graph::run(&mut p).unwrap();
        liveness::forward(&mut p).unwrap();
        liveness::backward(&mut p).unwrap();
        signature::run(&mut p);
        p
    }

    #[test]
    fn test_two_arg_function() {
        // main: jal callee; nop; jr ra; nop
        // callee: or v0, a0, a1; jr ra; nop
        let callee = TEXT_BASE + 0x10;
        let image = ImageBuilder::new()
            .text(&[
                encode_jal(callee),
                0,
                encode_jr(REG_RA),
                0,
                encode_r(0x25, REG_V0, REG_A0, REG_A1),
                encode_jr(REG_RA),
                0,
                0,
            ])
            .func_symbol(callee, "or2")
            .build();
        let p = analyze(&image);

        let f = &p.functions[&callee];
        assert_eq!(f.nargs, 2);
        assert_eq!(f.nret, 1);
        assert!(!f.v0_in);

        // nret = 1 implies v0 live both ways at every return delay slot
        for &ret in &f.returns {
            let insn = &p.insns[p.addr_to_index(ret)];
            let both = insn.f_liveout & insn.b_liveout;
            assert!(both.intersects(RegMask::reg(REG_V0)));
        }
    }

    #[test]
    fn test_liveness_masks_reachable_marker() {
        let image = ImageBuilder::new()
            .text(&[encode_addiu(REG_V0, REG_ZERO, 7), encode_jr(REG_RA), 0, 0])
            .build();
        let p = analyze(&image);

        // main is reachable, the code after its return is not
        assert!(!p.insns[0].f_livein.is_empty());
        assert!(p.insns[3].f_livein.is_empty());
    }

    #[test]
    fn test_extern_call_liveness() {
        // main: jal memcpy; nop; jr ra; nop  with memcpy extern ("pppu")
        let image = ImageBuilder::new()
            .text(&[encode_jal(0x500000), 0, encode_jr(REG_RA), 0])
            .symbol(0x500000, "memcpy")
            .build();
        let p = analyze(&image);

        // after the call, v0 is defined (pointer return), temporaries dead
        let cont = &p.insns[2];
        assert!(cont.f_livein.intersects(RegMask::reg(REG_V0)));
        assert!(!cont.f_livein.intersects(RegMask::reg(REG_T9)));
        // before the call, the three argument registers are live
        let delay = &p.insns[1];
        assert!(delay.b_liveout.intersects(RegMask::reg(REG_A0)));
        assert!(delay.b_liveout.intersects(RegMask::reg(REG_A1)));
        assert!(delay.b_liveout.intersects(RegMask::reg(REG_A2)));
        assert!(!delay.b_liveout.intersects(RegMask::reg(REG_A3)));
    }

    #[test]
    fn test_missing_extern_is_fatal() {
        let image = ImageBuilder::new()
            .text(&[encode_jal(0x500000), 0, encode_jr(REG_RA), 0])
            .symbol(0x500000, "totally_unknown_fn")
            .build();
        let mut p = program(&image);
        disasm::run(&mut p);
        resolve::run(&mut p).unwrap();
        functions::run(&mut p).unwrap();
        graph::run(&mut p).unwrap();
        assert!(matches!(
            liveness::forward(&mut p),
            Err(crate::AnalysisError::MissingExtern(_))
        ));
    }

    #[test]
    fn test_address_taken_function_signature() {
        // data section holds a pointer to "handler" at text+0x10
        let handler = TEXT_BASE + 0x10;
        let image = ImageBuilder::new()
            .text(&[
                encode_addiu(REG_V0, REG_ZERO, 0),
                encode_jr(REG_RA),
                0,
                0,
                encode_addu(REG_V0, REG_A0, REG_A1),
                encode_jr(REG_RA),
                0,
                0,
            ])
            .func_symbol(handler, "handler")
            .data_section(0x10020000, &[handler])
            .build();
        let p = analyze(&image);

        let f = &p.functions[&handler];
        assert!(f.referenced_by_function_pointer);
        assert!(!f.v0_in);
        // v1 is never defined on the forward side, so the 64-bit backward
        // seed still nets a single-word return
        assert_eq!(f.nret, 1);
        assert!(p.label_addresses.contains(&handler));
    }
}
