//! Stage 3: control-flow graph construction.
//!
//! Emits tagged edges between instruction indices. Delay slots of
//! unconditional transfers get `no_following_successor` so later stages do
//! not walk past them.

use tracing::trace;

use mrc_isa::{Op, REG_RA};

use crate::{AnalysisError, Edge, EdgeKind, Program, RInsn, Result};

fn add_edge(insns: &mut [RInsn], from: usize, to: usize, kind: EdgeKind) {
    insns[from].successors.push(Edge { target: to, kind });
    insns[to].predecessors.push(Edge { target: from, kind });
}

/// Build the instruction graph.
pub fn run(program: &mut Program) -> Result<()> {
    let count = program.insns.len();

    for i in 0..count {
        if program.insns[i].no_following_successor {
            continue;
        }
        let addr = program.index_to_vram(i);

        // resolve a VRAM target to a valid instruction index
        let index_of = |program: &Program, target: u32| -> Result<usize> {
            let idx = program.addr_to_index(target);
            if idx >= count {
                return Err(AnalysisError::EdgeOutOfRange { from: addr, target });
            }
            Ok(idx)
        };

        match program.insns[i].op() {
            Op::Beq
            | Op::Bgez
            | Op::Bgtz
            | Op::Blez
            | Op::Bltz
            | Op::Bne
            | Op::Beqz
            | Op::Bnez
            | Op::Bc1f
            | Op::Bc1t => {
                // both paths run the delay slot
                let target = index_of(program, program.insns[i].branch_target())?;
                add_edge(&mut program.insns, i, i + 1, EdgeKind::Flow);
                add_edge(&mut program.insns, i + 1, target, EdgeKind::Flow);
            }

            Op::Beql
            | Op::Bgezl
            | Op::Bgtzl
            | Op::Blezl
            | Op::Bltzl
            | Op::Bnel
            | Op::Bc1fl
            | Op::Bc1tl => {
                // the delay slot only runs on the taken path
                let target = index_of(program, program.insns[i].branch_target())?;
                add_edge(&mut program.insns, i, i + 1, EdgeKind::Flow);
                add_edge(&mut program.insns, i, i + 2, EdgeKind::Flow);
                add_edge(&mut program.insns, i + 1, target, EdgeKind::Flow);
                program.insns[i + 1].no_following_successor = true;
            }

            Op::B => {
                let target = index_of(program, program.insns[i].branch_target())?;
                add_edge(&mut program.insns, i, i + 1, EdgeKind::Flow);
                add_edge(&mut program.insns, i + 1, target, EdgeKind::Flow);
                program.insns[i + 1].no_following_successor = true;
            }

            Op::J => {
                let target = index_of(program, program.insns[i].target())?;
                add_edge(&mut program.insns, i, i + 1, EdgeKind::Flow);
                add_edge(&mut program.insns, i + 1, target, EdgeKind::Flow);
                program.insns[i + 1].no_following_successor = true;
            }

            Op::Jr => {
                add_edge(&mut program.insns, i, i + 1, EdgeKind::Flow);

                if let Some(jtbl) = program.insns[i].jtbl {
                    let rodata = program
                        .image
                        .rodata
                        .as_ref()
                        .ok_or(AnalysisError::JumpTableOutsideRodata(jtbl.addr))?;
                    for case in 0..jtbl.num_cases {
                        let offset = (jtbl.addr - rodata.vaddr) as usize + case as usize * 4;
                        let dest = rodata.word_at(offset).wrapping_add(program.image.gp_value);
                        let target = index_of(program, dest)?;
                        add_edge(&mut program.insns, i + 1, target, EdgeKind::Flow);
                    }
                } else if program.insns[i].orig.rs() != REG_RA {
                    return Err(AnalysisError::UnsupportedJumpRegister(addr));
                }
                // return edges are added from the call sites

                program.insns[i + 1].no_following_successor = true;
            }

            Op::Jal => {
                add_edge(&mut program.insns, i, i + 1, EdgeKind::Flow);

                let dest = program.insns[i].target();
                trace!(
                    at = format_args!("{addr:#x}"),
                    dest = format_args!("{dest:#x}"),
                    "call"
                );

                if dest > program.image.mcount_addr && program.text_contains(dest) {
                    let target = index_of(program, dest)?;
                    add_edge(&mut program.insns, i + 1, target, EdgeKind::FunctionEntry);

                    let returns = program
                        .functions
                        .get(&dest)
                        .ok_or(AnalysisError::UnknownCallTarget(addr, dest))?
                        .returns
                        .clone();
                    for ret in returns {
                        let ret_index = index_of(program, ret)?;
                        add_edge(&mut program.insns, ret_index, i + 2, EdgeKind::FunctionExit);
                    }
                } else {
                    add_edge(&mut program.insns, i + 1, i + 2, EdgeKind::ExternCall);
                }

                program.insns[i + 1].no_following_successor = true;
            }

            Op::Jalr => {
                add_edge(&mut program.insns, i, i + 1, EdgeKind::Flow);
                add_edge(&mut program.insns, i + 1, i + 2, EdgeKind::IndirectCall);
                program.insns[i + 1].no_following_successor = true;
            }

            _ => {
                add_edge(&mut program.insns, i, i + 1, EdgeKind::Flow);
            }
        }
    }

    Ok(())
}
