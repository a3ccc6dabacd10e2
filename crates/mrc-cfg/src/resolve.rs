//! Stage 2a: symbolic relocation recovery.
//!
//! Pairs HI/LO immediate loads, rewrites GOT-relative loads into address
//! materializations, patches `JALR $t9` PIC call sequences into direct
//! calls, recognizes jump-table dispatches, and resolves floating-point
//! `LI` constants. All rewrites go through the patch overlay on [`RInsn`].

use tracing::{debug, trace};

use mrc_isa::{Op, REG_AT, REG_GP, REG_RA, REG_T9, REG_ZERO};

use crate::{AnalysisError, JumpTable, JumpTableHint, Program, Result};

const MAX_LOOKBACK: usize = 128;

/// Run the resolver over the whole instruction vector.
pub fn run(program: &mut Program) -> Result<()> {
    for i in 0..program.insns.len() {
        // BGEZAL $zero is an unconditional branch-and-link
        if program.insns[i].op() == Op::Bgezal && program.insns[i].orig.rs() == REG_ZERO {
            let target = program.insns[i].orig.branch_target();
            program.insns[i].patch_to(Op::Jal, target);
        }

        let op = program.insns[i].op();
        if op.is_control_transfer() {
            match op {
                Op::Jal | Op::J => {
                    let target = program.insns[i].target();
                    program.label_addresses.insert(target);
                    program.add_function(target);
                }
                Op::Jr => recognize_jump_table(program, i)?,
                Op::Jalr => {}
                _ => {
                    let target = program.insns[i].branch_target();
                    program.label_addresses.insert(target);
                }
            }
        }

        match program.insns[i].op() {
            // floating point LI: a LUI whose value is consumed by MTC1
            Op::Mtc1 => link_float_li(program, i),

            Op::Sd
            | Op::Sw
            | Op::Sh
            | Op::Sb
            | Op::Lb
            | Op::Lbu
            | Op::Ld
            | Op::Lh
            | Op::Lhu
            | Op::Lw
            | Op::Ldc1
            | Op::Lwc1
            | Op::Swc1 => {
                let base = program.insns[i].orig.rs();
                let mem_imm = program.insns[i].imm();
                if base == REG_GP {
                    resolve_got_global(program, i, mem_imm)?;
                } else {
                    link_with_lui(program, i, base, mem_imm)?;
                }
            }

            Op::Addiu | Op::Ori => {
                let rs = program.insns[i].orig.rs();
                let imm = program.insns[i].imm();
                if rs == REG_ZERO {
                    // plain LI; text-range constants are collected in stage 2b
                } else if program.insns[i].orig.rt() != REG_GP {
                    link_with_lui(program, i, rs, imm)?;
                }
            }

            Op::Jalr => {
                if program.insns[i].orig.rs() == REG_T9 {
                    link_with_jalr(program, i);
                    if program.insns[i].linked_insn.is_some() {
                        let value = program.insns[i].linked_value;
                        program.insns[i].patch_to(Op::Jal, value);
                        program.label_addresses.insert(value);
                        program.add_function(value);
                    }
                }
            }

            _ => {}
        }

        // PIC gp recomputation at function entry (LUI/ADDIU/ADDU $gp,$gp,$t9)
        let insn = &program.insns[i];
        if insn.op() == Op::Addu
            && insn.orig.rd() == REG_GP
            && insn.orig.rs() == REG_GP
            && insn.orig.rt() == REG_T9
            && i >= 2
        {
            for j in i - 2..=i {
                program.insns[j].patch_nop();
            }
        }
    }
    Ok(())
}

/// Rewrite a `LW` via `$gp` that indexes the global GOT into an address
/// materialization.
fn resolve_got_global(program: &mut Program, i: usize, mem_imm: i32) -> Result<()> {
    let entry = (mem_imm as i64 + program.image.gp_value_adj as i64) / 4;
    if entry < 0 {
        return Ok(());
    }
    let entry = entry as usize;
    let locals = program.image.got_locals.len();
    if entry < locals {
        // local GOT entries resolve lazily from their user sites
        return Ok(());
    }
    let global = entry - locals;
    if global >= program.image.got_globals.len() {
        return Ok(());
    }
    if program.insns[i].op() != Op::Lw {
        return Err(AnalysisError::UnexpectedGotLoad(program.insns[i].vram()));
    }

    let dest_vaddr = program.image.got_globals[global];
    program.insns[i].is_global_got_memop = true;
    program.insns[i].linked_value = dest_vaddr;
    program.insns[i].patch_to(Op::Ori, dest_vaddr);
    trace!(
        at = format_args!("{:#x}", program.insns[i].vram()),
        value = format_args!("{:#x}", dest_vaddr),
        "GOT global load"
    );
    Ok(())
}

/// Scan backward from `offset` for the producer of its base register.
fn link_with_lui(program: &mut Program, offset: usize, reg: u8, mem_imm: i32) -> Result<()> {
    let end_search = offset.saturating_sub(MAX_LOOKBACK);
    let mut search = offset;
    while search > end_search {
        search -= 1;

        match program.insns[search].op() {
            Op::Lui => {
                if reg != program.insns[search].orig.rt() {
                    continue;
                }
                // HI/LO pair: the two halves already encode the address, so
                // the instructions are kept and only linked.
                let addr =
                    ((program.insns[search].orig.imm() as u32) << 16).wrapping_add(mem_imm as u32);
                program.insns[search].linked_insn = Some(offset);
                program.insns[search].linked_value = addr;
                program.insns[offset].linked_insn = Some(search);
                program.insns[offset].linked_value = addr;
                program.label_addresses.insert(addr);
                return Ok(());
            }

            Op::Lw | Op::Ld | Op::Addiu | Op::Add | Op::Sub | Op::Subu => {
                if reg != program.insns[search].dest_reg() {
                    continue;
                }
                if program.insns[search].op() == Op::Lw
                    && program.insns[search].orig.rs() == REG_GP
                {
                    let mem_imm0 = program.insns[search].imm();
                    let entry = (mem_imm0 as i64 + program.image.gp_value_adj as i64) / 4;
                    if entry >= 0 && (entry as usize) < program.image.got_locals.len() {
                        // a static symbol reached through the local GOT
                        let addr = program.image.got_locals[entry as usize]
                            .wrapping_add(mem_imm as u32);
                        program.insns[search].linked_insn = Some(offset);
                        program.insns[search].linked_value = addr;
                        program.insns[offset].linked_insn = Some(search);
                        program.insns[offset].linked_value = addr;

                        // the producer now materializes the full address
                        program.insns[search].patch_to(Op::Ori, addr);

                        match program.insns[offset].op() {
                            Op::Addiu => {
                                program.insns[offset].patch_to(Op::Move, addr);
                                if program.text_contains(addr) {
                                    program.add_function(addr);
                                }
                            }
                            Op::Lb | Op::Lbu | Op::Sb | Op::Lh | Op::Lhu | Op::Sh | Op::Lw
                            | Op::Sw | Op::Ldc1 | Op::Lwc1 | Op::Swc1 => {
                                // base register holds the full address now
                                let op = program.insns[offset].op();
                                program.insns[offset].patch_to(op, 0);
                            }
                            other => {
                                return Err(AnalysisError::UnsupportedPatchSite(
                                    program.insns[offset].vram(),
                                    other,
                                ));
                            }
                        }
                    }
                    return Ok(());
                }
                // reg is a pointer, the immediate is a struct member offset
                return Ok(());
            }

            Op::Jr => {
                if program.insns[search].orig.rs() == REG_RA && offset - search >= 2 {
                    // crossed a function boundary, unless `offset` is the
                    // delay slot of this very return
                    return Ok(());
                }
            }

            _ => {}
        }
    }
    Ok(())
}

/// For a `JALR $t9`, find the matching `$t9` load and rewrite the pair
/// into a direct call.
fn link_with_jalr(program: &mut Program, offset: usize) {
    let end_search = offset.saturating_sub(MAX_LOOKBACK);
    let mut search = offset;
    while search > end_search {
        search -= 1;

        if program.insns[search].dest_reg() == REG_T9 {
            match program.insns[search].op() {
                Op::Lw | Op::Ori => {
                    let resolved = program.insns[search].is_global_got_memop
                        || (program.insns[search].op() == Op::Ori
                            && program.insns[search].linked_value != 0);
                    if resolved {
                        let value = program.insns[search].linked_value;
                        program.insns[search].linked_insn = Some(offset);
                        program.insns[offset].linked_insn = Some(search);
                        program.insns[offset].linked_value = value;

                        program.insns[offset].patch_to(Op::Jal, value);
                        program.insns[search].patch_nop();
                        program.insns[search].is_global_got_memop = false;

                        program.add_function(value);
                        debug!(
                            at = format_args!("{:#x}", program.insns[offset].vram()),
                            target = format_args!("{:#x}", value),
                            "rewrote JALR $t9 to direct call"
                        );
                    }
                    return;
                }

                Op::Addiu => {
                    // the low half of a HI/LO pair; follow the chain
                    if let Some(first) = program.insns[search].linked_insn {
                        let value = program.insns[search].linked_value;
                        program.insns[search].linked_insn = Some(offset);
                        program.insns[offset].linked_insn = Some(first);
                        program.insns[offset].linked_value = value;
                    }
                    return;
                }

                Op::Ld | Op::Addu | Op::Add | Op::Sub | Op::Subu => return,

                _ => {}
            }
        } else if program.insns[search].op() == Op::Jr
            && program.insns[search].orig.rs() == REG_RA
        {
            return;
        }
    }
}

/// Scan back from an `MTC1` for the `LUI` that materialized its operand and
/// reinterpret the upper immediate as a float constant.
fn link_float_li(program: &mut Program, i: usize) {
    let rt = program.insns[i].orig.rt();
    let mut search = i;
    while search > 0 {
        search -= 1;
        match program.insns[search].op() {
            Op::Lui => {
                if program.insns[search].orig.rt() == rt {
                    let bits = (program.insns[search].orig.imm() as u32) << 16;
                    program.insns[search].linked_insn = Some(i);
                    program.insns[search].linked_value = bits;
                    program.insns[search].linked_float = Some(f32::from_bits(bits));
                    program.insns[search].patch_to(Op::Ori, bits);
                }
                return;
            }
            Op::Lw | Op::Ld | Op::Lh | Op::Lhu | Op::Lb | Op::Lbu | Op::Addiu | Op::Add
            | Op::Sub | Op::Subu => {
                if program.insns[search].dest_reg() == rt {
                    return;
                }
            }
            Op::Jr => {
                if program.insns[search].orig.rs() == REG_RA {
                    return;
                }
            }
            _ => {}
        }
    }
}

/// Match the `$gp`-relative jump-table dispatch idioms ending in `JR`.
///
/// ```text
/// lw    $at, off($gp)      table base via GOT (already linked)
/// sltiu $at, $idx, n       bound check, possibly blocks earlier
/// ...
/// sll   $tx, $idx, 2
/// addu  $at, $at, $tx
/// lw    $tx, ($at)
/// nop                      5.3 output only
/// addu  $tx, $tx, $gp      PIC only
/// jr    $tx
/// ```
///
/// The `ANDI` bound-check variant and the per-binary hints cover the
/// layouts where the `SLTIU` is missing or out of reach.
fn recognize_jump_table(program: &mut Program, i: usize) -> Result<()> {
    let image = program.image;
    let Some(rodata) = image.rodata.as_ref() else {
        return Ok(());
    };
    if i < 7 {
        return Ok(());
    }

    let is_pic = program.insns[i - 1].op() == Op::Addu
        && program.insns[i - 1].orig.rt() == REG_GP;
    let pic = is_pic as usize;
    let has_nop = program.insns[i - 1 - pic].op() == Op::Nop;
    let nop = has_nop as usize;
    let has_extra = (program.insns[i - pic - nop - 5].op() != Op::Beqz) as usize;

    let mut lw = i - pic - nop - 1;
    if program.insns[lw].op() != Op::Lw {
        lw -= 1;
    }
    if program.insns[lw].op() != Op::Lw || program.insns[lw].linked_insn.is_none() || lw < 4 {
        return Ok(());
    }

    let mut addu_index = lw - 1;
    if program.insns[addu_index].op() != Op::Addu {
        addu_index -= 1;
    }
    if addu_index < 2 {
        return Ok(());
    }
    let sll_index = addu_index - 1;
    let index_reg = program.insns[sll_index].orig.rt();

    if program.insns[addu_index].op() != Op::Addu {
        return Ok(());
    }
    if program.insns[sll_index].op() != Op::Sll {
        return Ok(());
    }
    if program.insns[sll_index].dest_reg() != program.insns[i].orig.rs() {
        return Ok(());
    }

    let mut andi_index = None;
    for j in 3..=4 {
        if program.insns[lw - j].op() == Op::Andi {
            andi_index = Some(lw - j);
            break;
        }
    }

    let mut scan_end = 14usize;
    let mut forced_cases = None;
    for hint in &program.config.jtbl_hints {
        match *hint {
            JumpTableHint::ScanDepth { insn_index, depth } if insn_index == i => {
                scan_end = depth;
            }
            JumpTableHint::ForcedCases {
                insn_index,
                num_cases,
            } if insn_index == i => forced_cases = Some(num_cases),
            _ => {}
        }
    }

    let mut sltiu_index = None;
    for j in 5..=scan_end {
        let Some(k) = lw.checked_sub(has_extra + j) else {
            break;
        };
        if program.insns[k].op() == Op::Sltiu && program.insns[k].orig.rt() == REG_AT {
            sltiu_index = Some(k);
            break;
        }
        if program.insns[k].op() == Op::Jr {
            // don't run into a previous switch
            break;
        }
    }

    if sltiu_index.is_some() {
        andi_index = None;
    }

    let mut and_variant = false;
    let num_cases = if let Some(k) = sltiu_index {
        program.insns[k].imm() as u32
    } else if let Some(k) = andi_index {
        and_variant = true;
        program.insns[k].imm() as u32 + 1
    } else if let Some(n) = forced_cases {
        n
    } else {
        return Ok(());
    };

    let jtbl_addr = program.insns[lw].linked_value;

    if is_pic {
        program.insns[i - 1].patch_nop();
    }
    program.insns[i].jtbl = Some(JumpTable {
        addr: jtbl_addr,
        num_cases,
        index_reg,
    });
    program.insns[lw].patch_nop();
    program.insns[addu_index].patch_nop();
    program.insns[sll_index].patch_nop();
    if !and_variant {
        // the table-base materialization is only needed at recompile time
        program.insns[addu_index - 2].patch_nop();
    }

    if jtbl_addr < rodata.vaddr || jtbl_addr + num_cases * 4 > rodata.end() {
        return Err(AnalysisError::JumpTableOutsideRodata(jtbl_addr));
    }

    // table entries are stored relative to $gp
    for case in 0..num_cases {
        let offset = (jtbl_addr - rodata.vaddr) as usize + case as usize * 4;
        let target = rodata.word_at(offset).wrapping_add(image.gp_value);
        program.label_addresses.insert(target);
    }

    debug!(
        at = format_args!("{:#x}", program.insns[i].vram()),
        table = format_args!("{:#x}", jtbl_addr),
        num_cases,
        "jump table"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use mrc_isa::*;

    use crate::testutil::*;
    use crate::{disasm, resolve};

    #[test]
    fn test_hi_lo_pairing() {
        // lui v0, 0x40; addiu v0, v0, 0x1234
        let image = ImageBuilder::new()
            .text(&[
                encode_lui(REG_V0, 0x0040),
                encode_addiu(REG_V0, REG_V0, 0x1234),
                encode_jr(REG_RA),
                0,
            ])
            .build();
        let mut p = program(&image);
        disasm::run(&mut p);
        resolve::run(&mut p).unwrap();

        assert_eq!(p.insns[0].linked_insn, Some(1));
        assert_eq!(p.insns[1].linked_insn, Some(0));
        assert_eq!(p.insns[0].linked_value, 0x0040_1234);
        assert!(p.label_addresses.contains(&0x0040_1234));
        // neither instruction is rewritten
        assert!(!p.insns[0].is_patched());
        assert!(!p.insns[1].is_patched());
    }

    #[test]
    fn test_got_global_call_rewrite() {
        // lw t9, -0x7fe8(gp); jalr t9; nop
        // (two local GOT entries, so -0x7fe8 indexes global entry 0)
        let image = ImageBuilder::new()
            .text(&[
                encode_lw(REG_T9, REG_GP, -0x7fe8),
                encode_jalr(REG_T9),
                0,
                encode_jr(REG_RA),
                0,
            ])
            .got(&[0, 0], &[0x410000])
            .build();
        let mut p = program(&image);
        disasm::run(&mut p);
        resolve::run(&mut p).unwrap();

        assert_eq!(p.insns[0].op(), Op::Nop);
        assert_eq!(p.insns[1].op(), Op::Jal);
        assert_eq!(p.insns[1].target(), 0x410000);
        assert!(p.label_addresses.contains(&0x410000));
        // out-of-text targets register labels but not functions
        assert!(!p.functions.contains_key(&0x410000));
    }

    #[test]
    fn test_got_global_call_into_text_adds_function() {
        let image = ImageBuilder::new()
            .text(&[
                encode_lw(REG_T9, REG_GP, -0x7fe8),
                encode_jalr(REG_T9),
                0,
                encode_jr(REG_RA),
                0,
            ])
            // global GOT entry resolves to the jr at text + 0xc
            .got(&[0, 0], &[TEXT_BASE + 0xc])
            .build();
        let mut p = program(&image);
        disasm::run(&mut p);
        resolve::run(&mut p).unwrap();

        assert!(p.functions.contains_key(&(TEXT_BASE + 0xc)));
    }

    #[test]
    fn test_got_local_load_rewrite() {
        // lw at, -0x7ff0(gp)  (GOT local 0 -> 0x10008000)
        // lw v0, 0x10(at)
        let image = ImageBuilder::new()
            .text(&[
                encode_lw(REG_AT, REG_GP, -0x7ff0),
                encode_lw(REG_V0, REG_AT, 0x10),
                encode_jr(REG_RA),
                0,
            ])
            .got(&[0x10008000, 0], &[])
            .build();
        let mut p = program(&image);
        disasm::run(&mut p);
        resolve::run(&mut p).unwrap();

        // producer becomes an address materialization, user's offset drops
        assert_eq!(p.insns[0].op(), Op::Ori);
        assert_eq!(p.insns[0].imm() as u32, 0x10008010);
        assert_eq!(p.insns[1].op(), Op::Lw);
        assert_eq!(p.insns[1].imm(), 0);
        assert_eq!(p.insns[0].linked_insn, Some(1));
        assert_eq!(p.insns[1].linked_insn, Some(0));
    }

    #[test]
    fn test_float_li() {
        // lui at, 0x42c8; mtc1 at, f4  (100.0f)
        let mtc1 = (0x11u32 << 26) | (0x04 << 21) | ((REG_AT as u32) << 16) | (4 << 11);
        let image = ImageBuilder::new()
            .text(&[encode_lui(REG_AT, 0x42c8), mtc1, encode_jr(REG_RA), 0])
            .build();
        let mut p = program(&image);
        disasm::run(&mut p);
        resolve::run(&mut p).unwrap();

        assert_eq!(p.insns[0].op(), Op::Ori);
        assert_eq!(p.insns[0].imm() as u32, 0x42c8_0000);
        assert_eq!(p.insns[0].linked_float, Some(100.0f32));
    }

    #[test]
    fn test_bal_canonicalized_to_jal() {
        // bgezal zero, +4  -> jal
        let bal = (0x01u32 << 26) | (0x11 << 16) | 0x0001;
        let image = ImageBuilder::new()
            .text(&[bal, 0, encode_jr(REG_RA), 0])
            .build();
        let mut p = program(&image);
        disasm::run(&mut p);
        resolve::run(&mut p).unwrap();

        assert_eq!(p.insns[0].op(), Op::Jal);
        assert_eq!(p.insns[0].target(), TEXT_BASE + 8);
        assert!(p.functions.contains_key(&(TEXT_BASE + 8)));
    }

    #[test]
    fn test_gp_prologue_elision() {
        let image = ImageBuilder::new()
            .text(&[
                encode_lui(REG_GP, 0x0fb9),
                encode_addiu(REG_GP, REG_GP, 0x366c),
                encode_addu(REG_GP, REG_GP, REG_T9),
                encode_jr(REG_RA),
                0,
            ])
            .build();
        let mut p = program(&image);
        disasm::run(&mut p);
        resolve::run(&mut p).unwrap();

        for j in 0..3 {
            assert_eq!(p.insns[j].op(), Op::Nop, "insn {j} should be elided");
        }
    }

    #[test]
    fn test_jump_table_recognition() {
        // sltiu at, v0, 5; beqz at, +7; nop;
        // lw at, -0x7ff0(gp); sll t0, v0, 2; addu at, at, t0;
        // lw t0, 0(at); addu t0, t0, gp; jr t0; nop
        let table_vaddr = 0x10010000u32;
        let gp = gp_value();
        let case_targets: Vec<u32> = (0..5).map(|c| TEXT_BASE + 0x28 + c * 4).collect();
        let table_words: Vec<u32> = case_targets.iter().map(|t| t.wrapping_sub(gp)).collect();

        let image = ImageBuilder::new()
            .text(&[
                encode_sltiu(REG_AT, REG_V0, 5),
                encode_beq(REG_AT, REG_ZERO, 7),
                0,
                encode_lw(REG_AT, REG_GP, -0x7ff0),
                encode_sll(REG_T0, REG_V0, 2),
                encode_addu(REG_AT, REG_AT, REG_T0),
                encode_lw(REG_T0, REG_AT, 0),
                encode_addu(REG_T0, REG_T0, REG_GP),
                encode_jr(REG_T0),
                0,
                encode_jr(REG_RA),
                0,
            ])
            .got(&[table_vaddr, 0], &[])
            .rodata(table_vaddr, &table_words)
            .build();
        let mut p = program(&image);
        disasm::run(&mut p);
        resolve::run(&mut p).unwrap();

        let jtbl = p.insns[8].jtbl.expect("jr should carry a jump table");
        assert_eq!(jtbl.addr, table_vaddr);
        assert_eq!(jtbl.num_cases, 5);
        assert_eq!(jtbl.index_reg, REG_V0);
        for t in &case_targets {
            assert!(p.label_addresses.contains(t), "missing label {t:#x}");
        }
        // the arithmetic chain is gone
        for j in [3usize, 4, 5, 6, 7] {
            assert_eq!(p.insns[j].op(), Op::Nop, "insn {j} should be NOPed");
        }
    }

    #[test]
    fn test_jump_table_case_count_hint() {
        // the bound check lives in another basic block; only the hint knows
        // the case count
        let table_vaddr = 0x10010000u32;
        let gp = gp_value();
        let table_words: Vec<u32> = (0..2u32)
            .map(|c| (TEXT_BASE + 0x28 + c * 4).wrapping_sub(gp))
            .collect();

        let image = ImageBuilder::new()
            .text(&[
                0,
                0,
                0,
                encode_lw(REG_AT, REG_GP, -0x7ff0),
                encode_sll(REG_T0, REG_V0, 2),
                encode_addu(REG_AT, REG_AT, REG_T0),
                encode_lw(REG_T0, REG_AT, 0),
                encode_addu(REG_T0, REG_T0, REG_GP),
                encode_jr(REG_T0),
                0,
                encode_jr(REG_RA),
                0,
            ])
            .got(&[table_vaddr, 0], &[])
            .rodata(table_vaddr, &table_words)
            .build();

        let config = crate::AnalysisConfig {
            jtbl_hints: vec![crate::JumpTableHint::ForcedCases {
                insn_index: 8,
                num_cases: 2,
            }],
            data_pointer_exceptions: Vec::new(),
        };
        let mut p = crate::Program::new(&image, config).unwrap();
        disasm::run(&mut p);
        resolve::run(&mut p).unwrap();

        let jtbl = p.insns[8].jtbl.expect("hinted jr should carry a table");
        assert_eq!(jtbl.num_cases, 2);

        // without the hint the dispatch stays unrecognized, which the CFG
        // builder then rejects
        let mut p = program(&image);
        disasm::run(&mut p);
        resolve::run(&mut p).unwrap();
        assert!(p.insns[8].jtbl.is_none());
    }
}
