//! Emission checks over small synthetic programs.

use mrc_cfg::{AnalysisConfig, Program};
use mrc_elf::{BinaryImage, Section};
use mrc_isa::*;

const TEXT_BASE: u32 = 0x400000;
const DATA_BASE: u32 = 0x1002_0000;

fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    let mut data = Vec::new();
    for w in words {
        data.extend_from_slice(&w.to_be_bytes());
    }
    data
}

fn image(text: &[u32]) -> BinaryImage {
    let mut image = BinaryImage {
        text: Section {
            vaddr: TEXT_BASE,
            data: words_to_bytes(text),
        },
        data: Some(Section {
            vaddr: DATA_BASE,
            data: words_to_bytes(&[0, 0]),
        }),
        gp_value: 0x1000_8000,
        gp_value_adj: 0x7ff0,
        main_addr: TEXT_BASE,
        ..BinaryImage::default()
    };
    image.symbol_names.insert(TEXT_BASE, "main".to_string());
    image.text_function_syms.push(TEXT_BASE);
    image.symbol_names.insert(DATA_BASE, "__Argc".to_string());
    image.symbol_names.insert(DATA_BASE + 4, "__Argv".to_string());
    image
}

fn translate(image: &BinaryImage) -> String {
    let mut p = Program::new(image, AnalysisConfig::default()).unwrap();
    mrc_cfg::disasm::run(&mut p);
    mrc_cfg::pointers::run(&mut p);
    mrc_cfg::resolve::run(&mut p).unwrap();
    mrc_cfg::functions::run(&mut p).unwrap();
    mrc_cfg::graph::run(&mut p).unwrap();
    mrc_cfg::liveness::forward(&mut p).unwrap();
    mrc_cfg::liveness::backward(&mut p).unwrap();
    mrc_cfg::signature::run(&mut p);
    mrc_emit::emit(&mut p, false).unwrap()
}

#[test]
fn likely_branch_lowering() {
    // beql a0, zero, L; addiu v0, zero, 1; ori v0, zero, 2; jr ra; nop
    let img = image(&[
        encode_beql(REG_A0, REG_ZERO, 2),
        encode_addiu(REG_V0, REG_ZERO, 1),
        encode_ori(REG_V0, REG_ZERO, 2),
        encode_jr(REG_RA),
        0,
    ]);
    let out = translate(&img);

    // delay slot inside the taken path, explicit else to the skip label
    assert!(out.contains("if (a0 == zero) {"), "{out}");
    assert!(out.contains("v0 = zero + 0x1;"), "{out}");
    assert!(out.contains("goto L40000c;}"), "{out}");
    assert!(out.contains("else goto L400008;"), "{out}");
    assert!(out.contains("L400008:"), "{out}");
    assert!(out.contains("v0 = zero | 0x2;"), "{out}");
}

#[test]
fn extern_call_marshalling() {
    let mut img = image(&[encode_jal(0x500000), 0, encode_jr(REG_RA), 0]);
    img.symbol_names.insert(0x500000, "memcpy".to_string());
    let out = translate(&img);

    assert!(out.contains("v0 = wrapper_memcpy(mem, a0, a1, a2);"), "{out}");
    // the continuation gets a label
    assert!(out.contains("goto L400008;"), "{out}");
    assert!(out.contains("L400008:"), "{out}");
}

#[test]
fn vararg_extern_spills_registers() {
    let mut img = image(&[encode_jal(0x500000), 0, encode_jr(REG_RA), 0]);
    img.symbol_names.insert(0x500000, "printf".to_string());
    let out = translate(&img);

    for j in 0..4 {
        assert!(
            out.contains(&format!("MEM_U32(sp + {}) = a{};", j * 4, j)),
            "{out}"
        );
    }
    assert!(out.contains("v0 = wrapper_printf(mem, a0, sp);"), "{out}");
}

#[test]
fn return_value_forms() {
    // main: addiu v0, zero, 5; jr ra; nop
    let img = image(&[encode_addiu(REG_V0, REG_ZERO, 5), encode_jr(REG_RA), 0]);
    let out = translate(&img);

    assert!(out.contains("v0 = zero + 0x5;"), "{out}");
    assert!(out.contains("return v0;"), "{out}");
    assert!(out.contains("static uint32_t f_main(uint8_t *mem, uint32_t sp"), "{out}");
}

#[test]
fn trampoline_over_address_taken_functions() {
    // main: jr ra; nop; pad; pad; handler: or v0, a0, a1; jr ra; nop
    let handler = TEXT_BASE + 0x10;
    let mut img = image(&[
        encode_jr(REG_RA),
        0,
        0,
        0,
        encode_r(0x25, REG_V0, REG_A0, REG_A1),
        encode_jr(REG_RA),
        0,
        0,
    ]);
    img.symbol_names.insert(handler, "handler".to_string());
    img.text_function_syms.push(handler);
    img.data = Some(Section {
        vaddr: DATA_BASE,
        data: words_to_bytes(&[handler, 0]),
    });
    let out = translate(&img);

    assert!(out.contains("uint64_t trampoline(uint8_t *mem, uint32_t sp"), "{out}");
    assert!(
        out.contains("case 0x400010: return (uint64_t)f_handler(mem, sp, a0, a1) << 32;"),
        "{out}"
    );
    assert!(out.contains("default: abort();"), "{out}");
    // address-taken entry points get labels
    assert!(out.contains("L400010:"), "{out}");
}

#[test]
fn entry_harness_setup() {
    let img = image(&[encode_addiu(REG_V0, REG_ZERO, 0), encode_jr(REG_RA), 0]);
    let out = translate(&img);

    assert!(out.contains("int run(uint8_t *mem, int argc, char *argv[]) {"), "{out}");
    assert!(out.contains("mmap_initial_data_range(mem,"), "{out}");
    assert!(out.contains(&format!("MEM_S32(0x{DATA_BASE:x}) = argc;")), "{out}");
    assert!(out.contains(&format!("MEM_U32(0x{:x}) = arg_addr;", DATA_BASE + 4)), "{out}");
    assert!(out.contains("setup_libc_data(mem);"), "{out}");
    assert!(out.contains("int ret = f_main(mem, 0x1001fff0"), "{out}");
    assert!(out.contains("return ret;"), "{out}");
}

#[test]
fn unused_functions_are_not_emitted() {
    // "orphan" is never called and never address-taken
    let orphan = TEXT_BASE + 0x10;
    let mut img = image(&[
        encode_jr(REG_RA),
        0,
        0,
        0,
        encode_jr(REG_RA),
        0,
    ]);
    img.symbol_names.insert(orphan, "orphan".to_string());
    img.text_function_syms.push(orphan);
    let out = translate(&img);

    assert!(!out.contains("f_orphan"), "{out}");
}

#[test]
fn jump_table_dispatch_lowering() {
    // switch dispatch through a rodata table of two cases
    let table_vaddr = 0x1001_0000u32;
    let gp = 0x1000_8000u32;
    let case0 = TEXT_BASE + 0x28;
    let case1 = TEXT_BASE + 0x2c;
    let text = [
        encode_sltiu(REG_AT, REG_V0, 2),
        encode_beq(REG_AT, REG_ZERO, 7),
        0,
        encode_lw(REG_AT, REG_GP, -0x7ff0),
        encode_sll(REG_T0, REG_V0, 2),
        encode_addu(REG_AT, REG_AT, REG_T0),
        encode_lw(REG_T0, REG_AT, 0),
        encode_addu(REG_T0, REG_T0, REG_GP),
        encode_jr(REG_T0),
        0,
        encode_jr(REG_RA), // case0 falls here eventually
        0,
        0,
        0,
    ];
    let mut img = image(&text);
    img.got_locals = vec![table_vaddr, 0];
    img.rodata = Some(Section {
        vaddr: table_vaddr,
        data: words_to_bytes(&[case0.wrapping_sub(gp), case1.wrapping_sub(gp)]),
    });
    let out = translate(&img);

    assert!(out.contains(&format!(";static void *const Lswitch{table_vaddr:x}[] = {{")), "{out}");
    assert!(out.contains(&format!("&&L{case0:x},")), "{out}");
    assert!(out.contains(&format!("&&L{case1:x},")), "{out}");
    assert!(out.contains(&format!("dest = Lswitch{table_vaddr:x}[v0];")), "{out}");
    assert!(out.contains("goto *dest;"), "{out}");
}
