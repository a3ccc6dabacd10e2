//! End-to-end pipeline tests over synthetic images.

use mrc::{translate_elf, translate_image, BinaryImage, Options, Section};
use mrc_isa::*;

const TEXT_BASE: u32 = 0x400000;
const DATA_BASE: u32 = 0x1002_0000;
const GP_VALUE: u32 = 0x1000_8000;

fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    let mut data = Vec::new();
    for w in words {
        data.extend_from_slice(&w.to_be_bytes());
    }
    data
}

#[test]
fn rejects_garbage_input() {
    assert!(matches!(
        translate_elf(&[0u8; 128], Options::default()),
        Err(mrc::Error::Elf(_))
    ));
}

#[test]
fn full_pipeline_over_synthetic_program() {
    // main calls strlen, then a helper through the GOT, and returns the
    // helper's result.
    //
    //   main:
    //     jal   strlen
    //     nop
    //     lw    $t9, -0x7fe8($gp)   ; global GOT entry -> helper
    //     jalr  $t9
    //     nop
    //     jr    $ra
    //     nop
    //   helper:
    //     or    $v0, $a0, $a1
    //     jr    $ra
    //     nop
    let helper = TEXT_BASE + 0x1c;
    let text = [
        encode_jal(0x500000),
        0,
        encode_lw(REG_T9, REG_GP, -0x7fe8),
        encode_jalr(REG_T9),
        0,
        encode_jr(REG_RA),
        0,
        encode_r(0x25, REG_V0, REG_A0, REG_A1),
        encode_jr(REG_RA),
        0,
    ];

    let mut image = BinaryImage {
        text: Section {
            vaddr: TEXT_BASE,
            data: words_to_bytes(&text),
        },
        data: Some(Section {
            vaddr: DATA_BASE,
            data: words_to_bytes(&[0, 0]),
        }),
        rodata: Some(Section {
            vaddr: 0x1001_0000,
            data: words_to_bytes(&[0x6869_0000]),
        }),
        got_locals: vec![0, 0],
        got_globals: vec![helper],
        gp_value: GP_VALUE,
        gp_value_adj: 0x7ff0,
        main_addr: TEXT_BASE,
        ..BinaryImage::default()
    };
    image.symbol_names.insert(TEXT_BASE, "main".to_string());
    image.symbol_names.insert(helper, "helper".to_string());
    image.symbol_names.insert(0x500000, "strlen".to_string());
    image.symbol_names.insert(DATA_BASE, "__Argc".to_string());
    image
        .symbol_names
        .insert(DATA_BASE + 4, "__Argv".to_string());
    image.text_function_syms.push(TEXT_BASE);
    image.text_function_syms.push(helper);
    image.got_text_labels.push(helper);

    let out = translate_image(&image, Options::default()).unwrap();

    // the GOT-indirect call became a direct one
    assert!(out.contains("f_helper(mem, sp"), "{out}");
    // the extern went through its wrapper with its u(p) signature
    assert!(out.contains("v0 = wrapper_strlen(mem, a0);"), "{out}");
    // both functions are declared and defined
    assert!(out.contains("static uint32_t f_main(uint8_t *mem, uint32_t sp"), "{out}");
    assert!(out.contains("static uint32_t f_helper(uint8_t *mem, uint32_t sp, uint32_t a0, uint32_t a1)"), "{out}");
    // harness present
    assert!(out.contains("int run(uint8_t *mem, int argc, char *argv[]) {"), "{out}");
    // data sections serialized
    assert!(out.contains("0x68690000,"), "{out}");

    // every goto has a matching label in the output
    for (pos, _) in out.match_indices("goto L") {
        let tail = &out[pos + 5..];
        let label: String = tail
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        assert!(
            out.contains(&format!("{label}:")),
            "dangling goto {label} in output"
        );
    }
}

#[test]
fn conservative_mode_hoists_callee_saved() {
    let text = [encode_addiu(REG_V0, REG_ZERO, 0), encode_jr(REG_RA), 0];
    let mut image = BinaryImage {
        text: Section {
            vaddr: TEXT_BASE,
            data: words_to_bytes(&text),
        },
        data: Some(Section {
            vaddr: DATA_BASE,
            data: words_to_bytes(&[0, 0]),
        }),
        gp_value: GP_VALUE,
        gp_value_adj: 0x7ff0,
        main_addr: TEXT_BASE,
        ..BinaryImage::default()
    };
    image.symbol_names.insert(TEXT_BASE, "main".to_string());
    image.symbol_names.insert(DATA_BASE, "__Argc".to_string());
    image
        .symbol_names
        .insert(DATA_BASE + 4, "__Argv".to_string());
    image.text_function_syms.push(TEXT_BASE);

    let options = Options {
        conservative: true,
        ..Options::default()
    };
    let out = translate_image(&image, options).unwrap();

    assert!(out.contains("static uint32_t s0, s1, s2, s3, s4, s5, s6, s7, fp;\n"), "{out}");
    assert!(out.contains("gp = 0x10000, ra = 0x10000;"), "{out}");
    // no dead-code annotations in conservative mode
    assert!(!out.contains("fdead"), "{out}");
}
