//! Stage 1: linear disassembly of `.text`.

use tracing::debug;

use mrc_isa::Instr;

use crate::{Program, RInsn};

/// Decode every 4-byte big-endian word of `.text` into the instruction
/// vector, plus a sentinel NOP so index-plus-one lookups in the later
/// stages never run off the end.
pub fn run(program: &mut Program) {
    let text = &program.image.text;
    let mut insns = Vec::with_capacity(text.data.len() / 4 + 1);

    let mut offset = 0usize;
    while offset < text.data.len() {
        let word = text.word_at(offset);
        insns.push(RInsn::new(Instr::decode(word, text.vaddr + offset as u32)));
        offset += 4;
    }

    let mut sentinel = RInsn::new(Instr::decode(0, text.vaddr + offset as u32));
    sentinel.no_following_successor = true;
    insns.push(sentinel);

    debug!(count = insns.len() - 1, "disassembled text section");
    program.insns = insns;
}

#[cfg(test)]
mod tests {
    use mrc_elf::{BinaryImage, Section};
    use mrc_isa::*;

    use crate::{AnalysisConfig, Program};

    fn image_with_text(words: &[u32]) -> BinaryImage {
        let mut data = Vec::new();
        for w in words {
            data.extend_from_slice(&w.to_be_bytes());
        }
        BinaryImage {
            text: Section {
                vaddr: 0x400000,
                data,
            },
            main_addr: 0x400000,
            ..BinaryImage::default()
        }
    }

    #[test]
    fn test_disassemble_appends_sentinel() {
        let image = image_with_text(&[encode_addu(REG_V0, REG_A0, REG_A1), encode_jr(REG_RA), 0]);
        let mut program = Program::new(&image, AnalysisConfig::default()).unwrap();
        super::run(&mut program);

        assert_eq!(program.insns.len(), 4);
        assert_eq!(program.insns[0].op(), Op::Addu);
        assert_eq!(program.insns[1].op(), Op::Jr);
        let sentinel = program.insns.last().unwrap();
        assert_eq!(sentinel.op(), Op::Nop);
        assert!(sentinel.no_following_successor);
        assert_eq!(sentinel.vram(), 0x40000c);
        assert_eq!(program.addr_to_index(0x400004), 1);
        assert_eq!(program.index_to_vram(1), 0x400004);
    }
}
