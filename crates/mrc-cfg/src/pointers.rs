//! Address-taken discovery: scan the data sections for words that look
//! like code pointers.

use tracing::{debug, trace};

use mrc_elf::Section;

use crate::Program;

/// Scan `.rodata` and `.data`.
pub fn run(program: &mut Program) {
    scan_section(program, |image| image.rodata.as_ref());
    scan_section(program, |image| image.data.as_ref());
    debug!(
        count = program.data_function_pointers.len(),
        "data function pointers"
    );
}

fn scan_section<'a>(
    program: &mut Program<'a>,
    pick: impl Fn(&'a mrc_elf::BinaryImage) -> Option<&'a Section>,
) {
    let Some(section) = pick(program.image) else {
        return;
    };

    let mut offset = 0usize;
    while offset + 4 <= section.data.len() {
        let addr = section.word_at(offset);
        let location = section.vaddr + offset as u32;
        offset += 4;

        // plain integers known to collide with the text range
        if program.config.data_pointer_exceptions.contains(&addr) {
            continue;
        }

        // the procedure table references every function already
        let pt_start = program.image.procedure_table_start;
        let pt_len = program.image.procedure_table_len;
        if pt_len != 0 && location >= pt_start && location < pt_start + pt_len {
            continue;
        }

        if program.text_contains(addr) && addr % 4 == 0 {
            trace!(
                at = format_args!("{location:#x}"),
                target = format_args!("{addr:#x}"),
                "assuming function pointer"
            );
            program.data_function_pointers.push((location, addr));
            program.label_addresses.insert(addr);
            program
                .functions
                .entry(addr)
                .or_default()
                .referenced_by_function_pointer = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use mrc_isa::*;

    use crate::testutil::*;
    use crate::{disasm, pointers};

    #[test]
    fn test_pointer_discovery_and_exclusions() {
        let target = TEXT_BASE + 0x8;
        let image = ImageBuilder::new()
            .text(&[
                encode_jr(REG_RA),
                0,
                encode_jr(REG_RA),
                0,
            ])
            .data_section(
                0x10020000,
                &[
                    target,          // a real code pointer
                    TEXT_BASE + 2,   // misaligned, ignored
                    0x12345678,      // outside .text, ignored
                ],
            )
            .build();
        let mut p = program(&image);
        disasm::run(&mut p);
        pointers::run(&mut p);

        assert_eq!(p.data_function_pointers, vec![(0x10020000, target)]);
        assert!(p.label_addresses.contains(&target));
        assert!(p.functions[&target].referenced_by_function_pointer);
    }

    #[test]
    fn test_known_non_pointer_words_are_skipped() {
        // 0x4a0000 is a configured exception; park .text over it so the word
        // would otherwise qualify
        let image = {
            let mut b = ImageBuilder::new()
                .text(&[encode_jr(REG_RA), 0])
                .data_section(0x10020000, &[0x4a0000]);
            b = b.main_at(0x4a0000);
            let mut image = b.build();
            image.text.vaddr = 0x4a0000;
            image.text_function_syms = vec![0x4a0000];
            image
        };
        let mut p = crate::Program::new(&image, crate::AnalysisConfig::default()).unwrap();
        disasm::run(&mut p);
        pointers::run(&mut p);

        assert!(p.data_function_pointers.is_empty());
    }

    #[test]
    fn test_procedure_table_window_skipped() {
        let target = TEXT_BASE;
        let mut image = ImageBuilder::new()
            .text(&[encode_jr(REG_RA), 0])
            .data_section(0x10020000, &[target, target])
            .build();
        image.procedure_table_start = 0x10020000;
        image.procedure_table_len = 4;
        let mut p = crate::Program::new(&image, crate::AnalysisConfig::default()).unwrap();
        disasm::run(&mut p);
        pointers::run(&mut p);

        // only the word outside the table window survives
        assert_eq!(p.data_function_pointers, vec![(0x10020004, target)]);
    }
}
