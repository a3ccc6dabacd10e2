//! Builders for synthetic binary images used across the test suites.

use mrc_elf::{BinaryImage, BssRange, Section};

use crate::{AnalysisConfig, Program};

pub const TEXT_BASE: u32 = 0x400000;
pub const GP_ADJ: u32 = 0x7ff0;
pub const GP_VALUE: u32 = 0x1000_8000;

pub fn gp_value() -> u32 {
    GP_VALUE
}

fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(words.len() * 4);
    for w in words {
        data.extend_from_slice(&w.to_be_bytes());
    }
    data
}

pub struct ImageBuilder {
    image: BinaryImage,
}

impl ImageBuilder {
    pub fn new() -> ImageBuilder {
        let mut image = BinaryImage {
            text: Section {
                vaddr: TEXT_BASE,
                data: Vec::new(),
            },
            gp_value: GP_VALUE,
            gp_value_adj: GP_ADJ,
            main_addr: TEXT_BASE,
            ..BinaryImage::default()
        };
        image.symbol_names.insert(TEXT_BASE, "main".to_string());
        image.text_function_syms.push(TEXT_BASE);
        ImageBuilder { image }
    }

    pub fn text(mut self, words: &[u32]) -> Self {
        self.image.text.data = words_to_bytes(words);
        self
    }

    pub fn got(mut self, locals: &[u32], globals: &[u32]) -> Self {
        self.image.got_locals = locals.to_vec();
        self.image.got_globals = globals.to_vec();
        self
    }

    pub fn rodata(mut self, vaddr: u32, words: &[u32]) -> Self {
        self.image.rodata = Some(Section {
            vaddr,
            data: words_to_bytes(words),
        });
        self
    }

    pub fn data_section(mut self, vaddr: u32, words: &[u32]) -> Self {
        self.image.data = Some(Section {
            vaddr,
            data: words_to_bytes(words),
        });
        self
    }

    pub fn bss(mut self, vaddr: u32, len: u32) -> Self {
        self.image.bss = Some(BssRange { vaddr, len });
        self
    }

    /// Register a function symbol at a `.text` address.
    pub fn func_symbol(mut self, addr: u32, name: &str) -> Self {
        self.image.symbol_names.insert(addr, name.to_string());
        self.image.text_function_syms.push(addr);
        self
    }

    /// Register a data symbol.
    pub fn symbol(mut self, addr: u32, name: &str) -> Self {
        self.image.symbol_names.insert(addr, name.to_string());
        self
    }

    pub fn main_at(mut self, addr: u32) -> Self {
        self.image.main_addr = addr;
        self
    }

    pub fn mcount(mut self, addr: u32) -> Self {
        self.image.mcount_addr = addr;
        self
    }

    pub fn build(self) -> BinaryImage {
        self.image
    }
}

pub fn program(image: &BinaryImage) -> Program<'_> {
    Program::new(image, AnalysisConfig::default()).expect("test image must have a main")
}
