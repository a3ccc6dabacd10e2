//! Recompilation pipeline - image → annotated instructions → C.

use tracing::info;

use mrc_cfg::{disasm, functions, graph, liveness, pointers, resolve, signature};
use mrc_cfg::{AnalysisConfig, Program};
use mrc_elf::BinaryImage;

/// The analysis pipeline. Stages run in a fixed order over the shared
/// instruction vector; [`Pipeline::analyze`] drives them all.
pub struct Pipeline<'a> {
    pub program: Program<'a>,
}

impl<'a> Pipeline<'a> {
    /// Set up the pipeline; functions and labels are seeded from the image.
    pub fn new(image: &'a BinaryImage, config: AnalysisConfig) -> mrc_cfg::Result<Pipeline<'a>> {
        Ok(Pipeline {
            program: Program::new(image, config)?,
        })
    }

    /// Run every analysis stage.
    pub fn analyze(&mut self) -> mrc_cfg::Result<()> {
        disasm::run(&mut self.program);
        pointers::run(&mut self.program);
        resolve::run(&mut self.program)?;
        functions::run(&mut self.program)?;
        graph::run(&mut self.program)?;
        liveness::forward(&mut self.program)?;
        liveness::backward(&mut self.program)?;
        signature::run(&mut self.program);

        info!(
            insns = self.program.insns.len() - 1,
            functions = self.program.functions.len(),
            labels = self.program.label_addresses.len(),
            "analysis complete"
        );
        Ok(())
    }

    /// Lower the analyzed program to C.
    pub fn emit(&mut self, conservative: bool) -> mrc_emit::Result<String> {
        mrc_emit::emit(&mut self.program, conservative)
    }

    /// Statistics for reporting.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            num_insns: self.program.insns.len().saturating_sub(1),
            num_functions: self.program.functions.len(),
            num_labels: self.program.label_addresses.len(),
            num_function_pointers: self.program.data_function_pointers.len()
                + self.program.li_function_pointers.len(),
        }
    }
}

/// Pipeline statistics.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub num_insns: usize,
    pub num_functions: usize,
    pub num_labels: usize,
    pub num_function_pointers: usize,
}
