//! The assembler session: every piece of run-wide state, owned in one
//! place and threaded by reference through the driver and its callees.

use std::io::Write;
use std::path::PathBuf;

use crate::equate::Equates;
use crate::image::CodeImage;
use crate::labels::Labels;
use crate::macros::MacroTable;
use crate::ops::{self, RegField, Sel};
use crate::report::{Reported, Reporter};
use crate::source::Sources;
use crate::structs::StructTable;

/// Instruction-set generation of the target core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CoreGen {
    Gen0,
    Gen1,
    Gen2,
    Gen3,
}

impl CoreGen {
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(CoreGen::Gen0),
            1 => Some(CoreGen::Gen1),
            2 => Some(CoreGen::Gen2),
            3 => Some(CoreGen::Gen3),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub core: CoreGen,
    pub big_endian: bool,
    pub bin: bool,
    pub bib: bool,
    pub carray: bool,
    pub img: bool,
    pub dbg: bool,
    pub listing: bool,
    pub source_listing: bool,
    pub list_no_macros: bool,
    pub list_original_macros: bool,
    pub carray_name: Option<String>,
    pub include_dirs: Vec<PathBuf>,
    pub defines: Vec<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreGen::Gen1,
            big_endian: false,
            bin: false,
            bib: false,
            carray: false,
            img: false,
            dbg: false,
            listing: false,
            source_listing: false,
            list_no_macros: false,
            list_original_macros: false,
            carray_name: None,
            include_dirs: Vec::new(),
            defines: Vec::new(),
        }
    }
}

/// One frame of the conditional-assembly stack.
#[derive(Clone, Copy, Debug)]
pub struct Cond {
    pub parent_live: bool,
    pub live: bool,
    pub seen_else: bool,
}

pub struct Session {
    pub cfg: Config,
    pub pass: u8,
    /// Next word address to write; -1 until the first instruction (or an
    /// `.origin`) claims one.
    pub code_offset: i32,
    pub entry_point: i32,
    pub have_entry: bool,
    pub call_reg: RegField,
    pub image: CodeImage,
    pub labels: Labels,
    pub equates: Equates,
    pub macros: MacroTable,
    pub structs: StructTable,
    pub sources: Sources,
    pub rep: Reporter,
    /// Raw listing sink, streamed during pass 2.
    pub listing: Option<Box<dyn Write>>,
    pub cond: Vec<Cond>,
    pub macro_depth: u32,
}

impl Session {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            pass: 0,
            code_offset: -1,
            entry_point: -1,
            have_entry: false,
            call_reg: RegField {
                num: 30,
                sel: Sel::Word(0),
            },
            image: CodeImage::new(),
            labels: Labels::new(),
            equates: Equates::new(),
            macros: MacroTable::new(),
            structs: StructTable::new(),
            sources: Sources::new(),
            rep: Reporter::new(),
            listing: None,
            cond: Vec::new(),
            macro_depth: 0,
        }
    }

    /// Whether lines are currently live with respect to conditional
    /// assembly.
    pub fn cond_live(&self) -> bool {
        self.cond
            .last()
            .map_or(true, |c| c.parent_live && c.live)
    }

    /// Report an error against the current source position.
    pub fn error_here(&mut self, msg: &str) -> Reported {
        let ctx = self.sources.ctx();
        self.rep.error(ctx.as_ref(), msg)
    }

    pub fn fatal_here(&mut self, msg: &str) -> Reported {
        let ctx = self.sources.ctx();
        self.rep.fatal(ctx.as_ref(), msg)
    }

    pub fn warn1_here(&mut self, msg: &str) {
        let ctx = self.sources.ctx();
        self.rep.warn1(ctx.as_ref(), msg);
    }

    pub fn warn2_here(&mut self, msg: &str) {
        let ctx = self.sources.ctx();
        self.rep.warn2(ctx.as_ref(), msg);
    }

    pub fn info_here(&mut self, msg: &str) {
        let ctx = self.sources.ctx();
        self.rep.info(ctx.as_ref(), msg);
    }

    /// Validate that `name` is free across the combined namespace of
    /// reserved words, labels, equates, structures/scopes, and macros.
    pub fn check_name(&mut self, name: &str) -> Result<(), Reported> {
        let ctx = self.sources.ctx();
        self.check_name_at(ctx.as_ref(), name)
    }

    pub fn check_name_at(
        &mut self,
        ctx: Option<&crate::report::SrcCtx>,
        name: &str,
    ) -> Result<(), Reported> {
        if ops::is_reserved(name) {
            return Err(self
                .rep
                .error(ctx, &format!("Illegal use of reserved word '{}'", name)));
        }
        if self.labels.contains(name) {
            return Err(self
                .rep
                .error(ctx, &format!("'{}' is already a label", name)));
        }
        if self.equates.contains(name) {
            return Err(self
                .rep
                .error(ctx, &format!("'{}' is already an equate", name)));
        }
        if self.structs.contains(name) {
            return Err(self
                .rep
                .error(ctx, &format!("'{}' is already a structure or scope", name)));
        }
        if self.macros.contains(name) {
            return Err(self
                .rep
                .error(ctx, &format!("'{}' is already a macro", name)));
        }
        Ok(())
    }
}
