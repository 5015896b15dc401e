//! The code image: a fixed-capacity, address-indexed array of code words
//! with per-word emission metadata.

use bitflags::bitflags;

use crate::constants::MAX_PROGRAM;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CodeFlags: u8 {
        const VALID = rpudbg::code_flags::VALID;
        const FILE_INFO = rpudbg::code_flags::FILE_INFO;
        const CAN_MAP = rpudbg::code_flags::CAN_MAP;
    }
}

/// Macro provenance for a code word produced by an expansion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MacroRef {
    /// Index into the macro table.
    pub macro_index: usize,
    /// Zero-based line within the macro body.
    pub line: usize,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CodeWord {
    pub word: u32,
    pub flags: CodeFlags,
    pub file_index: u16,
    pub line: u32,
    /// Echo of the slot's own address. A slot counts as written only when
    /// this matches its index; the array is cleared once per run, so this
    /// doubles as the sparse-initialization check.
    pub addr: u32,
    pub macro_ref: Option<MacroRef>,
}

pub struct CodeImage {
    words: Vec<CodeWord>,
}

impl CodeImage {
    pub fn new() -> Self {
        Self {
            words: vec![CodeWord::default(); MAX_PROGRAM],
        }
    }

    pub fn get(&self, addr: usize) -> &CodeWord {
        &self.words[addr]
    }

    pub fn get_mut(&mut self, addr: usize) -> &mut CodeWord {
        &mut self.words[addr]
    }

    /// Address lookup guarded by the written-range bound and the
    /// self-address tag, so stale or never-written slots never leak into
    /// the outputs.
    pub fn info(&self, addr: u32, code_len: i32) -> Option<&CodeWord> {
        if (addr as i64) < (code_len as i64) {
            let w = &self.words[addr as usize];
            if w.addr == addr {
                return Some(w);
            }
        }
        None
    }
}

impl Default for CodeImage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_slots_fail_the_self_tag_check() {
        let mut image = CodeImage::new();
        let w = image.get_mut(9);
        w.addr = 9;
        w.word = 0x1234_5678;
        w.flags = CodeFlags::VALID;

        assert!(image.info(9, 10).is_some());
        // Slot 5 was never written; its tag still reads 0.
        assert!(image.info(5, 10).is_none());
        // Beyond the written range, even a matching tag is rejected.
        assert!(image.info(9, 9).is_none());
    }
}
