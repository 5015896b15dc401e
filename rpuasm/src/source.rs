//! Source-file provider: an append-only registry of every file touched
//! during the run (shared by both passes, the debug file, and the
//! listing) plus the open-file stack for nested includes.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::image::MacroRef;
use crate::report::SrcCtx;

#[derive(Debug)]
pub struct SourceFile {
    pub base_dir: String,
    pub name: String,
    pub parent: Option<usize>,
    pub lines: Vec<String>,
    pub cursor: usize,
    /// 1-based line number of the line most recently returned.
    pub current_line: u32,
    pub current_column: u32,
    /// Macro provenance attached to lines dispatched while an expansion
    /// of this file's text is in flight.
    pub macro_ref: Option<MacroRef>,
    pub in_use: bool,
}

impl SourceFile {
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.base_dir, self.name)
    }
}

pub enum LineRead {
    Line(String),
    Skip,
    Eof,
}

#[derive(Debug, Default)]
pub struct Sources {
    pub files: Vec<SourceFile>,
    active: Vec<usize>,
}

impl Sources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `path` and make it the current file. Reopening a known file
    /// (the second pass, or a repeated include) rewinds the existing
    /// registry entry instead of appending a duplicate.
    pub fn open(&mut self, parent: Option<usize>, path: &Path) -> Result<usize> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Unable to open source file '{}'", path.display()))?;

        let base_dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_string_lossy().into_owned(),
            _ => ".".to_owned(),
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        let lines: Vec<String> = text.lines().map(str::to_owned).collect();

        let idx = match self
            .files
            .iter()
            .position(|f| f.base_dir == base_dir && f.name == name)
        {
            Some(idx) => {
                let f = &mut self.files[idx];
                f.lines = lines;
                f.cursor = 0;
                f.current_line = 0;
                f.current_column = 1;
                f.macro_ref = None;
                f.parent = parent;
                f.in_use = true;
                idx
            }
            None => {
                self.files.push(SourceFile {
                    base_dir,
                    name,
                    parent,
                    lines,
                    cursor: 0,
                    current_line: 0,
                    current_column: 1,
                    macro_ref: None,
                    in_use: true,
                });
                self.files.len() - 1
            }
        };
        self.active.push(idx);
        Ok(idx)
    }

    /// Register an in-memory buffer as a source file. Reopening by the
    /// same name rewinds the registry entry, like `open`.
    pub fn open_virtual(&mut self, name: &str, text: &str) -> usize {
        let lines: Vec<String> = text.lines().map(str::to_owned).collect();
        let idx = match self
            .files
            .iter()
            .position(|f| f.base_dir == "." && f.name == name)
        {
            Some(idx) => {
                let f = &mut self.files[idx];
                f.lines = lines;
                f.cursor = 0;
                f.current_line = 0;
                f.current_column = 1;
                f.macro_ref = None;
                f.in_use = true;
                idx
            }
            None => {
                self.files.push(SourceFile {
                    base_dir: ".".to_owned(),
                    name: name.to_owned(),
                    parent: None,
                    lines,
                    cursor: 0,
                    current_line: 0,
                    current_column: 1,
                    macro_ref: None,
                    in_use: true,
                });
                self.files.len() - 1
            }
        };
        self.active.push(idx);
        idx
    }

    pub fn close(&mut self) {
        if let Some(idx) = self.active.pop() {
            self.files[idx].in_use = false;
        }
    }

    pub fn current_index(&self) -> Option<usize> {
        self.active.last().copied()
    }

    pub fn current(&self) -> Option<&SourceFile> {
        self.current_index().map(|i| &self.files[i])
    }

    pub fn current_mut(&mut self) -> Option<&mut SourceFile> {
        let idx = self.current_index()?;
        Some(&mut self.files[idx])
    }

    pub fn ctx(&self) -> Option<SrcCtx> {
        self.current().map(|f| SrcCtx {
            name: f.name.clone(),
            line: f.current_line,
        })
    }

    pub fn ctx_for(&self, idx: usize) -> SrcCtx {
        let f = &self.files[idx];
        SrcCtx {
            name: f.name.clone(),
            line: f.current_line,
        }
    }

    /// Next logical line of `idx`: comments stripped, both ends trimmed.
    /// Blank results are reported as skips so the driver never parses
    /// them.
    pub fn read_line(&mut self, idx: usize) -> LineRead {
        let f = &mut self.files[idx];
        if f.cursor >= f.lines.len() {
            return LineRead::Eof;
        }
        let raw = f.lines[f.cursor].clone();
        f.cursor += 1;
        f.current_line = f.cursor as u32;

        let stripped = strip_comments(&raw);
        let trimmed = stripped.trim_end();
        let lead = trimmed.len() - trimmed.trim_start().len();
        f.current_column = lead as u32 + 1;
        let content = trimmed.trim_start();
        if content.is_empty() {
            LineRead::Skip
        } else {
            LineRead::Line(content.to_owned())
        }
    }
}

/// Cut `//` and `;` comments, honoring string and character quotes.
fn strip_comments(line: &str) -> &str {
    let b = line.as_bytes();
    let mut in_string = false;
    let mut in_char = false;
    let mut i = 0;
    while i < b.len() {
        let c = b[i];
        if in_string {
            if c == b'"' {
                in_string = false;
            }
        } else if in_char {
            if c == b'\'' {
                in_char = false;
            }
        } else {
            match c {
                b'"' => in_string = true,
                b'\'' => in_char = true,
                b';' => return &line[..i],
                b'/' if b.get(i + 1) == Some(&b'/') => return &line[..i],
                _ => {}
            }
        }
        i += 1;
    }
    line
}
