//! Two-pass assembler for the RPU embedded core.
//!
//! The same source tree is read twice: pass 1 registers labels while
//! keeping offsets exact, pass 2 re-runs every effect for final
//! emission. Output generators (binary images, C array, hex image,
//! debug database, listings) are pure readers of the finished session.

use std::path::Path;

pub mod constants;
pub mod directive;
pub mod driver;
pub mod equate;
pub mod expr;
pub mod image;
pub mod labels;
pub mod line;
pub mod listing;
pub mod macros;
pub mod ops;
pub mod output;
pub mod report;
pub mod session;
pub mod source;
pub mod structs;

pub use report::{Level, Reported};
pub use session::{Config, CoreGen, Session};

/// Assemble the program rooted at `input`.
///
/// Diagnostics are printed as they occur; inspect the returned session
/// for error/warning counts, the code image, and the symbol table.
pub fn assemble_file(cfg: Config, input: &Path) -> Session {
    let mut s = Session::new(cfg);
    driver::assemble(&mut s, input);
    s
}

/// Assemble a program held in memory (registered under `name`).
pub fn assemble_source(cfg: Config, name: &str, text: &str) -> Session {
    let mut s = Session::new(cfg);
    driver::assemble_str(&mut s, name, text);
    s
}
