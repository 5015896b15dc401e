//! Annotated source listing: for every source file touched during the
//! run, interleave its text with the code words it produced, in address
//! order, reconstructing the correlation through macro expansions.

use std::fs;
use std::io::{self, Write};

use crate::image::CodeWord;
use crate::session::Session;

/// Address lookup against the written range plus the per-slot self tag.
pub fn get_info(s: &Session, addr: u32) -> Option<&CodeWord> {
    s.image.info(addr, s.code_offset)
}

pub fn write_source_listing(out: &mut impl Write, s: &Session) -> io::Result<()> {
    for (i, f) in s.sources.files.iter().enumerate() {
        write!(out, "Source File {} : '{}' ", i + 1, f.name)?;
        match fs::read_to_string(f.full_path()) {
            Ok(content) => {
                list_file(out, s, i as u16, &content)?;
                write!(out, "\n\n")?;
            }
            Err(_) => {
                write!(out, "(File Not Found '{}')\n\n", f.full_path())?;
            }
        }
    }
    Ok(())
}

fn list_file(out: &mut impl Write, s: &Session, file_index: u16, content: &str) -> io::Result<()> {
    let lines: Vec<&str> = content.lines().collect();
    let code_len = s.code_offset.max(0) as u32;

    let count = (0..code_len)
        .filter(|&addr| get_info(s, addr).map_or(false, |w| w.file_index == file_index))
        .count();

    if count == 0 {
        write!(out, "(No Output Generated)\n\n")?;
        for (n, line) in lines.iter().enumerate() {
            writeln!(out, "{:5} :                   : {}", n + 1, line)?;
        }
        return Ok(());
    }

    write!(out, "({} Instructions Generated)\n\n", count)?;

    for (n, srcline) in lines.iter().enumerate() {
        let cline = (n + 1) as u32;
        let mut output = false;

        for addr in 0..code_len {
            let Some(w) = get_info(s, addr) else {
                continue;
            };
            if w.file_index != file_index || w.line != cline {
                continue;
            }

            let print_macro = w.macro_ref.is_some() && !s.cfg.list_no_macros;

            if !output {
                write!(out, "{:5} : ", cline)?;
                if print_macro {
                    // Address and code go on the macro line below.
                    write!(out, "{:18}: ", "")?;
                } else {
                    write!(out, "0x{:04x} 0x{:08x} : ", addr, w.word)?;
                }
                writeln!(out, "{}", srcline)?;
                output = true;
            } else if !print_macro {
                writeln!(out, "      : 0x{:04x} 0x{:08x} :", addr, w.word)?;
            }

            if print_macro {
                if let Some(mref) = w.macro_ref {
                    if let Some((mname, m)) = s.macros.get_index(mref.macro_index) {
                        let line_in_file = m.line_numbers.get(mref.line).copied().unwrap_or(0);
                        write!(
                            out,
                            "{:5} : {:>20}: {} : 0x{:04x} 0x{:08x} : ",
                            cline, mname, line_in_file, addr, w.word
                        )?;
                        if s.cfg.list_original_macros {
                            print_line_from_source(out, s, m.source_index, line_in_file)?;
                        } else {
                            writeln!(
                                out,
                                "{}",
                                m.body.get(mref.line).map(String::as_str).unwrap_or("")
                            )?;
                        }
                    }
                }
            }
        }

        if !output {
            writeln!(out, "{:5} :                   : {}", cline, srcline)?;
        }
    }
    Ok(())
}

/// Re-read one line of a defining source file, for the listing mode
/// that prefers original macro text over the captured body.
fn print_line_from_source(
    out: &mut impl Write,
    s: &Session,
    file_index: usize,
    line: u32,
) -> io::Result<()> {
    let text = s
        .sources
        .files
        .get(file_index)
        .and_then(|f| fs::read_to_string(f.full_path()).ok())
        .and_then(|content| {
            if line == 0 {
                None
            } else {
                content.lines().nth(line as usize - 1).map(str::to_owned)
            }
        });
    match text {
        Some(text) => writeln!(out, "{}", text),
        None => writeln!(out),
    }
}
