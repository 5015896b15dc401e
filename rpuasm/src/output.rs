//! Pure readers of the finished code image: binary images, the C-array
//! header, the hex image, and the debug database.

use std::io::{self, Write};

use crate::constants::PROCESSOR_NAME;
use crate::session::Session;

pub fn default_carray_name() -> String {
    format!("{}code", PROCESSOR_NAME)
}

fn code_len(s: &Session) -> usize {
    s.code_offset.max(0) as usize
}

/// Little-endian (`big == false`) or big-endian binary image, four
/// bytes per word in address order.
pub fn write_binary(out: &mut impl Write, s: &Session, big: bool) -> io::Result<()> {
    for i in 0..code_len(s) {
        let word = s.image.get(i).word;
        let bytes = if big {
            word.to_be_bytes()
        } else {
            word.to_le_bytes()
        };
        out.write_all(&bytes)?;
    }
    Ok(())
}

pub fn write_carray(out: &mut impl Write, s: &Session, name: &str) -> io::Result<()> {
    write!(
        out,
        "\n\n\
         /* This file contains the {0} instructions in a C array which are to  */\n\
         /* be downloaded from the host CPU to the {0} instruction memory.     */\n\
         /* This file is generated by the {0} assembler.                       */\n",
        PROCESSOR_NAME
    )?;
    writeln!(out, "\nconst unsigned int {}[] =  {{", name)?;
    let len = code_len(s);
    for i in 0..len.saturating_sub(1) {
        writeln!(out, "     0x{:08x},", s.image.get(i).word)?;
    }
    if len > 0 {
        write!(out, "     0x{:08x} }};\n\n", s.image.get(len - 1).word)?;
    }
    Ok(())
}

/// Hex image: one word per line.
pub fn write_image_hex(out: &mut impl Write, s: &Session) -> io::Result<()> {
    for i in 0..code_len(s) {
        writeln!(out, "{:08x}", s.image.get(i).word)?;
    }
    Ok(())
}

/// Assemble the debug database from the finished session.
pub fn build_dbg(s: &Session) -> rpudbg::DbgImage {
    let flags = if s.cfg.big_endian {
        rpudbg::FLAG_BIG_ENDIAN
    } else {
        0
    };

    let labels = s
        .labels
        .iter()
        .map(|(name, offset)| rpudbg::DbgLabel {
            addr: offset as u32,
            name: name.to_owned(),
        })
        .collect();

    let files = s
        .sources
        .files
        .iter()
        .map(|f| {
            let joined_len = f.base_dir.len() + f.name.len();
            let path = if f.base_dir == "." || f.base_dir == "./." || joined_len >= rpudbg::FILE_NAME_LEN
            {
                f.name.clone()
            } else {
                format!("{}/{}", f.base_dir, f.name)
            };
            rpudbg::DbgFile { path }
        })
        .collect();

    let code = (0..code_len(s))
        .map(|i| {
            let w = s.image.get(i);
            rpudbg::DbgCode {
                flags: w.flags.bits(),
                file_index: w.file_index,
                line: w.line,
                addr: w.addr,
                word: w.word,
            }
        })
        .collect();

    rpudbg::DbgImage {
        entry_point: s.entry_point as u32,
        flags,
        labels,
        files,
        code,
    }
}

/// Whether the session produced something worth writing: no errors and
/// at least one instruction word.
pub fn have_output(s: &Session) -> bool {
    s.rep.errors == 0 && s.code_offset > 0
}
