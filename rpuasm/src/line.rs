//! Per-line tokenizer: splits one logical source line into an optional
//! label, a command/mnemonic, and comma-delimited parameter terms.

use bitflags::bitflags;
use thiserror::Error;

use crate::constants::{MAX_TOKENS, TOKEN_MAX_LEN};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SrcFlags: u8 {
        /// The line defines a label.
        const LABEL = 0x01;
        /// Term 0 begins with `.` (first-form directive).
        const DOTCMD1 = 0x02;
        /// The first parameter begins with `.` (second-form directive).
        const DOTCMD2 = 0x04;
    }
}

/// One tokenized source line. `terms[0]` is the command/mnemonic; a
/// label-only line has no terms at all.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SrcLine {
    pub flags: SrcFlags,
    pub label: Option<String>,
    pub terms: Vec<String>,
}

impl SrcLine {
    pub fn is_directive(&self) -> bool {
        self.flags.intersects(SrcFlags::DOTCMD1 | SrcFlags::DOTCMD2)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("Syntax error in Cmd/Opcode")]
    BadCommand,
    #[error("Cmd/Opcode too long")]
    CommandTooLong,
    #[error("Two labels found on the same line")]
    DoubleLabel,
    #[error("Too many parameters on line")]
    TooManyParams,
    #[error("Parameter {0} too long")]
    ParamTooLong(usize),
    #[error("Syntax error in parameter {0}")]
    BadParam(usize),
}

/// Whether `c` is legal in a bare identifier. Digits are rejected in the
/// first position.
pub fn label_char(c: u8, first: bool) -> bool {
    if c.is_ascii_alphabetic() || c == b'_' {
        return true;
    }
    !first && c.is_ascii_digit()
}

/// Whether `text` is a bare identifier.
pub fn is_ident(text: &str) -> bool {
    let b = text.as_bytes();
    !b.is_empty() && label_char(b[0], true) && b.iter().all(|&c| label_char(c, false))
}

/// Tokenize one logical line (terminator already stripped, whitespace
/// already trimmed at both ends).
pub fn parse_source_line(src: &str) -> Result<SrcLine, SyntaxError> {
    let b = src.as_bytes();
    let mut i = 0usize;
    let mut line = SrcLine::default();

    let next = |i: &mut usize| -> u8 {
        let c = b.get(*i).copied().unwrap_or(0);
        *i += 1;
        c
    };

    'process_line: loop {
        let mut c = next(&mut i);
        if !label_char(c, true) && c != b'.' {
            return Err(SyntaxError::BadCommand);
        }

        // Term 0: the opcode or command.
        let mut word = Vec::new();
        while label_char(c, false) || c == b'.' {
            if word.len() >= TOKEN_MAX_LEN - 1 {
                return Err(SyntaxError::CommandTooLong);
            }
            word.push(c);
            c = next(&mut i);
        }
        let cmd = String::from_utf8_lossy(&word).into_owned();

        // A colon re-types term 0 as a label; any remaining content is a
        // fresh line in its own right.
        if c == b':' {
            if line.flags.contains(SrcFlags::LABEL) {
                return Err(SyntaxError::DoubleLabel);
            }
            line.flags |= SrcFlags::LABEL;
            line.label = Some(cmd);

            c = b.get(i).copied().unwrap_or(0);
            if c != 0 {
                while c == b' ' || c == b'\t' {
                    i += 1;
                    c = b.get(i).copied().unwrap_or(0);
                }
                continue 'process_line;
            }
            return Ok(line);
        }

        if c != b' ' && c != 0 && c != b'\t' {
            return Err(SyntaxError::BadCommand);
        }
        line.terms.push(cmd);

        // Comma-delimited parameters.
        let mut parm_cnt = 0usize;
        while c != 0 {
            let mut word = Vec::new();
            parm_cnt += 1;
            if parm_cnt == MAX_TOKENS {
                return Err(SyntaxError::TooManyParams);
            }

            while c == b' ' || c == b'\t' {
                c = next(&mut i);
            }

            if !label_char(c, false)
                && !matches!(c, b'.' | b'#' | b'-' | b'(' | b'"' | b'&' | b'*')
            {
                return Err(SyntaxError::BadParam(parm_cnt));
            }

            if parm_cnt == 1 && c == b'.' {
                // Second-form directive: the term also ends at whitespace.
                while c != 0 && c != b',' && c != b' ' && c != b'\t' {
                    if word.len() >= TOKEN_MAX_LEN - 1 {
                        return Err(SyntaxError::ParamTooLong(parm_cnt));
                    }
                    word.push(c);
                    c = next(&mut i);
                }
                if c == b' ' || c == b'\t' {
                    c = b',';
                }
                line.flags |= SrcFlags::DOTCMD2;
            } else {
                while c != 0 && c != b',' {
                    if word.len() >= TOKEN_MAX_LEN - 1 {
                        return Err(SyntaxError::ParamTooLong(parm_cnt));
                    }
                    word.push(c);
                    c = next(&mut i);
                }
            }

            while matches!(word.last(), Some(&b' ') | Some(&b'\t')) {
                word.pop();
            }
            line.terms.push(String::from_utf8_lossy(&word).into_owned());

            if c == b',' {
                c = next(&mut i);
            } else if c != 0 {
                return Err(SyntaxError::BadParam(parm_cnt));
            }
        }

        if line.terms[0].starts_with('.') {
            line.flags |= SrcFlags::DOTCMD1;
        }
        return Ok(line);
    }
}
