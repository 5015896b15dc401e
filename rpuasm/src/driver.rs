//! The two-pass driver: reads the whole source tree twice, dispatching
//! each line to label handling, directives, macros, or opcode encoding.
//! Pass 1 discovers symbols; pass 2 repeats every other effect for final
//! emission. The offsets reached by the two passes must agree, which is
//! what makes forward references resolvable by plain repetition.

use std::io::Write;
use std::path::Path;

use crate::constants::{
    BAD_CODE_WORD, COMPAT_JUMP_WORD, DEFAULT_ORIGIN, ERROR_LIMIT, LABEL_NAME_LEN,
    MAX_CMD_EQUATES, MAX_PROGRAM, MAX_SYNTH_CHAIN,
};
use crate::directive::{self, DotResult};
use crate::image::CodeFlags;
use crate::line::{self, SrcFlags};
use crate::macros;
use crate::ops;
use crate::report::{Level, Reported, SrcCtx};
use crate::session::{CoreGen, Session};
use crate::source::LineRead;
use crate::structs;

/// Run both passes over the file at `input`.
pub fn assemble(s: &mut Session, input: &Path) {
    let input = input.to_path_buf();
    run_passes(s, &mut |s| s.sources.open(None, &input));
}

/// Run both passes over an in-memory buffer.
pub fn assemble_str(s: &mut Session, name: &str, text: &str) {
    run_passes(s, &mut |s| Ok(s.sources.open_virtual(name, text)));
}

fn run_passes(
    s: &mut Session,
    open: &mut dyn FnMut(&mut Session) -> anyhow::Result<usize>,
) {
    let mut offset_pass1 = 0i32;

    while s.rep.errors == 0 && s.pass < 2 {
        s.pass += 1;
        s.rep.pass = s.pass;
        s.code_offset = -1;
        s.entry_point = -1;
        s.have_entry = false;
        s.cond.clear();
        s.macro_depth = 0;

        let defines = s.cfg.defines.clone();
        let cmdline = SrcCtx {
            name: "[CommandLine]".to_owned(),
            line: 0,
        };
        for (name, data) in defines.iter().take(MAX_CMD_EQUATES) {
            let _ = directive::create_equate(s, Some(&cmdline), name, data);
        }

        let main_idx = match open(s) {
            Ok(idx) => idx,
            Err(e) => {
                s.rep.report(None, Level::Error, &format!("{:#}", e));
                break;
            }
        };
        process_file(s, main_idx);
        s.sources.close();

        if s.macros.open.is_some() {
            s.rep
                .report(None, Level::Error, "Unterminated macro definition");
            s.macros.open = None;
        }

        // Equates, macros, and structures are rebuilt by pass 2; only
        // labels, the image, and the file registry persist.
        if s.pass == 1 {
            s.equates.clear();
            s.macros.clear();
            s.structs.clear();
            offset_pass1 = s.code_offset;
        }
    }

    if offset_pass1 != s.code_offset {
        s.rep.report(
            None,
            Level::Error,
            "Offset changed between pass 1 and pass 2",
        );
    }
}

/// Process one registered source file to end-of-file. Returns false when
/// processing stopped early (fatal error, error ceiling, or a pass-2
/// line failure).
pub fn process_file(s: &mut Session, idx: usize) -> bool {
    let cond_entry = s.cond.len();
    loop {
        if s.rep.fatal || s.rep.errors >= ERROR_LIMIT {
            eprintln!("Aborting...");
            return false;
        }
        match s.sources.read_line(idx) {
            LineRead::Eof => {
                if s.cond.len() > cond_entry {
                    let ctx = s.sources.ctx_for(idx);
                    s.rep
                        .error(Some(&ctx), "Unterminated conditional directive");
                    s.cond.truncate(cond_entry);
                }
                return true;
            }
            LineRead::Skip => continue,
            LineRead::Line(text) => {
                if dispatch_line(s, &text).is_err() && s.pass == 2 {
                    return false;
                }
            }
        }
    }
}

/// Route one logical line: macro-body capture first, then conditional
/// assembly, then normal processing.
pub fn dispatch_line(s: &mut Session, text: &str) -> Result<(), Reported> {
    if s.macros.capturing() {
        return macros::capture_line(s, text);
    }
    if let Some(kind) = directive::conditional_kind(text) {
        return directive::process_conditional(s, kind, text);
    }
    if !s.cond_live() {
        return Ok(());
    }
    process_line(s, text)
}

fn process_line(s: &mut Session, text: &str) -> Result<(), Reported> {
    let mut text = text.to_owned();
    let mut chain = 0u32;

    // A directive may synthesize replacement text; it re-enters here
    // without consuming further input.
    loop {
        let mut sl = match line::parse_source_line(&text) {
            Ok(sl) => sl,
            Err(e) => return Err(s.error_here(&e.to_string())),
        };

        if sl.flags.contains(SrcFlags::LABEL) {
            validate_offset(s)?;
            let label = sl.label.clone().unwrap_or_default();
            if s.pass == 1 {
                // Label diagnostics do not sink the rest of the line.
                let _ = label_create(s, &label);
            }
            if s.pass == 2 {
                let (fname, fline) = s
                    .sources
                    .current()
                    .map(|f| (f.name.clone(), f.current_line))
                    .unwrap_or_default();
                if let Some(w) = s.listing.as_mut() {
                    let _ = writeln!(
                        w,
                        "{}({:5}) : 0x{:04x} = Label      : {}:",
                        fname, fline, s.code_offset, label
                    );
                }
            }
        }

        if sl.terms.is_empty() {
            return Ok(());
        }

        let is_macro = s.macros.contains(&sl.terms[0]);
        if !is_macro {
            for i in 0..sl.terms.len() {
                match structs::param_process(&s.structs, &sl.terms[i]) {
                    Ok(Some(rewritten)) => sl.terms[i] = rewritten,
                    Ok(None) => {}
                    Err(msg) => {
                        return Err(s.error_here(&format!(
                            "Error in struct parsing parameter {}: {}",
                            i, msg
                        )));
                    }
                }
            }
        }

        // Macro invocations win over the directive-parameter form, so a
        // macro may still take a `.`-leading first argument.
        let directive_form = sl.flags.contains(SrcFlags::DOTCMD1)
            || (sl.flags.contains(SrcFlags::DOTCMD2) && !is_macro);
        if directive_form {
            match directive::dot_command(s, &sl)? {
                DotResult::Consumed => return Ok(()),
                DotResult::Produced(new_text) => {
                    chain += 1;
                    if chain > MAX_SYNTH_CHAIN {
                        return Err(s.error_here("Directive expansion chain too deep"));
                    }
                    text = new_text;
                    continue;
                }
            }
        } else if is_macro {
            return macros::expand(s, &sl.terms);
        } else {
            if ops::process_op(s, &sl.terms).is_err() {
                // Keep addresses aligned across passes: a failed
                // encoding still consumes its slot.
                gen_op(s, &sl.terms, BAD_CODE_WORD);
                return Err(Reported);
            }
            return Ok(());
        }
    }
}

fn label_create(s: &mut Session, name: &str) -> Result<(), Reported> {
    if name.len() >= LABEL_NAME_LEN {
        return Err(s.error_here("Label too long"));
    }
    s.check_name(name)?;
    if let Some(f) = s.sources.current() {
        log::debug!(
            "{}({:5}) : LABEL  : '{}' = {:05}",
            f.name,
            f.current_line,
            name,
            s.code_offset
        );
    }
    s.labels.add(name.to_owned(), s.code_offset);
    Ok(())
}

/// Make sure the code offset is ready to use, claiming the default
/// origin on first touch. Gen0 cores get a compatibility jump in the
/// origin slot; later generations only get a pass-1 warning.
pub fn validate_offset(s: &mut Session) -> Result<(), Reported> {
    if s.code_offset == -1 {
        s.code_offset = DEFAULT_ORIGIN;
        if s.entry_point < 0 {
            s.entry_point = DEFAULT_ORIGIN;
        }
        if s.cfg.core != CoreGen::Gen0 {
            s.warn1_here("Using default code origin of 8");
        } else {
            let (file_index, fname, fline) = match s.sources.current_index() {
                Some(i) => {
                    let f = &s.sources.files[i];
                    (i as u16, f.name.clone(), f.current_line)
                }
                None => (0, String::new(), 0),
            };
            if s.pass == 2 {
                if let Some(w) = s.listing.as_mut() {
                    let _ = writeln!(
                        w,
                        "{}({:5}) : 0x{:04x} = 0x{:08x} :     jmp      #0x9 // legacy mode",
                        fname, fline, s.code_offset, COMPAT_JUMP_WORD
                    );
                }
            }
            let off = s.code_offset as usize;
            let word = s.image.get_mut(off);
            word.flags = CodeFlags::VALID | CodeFlags::FILE_INFO;
            word.file_index = file_index;
            word.line = fline;
            word.addr = off as u32;
            word.macro_ref = None;
            word.word = COMPAT_JUMP_WORD;
            s.code_offset += 1;
        }
    }

    if s.code_offset >= MAX_PROGRAM as i32 {
        return Err(s.fatal_here("Max program size exceeded"));
    }
    Ok(())
}

/// Append one code word with full provenance, echoing it to the raw
/// listing during pass 2.
pub fn gen_op(s: &mut Session, terms: &[String], opcode: u32) {
    if validate_offset(s).is_err() {
        return;
    }

    let (file_index, fname, fline, macro_ref) = match s.sources.current_index() {
        Some(i) => {
            let f = &s.sources.files[i];
            (i as u16, f.name.clone(), f.current_line, f.macro_ref)
        }
        None => (0, String::new(), 0, None),
    };

    if s.pass == 2 {
        let offset = s.code_offset;
        if let Some(w) = s.listing.as_mut() {
            let mut out = format!(
                "{}({:5}) : 0x{:04x} = 0x{:08x} :     {:<8} ",
                fname, fline, offset, opcode, terms[0]
            );
            for (i, term) in terms.iter().enumerate().skip(1) {
                if i > 1 {
                    out.push_str(", ");
                }
                out.push_str(term);
            }
            if opcode == BAD_CODE_WORD {
                out.push_str("  // *** ERROR ***");
            }
            let _ = writeln!(w, "{}", out);
        }
    }

    let off = s.code_offset as usize;
    let word = s.image.get_mut(off);
    word.flags = CodeFlags::VALID | CodeFlags::FILE_INFO | CodeFlags::CAN_MAP;
    word.file_index = file_index;
    word.line = fline;
    word.addr = off as u32;
    word.macro_ref = macro_ref;
    word.word = opcode;

    if s.entry_point < 0 {
        s.entry_point = s.code_offset;
    }
    s.code_offset += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Config;

    fn assemble_test(cfg: Config, text: &str) -> Session {
        let mut s = Session::new(cfg);
        assemble_str(&mut s, "test.rpu", text);
        s
    }

    #[test]
    fn forward_references_resolve_via_the_second_pass() {
        let s = assemble_test(
            Config::default(),
            ".origin 0\n\
             start: ldi r1, 5\n\
             jmp done\n\
             nop\n\
             done: halt\n",
        );
        assert_eq!(s.rep.errors, 0);
        assert_eq!(s.code_offset, 4);
        assert_eq!(s.labels.get("start"), Some(0));
        assert_eq!(s.labels.get("done"), Some(3));
        // jmp encodes the forward label's final address.
        assert_eq!(s.image.get(1).word, 0xa000_0003);
    }

    #[test]
    fn default_origin_emits_compat_jump_on_gen0_only() {
        let s = assemble_test(
            Config {
                core: CoreGen::Gen0,
                ..Config::default()
            },
            "start: mov r1, r2\n",
        );
        assert_eq!(s.rep.errors, 0);
        assert_eq!(s.rep.warnings, 0);
        assert_eq!(s.code_offset, 10);
        assert_eq!(s.image.get(8).word, COMPAT_JUMP_WORD);
        assert!(!s.image.get(8).flags.contains(CodeFlags::CAN_MAP));
        assert_eq!(s.labels.get("start"), Some(9));
        assert_eq!(s.image.get(9).word, 0x0ae1_e2e2);
        assert_eq!(s.entry_point, 8);

        let s = assemble_test(Config::default(), "start: mov r1, r2\n");
        assert_eq!(s.code_offset, 9);
        assert_eq!(s.labels.get("start"), Some(8));
        // Pass 1 warned once about the default origin.
        assert_eq!(s.rep.warnings, 1);
    }

    #[test]
    fn duplicate_labels_are_rejected_once() {
        let s = assemble_test(
            Config::default(),
            ".origin 0\n\
             twice: nop\n\
             twice: nop\n",
        );
        assert_eq!(s.rep.errors, 1);
        // The first definition's address is unaffected.
        assert_eq!(s.labels.get("twice"), Some(0));
    }

    #[test]
    fn call_and_ret_synthesize_jal_and_jmp() {
        let s = assemble_test(
            Config::default(),
            ".origin 0\n\
             .call fn\n\
             .ret\n\
             fn: halt\n",
        );
        assert_eq!(s.rep.errors, 0);
        // jal r30.w0, fn(2)
        assert_eq!(s.image.get(0).word, 0xa19e_0002);
        // jmp r30.w0
        assert_eq!(s.image.get(1).word, 0x2000_009e);
    }

    #[test]
    fn conditional_assembly_follows_defines() {
        let text = ".origin 0\n\
                    .ifdef FEATURE\n\
                    ldi r1, 1\n\
                    .else\n\
                    ldi r1, 2\n\
                    .endif\n";
        let s = assemble_test(Config::default(), text);
        assert_eq!(s.image.get(0).word, 0x24e1_0002);

        let s = assemble_test(
            Config {
                defines: vec![("FEATURE".into(), "1".into())],
                ..Config::default()
            },
            text,
        );
        assert_eq!(s.image.get(0).word, 0x24e1_0001);
    }

    #[test]
    fn failed_encodings_still_consume_a_slot() {
        let s = assemble_test(
            Config::default(),
            ".origin 0\n\
             add r1, r2, 999\n\
             nop\n",
        );
        assert!(s.rep.errors > 0);
        assert_eq!(s.image.get(0).word, BAD_CODE_WORD);
        assert_eq!(s.image.get(1).word, 0);
        assert_eq!(s.code_offset, 2);
    }

    #[test]
    fn error_ceiling_aborts_the_file() {
        let mut text = String::from(".origin 0\n");
        for _ in 0..40 {
            text.push_str("bogus r1\n");
        }
        let s = assemble_test(Config::default(), &text);
        assert_eq!(s.rep.errors, ERROR_LIMIT);
    }

    #[test]
    fn macros_expand_with_unique_labels_and_provenance() {
        let s = assemble_test(
            Config::default(),
            ".origin 0\n\
             .macro spin\n\
             .mparam reg, count=1\n\
             again: sub reg, reg, count\n\
             qbne again, reg, 0\n\
             .endm\n\
             spin r4\n\
             spin r5, 2\n",
        );
        assert_eq!(s.rep.errors, 0);
        assert_eq!(s.code_offset, 4);
        // sub r4, r4, 1 / sub r5, r5, 2
        assert_eq!(s.image.get(0).word, 0x83e4_e401);
        assert_eq!(s.image.get(2).word, 0x83e5_e502);
        // Each expansion branches to its own label.
        assert_eq!(s.image.get(1).word, 0xc5ff_e400);
        assert_eq!(s.image.get(3).word, 0xc5ff_e500);
        // Provenance: emitted from the macro body, lines stamped at the
        // invocation site.
        let w = s.image.get(0);
        assert!(w.macro_ref.is_some());
        assert_eq!(w.line, 7);
        assert_eq!(s.image.get(0).macro_ref.unwrap().line, 0);
        assert_eq!(s.image.get(1).macro_ref.unwrap().line, 1);
    }

    #[test]
    fn entry_point_follows_origin_unless_overridden() {
        let s = assemble_test(
            Config::default(),
            ".origin 0x40\n\
             nop\n",
        );
        assert_eq!(s.entry_point, 0x40);

        let s = assemble_test(
            Config::default(),
            ".origin 0\n\
             .entrypoint main\n\
             nop\n\
             main: halt\n",
        );
        assert_eq!(s.rep.errors, 0);
        assert_eq!(s.entry_point, 1);
    }
}
