//! Dot-command subsystem. A directive either consumes its line outright
//! or synthesizes replacement text that the driver re-dispatches without
//! reading further input.

use std::path::{Path, PathBuf};

use crate::constants::{EQUATE_DATA_LEN, EQUATE_NAME_LEN, MAX_PROGRAM};
use crate::driver;
use crate::expr::{self, Eval};
use crate::line::{is_ident, SrcFlags, SrcLine};
use crate::macros;
use crate::ops::{RegField, Sel};
use crate::report::{Reported, SrcCtx};
use crate::session::{Cond, Session};
use crate::structs;

pub enum DotResult {
    Consumed,
    Produced(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CondKind {
    IfDef,
    IfNDef,
    Else,
    EndIf,
}

/// Recognize a conditional-assembly directive by its first token; these
/// are handled before tokenization so suppressed regions never parse.
pub fn conditional_kind(text: &str) -> Option<CondKind> {
    let first = text.split_whitespace().next()?.to_ascii_lowercase();
    match first.as_str() {
        ".ifdef" => Some(CondKind::IfDef),
        ".ifndef" => Some(CondKind::IfNDef),
        ".else" => Some(CondKind::Else),
        ".endif" => Some(CondKind::EndIf),
        _ => None,
    }
}

pub fn process_conditional(
    s: &mut Session,
    kind: CondKind,
    text: &str,
) -> Result<(), Reported> {
    match kind {
        CondKind::IfDef | CondKind::IfNDef => {
            let name = text.split_whitespace().nth(1).map(str::to_owned);
            let Some(name) = name else {
                return Err(s.error_here("Expected a symbol name after conditional directive"));
            };
            let defined = s.equates.contains(&name);
            let live = if kind == CondKind::IfDef {
                defined
            } else {
                !defined
            };
            let parent_live = s.cond_live();
            s.cond.push(Cond {
                parent_live,
                live,
                seen_else: false,
            });
            Ok(())
        }
        CondKind::Else => {
            if s.cond.is_empty() {
                return Err(s.error_here("'.else' without '.ifdef'"));
            }
            if s.cond.last().map_or(false, |c| c.seen_else) {
                return Err(s.error_here("Duplicate '.else'"));
            }
            if let Some(c) = s.cond.last_mut() {
                c.seen_else = true;
                c.live = !c.live;
            }
            Ok(())
        }
        CondKind::EndIf => {
            if s.cond.pop().is_none() {
                return Err(s.error_here("'.endif' without '.ifdef'"));
            }
            Ok(())
        }
    }
}

fn eval_param(s: &mut Session, term: &str) -> Result<Eval, Reported> {
    match expr::eval(&s.equates, &s.labels, s.pass, term) {
        Ok(v) => Ok(v),
        Err(e) => Err(s.error_here(&e.to_string())),
    }
}

/// Create an equate under an explicit source context (command-line
/// equates use the `[CommandLine]` pseudo-file).
pub fn create_equate(
    s: &mut Session,
    ctx: Option<&SrcCtx>,
    name: &str,
    data: &str,
) -> Result<(), Reported> {
    if !is_ident(name) {
        return Err(s.rep.error(ctx, &format!("Bad equate name '{}'", name)));
    }
    if name.len() >= EQUATE_NAME_LEN {
        return Err(s.rep.error(ctx, "Equate name too long"));
    }
    if data.len() >= EQUATE_DATA_LEN {
        return Err(s.rep.error(ctx, "Equate data too long"));
    }
    s.check_name_at(ctx, name)?;
    log::debug!("EQUATE : '{}' = '{}'", name, data);
    s.equates.add(name.to_owned(), data.to_owned());
    Ok(())
}

/// Split out the name for the name-first (`NAME .directive ...`) form.
fn named<'a>(
    name0: Option<&'a str>,
    params: &'a [String],
) -> Option<(&'a str, &'a [String])> {
    match name0 {
        Some(n) => Some((n, params)),
        None => params.split_first().map(|(n, rest)| (n.as_str(), rest)),
    }
}

pub fn dot_command(s: &mut Session, sl: &SrcLine) -> Result<DotResult, Reported> {
    let first_form = sl.flags.contains(SrcFlags::DOTCMD1);
    let (cmd_idx, name0) = if first_form {
        (0, None)
    } else {
        (1, Some(sl.terms[0].as_str()))
    };
    let cmd = sl.terms[cmd_idx].to_ascii_lowercase();
    let params = &sl.terms[cmd_idx + 1..];

    match cmd.as_str() {
        ".origin" => {
            if params.len() != 1 {
                return Err(s.error_here("'.origin' expects a value"));
            }
            let v = eval_param(s, &params[0])?;
            if !v.resolved {
                return Err(s.error_here("'.origin' must be a defined value"));
            }
            if v.value >= MAX_PROGRAM as u32 {
                return Err(s.error_here("Origin beyond maximum program size"));
            }
            s.code_offset = v.value as i32;
            Ok(DotResult::Consumed)
        }
        ".entrypoint" => {
            if params.len() != 1 {
                return Err(s.error_here("'.entrypoint' expects a value"));
            }
            let v = eval_param(s, &params[0])?;
            if v.resolved {
                if v.value >= MAX_PROGRAM as u32 {
                    return Err(s.error_here("Entry point beyond maximum program size"));
                }
                if s.have_entry {
                    s.warn1_here("Entry point redefined");
                }
                s.entry_point = v.value as i32;
                s.have_entry = true;
            }
            // Unresolved here means a forward label; pass 2 settles it.
            Ok(DotResult::Consumed)
        }
        ".setcallreg" => {
            if params.len() != 1 {
                return Err(s.error_here("'.setcallreg' expects a register field"));
            }
            let reg = RegField::parse(&params[0]);
            match reg {
                Some(r) if matches!(r.sel, Sel::Word(_)) => {
                    s.call_reg = r;
                    s.info_here(&format!("Call register set to {}", r));
                    Ok(DotResult::Consumed)
                }
                _ => Err(s.error_here("Call register must be a 16-bit register field")),
            }
        }
        ".codeword" => {
            if params.len() != 1 {
                return Err(s.error_here("'.codeword' expects a value"));
            }
            let v = eval_param(s, &params[0])?;
            driver::gen_op(s, &sl.terms, v.value);
            Ok(DotResult::Consumed)
        }
        ".include" => {
            let quoted = params.len() == 1
                && params[0].len() >= 2
                && params[0].starts_with('"')
                && params[0].ends_with('"');
            if !quoted {
                return Err(s.error_here("'.include' expects a quoted filename"));
            }
            let rel = params[0][1..params[0].len() - 1].to_owned();
            let Some(path) = resolve_include(s, &rel) else {
                return Err(s.error_here(&format!("Unable to open include file '{}'", rel)));
            };
            s.info_here(&format!("Including '{}'", path.display()));
            let parent = s.sources.current_index();
            let idx = match s.sources.open(parent, &path) {
                Ok(idx) => idx,
                Err(e) => return Err(s.error_here(&format!("{:#}", e))),
            };
            let ok = driver::process_file(s, idx);
            s.sources.close();
            if !ok {
                return Err(Reported);
            }
            Ok(DotResult::Consumed)
        }
        ".equ" | ".set" => {
            let Some((name, rest)) = named(name0, params) else {
                return Err(s.error_here("Expected a name for '.equ'"));
            };
            if rest.is_empty() {
                return Err(s.error_here("Expected a value for '.equ'"));
            }
            let data = rest.join(",");
            let ctx = s.sources.ctx();
            create_equate(s, ctx.as_ref(), name, &data)?;
            Ok(DotResult::Consumed)
        }
        ".macro" => {
            let Some((name, _)) = named(name0, params) else {
                return Err(s.error_here("Expected a macro name"));
            };
            macros::begin(s, name)?;
            Ok(DotResult::Consumed)
        }
        ".endm" => Err(s.error_here("'.endm' outside of a macro definition")),
        ".mparam" => Err(s.error_here("'.mparam' outside of a macro definition")),
        ".struct" => {
            let Some((name, _)) = named(name0, params) else {
                return Err(s.error_here("Expected a structure name"));
            };
            structs::begin(s, name)?;
            Ok(DotResult::Consumed)
        }
        ".u8" | ".u16" | ".u32" => {
            let size = match cmd.as_str() {
                ".u8" => 1,
                ".u16" => 2,
                _ => 4,
            };
            let Some((name, _)) = named(name0, params) else {
                return Err(s.error_here("Expected a field name"));
            };
            structs::field(s, size, name)?;
            Ok(DotResult::Consumed)
        }
        ".ends" => {
            structs::end(s)?;
            Ok(DotResult::Consumed)
        }
        ".assign" => {
            structs::assign(s, params)?;
            Ok(DotResult::Consumed)
        }
        ".call" => {
            if params.len() != 1 {
                return Err(s.error_here("'.call' expects a target"));
            }
            Ok(DotResult::Produced(format!(
                "jal {}, {}",
                s.call_reg, params[0]
            )))
        }
        ".ret" => {
            if !params.is_empty() {
                return Err(s.error_here("'.ret' takes no operands"));
            }
            Ok(DotResult::Produced(format!("jmp {}", s.call_reg)))
        }
        ".ifdef" | ".ifndef" | ".else" | ".endif" => {
            Err(s.error_here("Conditional directives cannot be synthesized"))
        }
        _ => Err(s.error_here(&format!("Unknown directive '{}'", sl.terms[cmd_idx]))),
    }
}

fn resolve_include(s: &Session, rel: &str) -> Option<PathBuf> {
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() {
        return rel_path.is_file().then(|| rel_path.to_path_buf());
    }
    let mut candidates = Vec::new();
    if let Some(f) = s.sources.current() {
        candidates.push(Path::new(&f.base_dir).join(rel));
    }
    for dir in &s.cfg.include_dirs {
        candidates.push(dir.join(rel));
    }
    candidates.push(rel_path.to_path_buf());
    candidates.into_iter().find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Config;

    fn session() -> Session {
        let mut s = Session::new(Config::default());
        s.pass = 1;
        s.rep.pass = 1;
        s.sources.open_virtual("t.rpu", "");
        s
    }

    fn run(s: &mut Session, text: &str) -> Result<DotResult, Reported> {
        let sl = crate::line::parse_source_line(text).unwrap();
        dot_command(s, &sl)
    }

    #[test]
    fn origin_sets_the_code_offset() {
        let mut s = session();
        assert!(matches!(run(&mut s, ".origin 0x20"), Ok(DotResult::Consumed)));
        assert_eq!(s.code_offset, 0x20);
        assert!(run(&mut s, ".origin 0x10000").is_err());
    }

    #[test]
    fn equ_supports_both_forms() {
        let mut s = session();
        run(&mut s, ".equ WIDTH, 16").unwrap();
        run(&mut s, "depth .equ WIDTH * 2").unwrap();
        assert_eq!(s.equates.get("WIDTH"), Some("16"));
        assert_eq!(s.equates.get("depth"), Some("WIDTH * 2"));
        // Redefinition collides in the shared namespace.
        assert!(run(&mut s, ".equ WIDTH, 3").is_err());
    }

    #[test]
    fn call_and_ret_synthesize_through_the_call_register() {
        let mut s = session();
        match run(&mut s, ".call handler").unwrap() {
            DotResult::Produced(text) => assert_eq!(text, "jal r30.w0, handler"),
            _ => panic!("expected synthesis"),
        }
        run(&mut s, ".setcallreg r29.w1").unwrap();
        match run(&mut s, ".ret").unwrap() {
            DotResult::Produced(text) => assert_eq!(text, "jmp r29.w1"),
            _ => panic!("expected synthesis"),
        }
    }

    #[test]
    fn setcallreg_requires_a_word_field() {
        let mut s = session();
        assert!(run(&mut s, ".setcallreg r30").is_err());
        assert!(run(&mut s, ".setcallreg r30.b2").is_err());
        assert!(run(&mut s, ".setcallreg r30.w2").is_ok());
    }

    #[test]
    fn conditionals_nest_and_track_liveness() {
        let mut s = session();
        let ctx = None;
        create_equate(&mut s, ctx, "YES", "1").unwrap();

        process_conditional(&mut s, CondKind::IfDef, ".ifdef YES").unwrap();
        assert!(s.cond_live());
        process_conditional(&mut s, CondKind::IfDef, ".ifdef NO").unwrap();
        assert!(!s.cond_live());
        process_conditional(&mut s, CondKind::Else, ".else").unwrap();
        assert!(s.cond_live());
        process_conditional(&mut s, CondKind::EndIf, ".endif").unwrap();
        process_conditional(&mut s, CondKind::Else, ".else").unwrap();
        assert!(!s.cond_live());
        process_conditional(&mut s, CondKind::EndIf, ".endif").unwrap();
        assert!(process_conditional(&mut s, CondKind::EndIf, ".endif").is_err());
    }

    #[test]
    fn unknown_directive_is_an_error() {
        let mut s = session();
        assert!(run(&mut s, ".frobnicate 1").is_err());
        assert_eq!(s.rep.errors, 1);
    }
}
