//! Opcode table and operand encoding for the RPU core.
//!
//! Instruction words are 32 bits with the opcode in the top byte; bit 7
//! of the opcode byte marks an immediate second operand. Register
//! operands encode as `(field << 5) | number` with fields b0-b3 (0-3),
//! w0-w2 (4-6), and 7 for the whole register.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::OnceCell;

use crate::constants::reg_regex;
use crate::driver;
use crate::expr::{self, Eval};
use crate::report::Reported;
use crate::session::{CoreGen, Session};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sel {
    Byte(u8),
    Word(u8),
    Full,
}

impl Sel {
    pub fn bits(self) -> u8 {
        match self {
            Sel::Byte(n) => n,
            Sel::Word(n) => 4 + n,
            Sel::Full => 7,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegField {
    pub num: u8,
    pub sel: Sel,
}

impl RegField {
    pub fn parse(text: &str) -> Option<RegField> {
        let caps = reg_regex().captures(text)?;
        let num: u8 = caps[1].parse().ok()?;
        if num > 31 {
            return None;
        }
        let sel = match caps.get(2) {
            None => Sel::Full,
            Some(kind) => {
                let idx: u8 = caps[3].parse().ok()?;
                match (kind.as_str(), idx) {
                    ("b", n) | ("B", n) if n <= 3 => Sel::Byte(n),
                    ("w", n) | ("W", n) if n <= 2 => Sel::Word(n),
                    _ => return None,
                }
            }
        };
        Some(RegField { num, sel })
    }

    pub fn byte(self) -> u8 {
        (self.sel.bits() << 5) | self.num
    }
}

impl fmt::Display for RegField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sel {
            Sel::Full => write!(f, "r{}", self.num),
            Sel::Byte(n) => write!(f, "r{}.b{}", self.num, n),
            Sel::Word(n) => write!(f, "r{}.w{}", self.num, n),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum OpKind {
    Alu3 { op: u8 },
    Alu2 { op: u8 },
    Mov,
    Ldi,
    Jmp,
    Jal,
    Br { op: u8 },
    BrBit { op: u8 },
    Mem { op: u8 },
    Halt,
    Slp,
    Nop,
    Zero,
    Xfr { op: u8 },
    Loop { op: u8 },
}

#[derive(Clone, Copy, Debug)]
pub struct OpDesc {
    pub kind: OpKind,
    pub min_gen: CoreGen,
    pub max_gen: CoreGen,
}

static OPCODES: OnceCell<HashMap<&'static str, OpDesc>> = OnceCell::new();

pub fn op_table() -> &'static HashMap<&'static str, OpDesc> {
    OPCODES.get_or_init(|| {
        use CoreGen::{Gen0, Gen1, Gen2, Gen3};
        let mut t = HashMap::new();
        let mut put = |name: &'static str, kind: OpKind, min_gen: CoreGen, max_gen: CoreGen| {
            t.insert(
                name,
                OpDesc {
                    kind,
                    min_gen,
                    max_gen,
                },
            );
        };

        for (name, op) in [
            ("add", 0x01u8),
            ("adc", 0x02),
            ("sub", 0x03),
            ("suc", 0x04),
            ("rsb", 0x05),
            ("rsc", 0x06),
            ("lsl", 0x07),
            ("lsr", 0x08),
            ("and", 0x09),
            ("or", 0x0a),
            ("xor", 0x0b),
            ("min", 0x0c),
            ("max", 0x0d),
            ("clr", 0x0e),
            ("set", 0x0f),
        ] {
            put(name, OpKind::Alu3 { op }, Gen0, Gen3);
        }
        put("lmbd", OpKind::Alu3 { op: 0x10 }, Gen1, Gen3);
        put("scan", OpKind::Alu3 { op: 0x11 }, Gen1, Gen1);
        put("not", OpKind::Alu2 { op: 0x12 }, Gen0, Gen3);
        put("mov", OpKind::Mov, Gen0, Gen3);
        put("ldi", OpKind::Ldi, Gen0, Gen3);
        put("jmp", OpKind::Jmp, Gen0, Gen3);
        put("jal", OpKind::Jal, Gen0, Gen3);
        for (name, op) in [
            ("qblt", 0x40u8),
            ("qbgt", 0x41),
            ("qble", 0x42),
            ("qbge", 0x43),
            ("qbeq", 0x44),
            ("qbne", 0x45),
            ("qba", 0x46),
        ] {
            put(name, OpKind::Br { op }, Gen0, Gen3);
        }
        put("qbbs", OpKind::BrBit { op: 0x48 }, Gen0, Gen3);
        put("qbbc", OpKind::BrBit { op: 0x49 }, Gen0, Gen3);
        put("ld", OpKind::Mem { op: 0x30 }, Gen0, Gen3);
        put("st", OpKind::Mem { op: 0x31 }, Gen0, Gen3);
        put("lfc", OpKind::Mem { op: 0x32 }, Gen0, Gen0);
        put("stc", OpKind::Mem { op: 0x33 }, Gen0, Gen0);
        put("halt", OpKind::Halt, Gen1, Gen3);
        put("slp", OpKind::Slp, Gen1, Gen3);
        put("nop", OpKind::Nop, Gen0, Gen3);
        put("zero", OpKind::Zero, Gen1, Gen3);
        put("xin", OpKind::Xfr { op: 0x60 }, Gen2, Gen3);
        put("xout", OpKind::Xfr { op: 0x61 }, Gen2, Gen3);
        put("xchg", OpKind::Xfr { op: 0x62 }, Gen2, Gen3);
        put("sxin", OpKind::Xfr { op: 0x63 }, Gen3, Gen3);
        put("sxout", OpKind::Xfr { op: 0x64 }, Gen3, Gen3);
        put("sxchg", OpKind::Xfr { op: 0x65 }, Gen3, Gen3);
        put("loop", OpKind::Loop { op: 0x70 }, Gen3, Gen3);
        put("iloop", OpKind::Loop { op: 0x71 }, Gen3, Gen3);
        t
    })
}

/// Whether `name` collides with a mnemonic or register spelling.
pub fn is_reserved(name: &str) -> bool {
    op_table().contains_key(name.to_ascii_lowercase().as_str()) || RegField::parse(name).is_some()
}

fn op_byte(op: u8, imm: bool) -> u32 {
    (op | if imm { 0x80 } else { 0 }) as u32
}

fn arity(s: &mut Session, mn: &str, params: &[String], n: usize) -> Result<(), Reported> {
    if params.len() != n {
        return Err(s.error_here(&format!("'{}' expects {} operand(s)", mn, n)));
    }
    Ok(())
}

fn reg(s: &mut Session, term: &str) -> Result<RegField, Reported> {
    match RegField::parse(term) {
        Some(r) => Ok(r),
        None => Err(s.error_here(&format!("Bad register operand '{}'", term))),
    }
}

/// Evaluate a value operand; a leading `#` or `&` is decorative.
fn value(s: &mut Session, term: &str) -> Result<Eval, Reported> {
    let t = term
        .strip_prefix('#')
        .or_else(|| term.strip_prefix('&'))
        .unwrap_or(term);
    match expr::eval(&s.equates, &s.labels, s.pass, t) {
        Ok(v) => Ok(v),
        Err(e) => Err(s.error_here(&e.to_string())),
    }
}

/// Second operand: register byte, or an 8-bit immediate.
fn op2(s: &mut Session, term: &str) -> Result<(u8, bool), Reported> {
    if let Some(r) = RegField::parse(term) {
        return Ok((r.byte(), false));
    }
    let v = value(s, term)?;
    if v.resolved && v.value > 0xff {
        return Err(s.error_here(&format!("Immediate value out of range (0-255): '{}'", term)));
    }
    Ok(((v.value & 0xff) as u8, true))
}

/// Branch displacement in words from `addr`; forward references encode
/// as 0 in pass 1 and resolve in pass 2.
fn branch_off(s: &mut Session, addr: u32, term: &str) -> Result<u8, Reported> {
    let v = value(s, term)?;
    if !v.resolved {
        return Ok(0);
    }
    let disp = v.value as i64 - addr as i64;
    if !(-128..=127).contains(&disp) {
        return Err(s.error_here(&format!("Branch target out of range: '{}'", term)));
    }
    if disp == 1 {
        s.warn2_here("Branch target is the next instruction");
    }
    Ok(disp as i8 as u8)
}

/// Jump target: `*rN`/`rN` register form, or a 16-bit word address.
/// Returns the low 24 bits of the word plus the immediate marker.
fn jump_target(s: &mut Session, term: &str) -> Result<(u32, bool), Reported> {
    let reg_term = term.strip_prefix('*').unwrap_or(term);
    if let Some(r) = RegField::parse(reg_term) {
        if matches!(r.sel, Sel::Byte(_)) {
            s.warn2_here("Indirect jump through a byte register field");
        }
        return Ok((r.byte() as u32, false));
    }
    let v = value(s, term)?;
    if v.resolved && v.value > 0xffff {
        return Err(s.error_here(&format!("Jump target out of range: '{}'", term)));
    }
    Ok((v.value & 0xffff, true))
}

/// Encode one instruction line and emit its word(s). On any operand or
/// encoding failure the diagnostic is already reported and nothing has
/// been emitted; the driver records the failure sentinel instead.
pub fn process_op(s: &mut Session, terms: &[String]) -> Result<(), Reported> {
    let mn = terms[0].to_ascii_lowercase();
    let desc = match op_table().get(mn.as_str()) {
        Some(desc) => *desc,
        None => return Err(s.error_here(&format!("Unknown instruction '{}'", terms[0]))),
    };

    let gen = s.cfg.core;
    if gen < desc.min_gen || gen > desc.max_gen {
        return Err(s.error_here(&format!(
            "'{}' is not available on core generation {}",
            mn,
            gen.index()
        )));
    }

    driver::validate_offset(s)?;
    let addr = s.code_offset as u32;
    let params = &terms[1..];

    let words: Vec<u32> = match desc.kind {
        OpKind::Alu3 { op } => {
            arity(s, &mn, params, 3)?;
            let rd = reg(s, &params[0])?;
            let rs1 = reg(s, &params[1])?;
            let (b, imm) = op2(s, &params[2])?;
            vec![
                op_byte(op, imm) << 24
                    | (rd.byte() as u32) << 16
                    | (rs1.byte() as u32) << 8
                    | b as u32,
            ]
        }
        OpKind::Alu2 { op } => {
            arity(s, &mn, params, 2)?;
            let rd = reg(s, &params[0])?;
            let rs = reg(s, &params[1])?;
            vec![op_byte(op, false) << 24 | (rd.byte() as u32) << 16 | (rs.byte() as u32) << 8]
        }
        OpKind::Mov => {
            arity(s, &mn, params, 2)?;
            let rd = reg(s, &params[0])?;
            let src = match RegField::parse(&params[1]) {
                Some(r) => r,
                None => {
                    return Err(s.error_here(
                        "'mov' takes a register source; use 'ldi' for immediate values",
                    ))
                }
            };
            vec![
                0x0au32 << 24
                    | (rd.byte() as u32) << 16
                    | (src.byte() as u32) << 8
                    | src.byte() as u32,
            ]
        }
        OpKind::Ldi => {
            arity(s, &mn, params, 2)?;
            let rd = reg(s, &params[0])?;
            let v = value(s, &params[1])?;
            if v.resolved && v.value > 0xffff {
                return Err(s.error_here(&format!(
                    "Immediate value out of range (0-65535): '{}'",
                    params[1]
                )));
            }
            vec![0x24u32 << 24 | (rd.byte() as u32) << 16 | (v.value & 0xffff)]
        }
        OpKind::Jmp => {
            arity(s, &mn, params, 1)?;
            let (target, imm) = jump_target(s, &params[0])?;
            let op: u32 = if imm { 0xa0 } else { 0x20 };
            vec![op << 24 | target]
        }
        OpKind::Jal => {
            arity(s, &mn, params, 2)?;
            let rd = reg(s, &params[0])?;
            let (target, imm) = jump_target(s, &params[1])?;
            let op: u32 = if imm { 0xa1 } else { 0x21 };
            vec![op << 24 | (rd.byte() as u32) << 16 | target]
        }
        OpKind::Br { op } => {
            if op == 0x46 {
                arity(s, &mn, params, 1)?;
                let off = branch_off(s, addr, &params[0])?;
                vec![op_byte(op, false) << 24 | (off as u32) << 16]
            } else {
                arity(s, &mn, params, 3)?;
                let off = branch_off(s, addr, &params[0])?;
                let rs1 = reg(s, &params[1])?;
                let (b, imm) = op2(s, &params[2])?;
                vec![
                    op_byte(op, imm) << 24
                        | (off as u32) << 16
                        | (rs1.byte() as u32) << 8
                        | b as u32,
                ]
            }
        }
        OpKind::BrBit { op } => {
            arity(s, &mn, params, 3)?;
            let off = branch_off(s, addr, &params[0])?;
            let rs1 = reg(s, &params[1])?;
            let (b, imm) = op2(s, &params[2])?;
            if imm && b > 31 {
                return Err(s.error_here(&format!("Bit number out of range (0-31): '{}'", params[2])));
            }
            vec![
                op_byte(op, imm) << 24 | (off as u32) << 16 | (rs1.byte() as u32) << 8 | b as u32,
            ]
        }
        OpKind::Mem { op } => {
            arity(s, &mn, params, 3)?;
            let rd = reg(s, &params[0])?;
            let rbase = reg(s, &params[1])?;
            let v = value(s, &params[2])?;
            if v.resolved && v.value > 0xff {
                return Err(s.error_here(&format!(
                    "Load/store offset out of range (0-255): '{}'",
                    params[2]
                )));
            }
            vec![
                op_byte(op, false) << 24
                    | (rd.byte() as u32) << 16
                    | (rbase.byte() as u32) << 8
                    | (v.value & 0xff),
            ]
        }
        OpKind::Halt => {
            arity(s, &mn, params, 0)?;
            vec![0x2au32 << 24]
        }
        OpKind::Slp => {
            arity(s, &mn, params, 1)?;
            let v = value(s, &params[0])?;
            if v.resolved && v.value > 1 {
                return Err(s.error_here("'slp' mode must be 0 or 1"));
            }
            let mut words = vec![0x2bu32 << 24 | (v.value & 1)];
            if gen <= CoreGen::Gen2 {
                // Early cores need a settle cycle after sleep.
                words.push(0);
            }
            words
        }
        OpKind::Nop => {
            arity(s, &mn, params, 0)?;
            vec![0]
        }
        OpKind::Zero => {
            arity(s, &mn, params, 2)?;
            let rd = reg(s, &params[0])?;
            if rd.sel != Sel::Full {
                return Err(s.error_here("'zero' requires whole registers"));
            }
            let v = value(s, &params[1])?;
            if !v.resolved {
                return Err(s.error_here("'zero' count must be a defined value"));
            }
            if v.value == 0 || rd.num as u32 + v.value > 32 {
                return Err(s.error_here("Register range out of bounds"));
            }
            if gen == CoreGen::Gen1 {
                (0..v.value)
                    .map(|i| {
                        let r = RegField {
                            num: rd.num + i as u8,
                            sel: Sel::Full,
                        };
                        0x24u32 << 24 | (r.byte() as u32) << 16
                    })
                    .collect()
            } else {
                vec![0x2du32 << 24 | (rd.byte() as u32) << 16 | v.value]
            }
        }
        OpKind::Xfr { op } => {
            arity(s, &mn, params, 3)?;
            let dev = value(s, &params[0])?;
            if dev.resolved && dev.value > 0xff {
                return Err(s.error_here(&format!(
                    "Device id out of range (0-255): '{}'",
                    params[0]
                )));
            }
            let rd = reg(s, &params[1])?;
            let count = value(s, &params[2])?;
            if count.resolved && count.value > 0xff {
                return Err(s.error_here(&format!(
                    "Transfer count out of range (0-255): '{}'",
                    params[2]
                )));
            }
            vec![
                op_byte(op, false) << 24
                    | (dev.value & 0xff) << 16
                    | (rd.byte() as u32) << 8
                    | (count.value & 0xff),
            ]
        }
        OpKind::Loop { op } => {
            arity(s, &mn, params, 2)?;
            let off = branch_off(s, addr, &params[0])?;
            let (b, imm) = op2(s, &params[1])?;
            vec![op_byte(op, imm) << 24 | (off as u32) << 16 | b as u32]
        }
    };

    for w in words {
        driver::gen_op(s, terms, w);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Config;
    use pretty_assertions::assert_eq;

    fn session(core: CoreGen) -> Session {
        let mut s = Session::new(Config {
            core,
            ..Config::default()
        });
        s.pass = 2;
        s.rep.pass = 2;
        s.sources.open_virtual("test.rpu", "");
        s.code_offset = 0;
        s
    }

    fn emit(s: &mut Session, line: &str) -> Result<(), Reported> {
        let sl = crate::line::parse_source_line(line).unwrap();
        process_op(s, &sl.terms)
    }

    #[test]
    fn register_field_parsing() {
        assert_eq!(
            RegField::parse("r31"),
            Some(RegField {
                num: 31,
                sel: Sel::Full
            })
        );
        assert_eq!(
            RegField::parse("R2.w1"),
            Some(RegField {
                num: 2,
                sel: Sel::Word(1)
            })
        );
        assert_eq!(RegField::parse("r32"), None);
        assert_eq!(RegField::parse("r1.w3"), None);
        assert_eq!(RegField::parse("r1.b4"), None);
    }

    #[test]
    fn alu_register_and_immediate_forms() {
        let mut s = session(CoreGen::Gen1);
        emit(&mut s, "add r1, r2, r3").unwrap();
        emit(&mut s, "add r1, r2, 5").unwrap();
        assert_eq!(s.image.get(0).word, 0x01e1_e2e3);
        assert_eq!(s.image.get(1).word, 0x81e1_e205);
    }

    #[test]
    fn mov_is_an_or_alias() {
        let mut s = session(CoreGen::Gen1);
        emit(&mut s, "mov r1, r2").unwrap();
        assert_eq!(s.image.get(0).word, 0x0ae1_e2e2);
        assert!(emit(&mut s, "mov r1, 5").is_err());
    }

    #[test]
    fn ldi_and_jmp_forms() {
        let mut s = session(CoreGen::Gen1);
        emit(&mut s, "ldi r4, 0x1234").unwrap();
        emit(&mut s, "jmp 0x9").unwrap();
        emit(&mut s, "jmp *r3").unwrap();
        assert_eq!(s.image.get(0).word, 0x24e4_1234);
        assert_eq!(s.image.get(1).word, 0xa000_0009);
        assert_eq!(s.image.get(2).word, 0x2000_00e3);
    }

    #[test]
    fn branch_displacement_is_relative() {
        let mut s = session(CoreGen::Gen1);
        s.labels.add("back".into(), 0);
        s.code_offset = 4;
        emit(&mut s, "qbne back, r1, 0").unwrap();
        // target 0 from address 4: displacement -4.
        assert_eq!(s.image.get(4).word, 0xc5fc_e100);
    }

    #[test]
    fn generation_gating() {
        let mut s = session(CoreGen::Gen0);
        assert!(emit(&mut s, "halt").is_err());
        assert!(emit(&mut s, "lfc r1, r2, 0").is_ok());

        let mut s = session(CoreGen::Gen2);
        assert!(emit(&mut s, "scan r1, r2, 0").is_err());
        assert!(emit(&mut s, "lfc r1, r2, 0").is_err());
        assert!(emit(&mut s, "xin 1, r2, 4").is_ok());
    }

    #[test]
    fn slp_pads_a_settle_word_before_gen3() {
        let mut s = session(CoreGen::Gen1);
        emit(&mut s, "slp 1").unwrap();
        assert_eq!(s.code_offset, 2);
        assert_eq!(s.image.get(0).word, 0x2b00_0001);
        assert_eq!(s.image.get(1).word, 0);

        let mut s = session(CoreGen::Gen3);
        emit(&mut s, "slp 1").unwrap();
        assert_eq!(s.code_offset, 1);
    }

    #[test]
    fn zero_expands_per_generation() {
        let mut s = session(CoreGen::Gen1);
        emit(&mut s, "zero r4, 2").unwrap();
        assert_eq!(s.code_offset, 2);
        assert_eq!(s.image.get(0).word, 0x24e4_0000);
        assert_eq!(s.image.get(1).word, 0x24e5_0000);

        let mut s = session(CoreGen::Gen2);
        emit(&mut s, "zero r4, 2").unwrap();
        assert_eq!(s.code_offset, 1);
        assert_eq!(s.image.get(0).word, 0x2de4_0002);
    }

    #[test]
    fn immediate_range_is_enforced() {
        let mut s = session(CoreGen::Gen1);
        assert!(emit(&mut s, "add r1, r2, 256").is_err());
        assert!(emit(&mut s, "ldi r1, 0x10000").is_err());
        assert_eq!(s.code_offset, 0);
    }

    #[test]
    fn unknown_instruction_is_an_error() {
        let mut s = session(CoreGen::Gen1);
        assert!(emit(&mut s, "frob r1, r2").is_err());
        assert_eq!(s.rep.errors, 1);
    }
}
