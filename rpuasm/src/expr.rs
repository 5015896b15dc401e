//! Operand expression evaluation: numeric literals, character literals,
//! equates (resolved recursively), labels, and the usual integer
//! operators over wrapping 32-bit arithmetic.

use anyhow::{bail, Result};

use crate::constants::{num_regex, MAX_EQUATE_DEPTH};
use crate::equate::Equates;
use crate::labels::Labels;
use crate::line::label_char;

/// Evaluation result. `resolved` is false only in pass 1 when an
/// identifier matched nothing yet; such a value is presumed a forward
/// label reference and computes as 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Eval {
    pub value: u32,
    pub resolved: bool,
}

pub fn eval(equates: &Equates, labels: &Labels, pass: u8, text: &str) -> Result<Eval> {
    eval_depth(equates, labels, pass, text, 0)
}

fn eval_depth(
    equates: &Equates,
    labels: &Labels,
    pass: u8,
    text: &str,
    depth: u32,
) -> Result<Eval> {
    let mut cur = Cursor {
        b: text.as_bytes(),
        i: 0,
        equates,
        labels,
        pass,
        depth,
    };
    let out = cur.bitor()?;
    cur.skip_ws();
    if cur.i < cur.b.len() {
        bail!("Syntax error in expression '{}'", text);
    }
    Ok(out)
}

struct Cursor<'a> {
    b: &'a [u8],
    i: usize,
    equates: &'a Equates,
    labels: &'a Labels,
    pass: u8,
    depth: u32,
}

impl<'a> Cursor<'a> {
    fn skip_ws(&mut self) {
        while matches!(self.b.get(self.i), Some(&b' ') | Some(&b'\t')) {
            self.i += 1;
        }
    }

    fn peek(&mut self) -> u8 {
        self.skip_ws();
        self.b.get(self.i).copied().unwrap_or(0)
    }

    fn bitor(&mut self) -> Result<Eval> {
        let mut lhs = self.bitxor()?;
        while self.peek() == b'|' {
            self.i += 1;
            let rhs = self.bitxor()?;
            lhs = combine(lhs, rhs, |a, b| Ok(a | b))?;
        }
        Ok(lhs)
    }

    fn bitxor(&mut self) -> Result<Eval> {
        let mut lhs = self.bitand()?;
        while self.peek() == b'^' {
            self.i += 1;
            let rhs = self.bitand()?;
            lhs = combine(lhs, rhs, |a, b| Ok(a ^ b))?;
        }
        Ok(lhs)
    }

    fn bitand(&mut self) -> Result<Eval> {
        let mut lhs = self.shift()?;
        while self.peek() == b'&' {
            self.i += 1;
            let rhs = self.shift()?;
            lhs = combine(lhs, rhs, |a, b| Ok(a & b))?;
        }
        Ok(lhs)
    }

    fn shift(&mut self) -> Result<Eval> {
        let mut lhs = self.additive()?;
        loop {
            let c = self.peek();
            let left = c == b'<' && self.b.get(self.i + 1) == Some(&b'<');
            let right = c == b'>' && self.b.get(self.i + 1) == Some(&b'>');
            if !left && !right {
                return Ok(lhs);
            }
            self.i += 2;
            let rhs = self.additive()?;
            lhs = combine(lhs, rhs, |a, b| {
                Ok(if left {
                    a.wrapping_shl(b)
                } else {
                    a.wrapping_shr(b)
                })
            })?;
        }
    }

    fn additive(&mut self) -> Result<Eval> {
        let mut lhs = self.multiplicative()?;
        loop {
            match self.peek() {
                b'+' => {
                    self.i += 1;
                    let rhs = self.multiplicative()?;
                    lhs = combine(lhs, rhs, |a, b| Ok(a.wrapping_add(b)))?;
                }
                b'-' => {
                    self.i += 1;
                    let rhs = self.multiplicative()?;
                    lhs = combine(lhs, rhs, |a, b| Ok(a.wrapping_sub(b)))?;
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn multiplicative(&mut self) -> Result<Eval> {
        let mut lhs = self.unary()?;
        loop {
            match self.peek() {
                b'*' => {
                    self.i += 1;
                    let rhs = self.unary()?;
                    lhs = combine(lhs, rhs, |a, b| Ok(a.wrapping_mul(b)))?;
                }
                b'/' => {
                    self.i += 1;
                    let rhs = self.unary()?;
                    lhs = combine(lhs, rhs, |a, b| {
                        if b == 0 {
                            bail!("Division by zero in expression");
                        }
                        Ok(a / b)
                    })?;
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn unary(&mut self) -> Result<Eval> {
        match self.peek() {
            b'-' => {
                self.i += 1;
                let v = self.unary()?;
                Ok(Eval {
                    value: v.value.wrapping_neg(),
                    resolved: v.resolved,
                })
            }
            b'~' => {
                self.i += 1;
                let v = self.unary()?;
                Ok(Eval {
                    value: !v.value,
                    resolved: v.resolved,
                })
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Eval> {
        let c = self.peek();
        if c == b'(' {
            self.i += 1;
            let v = self.bitor()?;
            if self.peek() != b')' {
                bail!("Missing ')' in expression");
            }
            self.i += 1;
            return Ok(v);
        }
        if c == b'\'' {
            return self.char_literal();
        }
        if c.is_ascii_digit() {
            return self.number();
        }
        if label_char(c, true) {
            return self.identifier();
        }
        bail!("Syntax error in expression");
    }

    fn char_literal(&mut self) -> Result<Eval> {
        self.i += 1; // opening quote
        let c = self.b.get(self.i).copied().unwrap_or(0);
        let value = if c == b'\\' {
            self.i += 1;
            match self.b.get(self.i).copied().unwrap_or(0) {
                b'n' => b'\n',
                b't' => b'\t',
                b'r' => b'\r',
                b'0' => 0,
                b'\\' => b'\\',
                b'\'' => b'\'',
                other => bail!("Bad character escape '\\{}'", other as char),
            }
        } else if c == 0 || c == b'\'' {
            bail!("Empty character literal");
        } else {
            c
        };
        self.i += 1;
        if self.b.get(self.i) != Some(&b'\'') {
            bail!("Unterminated character literal");
        }
        self.i += 1;
        Ok(Eval {
            value: value as u32,
            resolved: true,
        })
    }

    fn number(&mut self) -> Result<Eval> {
        let start = self.i;
        while self
            .b
            .get(self.i)
            .map_or(false, |c| c.is_ascii_alphanumeric())
        {
            self.i += 1;
        }
        let text = std::str::from_utf8(&self.b[start..self.i]).unwrap_or("");
        let caps = num_regex()
            .captures(text)
            .ok_or_else(|| anyhow::Error::msg(format!("Bad numeric value '{}'", text)))?;
        let value = if let Some(hex) = caps.name("hex") {
            u32::from_str_radix(hex.as_str(), 16)?
        } else if let Some(bin) = caps.name("bin") {
            u32::from_str_radix(bin.as_str(), 2)?
        } else {
            caps["dec"].parse::<u32>()?
        };
        Ok(Eval {
            value,
            resolved: true,
        })
    }

    fn identifier(&mut self) -> Result<Eval> {
        let start = self.i;
        while self.b.get(self.i).map_or(false, |&c| label_char(c, false)) {
            self.i += 1;
        }
        let name = std::str::from_utf8(&self.b[start..self.i]).unwrap_or("");

        if let Some(data) = self.equates.get(name) {
            if self.depth >= MAX_EQUATE_DEPTH {
                bail!("Equate '{}' expands too deeply", name);
            }
            return eval_depth(self.equates, self.labels, self.pass, data, self.depth + 1);
        }
        if let Some(offset) = self.labels.get(name) {
            return Ok(Eval {
                value: offset as u32,
                resolved: true,
            });
        }
        if self.pass == 1 {
            // Presumed forward label reference; pass 2 will resolve it.
            return Ok(Eval {
                value: 0,
                resolved: false,
            });
        }
        bail!("Unresolved symbol '{}'", name);
    }
}

fn combine(lhs: Eval, rhs: Eval, f: impl FnOnce(u32, u32) -> Result<u32>) -> Result<Eval> {
    Ok(Eval {
        value: f(lhs.value, rhs.value)?,
        resolved: lhs.resolved && rhs.resolved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> (Equates, Labels) {
        let mut equates = Equates::new();
        equates.add("WIDTH".into(), "0x10".into());
        equates.add("DOUBLE".into(), "WIDTH * 2".into());
        let mut labels = Labels::new();
        labels.add("start".into(), 8);
        (equates, labels)
    }

    #[test]
    fn literals_and_precedence() {
        let (e, l) = ctx();
        assert_eq!(eval(&e, &l, 2, "2 + 3 * 4").unwrap().value, 14);
        assert_eq!(eval(&e, &l, 2, "(2 + 3) * 4").unwrap().value, 20);
        assert_eq!(eval(&e, &l, 2, "0x10 | 0b101").unwrap().value, 0x15);
        assert_eq!(eval(&e, &l, 2, "1 << 4").unwrap().value, 16);
        assert_eq!(eval(&e, &l, 2, "'A'").unwrap().value, 65);
        assert_eq!(eval(&e, &l, 2, "-1").unwrap().value, u32::MAX);
    }

    #[test]
    fn equates_resolve_recursively() {
        let (e, l) = ctx();
        assert_eq!(eval(&e, &l, 2, "DOUBLE + 1").unwrap().value, 33);
    }

    #[test]
    fn equate_recursion_is_bounded() {
        let mut e = Equates::new();
        e.add("A".into(), "A + 1".into());
        let l = Labels::new();
        assert!(eval(&e, &l, 2, "A").is_err());
    }

    #[test]
    fn labels_resolve() {
        let (e, l) = ctx();
        assert_eq!(eval(&e, &l, 2, "start + 2").unwrap().value, 10);
    }

    #[test]
    fn unknown_symbol_is_forward_reference_in_pass_one_only() {
        let (e, l) = ctx();
        let v = eval(&e, &l, 1, "later").unwrap();
        assert!(!v.resolved);
        assert_eq!(v.value, 0);
        assert!(eval(&e, &l, 2, "later").is_err());
    }

    #[test]
    fn division_by_zero_rejected() {
        let (e, l) = ctx();
        assert!(eval(&e, &l, 2, "4 / 0").is_err());
    }
}
