//! Macro definition and expansion: `.macro`/`.mparam`/`.endm` capture,
//! textual argument substitution, and label uniquification per
//! expansion. Expanded lines re-enter normal line dispatch with macro
//! provenance attached, so listings and the debug file can map words
//! back through the expansion.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::constants::MAX_MACRO_DEPTH;
use crate::driver;
use crate::image::MacroRef;
use crate::line::{is_ident, label_char};
use crate::report::Reported;
use crate::session::Session;

const MACRO_MAX_LINES: usize = 128;

#[derive(Debug, Clone)]
pub struct Macro {
    pub name: String,
    pub id: u32,
    /// Declared parameters with optional defaults.
    pub params: Vec<(String, Option<String>)>,
    /// Number of parameters without defaults.
    pub required: usize,
    /// Labels defined in the body, uniquified per expansion.
    pub labels: Vec<String>,
    pub body: Vec<String>,
    /// Line number of each body line in the defining file.
    pub line_numbers: Vec<u32>,
    pub source_index: usize,
    pub expands: u32,
    pub in_use: bool,
}

#[derive(Debug)]
pub struct MacroTable {
    pub macros: IndexMap<String, Macro>,
    pub open: Option<Macro>,
    next_id: u32,
}

impl MacroTable {
    pub fn new() -> Self {
        Self {
            macros: IndexMap::new(),
            open: None,
            next_id: 1,
        }
    }

    pub fn clear(&mut self) {
        self.macros.clear();
        self.open = None;
        self.next_id = 1;
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn capturing(&self) -> bool {
        self.open.is_some()
    }

    pub fn get_index(&self, index: usize) -> Option<(&String, &Macro)> {
        self.macros.get_index(index)
    }
}

impl Default for MacroTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Start capturing a macro body (`.macro name`).
pub fn begin(s: &mut Session, name: &str) -> Result<(), Reported> {
    if s.macros.open.is_some() {
        return Err(s.error_here("Nested macro definition"));
    }
    if !is_ident(name) {
        return Err(s.error_here(&format!("Bad macro name '{}'", name)));
    }
    s.check_name(name)?;
    let id = s.macros.next_id;
    s.macros.next_id += 1;
    s.macros.open = Some(Macro {
        name: name.to_owned(),
        id,
        params: Vec::new(),
        required: 0,
        labels: Vec::new(),
        body: Vec::new(),
        line_numbers: Vec::new(),
        source_index: s.sources.current_index().unwrap_or(0),
        expands: 0,
        in_use: false,
    });
    Ok(())
}

/// Route one raw line while a macro definition is open.
pub fn capture_line(s: &mut Session, text: &str) -> Result<(), Reported> {
    let first = text
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();

    match first.as_str() {
        ".endm" => {
            if let Some(m) = s.macros.open.take() {
                s.macros.macros.insert(m.name.clone(), m);
            }
            Ok(())
        }
        ".macro" => Err(s.error_here("Nested macro definition")),
        ".mparam" => {
            let rest = match text.find(char::is_whitespace) {
                Some(i) => &text[i..],
                None => "",
            };
            let mut parsed = Vec::new();
            for p in rest.split(',') {
                let p = p.trim();
                if p.is_empty() {
                    continue;
                }
                let (name, default) = match p.split_once('=') {
                    Some((n, d)) => (n.trim().to_owned(), Some(d.trim().to_owned())),
                    None => (p.to_owned(), None),
                };
                if !is_ident(&name) {
                    return Err(s.error_here(&format!("Bad macro parameter '{}'", name)));
                }
                parsed.push((name, default));
            }
            if let Some(m) = s.macros.open.as_mut() {
                for (name, default) in parsed {
                    if default.is_none() {
                        m.required += 1;
                    }
                    m.params.push((name, default));
                }
            }
            Ok(())
        }
        _ => {
            let over = s
                .macros
                .open
                .as_ref()
                .map_or(false, |m| m.body.len() >= MACRO_MAX_LINES);
            if over {
                return Err(s.error_here("Macro body too long"));
            }
            let line_number = s.sources.current().map_or(0, |f| f.current_line);
            let label = leading_label(text);
            if let Some(m) = s.macros.open.as_mut() {
                if let Some(label) = label {
                    if !m.labels.contains(&label) {
                        m.labels.push(label);
                    }
                }
                m.body.push(text.to_owned());
                m.line_numbers.push(line_number);
            }
            Ok(())
        }
    }
}

fn leading_label(text: &str) -> Option<String> {
    let b = text.as_bytes();
    if b.is_empty() || !label_char(b[0], true) {
        return None;
    }
    let mut i = 0;
    while i < b.len() && label_char(b[i], false) {
        i += 1;
    }
    if b.get(i) == Some(&b':') {
        Some(text[..i].to_owned())
    } else {
        None
    }
}

/// Expand a macro invocation. Each substituted body line goes back
/// through the driver's dispatch with provenance pointing at this
/// macro and body line; the invocation site's file and line stay the
/// emission context.
pub fn expand(s: &mut Session, terms: &[String]) -> Result<(), Reported> {
    let name = terms[0].clone();
    let args = &terms[1..];

    let snapshot = s.macros.macros.get_full(&name).map(|(idx, _, m)| {
        (
            idx,
            m.id,
            m.params.clone(),
            m.required,
            m.labels.clone(),
            m.body.clone(),
            m.in_use,
        )
    });
    let Some((macro_index, id, params, required, labels, body, in_use)) = snapshot else {
        return Err(s.error_here(&format!("Unknown macro '{}'", name)));
    };
    if in_use {
        return Err(s.error_here(&format!("Recursive expansion of macro '{}'", name)));
    }
    if args.len() > params.len() || args.len() < required {
        return Err(s.error_here(&format!(
            "Macro '{}' expects {} to {} argument(s), got {}",
            name,
            required,
            params.len(),
            args.len()
        )));
    }
    if s.macro_depth >= MAX_MACRO_DEPTH {
        return Err(s.error_here("Macro expansion too deep"));
    }

    let mut expands = 0;
    if let Some(m) = s.macros.macros.get_mut(&name) {
        m.in_use = true;
        m.expands += 1;
        expands = m.expands;
    }

    let mut map: HashMap<String, String> = HashMap::new();
    for (i, (pname, default)) in params.iter().enumerate() {
        if let Some(v) = args.get(i).cloned().or_else(|| default.clone()) {
            map.insert(pname.clone(), v);
        }
    }
    for label in &labels {
        map.insert(label.clone(), format!("{}_{}_{}", label, id, expands));
    }

    s.macro_depth += 1;
    let saved = s.sources.current().and_then(|f| f.macro_ref);
    let mut result = Ok(());
    for (i, line) in body.iter().enumerate() {
        if let Some(f) = s.sources.current_mut() {
            f.macro_ref = Some(MacroRef {
                macro_index,
                line: i,
            });
        }
        let text = substitute(line, &map);
        if let Err(e) = driver::dispatch_line(s, &text) {
            result = Err(e);
            break;
        }
    }
    if let Some(f) = s.sources.current_mut() {
        f.macro_ref = saved;
    }
    s.macro_depth -= 1;
    if let Some(m) = s.macros.macros.get_mut(&name) {
        m.in_use = false;
    }
    result
}

/// Identifier-granular textual substitution; quoted runs pass through.
fn substitute(line: &str, map: &HashMap<String, String>) -> String {
    let b = line.as_bytes();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < b.len() {
        let c = b[i];
        if label_char(c, true) {
            let start = i;
            while i < b.len() && label_char(b[i], false) {
                i += 1;
            }
            let ident = &line[start..i];
            match map.get(ident) {
                Some(rep) => out.push_str(rep),
                None => out.push_str(ident),
            }
        } else if c.is_ascii_digit() {
            let start = i;
            while i < b.len() && (b[i].is_ascii_alphanumeric() || b[i] == b'_') {
                i += 1;
            }
            out.push_str(&line[start..i]);
        } else if c == b'"' || c == b'\'' {
            let start = i;
            i += 1;
            while i < b.len() && b[i] != c {
                i += 1;
            }
            if i < b.len() {
                i += 1;
            }
            out.push_str(&line[start..i]);
        } else if let Some(ch) = line[i..].chars().next() {
            out.push(ch);
            i += ch.len_utf8();
        } else {
            break;
        }
    }
    out
}
