//! Structure and scope handling: `.struct`/`.ends` definitions,
//! `.assign` register-range bindings, and the parameter rewrite that
//! turns `scope.field` into a concrete register subfield.

use indexmap::IndexMap;

use crate::ops::{RegField, Sel};
use crate::report::Reported;
use crate::session::Session;

#[derive(Clone, Copy, Debug)]
pub struct Field {
    pub offset: u32,
    pub size: u32,
}

#[derive(Clone, Debug)]
pub struct StructDef {
    pub name: String,
    pub fields: IndexMap<String, Field>,
    pub size: u32,
}

#[derive(Clone, Debug)]
pub struct Binding {
    pub struct_name: String,
    pub start_reg: u8,
    pub end_reg: u8,
}

#[derive(Debug, Default)]
pub struct StructTable {
    pub defs: IndexMap<String, StructDef>,
    pub binds: IndexMap<String, Binding>,
    pub open: Option<StructDef>,
}

impl StructTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.defs.clear();
        self.binds.clear();
        self.open = None;
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name) || self.binds.contains_key(name)
    }
}

pub fn begin(s: &mut Session, name: &str) -> Result<(), Reported> {
    if s.structs.open.is_some() {
        return Err(s.error_here("Nested structure definition"));
    }
    s.check_name(name)?;
    s.structs.open = Some(StructDef {
        name: name.to_owned(),
        fields: IndexMap::new(),
        size: 0,
    });
    Ok(())
}

pub fn field(s: &mut Session, size: u32, name: &str) -> Result<(), Reported> {
    if s.structs.open.is_none() {
        return Err(s.error_here("Field declaration outside of a structure definition"));
    }
    let dup = s
        .structs
        .open
        .as_ref()
        .map_or(false, |d| d.fields.contains_key(name));
    if dup {
        return Err(s.error_here(&format!("Duplicate structure field '{}'", name)));
    }
    if let Some(d) = s.structs.open.as_mut() {
        // Natural alignment.
        let offset = (d.size + size - 1) / size * size;
        d.fields.insert(name.to_owned(), Field { offset, size });
        d.size = offset + size;
    }
    Ok(())
}

pub fn end(s: &mut Session) -> Result<(), Reported> {
    match s.structs.open.take() {
        Some(def) => {
            s.structs.defs.insert(def.name.clone(), def);
            Ok(())
        }
        None => Err(s.error_here("'.ends' without '.struct'")),
    }
}

pub fn assign(s: &mut Session, params: &[String]) -> Result<(), Reported> {
    if params.len() != 4 {
        return Err(s.error_here("'.assign' expects Struct, rStart, rEnd, name"));
    }
    let struct_name = &params[0];
    let Some(size) = s.structs.defs.get(struct_name).map(|d| d.size) else {
        return Err(s.error_here(&format!("Unknown structure '{}'", struct_name)));
    };
    let (start, end) = match (RegField::parse(&params[1]), RegField::parse(&params[2])) {
        (Some(a), Some(b)) if a.sel == Sel::Full && b.sel == Sel::Full => (a.num, b.num),
        _ => return Err(s.error_here("'.assign' expects whole registers for the range")),
    };
    if start > end {
        return Err(s.error_here("Backwards register range"));
    }
    let capacity = (end - start + 1) as u32 * 4;
    if size > capacity {
        return Err(s.error_here(&format!(
            "Structure '{}' does not fit in r{}..r{}",
            struct_name, start, end
        )));
    }
    let bind_name = params[3].clone();
    s.check_name(&bind_name)?;
    s.structs.binds.insert(
        bind_name,
        Binding {
            struct_name: struct_name.clone(),
            start_reg: start,
            end_reg: end,
        },
    );
    Ok(())
}

/// Rewrite a `scope.field` parameter into its register subfield. Terms
/// that name no known scope pass through untouched; a known scope with
/// an unknown field is an error.
pub fn param_process(st: &StructTable, term: &str) -> Result<Option<String>, String> {
    let (prefix, body) = match term.as_bytes().first() {
        Some(&b'&') | Some(&b'*') | Some(&b'#') => (&term[..1], &term[1..]),
        _ => ("", term),
    };
    let Some(dot) = body.find('.') else {
        return Ok(None);
    };
    let (head, field_name) = (&body[..dot], &body[dot + 1..]);
    let Some(bind) = st.binds.get(head) else {
        return Ok(None);
    };
    let Some(def) = st.defs.get(&bind.struct_name) else {
        return Ok(None);
    };
    let Some(field) = def.fields.get(field_name) else {
        return Err(format!(
            "'{}' is not a field of structure '{}'",
            field_name, bind.struct_name
        ));
    };

    let byte = bind.start_reg as u32 * 4 + field.offset;
    let reg = byte / 4;
    let rem = byte % 4;
    let text = match field.size {
        4 => format!("r{}", reg),
        2 => format!("r{}.w{}", reg, rem),
        _ => format!("r{}.b{}", reg, rem),
    };
    Ok(Some(format!("{}{}", prefix, text)))
}
