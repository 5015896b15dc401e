//! On-disk debug database emitted by the RPU assembler (`*.dbg`).
//!
//! The file is a fixed-layout binary: a header, then one fixed-size record
//! per label, per referenced source file, and per code word. Multi-byte
//! fields are stored little-endian unless the header's big-endian flag is
//! set, in which case every multi-byte field is byte-swapped. The flag
//! describes the *target* core, never the host that wrote the file.

use thiserror::Error;

/// Header file id for format version 3 ("RPU3" when read as little-endian
/// bytes).
pub const FILE_ID_V3: u32 = 0x3355_5052;

/// Header flag: the program was assembled for a big-endian core and all
/// multi-byte fields in this file are big-endian.
pub const FLAG_BIG_ENDIAN: u32 = 0x0001;

pub const LABEL_NAME_LEN: usize = 64;
pub const FILE_NAME_LEN: usize = 128;

pub const HEADER_LEN: usize = 36;
pub const LABEL_RECORD_LEN: usize = 4 + LABEL_NAME_LEN;
pub const FILE_RECORD_LEN: usize = FILE_NAME_LEN;
pub const CODE_RECORD_LEN: usize = 16;

/// Per-word flag bits stored in each code record.
pub mod code_flags {
    /// The slot holds an assembled word.
    pub const VALID: u8 = 0x01;
    /// File index and line number are meaningful.
    pub const FILE_INFO: u8 = 0x02;
    /// The word may be mapped back to source (not synthesized padding).
    pub const CAN_MAP: u8 = 0x04;
}

#[derive(Debug, Error)]
pub enum DbgError {
    #[error("not a debug database (bad file id 0x{0:08x})")]
    BadFileId(u32),
    #[error("debug database truncated")]
    Truncated,
    #[error("debug database record table out of bounds")]
    BadLayout,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    fn put_u16(self, out: &mut Vec<u8>, v: u16) {
        out.extend_from_slice(&match self {
            Endian::Little => v.to_le_bytes(),
            Endian::Big => v.to_be_bytes(),
        });
    }

    fn put_u32(self, out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&match self {
            Endian::Little => v.to_le_bytes(),
            Endian::Big => v.to_be_bytes(),
        });
    }

    fn get_u16(self, b: &[u8]) -> u16 {
        let b: [u8; 2] = [b[0], b[1]];
        match self {
            Endian::Little => u16::from_le_bytes(b),
            Endian::Big => u16::from_be_bytes(b),
        }
    }

    fn get_u32(self, b: &[u8]) -> u32 {
        let b: [u8; 4] = [b[0], b[1], b[2], b[3]];
        match self {
            Endian::Little => u32::from_le_bytes(b),
            Endian::Big => u32::from_be_bytes(b),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DbgLabel {
    pub addr: u32,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DbgFile {
    pub path: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DbgCode {
    pub flags: u8,
    pub file_index: u16,
    pub line: u32,
    pub addr: u32,
    pub word: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DbgImage {
    pub entry_point: u32,
    pub flags: u32,
    pub labels: Vec<DbgLabel>,
    pub files: Vec<DbgFile>,
    pub code: Vec<DbgCode>,
}

impl DbgImage {
    pub fn endian(&self) -> Endian {
        if self.flags & FLAG_BIG_ENDIAN != 0 {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let e = self.endian();
        let label_offset = HEADER_LEN;
        let file_offset = label_offset + self.labels.len() * LABEL_RECORD_LEN;
        let code_offset = file_offset + self.files.len() * FILE_RECORD_LEN;
        let total = code_offset + self.code.len() * CODE_RECORD_LEN;

        let mut out = Vec::with_capacity(total);
        e.put_u32(&mut out, FILE_ID_V3);
        e.put_u32(&mut out, self.labels.len() as u32);
        e.put_u32(&mut out, label_offset as u32);
        e.put_u32(&mut out, self.files.len() as u32);
        e.put_u32(&mut out, file_offset as u32);
        e.put_u32(&mut out, self.code.len() as u32);
        e.put_u32(&mut out, code_offset as u32);
        e.put_u32(&mut out, self.entry_point);
        e.put_u32(&mut out, self.flags);

        for label in &self.labels {
            e.put_u32(&mut out, label.addr);
            put_name(&mut out, &label.name, LABEL_NAME_LEN);
        }
        for file in &self.files {
            put_name(&mut out, &file.path, FILE_NAME_LEN);
        }
        for code in &self.code {
            out.push(code.flags);
            out.push(0);
            e.put_u16(&mut out, code.file_index);
            e.put_u32(&mut out, code.line);
            e.put_u32(&mut out, code.addr);
            e.put_u32(&mut out, code.word);
        }
        out
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self, DbgError> {
        if b.len() < HEADER_LEN {
            return Err(DbgError::Truncated);
        }
        let e = if Endian::Little.get_u32(b) == FILE_ID_V3 {
            Endian::Little
        } else if Endian::Big.get_u32(b) == FILE_ID_V3 {
            Endian::Big
        } else {
            return Err(DbgError::BadFileId(Endian::Little.get_u32(b)));
        };

        let label_count = e.get_u32(&b[4..]) as usize;
        let label_offset = e.get_u32(&b[8..]) as usize;
        let file_count = e.get_u32(&b[12..]) as usize;
        let file_offset = e.get_u32(&b[16..]) as usize;
        let code_count = e.get_u32(&b[20..]) as usize;
        let code_offset = e.get_u32(&b[24..]) as usize;
        let entry_point = e.get_u32(&b[28..]);
        let flags = e.get_u32(&b[32..]);

        let labels_end = label_count
            .checked_mul(LABEL_RECORD_LEN)
            .and_then(|n| n.checked_add(label_offset))
            .ok_or(DbgError::BadLayout)?;
        let files_end = file_count
            .checked_mul(FILE_RECORD_LEN)
            .and_then(|n| n.checked_add(file_offset))
            .ok_or(DbgError::BadLayout)?;
        let code_end = code_count
            .checked_mul(CODE_RECORD_LEN)
            .and_then(|n| n.checked_add(code_offset))
            .ok_or(DbgError::BadLayout)?;
        if labels_end > b.len() || files_end > b.len() || code_end > b.len() {
            return Err(DbgError::Truncated);
        }

        let mut labels = Vec::with_capacity(label_count);
        for i in 0..label_count {
            let rec = &b[label_offset + i * LABEL_RECORD_LEN..];
            labels.push(DbgLabel {
                addr: e.get_u32(rec),
                name: get_name(&rec[4..4 + LABEL_NAME_LEN]),
            });
        }

        let mut files = Vec::with_capacity(file_count);
        for i in 0..file_count {
            let rec = &b[file_offset + i * FILE_RECORD_LEN..];
            files.push(DbgFile {
                path: get_name(&rec[..FILE_NAME_LEN]),
            });
        }

        let mut code = Vec::with_capacity(code_count);
        for i in 0..code_count {
            let rec = &b[code_offset + i * CODE_RECORD_LEN..];
            code.push(DbgCode {
                flags: rec[0],
                file_index: e.get_u16(&rec[2..]),
                line: e.get_u32(&rec[4..]),
                addr: e.get_u32(&rec[8..]),
                word: e.get_u32(&rec[12..]),
            });
        }

        Ok(DbgImage {
            entry_point,
            flags,
            labels,
            files,
            code,
        })
    }
}

fn put_name(out: &mut Vec<u8>, name: &str, field_len: usize) {
    let bytes = name.as_bytes();
    let n = bytes.len().min(field_len - 1);
    out.extend_from_slice(&bytes[..n]);
    out.resize(out.len() + field_len - n, 0);
}

fn get_name(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(flags: u32) -> DbgImage {
        DbgImage {
            entry_point: 8,
            flags,
            labels: vec![DbgLabel {
                addr: 9,
                name: "start".into(),
            }],
            files: vec![DbgFile {
                path: "src/boot.rpu".into(),
            }],
            code: vec![
                DbgCode {
                    flags: code_flags::VALID | code_flags::FILE_INFO,
                    file_index: 0,
                    line: 1,
                    addr: 8,
                    word: 0xa000_0009,
                },
                DbgCode {
                    flags: code_flags::VALID | code_flags::FILE_INFO | code_flags::CAN_MAP,
                    file_index: 0,
                    line: 2,
                    addr: 9,
                    word: 0x0a01_0202,
                },
            ],
        }
    }

    #[test]
    fn round_trip_little_endian() {
        let img = sample(0);
        let parsed = DbgImage::from_bytes(&img.to_bytes()).unwrap();
        assert_eq!(img, parsed);
    }

    #[test]
    fn round_trip_big_endian() {
        let img = sample(FLAG_BIG_ENDIAN);
        let bytes = img.to_bytes();
        // File id must be byte-swapped on disk for a big-endian target.
        assert_eq!(&bytes[..4], &FILE_ID_V3.to_be_bytes());
        let parsed = DbgImage::from_bytes(&bytes).unwrap();
        assert_eq!(img, parsed);
    }

    #[test]
    fn label_record_layout() {
        let img = sample(0);
        let bytes = img.to_bytes();
        let rec = &bytes[HEADER_LEN..];
        assert_eq!(&rec[..4], &9u32.to_le_bytes());
        assert_eq!(&rec[4..9], b"start");
        assert_eq!(rec[9], 0);
    }

    #[test]
    fn rejects_bad_file_id() {
        let mut bytes = sample(0).to_bytes();
        bytes[0] = 0xee;
        assert!(matches!(
            DbgImage::from_bytes(&bytes),
            Err(DbgError::BadFileId(_))
        ));
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = sample(0).to_bytes();
        assert!(matches!(
            DbgImage::from_bytes(&bytes[..bytes.len() - 1]),
            Err(DbgError::Truncated)
        ));
    }
}
